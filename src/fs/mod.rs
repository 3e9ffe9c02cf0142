pub mod fs_structs;
pub mod fs_methods;
pub mod mkfs;

pub use crate::inode::inode_structs::Stat;
pub use fs_structs::{FileHandle, Fs, OpenFlags};
pub use mkfs::{MkfsOptions, mkfs};
