pub(crate) mod inode_structs;
pub(crate) mod inode_methods;
pub(crate) mod registry;
