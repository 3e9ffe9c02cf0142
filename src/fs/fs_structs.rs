// The filesystem handle and the types its API speaks.

use std::sync::Arc;

use bitflags::bitflags;

use crate::inode::registry::FsCtx;
use crate::layout::inode_block::Inum;

/// A mounted filesystem. Operations take the paths and handles; all state
/// lives in the shared mount context, so `Fs` is cheap to clone and share
/// across threads.
#[derive(Clone)]
pub struct Fs {
    pub(crate) ctx: Arc<FsCtx>,
}

/// An open file: an inode reference plus the device numbers `open`
/// resolved. Holding one keeps the inode's actor alive; give it back with
/// `Fs::close`.
#[derive(Debug, Clone)]
pub struct FileHandle {
    pub(crate) inum: Inum,
    pub major: u64,
    pub minor: u64,
}

impl FileHandle {
    pub fn ino(&self) -> u64 {
        self.inum.0
    }

    pub fn is_dev(&self) -> bool {
        self.major != 0 || self.minor != 0
    }
}

bitflags! {
    /// Open flags. Absence of write flags means read-only.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const WRONLY    = 1 << 0;
        const RDWR      = 1 << 1;
        const CREAT     = 1 << 2;
        const EXCL      = 1 << 3;
        const TRUNC     = 1 << 4;
        const DIRECTORY = 1 << 5;
    }
}

impl OpenFlags {
    pub fn wants_write(self) -> bool {
        self.intersects(OpenFlags::WRONLY | OpenFlags::RDWR)
    }
}
