// Allocation state: the free-block bitmap plus the inode-under-construction
// block. One mutex serializes all of it, exactly one bit of the bitmap per
// usable block.

use std::sync::Mutex;

use crate::layout::superblock::Superblock;

pub(crate) struct BlockAllocator {
    /// First bitmap block.
    pub(super) free_start: u64,
    /// Number of bitmap blocks.
    pub(super) free_len: u64,
    /// Block that bit 0 of the bitmap describes.
    pub(super) usable_start: u64,
    pub(super) inner: Mutex<IAllocState>,
}

/// The inode block we are currently handing slots out of. Zero means the
/// next ialloc grabs a fresh block.
pub(super) struct IAllocState {
    pub(super) ifree_blk: u64,
    pub(super) ifree_slot: usize,
}

impl BlockAllocator {
    pub(crate) fn new(sb: &Superblock) -> Self {
        assert!(sb.free_start != 0 && sb.free_len != 0, "fs not initialized");
        Self {
            free_start: sb.free_start,
            free_len: sb.free_len,
            usable_start: sb.usable_start(),
            inner: Mutex::new(IAllocState {
                ifree_blk: 0,
                ifree_slot: 0,
            }),
        }
    }
}
