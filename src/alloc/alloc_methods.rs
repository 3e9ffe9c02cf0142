// Bitmap scanning and inode slot allocation. Every mutation goes through
// log_write, so callers must be inside an admission ticket.

use std::sync::MutexGuard;

use log::debug;

use crate::alloc::alloc_structs::{BlockAllocator, IAllocState};
use crate::cache::cache_structs::CacheHandle;
use crate::journal::journal_structs::JournalHandle;
use crate::layout::BLOCK_SIZE;
use crate::layout::inode_block::INODES_PER_BLOCK;

/// Bits per bitmap block.
const BITS_PER_BLOCK: u64 = (BLOCK_SIZE * 8) as u64;

/// Index of the lowest clear bit of a byte. The caller already knows one
/// exists.
pub(crate) fn free_bit(byte: u8) -> u64 {
    for m in 0..8 {
        if byte & (1 << m) == 0 {
            return m;
        }
    }
    panic!("no clear bit in {byte:#x}?");
}

impl BlockAllocator {
    /// Allocate one block: first clear bit wins. 0 is free, 1 is taken.
    pub(crate) fn balloc(&self, cache: &CacheHandle, journal: &JournalHandle) -> u64 {
        let guard = self.lock();
        self.balloc_locked(&guard, cache, journal)
    }

    /// Return a block to the bitmap.
    pub(crate) fn bfree(&self, cache: &CacheHandle, journal: &JournalHandle, blkno: u64) {
        assert!(blkno >= self.usable_start, "freeing a reserved block");
        let bit_index = blkno - self.usable_start;
        let map_block = self.free_start + bit_index / BITS_PER_BLOCK;
        assert!(
            map_block < self.free_start + self.free_len,
            "block number beyond the bitmap"
        );
        let byte = (bit_index % BITS_PER_BLOCK) as usize / 8;
        let mask = 1u8 << (bit_index % 8);

        let mut guard = self.lock();
        let blk = cache.bread(map_block);
        {
            let mut inner = blk.lock();
            inner.data[byte] &= !mask;
        }
        journal.log_write(&blk);
        debug!("Freed block {blkno}.");

        // If we just freed the block inodes were being carved out of, stop
        // carving: the next ialloc starts a fresh one.
        if guard.ifree_blk == blkno {
            guard.ifree_blk = 0;
        }
    }

    /// Allocate an inode slot: (block, slot). Slots come out of one block
    /// until it runs dry, then a freshly zeroed block takes over.
    pub(crate) fn ialloc(&self, cache: &CacheHandle, journal: &JournalHandle) -> (u64, usize) {
        let mut guard = self.lock();

        if guard.ifree_blk != 0 {
            let blkno = guard.ifree_blk;
            let slot = guard.ifree_slot;
            guard.ifree_slot += 1;
            if guard.ifree_slot >= INODES_PER_BLOCK {
                // hand out a new inode block next time
                guard.ifree_blk = 0;
            }
            return (blkno, slot);
        }

        let fresh = self.balloc_locked(&guard, cache, journal);
        let blk = cache.bread(fresh);
        {
            let mut inner = blk.lock();
            inner.data.fill(0);
        }
        journal.log_write(&blk);

        guard.ifree_blk = fresh;
        guard.ifree_slot = 1;
        (fresh, 0)
    }

    fn balloc_locked(
        &self,
        _proof: &MutexGuard<'_, IAllocState>,
        cache: &CacheHandle,
        journal: &JournalHandle,
    ) -> u64 {
        for i in 0..self.free_len {
            let blk = cache.bread(self.free_start + i);
            let found = {
                let inner = blk.lock();
                inner.data.iter().position(|b| *b != 0xff)
            };
            let Some(byte) = found else {
                continue;
            };
            let bit = {
                let mut inner = blk.lock();
                let bit = free_bit(inner.data[byte]);
                inner.data[byte] |= 1 << bit;
                bit
            };
            journal.log_write(&blk);
            let blkno = self.usable_start + i * BITS_PER_BLOCK + (byte as u64) * 8 + bit;
            debug!("Allocated block {blkno}.");
            return blkno;
        }
        panic!("no free blocks");
    }

    fn lock(&self) -> MutexGuard<'_, IAllocState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
