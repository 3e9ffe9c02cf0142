// The block cache.
//
// Some details about the cache:
// A block's in-memory copy is owned by whoever last acquired it, and only
//  one holder exists at a time. Everyone else queues, FIFO, and receives
//  the same (possibly mutated) buffer when the holder releases it.
// The cache itself is one thread draining one channel. Acquires, releases
//  and finished disk reads all arrive as messages, so the maps inside need
//  no locking of their own.
// Dirty buffers belong to the journal: they stay pinned in the cache until
//  a commit writes them back and clears the flag.

use std::sync::mpsc::{Sender, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::device::device_structs::DeviceHandle;
use crate::layout::Block;

/// How many buffers the cache will hold before it starts evicting.
pub(crate) const CACHE_CAP: usize = 1024;
/// How many buffers one eviction pass throws out.
pub(crate) const EVICT_BATCH: usize = 2;

/// A cached block. The dirty flag is set by `JournalHandle::log_write` and
/// cleared when the buffer is written back.
pub(crate) struct Bbuf {
    pub blkno: u64,
    pub data: Box<Block>,
    pub dirty: bool,
}

/// Shared reference to a cached block. The mutex is uncontended by
/// construction (exclusive handoff), it just keeps the sharing sound.
pub(crate) type BufRef = Arc<Mutex<Bbuf>>;

/// Everything the cache thread reacts to.
pub(crate) enum CacheMsg {
    /// Someone wants a block. Answered now if idle, queued if held.
    Acquire {
        blkno: u64,
        ack: SyncSender<BufRef>,
    },
    /// A holder is done with a block.
    Release { blkno: u64 },
    /// A loader thread finished reading a missing block from the device.
    Loaded { blkno: u64, buf: BufRef },
}

/// Handle for talking to the cache thread. Cheap to clone; also carries the
/// device handle so buffer writeback can go straight to the gateway.
#[derive(Clone)]
pub(crate) struct CacheHandle {
    pub(super) tx: Sender<CacheMsg>,
    pub(super) dev: DeviceHandle,
}

/// Exclusive access to one cached block. Releases itself on drop.
pub(crate) struct BufHandle {
    pub(super) blkno: u64,
    pub(super) buf: BufRef,
    pub(super) cache: CacheHandle,
}

impl BufHandle {
    pub(crate) fn blkno(&self) -> u64 {
        self.blkno
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Bbuf> {
        self.buf.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Flush this buffer to its home on the device and mark it clean. Only
    /// the journal does this; everyone else goes through `log_write`.
    pub(crate) fn writeback(&self) {
        let mut inner = self.lock();
        self.cache.dev.write(self.blkno, &inner.data);
        inner.dirty = false;
    }
}

impl Drop for BufHandle {
    fn drop(&mut self) {
        // The cache thread outlives every handle in practice; if it is
        // somehow gone there is nobody left to hand the block to anyway.
        let _ = self.cache.tx.send(CacheMsg::Release { blkno: self.blkno });
    }
}
