// The block device and the gateway that serializes access to it.

use std::fs::File;
use std::sync::mpsc::{Sender, SyncSender};
use std::sync::{Arc, Mutex};

use crate::layout::Block;

/// One disk operation. The buffer travels to the gateway and comes back on
/// the ack channel once the device is done with it: filled for reads,
/// flushed for writes.
pub struct DiskRequest {
    pub blkno: u64,
    pub data: Box<Block>,
    pub write: bool,
    pub ack: SyncSender<Box<Block>>,
}

/// An in-memory disk: an array of 512-byte pages. Used by tests and the
/// demo binary. Cloning shares the pages, which is how tests fabricate and
/// inspect raw on-disk state while a filesystem is mounted on it.
#[derive(Clone)]
pub struct MemDisk {
    pages: Arc<Mutex<Vec<Block>>>,
}

/// What the gateway is actually talking to.
pub enum DiskMedia {
    /// Pages in memory.
    Memory(MemDisk),
    /// A flat image file, one block per 512 bytes.
    Image(File),
}

/// A handle for submitting requests to the gateway thread. Cheap to clone.
#[derive(Clone)]
pub struct DeviceHandle {
    pub(crate) tx: Sender<DiskRequest>,
}

impl MemDisk {
    pub fn new(nblocks: u64) -> Self {
        let pages = vec![[0u8; crate::layout::BLOCK_SIZE]; nblocks as usize];
        Self {
            pages: Arc::new(Mutex::new(pages)),
        }
    }

    pub fn nblocks(&self) -> u64 {
        self.lock().len() as u64
    }

    /// Copy a page out. Panics past the end of the disk; there is no such
    /// thing as a recoverable device error here.
    pub fn read_page(&self, blkno: u64) -> Block {
        let pages = self.lock();
        match pages.get(blkno as usize) {
            Some(page) => *page,
            None => panic!("read past the end of the disk: block {blkno}"),
        }
    }

    /// Overwrite a page.
    pub fn write_page(&self, blkno: u64, data: &Block) {
        let mut pages = self.lock();
        match pages.get_mut(blkno as usize) {
            Some(page) => *page = *data,
            None => panic!("write past the end of the disk: block {blkno}"),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Block>> {
        self.pages.lock().unwrap_or_else(|e| e.into_inner())
    }
}
