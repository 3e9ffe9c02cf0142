// The actor registry and the shared mount context.
//
// One map, inum to request channel, behind one lock. The lock is held both
// while creating a missing actor and while a dying actor removes itself,
// so a terminating actor and a fresh ensure() of the same inum can never
// produce two actors side by side.

use std::collections::HashMap;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use log::debug;

use crate::alloc::alloc_structs::BlockAllocator;
use crate::cache::cache_structs::CacheHandle;
use crate::inode::inode_structs::{Icache, InodeActor, Ireq};
use crate::journal::journal_structs::JournalHandle;
use crate::layout::inode_block::Inum;

/// Everything a mounted filesystem shares: the component handles, the
/// allocator, the registry, and where the root lives. One per mount, so
/// several filesystems can coexist in one process.
pub(crate) struct FsCtx {
    pub cache: CacheHandle,
    pub journal: JournalHandle,
    pub alloc: BlockAllocator,
    pub registry: Registry,
    pub root: Inum,
}

pub(crate) struct Registry {
    map: Mutex<HashMap<Inum, Sender<Ireq>>>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Inum, Sender<Ireq>>> {
        self.map.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Get the request channel for an inode, creating its actor if it has
/// none. Creation reads the inode block to fill the actor's cache, which
/// panics on an invalid slot: a resolvable inum must point at a live inode.
pub(crate) fn ensure(ctx: &Arc<FsCtx>, inum: Inum) -> Sender<Ireq> {
    assert!(!inum.is_none(), "non-positive inum");
    let mut map = ctx.registry.lock();
    if let Some(tx) = map.get(&inum) {
        return tx.clone();
    }

    let blkno = inum.block();
    let slot = inum.slot();
    let icache = {
        let blk = ctx.cache.bread(blkno);
        let mut inner = blk.lock();
        Icache::fill(&mut inner.data, slot)
    };

    let (tx, rx) = mpsc::channel::<Ireq>();
    let actor = InodeActor {
        ctx: Arc::clone(ctx),
        inum,
        blkno,
        slot,
        icache,
        memref: 0,
    };
    let spawned = thread::Builder::new()
        .name(format!("inode-{}", inum.0))
        .spawn(move || actor.run(rx));
    let _joiner = spawned.expect("could not spawn an inode actor thread");
    debug!("Inode actor {} started.", inum.0);

    let _previous = map.insert(inum, tx.clone());
    tx
}

/// Remove a terminating actor's entry. Called by the actor itself, before
/// it acks the final RefDec.
pub(crate) fn deregister(ctx: &FsCtx, inum: Inum) {
    let mut map = ctx.registry.lock();
    let _removed = map.remove(&inum);
    debug!("Inode actor {} deregistered.", inum.0);
}
