// The cache thread and the acquire/release protocol.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;

use log::debug;

use crate::cache::cache_structs::{
    Bbuf, BufHandle, BufRef, CACHE_CAP, CacheHandle, CacheMsg, EVICT_BATCH,
};
use crate::device::device_structs::DeviceHandle;

impl CacheHandle {
    /// Start the cache thread over a device.
    pub(crate) fn start(dev: DeviceHandle) -> CacheHandle {
        let (tx, rx) = mpsc::channel::<CacheMsg>();
        let state = CacheState {
            blocks: HashMap::new(),
            given: HashSet::new(),
            waiters: HashMap::new(),
            dev: dev.clone(),
            loopback: tx.clone(),
        };
        let spawned = thread::Builder::new()
            .name("block-cache".to_owned())
            .spawn(move || go_cache_loop(state, rx));
        let _joiner = spawned.expect("could not spawn the block cache thread");
        debug!("Block cache started.");
        CacheHandle { tx, dev }
    }

    /// Acquire a block, blocking until we are its only holder. The handle
    /// releases the block when dropped.
    pub(crate) fn bread(&self, blkno: u64) -> BufHandle {
        let (ack, granted) = mpsc::sync_channel(1);
        self.tx
            .send(CacheMsg::Acquire { blkno, ack })
            .expect("block cache is gone");
        let buf = granted.recv().expect("block cache is gone");
        BufHandle {
            blkno,
            buf,
            cache: self.clone(),
        }
    }
}

//
// =========
// Cache thread internals
// =========
//

struct CacheState {
    /// Every cached buffer, held or idle.
    blocks: HashMap<u64, BufRef>,
    /// Blocks somebody currently holds.
    given: HashSet<u64>,
    /// FIFO queues of acquirers waiting for a held block.
    waiters: HashMap<u64, VecDeque<SyncSender<BufRef>>>,
    dev: DeviceHandle,
    /// Our own sender, cloned into loader threads so finished reads come
    /// back through the same queue as everything else.
    loopback: Sender<CacheMsg>,
}

fn go_cache_loop(mut state: CacheState, rx: Receiver<CacheMsg>) {
    while let Ok(msg) = rx.recv() {
        match msg {
            CacheMsg::Acquire { blkno, ack } => go_acquire(&mut state, blkno, ack),
            CacheMsg::Release { blkno } => go_release(&mut state, blkno),
            CacheMsg::Loaded { blkno, buf } => go_loaded(&mut state, blkno, buf),
        }
    }
}

fn go_acquire(state: &mut CacheState, blkno: u64, ack: SyncSender<BufRef>) {
    if state.given.contains(&blkno) {
        // Held. Get in line.
        go_queue_waiter(state, blkno, ack);
        return;
    }

    let _was_new = state.given.insert(blkno);
    match state.blocks.get(&blkno) {
        Some(buf) => {
            // Cached and idle, hand it straight over.
            let _ = ack.send(Arc::clone(buf));
        }
        None => {
            // Miss. Queue the requester first, then kick off a loader
            // thread so the cache keeps serving while the device seeks.
            go_queue_waiter(state, blkno, ack);
            let dev = state.dev.clone();
            let back = state.loopback.clone();
            let spawned = thread::Builder::new()
                .name(format!("block-loader-{blkno}"))
                .spawn(move || {
                    let data = dev.read(blkno);
                    let buf = Arc::new(Mutex::new(Bbuf {
                        blkno,
                        data,
                        dirty: false,
                    }));
                    let _ = back.send(CacheMsg::Loaded { blkno, buf });
                });
            let _joiner = spawned.expect("could not spawn a block loader thread");
        }
    }
}

fn go_release(state: &mut CacheState, blkno: u64) {
    assert!(
        state.given.contains(&blkno),
        "release of a block nobody holds"
    );
    match go_pop_waiter(state, blkno) {
        Some(next) => {
            // Hand the same buffer to the next in line; the block stays
            // given, so no eviction can touch it in between.
            let buf = state
                .blocks
                .get(&blkno)
                .expect("a waited-on block must be cached");
            let _ = next.send(Arc::clone(buf));
        }
        None => {
            let _removed = state.given.remove(&blkno);
        }
    }
}

fn go_loaded(state: &mut CacheState, blkno: u64, buf: BufRef) {
    assert!(
        state.given.contains(&blkno),
        "a loaded block must have been acquired"
    );
    go_evict(state);
    let _previous = state.blocks.insert(blkno, Arc::clone(&buf));
    let next = go_pop_waiter(state, blkno).expect("someone must be waiting on a loaded block");
    let _ = next.send(buf);
}

fn go_queue_waiter(state: &mut CacheState, blkno: u64, ack: SyncSender<BufRef>) {
    state.waiters.entry(blkno).or_default().push_back(ack);
}

fn go_pop_waiter(state: &mut CacheState, blkno: u64) -> Option<SyncSender<BufRef>> {
    state.waiters.get_mut(&blkno).and_then(VecDeque::pop_front)
}

// Throw out a couple of buffers once the cache is over its cap. Only clean,
// unheld buffers are candidates; dirty ones belong to the journal until the
// next commit. The policy is first-found, not LRU.
// TODO: LRU, once eviction shows up in profiles.
fn go_evict(state: &mut CacheState) {
    if state.blocks.len() <= CACHE_CAP {
        return;
    }
    let mut victims: Vec<u64> = Vec::with_capacity(EVICT_BATCH);
    for (blkno, buf) in state.blocks.iter() {
        if state.given.contains(blkno) {
            continue;
        }
        let clean = buf.try_lock().map(|inner| !inner.dirty).unwrap_or(false);
        if clean {
            victims.push(*blkno);
            if victims.len() == EVICT_BATCH {
                break;
            }
        }
    }
    for blkno in victims {
        debug!("Evicting clean block {blkno} from the cache.");
        let _evicted = state.blocks.remove(&blkno);
    }
    assert!(
        state.blocks.len() <= CACHE_CAP + CACHE_CAP / 8,
        "block cache is drowning in dirty or held buffers"
    );
}
