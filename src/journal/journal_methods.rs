// The journal thread: admission control, group commit, recovery.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread;

use log::{debug, info};

use crate::cache::cache_structs::{BufHandle, CacheHandle};
use crate::journal::journal_structs::{JournalHandle, LogMsg, MAX_BLKS_PER_OP, Ticket};
use crate::layout::log_header::LogHeaderView;

impl JournalHandle {
    /// Start the journal thread over a log region. `log_len` counts the
    /// header, so `log_len - 1` data blocks are usable. Recovery must
    /// already have run; commit refuses a header with a leftover
    /// recover_num.
    pub(crate) fn start(cache: CacheHandle, log_start: u64, log_len: u64) -> JournalHandle {
        let capacity = (log_len - 1) as usize;
        let tickets = capacity / MAX_BLKS_PER_OP;
        assert!(tickets > 0, "log region too small to admit even one op");

        let (tx, rx) = mpsc::channel::<LogMsg>();
        let state = LogState {
            cache,
            log_start,
            capacity,
            tickets,
            blks: Vec::with_capacity(capacity),
            given: 0,
            outstanding: 0,
            waiting: VecDeque::new(),
            pending_syncs: Vec::new(),
        };
        let spawned = thread::Builder::new()
            .name("fs-journal".to_owned())
            .spawn(move || go_journal_loop(state, rx));
        let _joiner = spawned.expect("could not spawn the journal thread");
        debug!("Journal started: {tickets} tickets per epoch, {capacity} log data blocks.");
        JournalHandle { tx }
    }

    /// Take an admission ticket, blocking until the epoch has room.
    pub(crate) fn op_begin(&self) -> Ticket {
        let (ack, granted) = mpsc::sync_channel(1);
        self.tx
            .send(LogMsg::Begin { ack })
            .expect("journal is gone");
        granted.recv().expect("journal is gone");
        Ticket {
            tx: self.tx.clone(),
        }
    }

    /// Mark a buffer dirty and enqueue it for the current epoch's commit.
    /// Must be called under a ticket.
    pub(crate) fn log_write(&self, buf: &BufHandle) {
        buf.lock().dirty = true;
        self.tx
            .send(LogMsg::Incoming { blkno: buf.blkno() })
            .expect("journal is gone");
    }

    /// Wait until everything submitted before this call is on the device.
    pub(crate) fn sync(&self) {
        let (ack, done) = mpsc::sync_channel(1);
        self.tx.send(LogMsg::Sync { ack }).expect("journal is gone");
        done.recv().expect("journal is gone");
    }
}

/// Mount-time recovery. Runs before the journal thread exists and before
/// any other I/O. Idempotent: interrupting it and running it again lands in
/// the same place, because the log blocks stay put until the final header
/// write.
pub(crate) fn recover(cache: &CacheHandle, log_start: u64) -> u64 {
    let header = cache.bread(log_start);
    let rlen = {
        let mut inner = header.lock();
        LogHeaderView::new(&mut inner.data).recover_num()
    };
    if rlen == 0 {
        info!("No filesystem recovery needed.");
        return 0;
    }

    info!("Starting filesystem recovery of {rlen} blocks...");
    for i in 0..rlen {
        let dest = {
            let mut inner = header.lock();
            LogHeaderView::new(&mut inner.data).dest(i as usize)
        };
        let src = cache.bread(log_start + 1 + i);
        let dst = cache.bread(dest);
        {
            let from = src.lock();
            let mut to = dst.lock();
            *to.data = *from.data;
        }
        dst.writeback();
    }

    {
        let mut inner = header.lock();
        LogHeaderView::new(&mut inner.data).set_recover_num(0);
    }
    header.writeback();
    info!("Restored {rlen} blocks.");
    rlen
}

//
// =========
// Journal thread internals
// =========
//

struct LogState {
    cache: CacheHandle,
    log_start: u64,
    /// Data blocks the log can hold per epoch.
    capacity: usize,
    /// Tickets minted per epoch.
    tickets: usize,
    /// Dirty block numbers pending commit, in first-logged order.
    blks: Vec<u64>,
    /// Tickets handed out this epoch.
    given: usize,
    /// Tickets handed out and not yet returned.
    outstanding: usize,
    /// Ops waiting for the next epoch.
    waiting: VecDeque<SyncSender<()>>,
    /// Sync barriers waiting for the open epoch to commit.
    pending_syncs: Vec<SyncSender<()>>,
}

fn go_journal_loop(mut state: LogState, rx: Receiver<LogMsg>) {
    while let Ok(msg) = rx.recv() {
        match msg {
            LogMsg::Begin { ack } => {
                if state.given < state.tickets {
                    go_grant(&mut state, ack);
                } else {
                    state.waiting.push_back(ack);
                }
            }
            LogMsg::Incoming { blkno } => go_append(&mut state, blkno),
            LogMsg::End => {
                assert!(state.outstanding > 0, "ticket returned that was never granted");
                state.outstanding -= 1;
                if state.outstanding == 0 {
                    go_commit(&mut state);
                    for ack in state.pending_syncs.drain(..) {
                        let _ = ack.send(());
                    }
                    // New epoch: hand queued ops their tickets.
                    state.given = 0;
                    while state.given < state.tickets {
                        match state.waiting.pop_front() {
                            Some(ack) => go_grant(&mut state, ack),
                            None => break,
                        }
                    }
                }
            }
            LogMsg::Sync { ack } => {
                // Everything sent before the Sync has been handled, so all
                // prior epochs are on disk; if an epoch is still open, the
                // answer waits for its commit.
                if state.outstanding == 0 {
                    let _ = ack.send(());
                } else {
                    state.pending_syncs.push(ack);
                }
            }
        }
    }
}

fn go_grant(state: &mut LogState, ack: SyncSender<()>) {
    if ack.send(()).is_ok() {
        state.given += 1;
        state.outstanding += 1;
    }
}

fn go_append(state: &mut LogState, blkno: u64) {
    assert!(state.outstanding > 0, "log write outside an admission ticket");
    // log absorption: a block dirtied twice in one epoch is committed once,
    // with whatever its in-cache copy holds at commit time
    if state.blks.contains(&blkno) {
        return;
    }
    state.blks.push(blkno);
    assert!(state.blks.len() <= state.capacity, "log overflow mid-epoch");
}

// The four-phase commit. Crash-safe at every boundary: before the header
// writeback with recover_num set, nothing happened; after it, recovery
// replays everything.
fn go_commit(state: &mut LogState) {
    if state.blks.is_empty() {
        return;
    }
    debug!("Committing an epoch of {} blocks.", state.blks.len());

    let header = state.cache.bread(state.log_start);
    {
        let mut inner = header.lock();
        let view = LogHeaderView::new(&mut inner.data);
        assert!(view.recover_num() == 0, "commit found an unrecovered log");
    }

    // Phase 1 + 2: destinations into the header copy, block contents into
    // the log's data blocks.
    for (i, &blkno) in state.blks.iter().enumerate() {
        {
            let mut inner = header.lock();
            LogHeaderView::new(&mut inner.data).set_dest(i, blkno);
        }
        let src = state.cache.bread(blkno);
        let dst = state.cache.bread(state.log_start + 1 + i as u64);
        {
            let from = src.lock();
            let mut to = dst.lock();
            *to.data = *from.data;
        }
        dst.writeback();
    }

    // Phase 3: the commit point.
    {
        let mut inner = header.lock();
        LogHeaderView::new(&mut inner.data).set_recover_num(state.blks.len() as u64);
    }
    header.writeback();

    // Phase 4: install in place. A crash anywhere in here is fine, the log
    // has everything.
    for &blkno in &state.blks {
        let blk = state.cache.bread(blkno);
        assert!(blk.lock().dirty, "logged blocks must still be dirty in cache");
        blk.writeback();
    }

    {
        let mut inner = header.lock();
        LogHeaderView::new(&mut inner.data).set_recover_num(0);
    }
    header.writeback();

    state.blks.clear();
}
