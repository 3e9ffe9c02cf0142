// The write-ahead log.
//
// Operations that may dirty blocks hold an admission ticket while they run.
// The journal mints a bounded number of tickets per epoch; when every
// outstanding ticket has been returned, the epoch's dirty blocks are
// committed as one atomic group. The ticket arithmetic is what keeps the
// log from overflowing: tickets_per_epoch * blocks_per_ticket never exceeds
// the log's data capacity.

use std::sync::mpsc::{Sender, SyncSender};

/// An upper bound on the number of blocks one admitted operation may dirty.
/// The API layer chops big writes into spans that respect this.
pub(crate) const MAX_BLKS_PER_OP: usize = 10;

/// Everything the journal thread reacts to.
pub(crate) enum LogMsg {
    /// An operation wants a ticket. Granted now if the epoch has room,
    /// queued for the next epoch otherwise.
    Begin { ack: SyncSender<()> },
    /// A block was dirtied under a ticket and wants to be in the commit.
    Incoming { blkno: u64 },
    /// A ticket came back.
    End,
    /// Barrier: answered only after every earlier message was processed,
    /// which means every earlier epoch has committed.
    Sync { ack: SyncSender<()> },
}

/// Handle for talking to the journal thread. Cheap to clone.
#[derive(Clone)]
pub(crate) struct JournalHandle {
    pub(super) tx: Sender<LogMsg>,
}

/// An admission ticket. Returning it is what ends the operation, so it
/// happens in Drop; early error returns give the ticket back for free.
pub(crate) struct Ticket {
    pub(super) tx: Sender<LogMsg>,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let _ = self.tx.send(LogMsg::End);
    }
}
