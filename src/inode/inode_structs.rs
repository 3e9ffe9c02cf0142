// Inode actors and their request protocol.
//
// Exactly one actor exists per live inode. It owns the inode's cached
// on-disk fields and its two reference counts, and it serves requests one
// at a time from a channel. Nothing else in the system touches an inode's
// state; if you want something from an inode, you send it a request and
// wait for the ack.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, SyncSender};

use crate::error_types::fs::FsError;
use crate::layout::inode_block::{Inum, InodeKind, InodeView, NIADDRS, mkdev};
use crate::layout::Block;

/// Every ack channel is a rendezvous carrying a result.
pub(crate) type Iack<T> = SyncSender<Result<T, FsError>>;

/// What `stat`/`fstat` fill in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub ino: u64,
    pub kind: InodeKind,
    pub nlink: u64,
    pub size: u64,
    pub rdev: u64,
}

impl Stat {
    pub fn is_dir(&self) -> bool {
        self.kind == InodeKind::Dir
    }
}

/// Answer to a `Get`: the inode's identity plus its device numbers, which
/// `open` needs for device nodes.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GetReply {
    pub inum: Inum,
    pub major: u64,
    pub minor: u64,
}

/// Answer to a `Create`. EEXIST carries the existing inum because
/// `open(O_CREAT)` without O_EXCL keeps going with it.
#[derive(Debug, Clone, Copy)]
pub(crate) enum CreateReply {
    Made(Inum),
    Exists(Inum),
    Failed(FsError),
}

/// The requests an inode actor serves. `Get`, `Insert` and `Stat` carry a
/// path and are forwarded component by component until it empties; the
/// rest act on the receiving inode directly.
pub(crate) enum Ireq {
    /// Resolve the rest of the path, then bump a reference count and
    /// answer with the inode's identity. `fsref` bumps the on-disk link
    /// count (EPERM on directories); `memref` bumps the in-memory count.
    Get {
        path: Vec<String>,
        fsref: bool,
        memref: bool,
        ack: Iack<GetReply>,
    },
    /// Drop a reference. When both counts hit zero the inode frees its
    /// blocks, marks its slot invalid and the actor terminates.
    RefDec { memref: bool, ack: Iack<()> },
    /// Fill byte ranges of the given lengths starting at `offset`. Stops
    /// at end of file; never errors.
    Read {
        lens: Vec<usize>,
        offset: u64,
        ack: Iack<Vec<Vec<u8>>>,
    },
    /// Write byte ranges starting at `offset` (or at the current size when
    /// `append` is set), growing and zero-filling as needed.
    Write {
        srcs: Vec<Vec<u8>>,
        offset: u64,
        append: bool,
        ack: Iack<usize>,
    },
    /// Make a fresh inode and link it under `name` here.
    Create {
        name: String,
        kind: InodeKind,
        major: u64,
        minor: u64,
        ack: SyncSender<CreateReply>,
    },
    /// Add a directory entry pointing at an existing inode.
    Insert {
        path: Vec<String>,
        name: String,
        inum: Inum,
        ack: Iack<()>,
    },
    /// Erase a directory entry; answers with the inum it pointed at so the
    /// caller can drop the file's link.
    Unlink { name: String, ack: Iack<Inum> },
    /// Resolve the rest of the path, then report identity and sizes.
    Stat { path: Vec<String>, ack: Iack<Stat> },
    /// Switch the actor to serve only from this private channel. Double
    /// locking is a caller bug and panics.
    Lock {
        lchan: Receiver<Ireq>,
        ack: Iack<()>,
    },
    /// Back to the public channel.
    Unlock { ack: Iack<()> },
    /// Single-component lookup, no reference taken.
    Lookup { name: String, ack: Iack<Inum> },
    /// Ok iff this is not a directory, or is a directory holding only
    /// `.` and `..`.
    Empty { ack: Iack<()> },
    /// Drop the contents: size to zero, data blocks freed.
    Trunc { ack: Iack<()> },
}

impl Ireq {
    /// Answer a request with an error without handling it. Used when
    /// forwarding discovers the target is missing or dead.
    pub(crate) fn fail(self, err: FsError) {
        match self {
            Ireq::Get { ack, .. } => drop(ack.send(Err(err))),
            Ireq::RefDec { ack, .. } => drop(ack.send(Err(err))),
            Ireq::Read { ack, .. } => drop(ack.send(Err(err))),
            Ireq::Write { ack, .. } => drop(ack.send(Err(err))),
            Ireq::Create { ack, .. } => drop(ack.send(CreateReply::Failed(err))),
            Ireq::Insert { ack, .. } => drop(ack.send(Err(err))),
            Ireq::Unlink { ack, .. } => drop(ack.send(Err(err))),
            Ireq::Stat { ack, .. } => drop(ack.send(Err(err))),
            Ireq::Lock { ack, .. } => drop(ack.send(Err(err))),
            Ireq::Unlock { ack } => drop(ack.send(Err(err))),
            Ireq::Lookup { ack, .. } => drop(ack.send(Err(err))),
            Ireq::Empty { ack } => drop(ack.send(Err(err))),
            Ireq::Trunc { ack } => drop(ack.send(Err(err))),
        }
    }
}

/// The cached copy of one on-disk inode, plus nothing else: the reference
/// counts live on the actor.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Icache {
    pub kind: InodeKind,
    pub links: u64,
    pub size: u64,
    pub major: u64,
    pub minor: u64,
    pub indirect: u64,
    pub addrs: [u64; NIADDRS],
}

impl Icache {
    /// Read an inode out of its block. A free slot here means the registry
    /// resolved an inum that does not exist; that is corruption.
    pub(crate) fn fill(data: &mut Block, slot: usize) -> Icache {
        let view = InodeView::new(data, slot);
        let kind = view.kind();
        assert!(kind != InodeKind::Invalid, "bad inode type in fill");
        let mut addrs = [0u64; NIADDRS];
        for (i, addr) in addrs.iter_mut().enumerate() {
            *addr = view.addr(i);
        }
        Icache {
            kind,
            links: view.links(),
            size: view.size(),
            major: view.major(),
            minor: view.minor(),
            indirect: view.indirect(),
            addrs,
        }
    }

    /// Write the cache back into its slot. Returns whether anything on disk
    /// actually changed, so the caller can skip the log when it didn't.
    pub(crate) fn flush_to(&self, data: &mut Block, slot: usize) -> bool {
        let mut view = InodeView::new(data, slot);
        let mut changed = view.kind() != self.kind
            || view.links() != self.links
            || view.size() != self.size
            || view.major() != self.major
            || view.minor() != self.minor
            || view.indirect() != self.indirect;
        for (i, &addr) in self.addrs.iter().enumerate() {
            if view.addr(i) != addr {
                changed = true;
            }
        }
        view.set_kind(self.kind);
        view.set_links(self.links);
        view.set_size(self.size);
        view.set_major(self.major);
        view.set_minor(self.minor);
        view.set_indirect(self.indirect);
        for (i, &addr) in self.addrs.iter().enumerate() {
            view.set_addr(i, addr);
        }
        changed
    }
}

/// One actor's working state. Owned by its thread; born in
/// `registry::ensure`, dies when both reference counts reach zero.
pub(crate) struct InodeActor {
    pub(crate) ctx: Arc<crate::inode::registry::FsCtx>,
    pub(crate) inum: Inum,
    /// The inum's (block, slot), split out once.
    pub(crate) blkno: u64,
    pub(crate) slot: usize,
    pub(crate) icache: Icache,
    /// Open handles and in-flight lookups keeping this actor alive.
    pub(crate) memref: u64,
}

impl InodeActor {
    pub(crate) fn mkstat(&self) -> Stat {
        Stat {
            ino: self.inum.0,
            kind: self.icache.kind,
            nlink: self.icache.links,
            size: self.icache.size,
            rdev: mkdev(self.icache.major, self.icache.minor),
        }
    }
}
