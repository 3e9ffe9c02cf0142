// Multi-inode transactions.
//
// rename may need to operate on three arbitrary inodes at once, so we need
// a way to lock several inodes without deadlocking. The trick is to lock
// them in ascending inum order, every time. It is complicated by not
// knowing the inums up front: they have to be looked up, and between the
// lookup and the lock somebody else may unlink or replace the very entry
// we resolved. So after locking everything we re-run each lookup on the
// now-locked parent and compare; any mismatch means we lost a race, and we
// unlock everything and try again.
//
// A transaction names its inodes two ways: parent paths (inodes not
// contained in another inode of the same transaction) and children (named
// entries inside a parent, each marked must-exist or optional). Locked
// actors serve only their private channel, which `sendp`/`sendc` route to.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc::Sender;

use crate::inode::inode_structs::Ireq;
use crate::inode::registry::FsCtx;
use crate::layout::inode_block::Inum;

pub(crate) struct TxChild {
    pub(super) mustexist: bool,
    pub(super) found: bool,
    pub(super) inum: Inum,
    pub(super) lchan: Option<Sender<Ireq>>,
}

pub(crate) struct TxParent {
    pub(super) inum: Inum,
    pub(super) children: HashMap<String, TxChild>,
    pub(super) lchan: Option<Sender<Ireq>>,
}

pub(crate) struct InodeTx {
    pub(super) ctx: Arc<FsCtx>,
    /// Where relative parent paths resolve from.
    pub(super) cwd: Inum,
    pub(super) parents: HashMap<String, TxParent>,
    pub(super) locked: bool,
}

impl InodeTx {
    pub(crate) fn new(ctx: Arc<FsCtx>, cwd: Inum) -> Self {
        Self {
            ctx,
            cwd,
            parents: HashMap::new(),
            locked: false,
        }
    }

    /// Declare a parent path. Declaring the same path twice is fine.
    pub(crate) fn add_path(&mut self, path: &str) {
        let _existing = self.parents.entry(path.to_owned()).or_insert(TxParent {
            inum: Inum::NONE,
            children: HashMap::new(),
            lchan: None,
        });
    }

    /// Declare a child of an already-declared parent. A child declared
    /// twice must exist if any declaration said so.
    pub(crate) fn add_child(&mut self, path: &str, name: &str, mustexist: bool) {
        assert!(!name.is_empty(), "child cannot be an empty name");
        let parent = self
            .parents
            .get_mut(path)
            .expect("add_child on an undeclared parent path");
        let _child = parent
            .children
            .entry(name.to_owned())
            .and_modify(|child| child.mustexist |= mustexist)
            .or_insert(TxChild {
                mustexist,
                found: false,
                inum: Inum::NONE,
                lchan: None,
            });
    }

    pub(crate) fn child_found(&self, path: &str, name: &str) -> bool {
        self.child(path, name).found
    }

    pub(crate) fn child_inum(&self, path: &str, name: &str) -> Inum {
        let child = self.child(path, name);
        assert!(child.found, "child was not found");
        child.inum
    }

    pub(crate) fn parent_inum(&self, path: &str) -> Inum {
        self.parents.get(path).expect("no such transaction path").inum
    }

    fn child(&self, path: &str, name: &str) -> &TxChild {
        self.parents
            .get(path)
            .expect("no such transaction path")
            .children
            .get(name)
            .expect("no such transaction child")
    }
}

impl Drop for InodeTx {
    fn drop(&mut self) {
        if self.locked {
            self.unlockall();
        }
    }
}
