// lockall / unlockall and the private-channel plumbing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::mpsc::{self, Sender};

use log::debug;

use crate::error_types::fs::FsError;
use crate::helpers::path::path_parts;
use crate::inode::inode_structs::{GetReply, Ireq};
use crate::inode::registry::{self, FsCtx};
use crate::layout::inode_block::Inum;
use crate::txn::txn_structs::InodeTx;

impl InodeTx {
    /// Resolve and lock every inode in the transaction, in ascending inum
    /// order, and revalidate the children under the locks. On success every
    /// distinct inode involved is locked and holds one mem reference from
    /// us; on error nothing is locked and no references remain.
    pub(crate) fn lockall(&mut self) -> Result<(), FsError> {
        // reset any state from an earlier attempt
        for parent in self.parents.values_mut() {
            parent.inum = Inum::NONE;
            parent.lchan = None;
            for child in parent.children.values_mut() {
                child.found = false;
                child.inum = Inum::NONE;
                child.lchan = None;
            }
        }

        // Resolve parents and pin them with a mem reference. Distinct paths
        // can resolve to the same inode; keep exactly one reference per
        // distinct inum and drop the extras right away.
        let mut pmems: HashSet<Inum> = HashSet::new();
        let parent_paths: Vec<String> = self.parents.keys().cloned().collect();
        for path in &parent_paths {
            match namei_get(&self.ctx, path, self.cwd, false, true) {
                Ok(reply) => {
                    if !pmems.insert(reply.inum) {
                        mem_dec(&self.ctx, reply.inum);
                    }
                    self.parents
                        .get_mut(path)
                        .expect("declared parent path")
                        .inum = reply.inum;
                }
                Err(err) => {
                    for &held in &pmems {
                        mem_dec(&self.ctx, held);
                    }
                    return Err(err);
                }
            }
        }

        // (parent path, child name, mustexist) worklist; the maps stay
        // borrowable while we loop
        let pairs: Vec<(String, String, bool)> = self
            .parents
            .iter()
            .flat_map(|(path, parent)| {
                parent
                    .children
                    .iter()
                    .map(|(name, child)| (path.clone(), name.clone(), child.mustexist))
            })
            .collect();

        loop {
            let mut sorted: Vec<Inum> = Vec::new();
            let mut added: HashSet<Inum> = HashSet::new();
            // child inums holding a mem reference beyond the parent set
            let mut cmems: HashSet<Inum> = HashSet::new();

            // forget everything the previous round learned about children
            for parent in self.parents.values_mut() {
                for child in parent.children.values_mut() {
                    child.found = false;
                    child.inum = Inum::NONE;
                    child.lchan = None;
                }
            }

            for parent in self.parents.values() {
                if added.insert(parent.inum) {
                    sorted.push(parent.inum);
                }
            }

            // look the children up (unlocked) and pin the ones that exist
            let mut lookup_failure: Option<FsError> = None;
            for (path, name, mustexist) in &pairs {
                let parent_inum = self.parent_inum(path);
                match child_get_meminc(&self.ctx, parent_inum, name) {
                    Ok(child_inum) => {
                        if pmems.contains(&child_inum) || !cmems.insert(child_inum) {
                            // already pinned through another role
                            mem_dec(&self.ctx, child_inum);
                        }
                        if added.insert(child_inum) {
                            sorted.push(child_inum);
                        }
                        let child = self
                            .parents
                            .get_mut(path)
                            .expect("declared parent path")
                            .children
                            .get_mut(name)
                            .expect("declared child");
                        child.found = true;
                        child.inum = child_inum;
                    }
                    Err(FsError::NotFound) if !*mustexist => {
                        // fine, we just won't lock it
                    }
                    Err(err) => {
                        lookup_failure = Some(err);
                        break;
                    }
                }
            }
            if let Some(err) = lookup_failure {
                for &held in &cmems {
                    mem_dec(&self.ctx, held);
                }
                for &held in &pmems {
                    mem_dec(&self.ctx, held);
                }
                return Err(err);
            }

            // lock phase: ascending inum order, no exceptions
            sorted.sort();
            let mut lchans: HashMap<Inum, Sender<Ireq>> = HashMap::new();
            for &inum in &sorted {
                let (lock_tx, lock_rx) = mpsc::channel::<Ireq>();
                let (ack, done) = mpsc::sync_channel(1);
                send_to(&self.ctx, inum, Ireq::Lock { lchan: lock_rx, ack });
                let granted = done.recv().expect("lock must succeed");
                granted.expect("lock must succeed");
                let _previous = lchans.insert(inum, lock_tx);
            }

            // hand the private channels out to the roles
            for parent in self.parents.values_mut() {
                let lchan = lchans.get(&parent.inum).expect("parent must be locked");
                parent.lchan = Some(lchan.clone());
                for child in parent.children.values_mut() {
                    if child.found {
                        let lchan = lchans.get(&child.inum).expect("child must be locked");
                        child.lchan = Some(lchan.clone());
                    }
                }
            }

            // Revalidate under the locks: every found child must still
            // resolve to the same inum, every absent child must still be
            // absent. Anything else means we raced a rename or unlink and
            // must start over (keeping the parent references).
            let mut race_lost = false;
            let mut revalidate_failure: Option<FsError> = None;
            'verify: for (path, name, _mustexist) in &pairs {
                let parent = self.parents.get(path).expect("declared parent path");
                let parent_lchan = parent.lchan.as_ref().expect("parent has a channel");
                let child = parent.children.get(name).expect("declared child");
                match lookup_on(parent_lchan, name) {
                    Ok(current) => {
                        if !child.found || current != child.inum {
                            race_lost = true;
                            break 'verify;
                        }
                    }
                    Err(FsError::NotFound) => {
                        if child.found {
                            race_lost = true;
                            break 'verify;
                        }
                    }
                    Err(err) => {
                        revalidate_failure = Some(err);
                        break 'verify;
                    }
                }
            }

            if !race_lost && revalidate_failure.is_none() {
                self.locked = true;
                return Ok(());
            }

            // unlock every distinct inode we locked, release the child pins
            for &inum in &sorted {
                unlock_on(lchans.get(&inum).expect("locked inum has a channel"));
            }
            for &held in &cmems {
                mem_dec(&self.ctx, held);
            }
            if let Some(err) = revalidate_failure {
                for &held in &pmems {
                    mem_dec(&self.ctx, held);
                }
                return Err(err);
            }
            debug!("Transaction lost a lookup race, retrying lockall.");
        }
    }

    /// Unlock every locked inode, then drop every mem reference the
    /// transaction holds. Each distinct inode is handled once, and all the
    /// unlocks land before any reference drop: a dropped reference can
    /// terminate an actor, and a locked actor must not die locked.
    pub(crate) fn unlockall(&mut self) {
        assert!(self.locked, "nothing locked");

        let mut unlocked: HashSet<Inum> = HashSet::new();
        for parent in self.parents.values() {
            if unlocked.insert(parent.inum) {
                unlock_on(parent.lchan.as_ref().expect("locked parent has a channel"));
            }
            for child in parent.children.values() {
                if child.found && unlocked.insert(child.inum) {
                    unlock_on(child.lchan.as_ref().expect("locked child has a channel"));
                }
            }
        }

        let mut dropped: HashSet<Inum> = HashSet::new();
        for parent in self.parents.values() {
            if dropped.insert(parent.inum) {
                mem_dec(&self.ctx, parent.inum);
            }
            for child in parent.children.values() {
                if child.found && dropped.insert(child.inum) {
                    mem_dec(&self.ctx, child.inum);
                }
            }
        }

        self.locked = false;
    }

    /// Route a request to a locked parent.
    pub(crate) fn sendp(&self, path: &str, req: Ireq) {
        assert!(self.locked, "transaction is not locked");
        let parent = self.parents.get(path).expect("no such transaction path");
        let lchan = parent.lchan.as_ref().expect("parent is not locked");
        assert!(lchan.send(req).is_ok(), "locked parent actor is gone");
    }

    /// Route a request to a locked child.
    pub(crate) fn sendc(&self, path: &str, name: &str, req: Ireq) {
        assert!(self.locked, "transaction is not locked");
        let parent = self.parents.get(path).expect("no such transaction path");
        let child = parent.children.get(name).expect("no such transaction child");
        let lchan = child.lchan.as_ref().expect("child is not locked");
        assert!(lchan.send(req).is_ok(), "locked child actor is gone");
    }
}

//
// =========
// Channel plumbing
// =========
//

/// Send a path-carrying request to the actor resolution starts from:
/// the root for absolute paths, the cwd inode otherwise.
pub(crate) fn namei_send(ctx: &Arc<FsCtx>, path: &str, cwd: Inum, req: Ireq) {
    let start = if path.starts_with('/') { ctx.root } else { cwd };
    send_to(ctx, start, req);
}

/// Full path resolution with a reference bump at the end.
pub(crate) fn namei_get(
    ctx: &Arc<FsCtx>,
    path: &str,
    cwd: Inum,
    fsref: bool,
    memref: bool,
) -> Result<GetReply, FsError> {
    let (ack, done) = mpsc::sync_channel(1);
    let req = Ireq::Get {
        path: path_parts(path),
        fsref,
        memref,
        ack,
    };
    namei_send(ctx, path, cwd, req);
    // a dead actor on the way reads as a lost race with an unlink
    done.recv().unwrap_or(Err(FsError::NotFound))
}

/// One-component child resolution inside a parent, with a mem pin.
fn child_get_meminc(ctx: &Arc<FsCtx>, parent: Inum, name: &str) -> Result<Inum, FsError> {
    let (ack, done) = mpsc::sync_channel(1);
    let req = Ireq::Get {
        path: vec![name.to_owned()],
        fsref: false,
        memref: true,
        ack,
    };
    send_to(ctx, parent, req);
    done.recv()
        .unwrap_or(Err(FsError::NotFound))
        .map(|reply| reply.inum)
}

/// Drop a mem reference. Must succeed: the caller pinned this inode.
pub(crate) fn mem_dec(ctx: &Arc<FsCtx>, inum: Inum) {
    let (ack, done) = mpsc::sync_channel(1);
    send_to(ctx, inum, Ireq::RefDec { memref: true, ack });
    let reply = done.recv().expect("mem ref dec must succeed");
    reply.expect("mem ref dec must succeed");
}

/// Send to an actor through the registry, failing the request if the actor
/// vanished underneath us.
pub(crate) fn send_to(ctx: &Arc<FsCtx>, inum: Inum, req: Ireq) {
    let tx = registry::ensure(ctx, inum);
    if let Err(mpsc::SendError(req)) = tx.send(req) {
        req.fail(FsError::NotFound);
    }
}

fn lookup_on(lchan: &Sender<Ireq>, name: &str) -> Result<Inum, FsError> {
    let (ack, done) = mpsc::sync_channel(1);
    let req = Ireq::Lookup {
        name: name.to_owned(),
        ack,
    };
    assert!(lchan.send(req).is_ok(), "locked actor is gone");
    done.recv().expect("locked actor is gone")
}

fn unlock_on(lchan: &Sender<Ireq>) {
    let (ack, done) = mpsc::sync_channel(1);
    assert!(
        lchan.send(Ireq::Unlock { ack }).is_ok(),
        "unlock must succeed"
    );
    let reply = done.recv().expect("unlock must succeed");
    reply.expect("unlock must succeed");
}
