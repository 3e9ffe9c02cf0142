// The inode actor loop and everything it does to its inode.

use std::sync::mpsc::{Receiver, SendError};

use log::debug;

use crate::cache::cache_structs::BufHandle;
use crate::error_types::fs::FsError;
use crate::inode::inode_structs::{CreateReply, GetReply, Iack, InodeActor, Ireq, Stat};
use crate::inode::registry;
use crate::layout::BLOCK_SIZE;
use crate::layout::dir_block::{DirView, NDIRENTS};
use crate::layout::fields::{field_read, field_write};
use crate::layout::inode_block::{
    IND_NEXT, IND_SLOTS, INODES_PER_BLOCK, InodeKind, InodeView, Inum, NIADDRS,
};

const BSZ: u64 = BLOCK_SIZE as u64;

impl InodeActor {
    /// The actor loop. Serves the public channel, or only the private one
    /// while locked; returns (ending the thread) when the last reference
    /// goes away, or when the whole mount is dropped and the channel dies.
    pub(crate) fn run(mut self, public: Receiver<Ireq>) {
        let mut locked: Option<Receiver<Ireq>> = None;
        loop {
            let received = {
                let source = locked.as_ref().unwrap_or(&public);
                source.recv()
            };
            let req = match received {
                Ok(req) => req,
                Err(_) => return,
            };
            match req {
                Ireq::Get {
                    path,
                    fsref,
                    memref,
                    ack,
                } => self.handle_get(path, fsref, memref, ack),
                Ireq::RefDec { memref, ack } => {
                    let terminate = self.irefdown(memref);
                    let _ = ack.send(Ok(()));
                    if terminate {
                        debug!("Inode actor {} terminating.", self.inum.0);
                        return;
                    }
                }
                Ireq::Read { lens, offset, ack } => {
                    let chunks = self.iread(&lens, offset);
                    let _ = ack.send(Ok(chunks));
                }
                Ireq::Write {
                    srcs,
                    offset,
                    append,
                    ack,
                } => self.handle_write(srcs, offset, append, ack),
                Ireq::Create {
                    name,
                    kind,
                    major,
                    minor,
                    ack,
                } => {
                    let reply = if self.icache.kind != InodeKind::Dir {
                        CreateReply::Failed(FsError::NotADirectory)
                    } else {
                        let reply = self.icreate(&name, kind, major, minor);
                        self.iupdate();
                        reply
                    };
                    let _ = ack.send(reply);
                }
                Ireq::Insert {
                    path,
                    name,
                    inum,
                    ack,
                } => self.handle_insert(path, name, inum, ack),
                Ireq::Unlink { name, ack } => {
                    let result = self.iunlink(&name);
                    if result.is_ok() {
                        self.iupdate();
                    }
                    let _ = ack.send(result);
                }
                Ireq::Stat { path, ack } => self.handle_stat(path, ack),
                Ireq::Lock { lchan, ack } => {
                    assert!(locked.is_none(), "double lock");
                    locked = Some(lchan);
                    let _ = ack.send(Ok(()));
                }
                Ireq::Unlock { ack } => {
                    assert!(locked.is_some(), "already unlocked");
                    locked = None;
                    let _ = ack.send(Ok(()));
                }
                Ireq::Lookup { name, ack } => {
                    let _ = ack.send(self.iget(&name));
                }
                Ireq::Empty { ack } => {
                    let result = if self.icache.kind == InodeKind::Dir && !self.idirempty() {
                        Err(FsError::NotEmpty)
                    } else {
                        Ok(())
                    };
                    let _ = ack.send(result);
                }
                Ireq::Trunc { ack } => {
                    self.itrunc();
                    let _ = ack.send(Ok(()));
                }
            }
        }
    }

    //
    // =========
    // Request handlers
    // =========
    //

    fn handle_get(&mut self, mut path: Vec<String>, fsref: bool, memref: bool, ack: Iack<GetReply>) {
        if !path.is_empty() {
            let next = path.remove(0);
            self.forward(
                &next,
                Ireq::Get {
                    path,
                    fsref,
                    memref,
                    ack,
                },
            );
            return;
        }

        if fsref {
            // taking an fs reference means making a hard link, and hard
            // links on directories are forbidden
            if self.icache.kind == InodeKind::Dir {
                let _ = ack.send(Err(FsError::NotPermitted));
                return;
            }
            self.icache.links += 1;
            self.iupdate();
        } else if memref {
            self.memref += 1;
        }

        let _ = ack.send(Ok(GetReply {
            inum: self.inum,
            major: self.icache.major,
            minor: self.icache.minor,
        }));
    }

    fn handle_write(&mut self, srcs: Vec<Vec<u8>>, offset: u64, append: bool, ack: Iack<usize>) {
        assert!(self.icache.kind != InodeKind::Dir, "write to a directory");
        let offset = if append { self.icache.size } else { offset };
        let wrote = self.iwrite(&srcs, offset);
        // iupdate() must come before the ack. The requester returns its
        // journal ticket on receipt, so the inode block has to be in this
        // epoch already.
        self.iupdate();
        let _ = ack.send(Ok(wrote));
    }

    fn handle_insert(&mut self, mut path: Vec<String>, name: String, inum: Inum, ack: Iack<()>) {
        if !path.is_empty() {
            let next = path.remove(0);
            self.forward(&next, Ireq::Insert { path, name, inum, ack });
            return;
        }
        let result = self.iinsert(&name, inum);
        self.iupdate();
        let _ = ack.send(result);
    }

    fn handle_stat(&mut self, mut path: Vec<String>, ack: Iack<Stat>) {
        if !path.is_empty() {
            let next = path.remove(0);
            self.forward(&next, Ireq::Stat { path, ack });
            return;
        }
        let _ = ack.send(Ok(self.mkstat()));
    }

    /// Route a request one path component onward. Sending is non-blocking
    /// (the request channels are unbounded), so traversing `.` or `..`
    /// back into ourselves cannot deadlock the loop.
    fn forward(&mut self, next: &str, req: Ireq) {
        match self.iget(next) {
            Ok(child) => {
                let tx = registry::ensure(&self.ctx, child);
                if let Err(SendError(req)) = tx.send(req) {
                    // the child terminated between the lookup and the send;
                    // to the requester that is a lost race with an unlink
                    req.fail(FsError::NotFound);
                }
            }
            Err(err) => req.fail(err),
        }
    }

    //
    // =========
    // Reference counts and inode write-back
    // =========
    //

    /// Flush the cached inode to its slot, logging the block iff something
    /// changed. Every state-mutating request ends with this.
    fn iupdate(&mut self) {
        let blk = self.ctx.cache.bread(self.blkno);
        let changed = {
            let mut inner = blk.lock();
            self.icache.flush_to(&mut inner.data, self.slot)
        };
        if changed {
            self.ctx.journal.log_write(&blk);
        }
    }

    /// Drop one reference; true means the actor must terminate. The
    /// registry entry is gone before this returns, so no new sender can
    /// find a dying actor.
    fn irefdown(&mut self, memref: bool) -> bool {
        if memref {
            assert!(self.memref > 0, "negative mem ref count");
            self.memref -= 1;
        } else {
            assert!(self.icache.links > 0, "negative link count");
            self.icache.links -= 1;
        }
        if self.icache.links != 0 || self.memref != 0 {
            if !memref {
                self.iupdate();
            }
            return false;
        }
        self.ifree();
        registry::deregister(&self.ctx, self.inum);
        true
    }

    /// Free everything this inode owns and mark its slot invalid. If the
    /// whole inode block is invalid slots afterwards, the block itself goes
    /// back to the bitmap instead of being logged.
    fn ifree(&mut self) {
        debug!("Freeing inode {}.", self.inum.0);
        let mut blocks = self.data_blocks();

        self.icache.kind = InodeKind::Invalid;
        let iblk = self.ctx.cache.bread(self.blkno);
        let all_dead = {
            let mut inner = iblk.lock();
            let _changed = self.icache.flush_to(&mut inner.data, self.slot);
            (0..INODES_PER_BLOCK)
                .all(|slot| InodeView::new(&mut inner.data, slot).kind() == InodeKind::Invalid)
        };
        if all_dead {
            blocks.push(self.blkno);
        } else {
            self.ctx.journal.log_write(&iblk);
        }
        drop(iblk);

        for blkno in blocks {
            self.ctx
                .alloc
                .bfree(&self.ctx.cache, &self.ctx.journal, blkno);
        }
    }

    /// Every data block this inode references: direct slots plus the whole
    /// indirect chain (the chain blocks themselves included).
    fn data_blocks(&self) -> Vec<u64> {
        let mut blocks: Vec<u64> = self
            .icache
            .addrs
            .iter()
            .copied()
            .filter(|addr| *addr != 0)
            .collect();
        let mut ind = self.icache.indirect;
        while ind != 0 {
            blocks.push(ind);
            let blk = self.ctx.cache.bread(ind);
            let inner = blk.lock();
            let mut chained: Vec<u64> = (0..IND_SLOTS)
                .map(|slot| field_read(&inner.data, slot))
                .filter(|addr| *addr != 0)
                .collect();
            blocks.append(&mut chained);
            ind = field_read(&inner.data, IND_NEXT);
        }
        blocks
    }

    /// Truncate to zero bytes and give the data blocks back. Directories
    /// never truncate; a request here for one is a kernel bug.
    fn itrunc(&mut self) {
        assert!(
            matches!(self.icache.kind, InodeKind::File | InodeKind::Dev),
            "bad truncate"
        );
        let blocks = self.data_blocks();
        self.icache.addrs = [0; NIADDRS];
        self.icache.indirect = 0;
        self.icache.size = 0;
        self.iupdate();
        for blkno in blocks {
            self.ctx
                .alloc
                .bfree(&self.ctx.cache, &self.ctx.journal, blkno);
        }
    }

    //
    // =========
    // Block addressing
    // =========
    //

    /// The block number holding file offset `offset`. When writing, every
    /// slot on the way there gets a freshly zeroed block so the hole reads
    /// back as zeros; intermediate indirect blocks are allocated as needed.
    fn offsetblk(&mut self, offset: u64, writing: bool) -> u64 {
        let whichblk = (offset / BSZ) as usize;

        if writing {
            // no empty direct slots below a write past the end of the file
            let upper = (whichblk + 1).min(NIADDRS);
            for i in 0..upper {
                if self.icache.addrs[i] != 0 {
                    continue;
                }
                let fresh = self.balloc_zeroed();
                self.icache.addrs[i] = fresh;
            }
        }

        if whichblk < NIADDRS {
            return self.icache.addrs[whichblk];
        }

        // follow the indirect chain
        let indslot = whichblk - NIADDRS;
        let (mut indno, fresh) = self.ensure_block(self.icache.indirect, true, writing);
        if fresh {
            self.icache.indirect = indno;
        }
        assert!(indno != 0, "read through an unallocated indirect block");

        let mut indblk = self.ctx.cache.bread(indno);
        for _hop in 0..indslot / IND_SLOTS {
            // walking past a full indirect block; when writing, none of its
            // slots may be left empty (the chain pointer slot included,
            // which is how the chain grows)
            self.ensure_indirect(&indblk, IND_SLOTS, writing);
            indno = {
                let inner = indblk.lock();
                field_read(&inner.data, IND_NEXT)
            };
            assert!(indno != 0, "read past the end of the indirect chain");
            indblk = self.ctx.cache.bread(indno);
        }

        let slot = indslot % IND_SLOTS;
        self.ensure_indirect(&indblk, slot, writing);
        let blkno = {
            let inner = indblk.lock();
            field_read(&inner.data, slot)
        };
        let (blkno, fresh) = self.ensure_block(blkno, false, writing);
        if fresh {
            {
                let mut inner = indblk.lock();
                field_write(&mut inner.data, slot, blkno);
            }
            self.ctx.journal.log_write(&indblk);
        }
        blkno
    }

    /// Allocate a block for an empty slot, but only when writing.
    fn ensure_block(&mut self, blkno: u64, zeroed: bool, writing: bool) -> (u64, bool) {
        if !writing || blkno != 0 {
            return (blkno, false);
        }
        let fresh = if zeroed {
            self.balloc_zeroed()
        } else {
            self.ctx.alloc.balloc(&self.ctx.cache, &self.ctx.journal)
        };
        (fresh, true)
    }

    /// Make sure slots 0..=upto of an indirect block all point somewhere,
    /// zero-filling whatever gets allocated. Writes past the end of the
    /// file must not leave gaps a later read could fall into.
    fn ensure_indirect(&mut self, indblk: &BufHandle, upto: usize, writing: bool) {
        if !writing {
            return;
        }
        let mut added = false;
        for slot in 0..=upto {
            let current = {
                let inner = indblk.lock();
                field_read(&inner.data, slot)
            };
            if current != 0 {
                continue;
            }
            let fresh = self.balloc_zeroed();
            {
                let mut inner = indblk.lock();
                field_write(&mut inner.data, slot, fresh);
            }
            added = true;
        }
        if added {
            self.ctx.journal.log_write(indblk);
        }
    }

    fn balloc_zeroed(&mut self) -> u64 {
        let blkno = self.ctx.alloc.balloc(&self.ctx.cache, &self.ctx.journal);
        let blk = self.ctx.cache.bread(blkno);
        {
            let mut inner = blk.lock();
            inner.data.fill(0);
        }
        self.ctx.journal.log_write(&blk);
        blkno
    }

    //
    // =========
    // File contents
    // =========
    //

    /// Scatter read: fill each destination length in turn until one comes
    /// up short (end of file).
    fn iread(&mut self, lens: &[usize], offset: u64) -> Vec<Vec<u8>> {
        let mut chunks = Vec::with_capacity(lens.len());
        let mut at = offset;
        for &want in lens {
            let chunk = self.iread1(want, at);
            let short = chunk.len() < want;
            at += chunk.len() as u64;
            chunks.push(chunk);
            if short {
                break;
            }
        }
        chunks
    }

    fn iread1(&mut self, want: usize, offset: u64) -> Vec<u8> {
        let size = self.icache.size;
        if offset >= size {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(want);
        let mut at = offset;
        while out.len() < want && at < size {
            let blkno = self.offsetblk(at, false);
            assert!(blkno != 0, "file hole below its own size");
            let start = (at % BSZ) as usize;
            let take = (BLOCK_SIZE - start)
                .min((size - at) as usize)
                .min(want - out.len());
            let blk = self.ctx.cache.bread(blkno);
            {
                let inner = blk.lock();
                out.extend_from_slice(&inner.data[start..start + take]);
            }
            at += take as u64;
        }
        out
    }

    /// Gather write. Every span must land whole; a short write inside the
    /// actor has no meaning.
    fn iwrite(&mut self, srcs: &[Vec<u8>], offset: u64) -> usize {
        let mut written = 0usize;
        for src in srcs {
            let wrote = self.iwrite1(src, offset + written as u64);
            assert!(wrote == src.len(), "short write");
            written += wrote;
        }
        written
    }

    fn iwrite1(&mut self, src: &[u8], offset: u64) -> usize {
        let mut done = 0usize;
        while done < src.len() {
            let at = offset + done as u64;
            let blkno = self.offsetblk(at, true);
            let start = (at % BSZ) as usize;
            let take = (BLOCK_SIZE - start).min(src.len() - done);
            let blk = self.ctx.cache.bread(blkno);
            {
                let mut inner = blk.lock();
                inner.data[start..start + take].copy_from_slice(&src[done..done + take]);
            }
            self.ctx.journal.log_write(&blk);
            done += take;
        }
        let end = offset + done as u64;
        if end > self.icache.size {
            self.icache.size = end;
        }
        done
    }

    //
    // =========
    // Directory contents
    // =========
    //

    /// Every data block of this directory, acquired. Holding them all at
    /// once is what makes a scan-then-modify sequence atomic within the
    /// actor.
    fn all_dirents(&mut self) -> Vec<BufHandle> {
        assert!(self.icache.kind == InodeKind::Dir, "not a directory");
        let mut blocks = Vec::new();
        let mut at = 0u64;
        while at < self.icache.size {
            let blkno = self.offsetblk(at, false);
            assert!(blkno != 0, "directory with a hole in it");
            blocks.push(self.ctx.cache.bread(blkno));
            at += BSZ;
        }
        blocks
    }

    fn dirent_lookup(blocks: &[BufHandle], name: &str) -> Option<Inum> {
        for blk in blocks {
            let mut inner = blk.lock();
            let view = DirView::new(&mut inner.data);
            for slot in 0..NDIRENTS {
                if !view.is_free(slot) && view.filename(slot) == name {
                    return Some(view.inum(slot));
                }
            }
        }
        None
    }

    fn dirent_first_free(blocks: &[BufHandle]) -> Option<(usize, usize)> {
        for (index, blk) in blocks.iter().enumerate() {
            let mut inner = blk.lock();
            let view = DirView::new(&mut inner.data);
            for slot in 0..NDIRENTS {
                if view.is_free(slot) {
                    return Some((index, slot));
                }
            }
        }
        None
    }

    /// Add an entry, reusing a free slot or growing the directory by one
    /// zeroed block. Does not check for duplicates; callers did.
    fn dirent_add(&mut self, blocks: &[BufHandle], name: &str, inum: Inum) {
        if let Some((index, slot)) = Self::dirent_first_free(blocks) {
            {
                let mut inner = blocks[index].lock();
                let mut view = DirView::new(&mut inner.data);
                assert!(view.is_free(slot), "directory slot is not free");
                view.set_filename(slot, name);
                view.set_inum(slot, inum);
            }
            self.ctx.journal.log_write(&blocks[index]);
            return;
        }

        // all full: one more block on the end
        let blkno = self.offsetblk(self.icache.size, true);
        self.icache.size += BSZ;
        let blk = self.ctx.cache.bread(blkno);
        {
            let mut inner = blk.lock();
            inner.data.fill(0);
            let mut view = DirView::new(&mut inner.data);
            view.set_filename(0, name);
            view.set_inum(0, inum);
        }
        self.ctx.journal.log_write(&blk);
    }

    /// Allocate a fresh inode and link it here under `name`.
    fn icreate(&mut self, name: &str, kind: InodeKind, major: u64, minor: u64) -> CreateReply {
        assert!(kind != InodeKind::Invalid, "creating an invalid inode");
        assert!(!name.is_empty(), "create with no name");
        if kind != InodeKind::Dev {
            assert!(major == 0 && minor == 0, "device numbers on a non-device");
        }

        let blocks = self.all_dirents();
        if let Some(existing) = Self::dirent_lookup(&blocks, name) {
            return CreateReply::Exists(existing);
        }

        let (newbn, newslot) = self.ctx.alloc.ialloc(&self.ctx.cache, &self.ctx.journal);
        let iblk = self.ctx.cache.bread(newbn);
        {
            let mut inner = iblk.lock();
            let mut view = InodeView::new(&mut inner.data, newslot);
            view.set_kind(kind);
            view.set_links(1);
            view.set_size(0);
            view.set_major(major);
            view.set_minor(minor);
            view.set_indirect(0);
            for i in 0..NIADDRS {
                view.set_addr(i, 0);
            }
        }
        self.ctx.journal.log_write(&iblk);
        drop(iblk);

        self.dirent_add(&blocks, name, Inum::encode(newbn, newslot));
        CreateReply::Made(Inum::encode(newbn, newslot))
    }

    /// Single-component lookup.
    pub(crate) fn iget(&mut self, name: &str) -> Result<Inum, FsError> {
        // did someone confuse a file with a directory?
        if self.icache.kind != InodeKind::Dir {
            return Err(FsError::NotADirectory);
        }
        let blocks = self.all_dirents();
        Self::dirent_lookup(&blocks, name).ok_or(FsError::NotFound)
    }

    /// New directory entry for an existing inode.
    fn iinsert(&mut self, name: &str, inum: Inum) -> Result<(), FsError> {
        let blocks = self.all_dirents();
        if Self::dirent_lookup(&blocks, name).is_some() {
            return Err(FsError::AlreadyExists);
        }
        self.dirent_add(&blocks, name, inum);
        Ok(())
    }

    /// Erase an entry; hands back the inum it named so the caller can drop
    /// that inode's link count.
    fn iunlink(&mut self, name: &str) -> Result<Inum, FsError> {
        let blocks = self.all_dirents();
        for blk in &blocks {
            let erased = {
                let mut inner = blk.lock();
                let mut view = DirView::new(&mut inner.data);
                let mut found = None;
                for slot in 0..NDIRENTS {
                    if !view.is_free(slot) && view.filename(slot) == name {
                        found = Some(view.inum(slot));
                        view.set_filename(slot, "");
                        view.set_inum(slot, Inum::NONE);
                        break;
                    }
                }
                found
            };
            if let Some(inum) = erased {
                self.ctx.journal.log_write(blk);
                return Ok(inum);
            }
        }
        Err(FsError::NotFound)
    }

    /// True iff nothing but `.` and `..` is left.
    fn idirempty(&mut self) -> bool {
        let blocks = self.all_dirents();
        for blk in &blocks {
            let mut inner = blk.lock();
            let view = DirView::new(&mut inner.data);
            for slot in 0..NDIRENTS {
                if view.is_free(slot) {
                    continue;
                }
                let name = view.filename(slot);
                if name != "." && name != ".." {
                    return false;
                }
            }
        }
        true
    }
}
