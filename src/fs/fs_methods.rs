// The filesystem API: mount plus the operation set the rest of a kernel
// would call. Every operation that can dirty a block takes a journal
// ticket first and returns it when done (the `Ticket` drop); user-visible
// errors are all decided before the first logged write.

use std::sync::Arc;
use std::sync::mpsc;

use log::info;

use crate::cache::cache_structs::CacheHandle;
use crate::device::device_structs::{DeviceHandle, DiskMedia};
use crate::error_types::fs::FsError;
use crate::fs::fs_structs::{FileHandle, Fs, OpenFlags};
use crate::helpers::path::{path_parts, split_dirname};
use crate::inode::inode_structs::{CreateReply, Ireq, Stat};
use crate::inode::registry::{self, FsCtx, Registry};
use crate::journal::journal_methods::recover;
use crate::journal::journal_structs::JournalHandle;
use crate::layout::BLOCK_SIZE;
use crate::layout::dir_block::DNAME_LEN;
use crate::layout::inode_block::{InodeKind, Inum, unmkdev};
use crate::layout::superblock::{Superblock, superblock_pointer};
use crate::txn::txn_methods::{mem_dec, namei_get, namei_send, send_to};
use crate::txn::txn_structs::InodeTx;

use crate::alloc::alloc_structs::BlockAllocator;

/// Most bytes one write ticket is allowed to touch. Four blocks of data
/// plus the indirect, bitmap and inode blocks stays inside the journal's
/// per-op budget; bigger writes get split into several tickets.
const MAX_WRITE_SPAN: usize = 4 * BLOCK_SIZE;

impl Fs {
    /// Mount a formatted medium. Runs crash recovery before anything else
    /// touches the disk, then brings up the journal and the root actor.
    /// Returns the filesystem and a handle on the root directory, which
    /// doubles as the starting point for relative paths.
    pub fn mount(media: DiskMedia) -> (Fs, FileHandle) {
        info!("Mounting filesystem...");
        let dev = DeviceHandle::start(media);
        let cache = CacheHandle::start(dev);

        // the build step leaves the superblock pointer in block 0 for us
        let sb_at = {
            let blk0 = cache.bread(0);
            let inner = blk0.lock();
            superblock_pointer(&inner.data)
        };
        assert!(sb_at > 0, "bad superblock start");
        let sb = {
            let blk = cache.bread(sb_at);
            let inner = blk.lock();
            Superblock::parse(&inner.data)
        };
        assert!(sb.log_len <= 63, "bad log length");

        // recovery comes before the journal exists, and before any write
        let _restored = recover(&cache, sb.log_start());

        let journal = JournalHandle::start(cache.clone(), sb.log_start(), sb.log_len);
        let alloc = BlockAllocator::new(&sb);
        let ctx = Arc::new(FsCtx {
            cache,
            journal,
            alloc,
            registry: Registry::new(),
            root: sb.root,
        });

        // the root actor exists for as long as the mount does
        let _root_tx = registry::ensure(&ctx, sb.root);
        info!("Mounted; root inode {}.", sb.root.0);

        let root = FileHandle {
            inum: sb.root,
            major: 0,
            minor: 0,
        };
        (Fs { ctx }, root)
    }

    /// Wait until every operation that already finished is durable.
    pub fn sync(&self) {
        self.ctx.journal.sync();
    }

    //
    // =========
    // The operation set
    // =========
    //

    /// Open a path. `major`/`minor` only matter with CREAT, to make device
    /// nodes.
    pub fn open(
        &self,
        path: &str,
        flags: OpenFlags,
        _mode: u32,
        cwd: &FileHandle,
        major: u64,
        minor: u64,
    ) -> Result<FileHandle, FsError> {
        let trunc = flags.contains(OpenFlags::TRUNC);
        let creat = flags.contains(OpenFlags::CREAT);
        // open with O_TRUNC is not read-only
        let _ticket = if trunc || creat {
            Some(self.ctx.journal.op_begin())
        } else {
            None
        };

        let mut nodir = false;
        let (inum, major, minor) = if creat {
            nodir = true;
            // must atomically create and open the new file
            let isdev = major != 0 || minor != 0;
            let (dirs, name) = split_dirname(path);
            if name.is_empty() {
                return Err(FsError::IsADirectory);
            }
            if name.len() > DNAME_LEN {
                return Err(FsError::NameTooLong);
            }

            let mut tx = InodeTx::new(Arc::clone(&self.ctx), cwd.inum);
            tx.add_path(&dirs);
            tx.lockall()?;

            let kind = if isdev { InodeKind::Dev } else { InodeKind::File };
            let (ack, done) = mpsc::sync_channel(1);
            tx.sendp(
                &dirs,
                Ireq::Create {
                    name,
                    kind,
                    major,
                    minor,
                    ack,
                },
            );
            let created = done.recv().expect("locked parent actor is gone");
            let (inum, major, minor) = match created {
                CreateReply::Made(inum) => (inum, major, minor),
                CreateReply::Exists(existing) => {
                    if flags.contains(OpenFlags::EXCL) || isdev {
                        return Err(FsError::AlreadyExists);
                    }
                    // opening the thing that already exists; inherit its
                    // device numbers
                    let st = self.fstat_direct(existing);
                    let (maj, min) = unmkdev(st.rdev);
                    (existing, maj, min)
                }
                CreateReply::Failed(err) => return Err(err),
            };
            // pin before unlocking, or a racing unlink could delete the
            // file we just created out from under us (and O_EXCL would be
            // a lie)
            self.mem_inc_direct(inum);
            tx.unlockall();
            (inum, major, minor)
        } else {
            // plain open of something that exists
            let reply = namei_get(&self.ctx, path, cwd.inum, false, true)?;
            (reply.inum, reply.major, reply.minor)
        };

        let o_dir = flags.contains(OpenFlags::DIRECTORY);
        if flags.wants_write() {
            nodir = true;
        }

        // a directory cannot be opened writable, and only a directory can
        // be opened with DIRECTORY
        if o_dir || nodir {
            let st = self.fstat_direct(inum);
            if o_dir && st.kind != InodeKind::Dir {
                mem_dec(&self.ctx, inum);
                return Err(FsError::NotADirectory);
            }
            if nodir && st.kind == InodeKind::Dir {
                mem_dec(&self.ctx, inum);
                return Err(FsError::IsADirectory);
            }
        }

        if nodir && trunc {
            let (ack, done) = mpsc::sync_channel(1);
            send_to(&self.ctx, inum, Ireq::Trunc { ack });
            let truncated = done.recv().expect("trunc must succeed");
            truncated.expect("trunc must succeed");
        }

        Ok(FileHandle { inum, major, minor })
    }

    /// Give an open handle back. The last reference frees the inode if its
    /// links are gone too, which writes, hence the ticket.
    pub fn close(&self, file: FileHandle) {
        let _ticket = self.ctx.journal.op_begin();
        mem_dec(&self.ctx, file.inum);
    }

    /// Duplicate an open handle (a second descriptor on the same file).
    pub fn memref(&self, file: &FileHandle) -> FileHandle {
        self.mem_inc_direct(file.inum);
        file.clone()
    }

    /// Read into the given byte ranges starting at `offset`. Returns how
    /// many bytes landed; short means end of file.
    pub fn read(&self, file: &FileHandle, dsts: &mut [&mut [u8]], offset: u64) -> usize {
        let lens: Vec<usize> = dsts.iter().map(|dst| dst.len()).collect();
        let (ack, done) = mpsc::sync_channel(1);
        send_to(&self.ctx, file.inum, Ireq::Read { lens, offset, ack });
        let chunks = done
            .recv()
            .expect("inode actor is gone")
            .expect("reads cannot fail");

        let mut count = 0;
        for (dst, chunk) in dsts.iter_mut().zip(&chunks) {
            dst[..chunk.len()].copy_from_slice(chunk);
            count += chunk.len();
        }
        count
    }

    /// Convenience wrapper: read `len` bytes at `offset`, trimmed to what
    /// the file had.
    pub fn read_at(&self, file: &FileHandle, offset: u64, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        let got = self.read(file, &mut [&mut buf], offset);
        buf.truncate(got);
        buf
    }

    /// Write the given byte ranges at `offset`, or at the end of the file
    /// when `append` is set. Big writes run as several journal tickets, one
    /// bounded span each, so no single ticket can overrun the log.
    pub fn write(&self, file: &FileHandle, srcs: &[&[u8]], offset: u64, append: bool) -> usize {
        let data = srcs.concat();
        if data.is_empty() {
            return 0;
        }
        let mut written = 0usize;

        if append {
            // each span lands at the then-current end of file, so appends
            // stay appends even when racing other appenders
            for span in data.chunks(MAX_WRITE_SPAN) {
                written += self.write_op(file, span.to_vec(), 0, true);
            }
            return written;
        }

        // writing past the end first fills the gap with zero spans, one
        // ticket at a time, so the hole never has to materialize inside a
        // single over-budget ticket
        let size = self.fstat(file).size;
        let mut gap_at = size;
        while gap_at < offset {
            let span = (MAX_WRITE_SPAN as u64).min(offset - gap_at) as usize;
            let _zeros = self.write_op(file, vec![0u8; span], gap_at, false);
            gap_at += span as u64;
        }

        for span in data.chunks(MAX_WRITE_SPAN) {
            written += self.write_op(file, span.to_vec(), offset + written as u64, false);
        }
        written
    }

    /// Convenience wrapper for one contiguous write.
    pub fn write_at(&self, file: &FileHandle, offset: u64, data: &[u8]) -> usize {
        self.write(file, &[data], offset, false)
    }

    /// Convenience wrapper for an append.
    pub fn append(&self, file: &FileHandle, data: &[u8]) -> usize {
        self.write(file, &[data], 0, true)
    }

    /// Add a hard link `new` to whatever `old` names. Directories refuse.
    pub fn link(&self, old: &str, new: &str, cwd: &FileHandle) -> Result<(), FsError> {
        let (new_dirs, new_name) = split_dirname(new);
        if new_name.is_empty() {
            return Err(FsError::NotFound);
        }
        if new_name.len() > DNAME_LEN {
            return Err(FsError::NameTooLong);
        }

        let _ticket = self.ctx.journal.op_begin();

        // first take the fs reference on the target
        let reply = namei_get(&self.ctx, old, cwd.inum, true, false)?;

        // then write the directory entry
        let (ack, done) = mpsc::sync_channel(1);
        let req = Ireq::Insert {
            path: path_parts(&new_dirs),
            name: new_name,
            inum: reply.inum,
            ack,
        };
        namei_send(&self.ctx, new, cwd.inum, req);
        let inserted = done.recv().unwrap_or(Err(FsError::NotFound));

        if inserted.is_err() {
            // roll the link count back
            let (ack, done) = mpsc::sync_channel(1);
            send_to(&self.ctx, reply.inum, Ireq::RefDec { memref: false, ack });
            let _ = done.recv();
        }
        inserted
    }

    /// Remove a directory entry. Directories must be empty; `.` and `..`
    /// are never removable.
    pub fn unlink(&self, path: &str, cwd: &FileHandle) -> Result<(), FsError> {
        let (dirs, name) = split_dirname(path);
        if name == "." || name == ".." {
            return Err(FsError::NotPermitted);
        }
        if name.is_empty() {
            return Err(FsError::NotFound);
        }

        let _ticket = self.ctx.journal.op_begin();

        let mut tx = InodeTx::new(Arc::clone(&self.ctx), cwd.inum);
        tx.add_path(&dirs);
        tx.add_child(&dirs, &name, true);
        tx.lockall()?;

        // a non-empty directory stays
        let (ack, done) = mpsc::sync_channel(1);
        tx.sendc(&dirs, &name, Ireq::Empty { ack });
        done.recv().expect("locked child actor is gone")?;

        let (ack, done) = mpsc::sync_channel(1);
        tx.sendp(&dirs, Ireq::Unlink { name: name.clone(), ack });
        let _unlinked = done
            .recv()
            .expect("locked parent actor is gone")
            .expect("unlink must succeed");

        let (ack, done) = mpsc::sync_channel(1);
        tx.sendc(&dirs, &name, Ireq::RefDec { memref: false, ack });
        done.recv()
            .expect("locked child actor is gone")
            .expect("fs ref dec must succeed");

        Ok(())
    }

    /// Move `old` to `new`, atomically replacing a compatible `new` if it
    /// exists. Moving a directory rewrites its `..`.
    pub fn rename(&self, old: &str, new: &str, cwd: &FileHandle) -> Result<(), FsError> {
        let (old_dirs, old_name) = split_dirname(old);
        let (new_dirs, new_name) = split_dirname(new);
        if old_name.is_empty() || new_name.is_empty() {
            return Err(FsError::NotFound);
        }
        if new_name.len() > DNAME_LEN {
            return Err(FsError::NameTooLong);
        }

        let _ticket = self.ctx.journal.op_begin();

        let mut tx = InodeTx::new(Arc::clone(&self.ctx), cwd.inum);
        tx.add_path(&old_dirs);
        tx.add_path(&new_dirs);
        tx.add_child(&old_dirs, &old_name, true);
        tx.add_child(&new_dirs, &new_name, false);
        tx.lockall()?;

        let old_stat = self.stat_locked_child(&tx, &old_dirs, &old_name);
        let old_is_dir = old_stat.kind == InodeKind::Dir;

        if tx.child_found(&new_dirs, &new_name) {
            // if source and destination are the same file, we are done
            if tx.child_inum(&old_dirs, &old_name) == tx.child_inum(&new_dirs, &new_name) {
                return Ok(());
            }

            // replacement needs matching kinds
            let new_stat = self.stat_locked_child(&tx, &new_dirs, &new_name);
            let new_is_dir = new_stat.kind == InodeKind::Dir;
            if old_is_dir && !new_is_dir {
                return Err(FsError::NotADirectory);
            }
            if !old_is_dir && new_is_dir {
                return Err(FsError::IsADirectory);
            }

            // and a displaced directory must be empty
            let (ack, done) = mpsc::sync_channel(1);
            tx.sendc(&new_dirs, &new_name, Ireq::Empty { ack });
            done.recv().expect("locked child actor is gone")?;

            let (ack, done) = mpsc::sync_channel(1);
            tx.sendp(
                &new_dirs,
                Ireq::Unlink {
                    name: new_name.clone(),
                    ack,
                },
            );
            let _displaced = done
                .recv()
                .expect("locked parent actor is gone")
                .expect("unlink of the displaced entry must succeed");

            let (ack, done) = mpsc::sync_channel(1);
            tx.sendc(&new_dirs, &new_name, Ireq::RefDec { memref: false, ack });
            done.recv()
                .expect("locked child actor is gone")
                .expect("fs ref dec of the displaced inode must succeed");
        }

        let moved = tx.child_inum(&old_dirs, &old_name);

        let (ack, done) = mpsc::sync_channel(1);
        tx.sendp(
            &new_dirs,
            Ireq::Insert {
                path: Vec::new(),
                name: new_name,
                inum: moved,
                ack,
            },
        );
        done.recv()
            .expect("locked parent actor is gone")
            .expect("insert into the new parent must succeed");

        let (ack, done) = mpsc::sync_channel(1);
        tx.sendp(
            &old_dirs,
            Ireq::Unlink {
                name: old_name.clone(),
                ack,
            },
        );
        let _removed = done
            .recv()
            .expect("locked parent actor is gone")
            .expect("unlink from the old parent must succeed");

        // a moved directory's `..` now names the wrong parent; a loop made
        // by moving a directory into itself is not detected yet
        if old_is_dir {
            let (ack, done) = mpsc::sync_channel(1);
            tx.sendc(
                &old_dirs,
                &old_name,
                Ireq::Unlink {
                    name: "..".to_owned(),
                    ack,
                },
            );
            let _dotdot = done
                .recv()
                .expect("locked child actor is gone")
                .expect("unlink of .. must succeed");

            let (ack, done) = mpsc::sync_channel(1);
            tx.sendc(
                &old_dirs,
                &old_name,
                Ireq::Insert {
                    path: Vec::new(),
                    name: "..".to_owned(),
                    inum: tx.parent_inum(&new_dirs),
                    ack,
                },
            );
            done.recv()
                .expect("locked child actor is gone")
                .expect("insert of .. must succeed");
        }

        Ok(())
    }

    /// Make a directory, `.` and `..` included, atomically under the
    /// parent's lock.
    pub fn mkdir(&self, path: &str, _mode: u32, cwd: &FileHandle) -> Result<(), FsError> {
        let (dirs, name) = split_dirname(path);
        if name.is_empty() {
            return Err(FsError::NotFound);
        }
        if name.len() > DNAME_LEN {
            return Err(FsError::NameTooLong);
        }

        let _ticket = self.ctx.journal.op_begin();

        let mut tx = InodeTx::new(Arc::clone(&self.ctx), cwd.inum);
        tx.add_path(&dirs);
        tx.lockall()?;

        let (ack, done) = mpsc::sync_channel(1);
        tx.sendp(
            &dirs,
            Ireq::Create {
                name,
                kind: InodeKind::Dir,
                major: 0,
                minor: 0,
                ack,
            },
        );
        let created = done.recv().expect("locked parent actor is gone");
        let new_dir = match created {
            CreateReply::Made(inum) => inum,
            CreateReply::Exists(_) => return Err(FsError::AlreadyExists),
            CreateReply::Failed(err) => return Err(err),
        };

        self.insert_direct(new_dir, ".", new_dir);
        self.insert_direct(new_dir, "..", tx.parent_inum(&dirs));
        Ok(())
    }

    /// Stat by path.
    pub fn stat(&self, path: &str, cwd: &FileHandle) -> Result<Stat, FsError> {
        let (ack, done) = mpsc::sync_channel(1);
        let req = Ireq::Stat {
            path: path_parts(path),
            ack,
        };
        namei_send(&self.ctx, path, cwd.inum, req);
        done.recv().unwrap_or(Err(FsError::NotFound))
    }

    /// Stat an open handle.
    pub fn fstat(&self, file: &FileHandle) -> Stat {
        self.fstat_direct(file.inum)
    }

    //
    // =========
    // Plumbing
    // =========
    //

    fn write_op(&self, file: &FileHandle, span: Vec<u8>, offset: u64, append: bool) -> usize {
        let _ticket = self.ctx.journal.op_begin();
        let (ack, done) = mpsc::sync_channel(1);
        send_to(
            &self.ctx,
            file.inum,
            Ireq::Write {
                srcs: vec![span],
                offset,
                append,
                ack,
            },
        );
        done.recv()
            .expect("inode actor is gone")
            .expect("writes cannot fail")
    }

    fn fstat_direct(&self, inum: Inum) -> Stat {
        let (ack, done) = mpsc::sync_channel(1);
        send_to(
            &self.ctx,
            inum,
            Ireq::Stat {
                path: Vec::new(),
                ack,
            },
        );
        done.recv()
            .expect("stat must succeed")
            .expect("stat must succeed")
    }

    fn mem_inc_direct(&self, inum: Inum) {
        let (ack, done) = mpsc::sync_channel(1);
        send_to(
            &self.ctx,
            inum,
            Ireq::Get {
                path: Vec::new(),
                fsref: false,
                memref: true,
                ack,
            },
        );
        let reply = done.recv().expect("mem ref inc must succeed");
        let _identity = reply.expect("mem ref inc must succeed");
    }

    fn insert_direct(&self, dir: Inum, name: &str, target: Inum) {
        let (ack, done) = mpsc::sync_channel(1);
        send_to(
            &self.ctx,
            dir,
            Ireq::Insert {
                path: Vec::new(),
                name: name.to_owned(),
                inum: target,
                ack,
            },
        );
        done.recv()
            .expect("insert must succeed")
            .expect("insert must succeed");
    }

    fn stat_locked_child(&self, tx: &InodeTx, dirs: &str, name: &str) -> Stat {
        let (ack, done) = mpsc::sync_channel(1);
        tx.sendc(
            dirs,
            name,
            Ireq::Stat {
                path: Vec::new(),
                ack,
            },
        );
        done.recv()
            .expect("locked child actor is gone")
            .expect("stat must succeed")
    }
}
