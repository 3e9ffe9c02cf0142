// Formatting a medium. Lays down the boot pointer, the superblock, the
// free bitmap, a zeroed log region, and a root directory holding `.` and
// `..`. Runs straight against the device; there is no cache or journal
// before a mount.

use log::info;

use crate::device::device_structs::DeviceHandle;
use crate::layout::dir_block::DirView;
use crate::layout::inode_block::{InodeKind, InodeView, Inum};
use crate::layout::superblock::{Superblock, write_superblock_pointer};
use crate::layout::{BLOCK_SIZE, Block};

/// Geometry for a fresh filesystem.
pub struct MkfsOptions {
    /// Total blocks on the medium.
    pub nblocks: u64,
    /// Blocks for the journal, header included. At most 63 (the header
    /// indexes 62 data blocks), and at least 11 so one op fits an epoch.
    pub log_len: u64,
}

impl Default for MkfsOptions {
    fn default() -> Self {
        Self {
            nblocks: 8192,
            log_len: 63,
        }
    }
}

const BITS_PER_BLOCK: u64 = (BLOCK_SIZE * 8) as u64;

/// Write a fresh filesystem onto the device.
pub fn mkfs(dev: &DeviceHandle, opts: &MkfsOptions) {
    assert!(
        (11..=63).contains(&opts.log_len),
        "log length must be between 11 and 63 blocks"
    );

    // geometry: boot block, superblock, bitmap, log, then usable space
    let free_start = 2u64;
    let free_len = opts.nblocks.div_ceil(BITS_PER_BLOCK);
    let usable_start = free_start + free_len + opts.log_len;
    // the root directory takes the first two usable blocks
    assert!(
        usable_start + 2 < opts.nblocks,
        "disk too small for this geometry"
    );
    let root_iblk = usable_start;
    let root_data = usable_start + 1;
    let root = Inum::encode(root_iblk, 0);

    info!(
        "Formatting: {} blocks, bitmap at {}..{}, log at {}..{}, root inode {}.",
        opts.nblocks,
        free_start,
        free_start + free_len,
        usable_start - opts.log_len,
        usable_start,
        root.0
    );

    // writing the last block first sizes a file-backed image; everything
    // in between reads back as zeros
    let zero: Block = [0; BLOCK_SIZE];
    dev.write(opts.nblocks - 1, &zero);

    // boot block: just the superblock pointer
    let mut block0: Block = [0; BLOCK_SIZE];
    write_superblock_pointer(&mut block0, 1);
    dev.write(0, &block0);

    // superblock
    let sb = Superblock {
        free_start,
        free_len,
        log_len: opts.log_len,
        root,
        last_block: opts.nblocks,
        inode_hint: root_iblk,
    };
    let mut sb_block: Block = [0; BLOCK_SIZE];
    sb.write_to(&mut sb_block);
    dev.write(1, &sb_block);

    // bitmap: the root's two blocks are taken, and so is every bit that
    // points past the end of the medium (the last bitmap block rounds up)
    for i in 0..free_len {
        let mut data: Block = [0; BLOCK_SIZE];
        for byte in 0..BLOCK_SIZE {
            for bit in 0..8 {
                let covered = usable_start + i * BITS_PER_BLOCK + (byte as u64) * 8 + bit;
                let taken = covered < usable_start + 2 || covered >= opts.nblocks;
                if taken {
                    data[byte] |= 1 << bit;
                }
            }
        }
        dev.write(free_start + i, &data);
    }

    // log region: all zeros, recover_num included
    for i in 0..opts.log_len {
        dev.write(free_start + free_len + i, &zero);
    }

    // root inode
    let mut iblock: Block = [0; BLOCK_SIZE];
    {
        let mut view = InodeView::new(&mut iblock, 0);
        view.set_kind(InodeKind::Dir);
        view.set_links(1);
        view.set_size(BLOCK_SIZE as u64);
        view.set_addr(0, root_data);
    }
    dev.write(root_iblk, &iblock);

    // root directory data: `.` and `..` both name the root
    let mut dblock: Block = [0; BLOCK_SIZE];
    {
        let mut view = DirView::new(&mut dblock);
        view.set_filename(0, ".");
        view.set_inum(0, root);
        view.set_filename(1, "..");
        view.set_inum(1, root);
    }
    dev.write(root_data, &dblock);

    info!("Format complete.");
}
