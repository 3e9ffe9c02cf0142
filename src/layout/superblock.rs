// The boot block and the superblock.
//
// Block 0 carries a little-endian pointer to the superblock at byte 506
// (it shares the block with boot machinery we don't model). The pointer is
// 32 bits; a 64-bit value would run off the end of the sector.
//
// Superblock format, 8-byte little-endian words:
//   word 0: first free-bitmap block
//   word 1: number of free-bitmap blocks
//   word 2: number of log blocks (header included)
//   word 3: root inum
//   word 4: total blocks on the device
//   word 5: an inode block that may still have free slots (mkfs hint)

use crate::layout::Block;
use crate::layout::fields::{field_read, field_write};
use crate::layout::inode_block::Inum;

/// Where block 0 keeps the superblock pointer.
pub const SUPERBLOCK_POINTER_OFFSET: usize = 506;

/// Parsed superblock. Read once at mount; mkfs writes it once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    pub free_start: u64,
    pub free_len: u64,
    pub log_len: u64,
    pub root: Inum,
    pub last_block: u64,
    pub inode_hint: u64,
}

impl Superblock {
    pub fn parse(data: &Block) -> Self {
        Self {
            free_start: field_read(data, 0),
            free_len: field_read(data, 1),
            log_len: field_read(data, 2),
            root: Inum(field_read(data, 3)),
            last_block: field_read(data, 4),
            inode_hint: field_read(data, 5),
        }
    }

    pub fn write_to(&self, data: &mut Block) {
        field_write(data, 0, self.free_start);
        field_write(data, 1, self.free_len);
        field_write(data, 2, self.log_len);
        field_write(data, 3, self.root.0);
        field_write(data, 4, self.last_block);
        field_write(data, 5, self.inode_hint);
    }

    /// First block of the log region. The log sits right after the bitmap.
    pub fn log_start(&self) -> u64 {
        self.free_start + self.free_len
    }

    /// First block the free bitmap actually hands out.
    pub fn usable_start(&self) -> u64 {
        self.log_start() + self.log_len
    }
}

/// Read the superblock pointer out of block 0.
pub fn superblock_pointer(block0: &Block) -> u64 {
    let bytes: [u8; 4] = block0[SUPERBLOCK_POINTER_OFFSET..SUPERBLOCK_POINTER_OFFSET + 4]
        .try_into()
        .expect("a 4-byte slice of a block is 4 bytes");
    u32::from_le_bytes(bytes) as u64
}

/// Write the superblock pointer into block 0.
pub fn write_superblock_pointer(block0: &mut Block, blkno: u64) {
    let small = u32::try_from(blkno).expect("superblock lives in the first 4G blocks");
    block0[SUPERBLOCK_POINTER_OFFSET..SUPERBLOCK_POINTER_OFFSET + 4]
        .copy_from_slice(&small.to_le_bytes());
}
