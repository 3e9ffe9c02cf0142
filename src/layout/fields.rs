// 8-byte little-endian field access. The superblock, inodes, the log header
// and indirect blocks all store their numbers as u64 words at 8-byte
// offsets, so one pair of helpers covers the lot.

use crate::layout::Block;

/// How many 8-byte words fit in one block.
pub const WORDS_PER_BLOCK: usize = super::BLOCK_SIZE / 8;

/// Read word `field` of a block.
pub fn field_read(data: &Block, field: usize) -> u64 {
    let at = field * 8;
    let bytes: [u8; 8] = data[at..at + 8]
        .try_into()
        .expect("an 8-byte slice of a block is 8 bytes");
    u64::from_le_bytes(bytes)
}

/// Write word `field` of a block.
pub fn field_write(data: &mut Block, field: usize, value: u64) {
    let at = field * 8;
    data[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

/// Read an unaligned little-endian u64 at a byte offset. Directory entries
/// put their inum at byte 14 of a 22-byte slot, so they can't use the word
/// helpers.
pub fn bytes_read(data: &Block, at: usize) -> u64 {
    let bytes: [u8; 8] = data[at..at + 8]
        .try_into()
        .expect("an 8-byte slice of a block is 8 bytes");
    u64::from_le_bytes(bytes)
}

/// Write an unaligned little-endian u64 at a byte offset.
pub fn bytes_write(data: &mut Block, at: usize, value: u64) {
    data[at..at + 8].copy_from_slice(&value.to_le_bytes());
}
