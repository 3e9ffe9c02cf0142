// Directory data blocks.
//
// A directory's data is an array of 22-byte entries: 14 bytes of NUL-padded
// filename followed by an 8-byte inum. 23 entries fit in a block; the last
// 6 bytes are dead space. A slot is empty iff its name starts with NUL.

use crate::layout::Block;
use crate::layout::fields::{bytes_read, bytes_write};
use crate::layout::inode_block::Inum;

/// Longest storable filename.
pub const DNAME_LEN: usize = 14;
/// Bytes per directory entry.
pub const NDBYTES: usize = 22;
/// Entries per block.
pub const NDIRENTS: usize = super::BLOCK_SIZE / NDBYTES;

/// Entry access for one directory data block.
pub struct DirView<'a> {
    data: &'a mut Block,
}

impl<'a> DirView<'a> {
    pub fn new(data: &'a mut Block) -> Self {
        Self { data }
    }

    fn entry_offset(slot: usize) -> usize {
        assert!(slot < NDIRENTS, "directory slot out of range");
        slot * NDBYTES
    }

    /// The name in a slot, NUL padding stripped. Empty means the slot is
    /// free.
    pub fn filename(&self, slot: usize) -> String {
        let at = Self::entry_offset(slot);
        let raw = &self.data[at..at + DNAME_LEN];
        let len = raw.iter().position(|b| *b == 0).unwrap_or(DNAME_LEN);
        String::from_utf8_lossy(&raw[..len]).into_owned()
    }

    pub fn is_free(&self, slot: usize) -> bool {
        self.data[Self::entry_offset(slot)] == 0
    }

    pub fn inum(&self, slot: usize) -> Inum {
        let at = Self::entry_offset(slot) + DNAME_LEN;
        Inum(bytes_read(self.data, at))
    }

    /// Write a name into a slot, padding the tail with NULs. An empty name
    /// frees the slot.
    pub fn set_filename(&mut self, slot: usize, name: &str) {
        assert!(name.len() <= DNAME_LEN, "directory names are at most 14 bytes");
        let at = Self::entry_offset(slot);
        let field = &mut self.data[at..at + DNAME_LEN];
        field.fill(0);
        field[..name.len()].copy_from_slice(name.as_bytes());
    }

    pub fn set_inum(&mut self, slot: usize, inum: Inum) {
        let at = Self::entry_offset(slot) + DNAME_LEN;
        bytes_write(self.data, at, inum.0);
    }
}
