// The log header block, first block of the journal region.
//
//   word 0:      recover_num: how many committed blocks still need to be
//                installed; nonzero at mount means we crashed mid-commit
//   words 8-69:  destination block numbers, one per logged block
//
// Destinations start at word 8 (byte 64), leaving room for up to 62 of
// them. The data blocks of the log follow the header in order, so log data
// block i installs to destination i.

use crate::layout::Block;
use crate::layout::fields::{field_read, field_write};

/// The header can describe this many logged blocks.
pub const LOG_MAX_BLOCKS: usize = 62;

const DEST_BASE: usize = 8;

pub struct LogHeaderView<'a> {
    data: &'a mut Block,
}

impl<'a> LogHeaderView<'a> {
    pub fn new(data: &'a mut Block) -> Self {
        Self { data }
    }

    pub fn recover_num(&self) -> u64 {
        field_read(self.data, 0)
    }

    pub fn set_recover_num(&mut self, n: u64) {
        field_write(self.data, 0, n);
    }

    pub fn dest(&self, i: usize) -> u64 {
        assert!(i < LOG_MAX_BLOCKS, "log destination index out of range");
        field_read(self.data, DEST_BASE + i)
    }

    pub fn set_dest(&mut self, i: usize, blkno: u64) {
        assert!(i < LOG_MAX_BLOCKS, "log destination index out of range");
        field_write(self.data, DEST_BASE + i, blkno);
    }
}
