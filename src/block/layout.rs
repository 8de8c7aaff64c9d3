//! Block layout and indexing utilities.
//!
//! - Fixed-size block partitioning of a snapshot's address space.
//! - Helpers to compute (block_index, offset_in_block) from absolute offsets.

/// Block size used by EBS snapshots (512 KiB).
pub const DEFAULT_BLOCK_SIZE: u32 = 512 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    pub block_size: u32,
}

impl Default for BlockLayout {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl BlockLayout {
    pub fn new(block_size: u32) -> Self {
        Self { block_size }
    }

    #[inline]
    pub fn block_index_of(&self, offset: u64) -> u64 {
        offset / self.block_size as u64
    }

    #[inline]
    pub fn within_block_offset(&self, offset: u64) -> u32 {
        (offset % self.block_size as u64) as u32
    }

    /// Absolute offset of the first byte of `block_index`.
    #[inline]
    pub fn block_start(&self, block_index: u64) -> u64 {
        block_index * self.block_size as u64
    }

    /// Number of blocks needed to cover `volume_size` bytes.
    #[inline]
    pub fn block_count(&self, volume_size: u64) -> u64 {
        volume_size.div_ceil(self.block_size as u64)
    }

    /// Bytes available in the block containing `offset`, starting at `offset`.
    #[inline]
    pub fn remaining_in_block(&self, offset: u64) -> u32 {
        self.block_size - self.within_block_offset(offset)
    }
}
