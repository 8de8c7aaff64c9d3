//! Block service contract used by the table builder and the block reader.

use crate::context::CallContext;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;

/// One allocated block of a snapshot as reported by a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEntry {
    pub index: u64,
    /// Opaque token required to fetch this block's content.
    pub token: String,
}

impl BlockEntry {
    pub fn new(index: u64, token: impl Into<String>) -> Self {
        Self {
            index,
            token: token.into(),
        }
    }
}

/// Volume size in the unit the listing reports it in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeSize {
    /// Gibibytes, as reported by the EBS listing API.
    GiB(u64),
    /// Exact bytes, used by local doubles for sub-GiB volumes.
    Bytes(u64),
}

impl VolumeSize {
    pub fn to_bytes(self) -> Result<u64> {
        match self {
            VolumeSize::GiB(n) => n
                .checked_mul(1 << 30)
                .ok_or_else(|| anyhow!("volume size {n} GiB overflows u64 bytes")),
            VolumeSize::Bytes(n) => Ok(n),
        }
    }
}

/// One page of a snapshot block listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockListPage {
    pub blocks: Vec<BlockEntry>,
    pub block_size: u32,
    pub volume_size: VolumeSize,
    /// Present while more pages remain.
    pub next_token: Option<String>,
}

/// Remote capability: paginated block listing and single-block fetch.
///
/// Implementations own transport, auth and retries. The caller wraps every
/// call in [`CallContext::run`], so cancellation applies even to backends
/// that never look at `ctx`.
#[async_trait]
pub trait BlockService: Send + Sync {
    async fn list_blocks(
        &self,
        ctx: &CallContext,
        snapshot_id: &str,
        next_token: Option<&str>,
    ) -> Result<BlockListPage>;

    /// Fetch the raw content of one block; must be exactly `block_size` bytes.
    async fn fetch_block(
        &self,
        ctx: &CallContext,
        snapshot_id: &str,
        block_index: u64,
        token: &str,
    ) -> Result<Bytes>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_size_gib_shift() {
        assert_eq!(VolumeSize::GiB(1).to_bytes().unwrap(), 1 << 30);
        assert_eq!(VolumeSize::GiB(16_384).to_bytes().unwrap(), 16_384u64 << 30);
        assert_eq!(VolumeSize::Bytes(1 << 20).to_bytes().unwrap(), 1 << 20);
    }

    #[test]
    fn test_volume_size_overflow() {
        assert!(VolumeSize::GiB(u64::MAX >> 10).to_bytes().is_err());
    }
}
