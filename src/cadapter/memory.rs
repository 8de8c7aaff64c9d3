//! In-memory block service for local development and tests.
//!
//! Unlike the flat-file double it can leave blocks unallocated and split its
//! listing across several pages.

use crate::cadapter::client::{BlockEntry, BlockListPage, BlockService, VolumeSize};
use crate::context::CallContext;
use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub struct MemoryBlockService {
    block_size: u32,
    volume_size: u64,
    report_gib: bool,
    page_size: usize,
    blocks: BTreeMap<u64, Bytes>,
    fail_fetch: AtomicBool,
    list_calls: AtomicU64,
    fetch_calls: AtomicU64,
}

impl MemoryBlockService {
    pub fn new(block_size: u32, volume_size: u64) -> Self {
        Self {
            block_size,
            volume_size,
            report_gib: false,
            page_size: usize::MAX,
            blocks: BTreeMap::new(),
            fail_fetch: AtomicBool::new(false),
            list_calls: AtomicU64::new(0),
            fetch_calls: AtomicU64::new(0),
        }
    }

    /// Store `data` as the content of block `index`; its length is not checked.
    pub fn with_block(mut self, index: u64, data: impl Into<Bytes>) -> Self {
        self.blocks.insert(index, data.into());
        self
    }

    /// Split the listing into pages of at most `page_size` entries.
    pub fn with_page_size(self, page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            ..self
        }
    }

    /// Report the volume size in GiB like the EBS API does (rounded down).
    pub fn report_in_gib(self) -> Self {
        Self {
            report_gib: true,
            ..self
        }
    }

    pub fn set_fetch_failure(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::Relaxed);
    }

    pub fn list_calls(&self) -> u64 {
        self.list_calls.load(Ordering::Relaxed)
    }

    pub fn fetch_calls(&self) -> u64 {
        self.fetch_calls.load(Ordering::Relaxed)
    }

    fn token_for(index: u64) -> String {
        format!("tok-{index}")
    }
}

#[async_trait]
impl BlockService for MemoryBlockService {
    async fn list_blocks(
        &self,
        _ctx: &CallContext,
        _snapshot_id: &str,
        next_token: Option<&str>,
    ) -> Result<BlockListPage> {
        self.list_calls.fetch_add(1, Ordering::Relaxed);
        let page: usize = match next_token {
            Some(t) => t
                .strip_prefix("page-")
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| anyhow!("malformed continuation token {t:?}"))?,
            None => 0,
        };
        let start = page.saturating_mul(self.page_size);
        let blocks: Vec<BlockEntry> = self
            .blocks
            .keys()
            .skip(start)
            .take(self.page_size)
            .map(|&i| BlockEntry::new(i, Self::token_for(i)))
            .collect();
        let consumed = start.saturating_add(blocks.len());
        let next_token = (consumed < self.blocks.len()).then(|| format!("page-{}", page + 1));
        let volume_size = if self.report_gib {
            VolumeSize::GiB(self.volume_size >> 30)
        } else {
            VolumeSize::Bytes(self.volume_size)
        };
        Ok(BlockListPage {
            blocks,
            block_size: self.block_size,
            volume_size,
            next_token,
        })
    }

    async fn fetch_block(
        &self,
        _ctx: &CallContext,
        snapshot_id: &str,
        block_index: u64,
        token: &str,
    ) -> Result<Bytes> {
        self.fetch_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_fetch.load(Ordering::Relaxed) {
            bail!("fetch of block {block_index} in {snapshot_id} failed");
        }
        if token != Self::token_for(block_index) {
            bail!("invalid token {token:?} for block {block_index}");
        }
        self.blocks
            .get(&block_index)
            .cloned()
            .ok_or_else(|| anyhow!("block {block_index} is not allocated in {snapshot_id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_listing_pages() {
        let svc = MemoryBlockService::new(512, 8 * 512)
            .with_block(0, vec![1u8; 512])
            .with_block(3, vec![2u8; 512])
            .with_block(6, vec![3u8; 512])
            .with_page_size(2);
        let ctx = CallContext::new();

        let first = svc.list_blocks(&ctx, "snap", None).await.unwrap();
        assert_eq!(first.blocks.len(), 2);
        assert_eq!(first.next_token.as_deref(), Some("page-1"));

        let second = svc
            .list_blocks(&ctx, "snap", first.next_token.as_deref())
            .await
            .unwrap();
        assert_eq!(second.blocks, vec![BlockEntry::new(6, "tok-6")]);
        assert!(second.next_token.is_none());
    }

    #[tokio::test]
    async fn test_memory_fetch_checks_token() {
        let svc = MemoryBlockService::new(4, 8).with_block(1, vec![9u8; 4]);
        let ctx = CallContext::new();
        assert!(svc.fetch_block(&ctx, "snap", 1, "tok-0").await.is_err());
        let data = svc.fetch_block(&ctx, "snap", 1, "tok-1").await.unwrap();
        assert_eq!(&data[..], &[9, 9, 9, 9]);
        assert_eq!(svc.fetch_calls(), 2);
    }
}
