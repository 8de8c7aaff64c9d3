//! SnapshotFile: serve byte-range reads of a snapshot block by block, with
//! zero fill for sparse blocks and a cache in front of the remote fetch.

use super::cache::{BlockCache, cache_key};
use super::table::BlockTable;
use crate::cadapter::client::BlockService;
use crate::context::CallContext;
use crate::error::{Error, Result};
use bytes::Bytes;
use std::sync::Arc;

/// Random-access view of one snapshot.
///
/// `read_at` takes `&self` and may run from many tasks at once. The block
/// table is immutable, so the only shared mutable state is the cache, which
/// must tolerate concurrent `get`/`add` on its own. No lock is held across a
/// remote call.
pub struct SnapshotFile {
    snapshot_id: String,
    table: BlockTable,
    cache: Arc<BlockCache>,
    service: Arc<dyn BlockService>,
    ctx: CallContext,
}

impl SnapshotFile {
    pub fn new(
        snapshot_id: impl Into<String>,
        table: BlockTable,
        cache: Arc<BlockCache>,
        service: Arc<dyn BlockService>,
        ctx: CallContext,
    ) -> Self {
        Self {
            snapshot_id: snapshot_id.into(),
            table,
            cache,
            service,
            ctx,
        }
    }

    pub fn snapshot_id(&self) -> &str {
        &self.snapshot_id
    }

    pub fn size(&self) -> u64 {
        self.table.volume_size()
    }

    pub fn table(&self) -> &BlockTable {
        &self.table
    }

    /// Read from the block containing `offset`, never past that block's end.
    ///
    /// Returns `min(buf.len(), block_size - offset % block_size)`. The bound
    /// against the volume size is the caller's job (see `SectionReader`).
    #[tracing::instrument(
        level = "trace",
        skip(self, buf),
        fields(snapshot = %self.snapshot_id, len = buf.len())
    )]
    pub async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let layout = self.table.layout();
        let index = layout.block_index_of(offset);
        let start = layout.within_block_offset(offset) as usize;
        let n = buf.len().min(layout.remaining_in_block(offset) as usize);

        let Some(token) = self.table.token(index) else {
            // Never allocated: reads as zeros, no cache or remote access.
            buf[..n].fill(0);
            return Ok(n);
        };

        let block = self.load_block(index, token).await?;
        buf[..n].copy_from_slice(&block[start..start + n]);
        Ok(n)
    }

    /// Fill all of `buf` from `offset`, crossing block boundaries as needed.
    pub async fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let end = offset
            .checked_add(buf.len() as u64)
            .ok_or(Error::UnexpectedEof)?;
        if end > self.size() {
            return Err(Error::UnexpectedEof);
        }
        let mut filled = 0;
        while filled < buf.len() {
            filled += self.read_at(&mut buf[filled..], offset + filled as u64).await?;
        }
        Ok(())
    }

    async fn load_block(&self, index: u64, token: &str) -> Result<Bytes> {
        let key = cache_key(&self.snapshot_id, index);
        if let Some(block) = self.cache.get(&key) {
            self.check_block(index, &block)?;
            tracing::trace!(index, "block cache hit");
            return Ok(block);
        }

        tracing::debug!(snapshot = %self.snapshot_id, index, "fetching block");
        let block = self
            .ctx
            .run(
                self.service
                    .fetch_block(&self.ctx, &self.snapshot_id, index, token),
            )
            .await?;
        self.check_block(index, &block)?;
        if !self.cache.add(key, block.clone()) {
            tracing::trace!(index, "block not accepted by cache");
        }
        Ok(block)
    }

    fn check_block(&self, index: u64, block: &[u8]) -> Result<()> {
        let expected = self.table.block_size();
        if block.len() != expected as usize {
            return Err(Error::BlockSizeMismatch {
                index,
                expected,
                actual: block.len(),
            });
        }
        Ok(())
    }
}
