//! Flat-file block service: a local image stands in for a snapshot.
//!
//! Every block in `[0, volume_size / block_size)` is reported as allocated with
//! an empty token, so the image is never sparse from the reader's view.

use crate::cadapter::client::{BlockEntry, BlockListPage, BlockService, VolumeSize};
use crate::context::CallContext;
use anyhow::{Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::{
    fs,
    io::{AsyncReadExt, AsyncSeekExt},
};

pub struct FileBlockService {
    path: PathBuf,
    block_size: u32,
    volume_size: u64,
    list_calls: AtomicU64,
    fetch_calls: AtomicU64,
}

impl FileBlockService {
    /// Fails if the image cannot be opened or `block_size` is zero.
    pub async fn new<P: AsRef<Path>>(path: P, block_size: u32, volume_size: u64) -> Result<Self> {
        if block_size == 0 {
            bail!("block size must be non-zero");
        }
        let path = path.as_ref().to_path_buf();
        fs::metadata(&path).await?;
        Ok(Self {
            path,
            block_size,
            volume_size,
            list_calls: AtomicU64::new(0),
            fetch_calls: AtomicU64::new(0),
        })
    }

    pub fn list_calls(&self) -> u64 {
        self.list_calls.load(Ordering::Relaxed)
    }

    pub fn fetch_calls(&self) -> u64 {
        self.fetch_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BlockService for FileBlockService {
    async fn list_blocks(
        &self,
        _ctx: &CallContext,
        _snapshot_id: &str,
        _next_token: Option<&str>,
    ) -> Result<BlockListPage> {
        self.list_calls.fetch_add(1, Ordering::Relaxed);
        let count = self.volume_size / self.block_size as u64;
        let blocks = (0..count).map(|i| BlockEntry::new(i, "")).collect();
        Ok(BlockListPage {
            blocks,
            block_size: self.block_size,
            volume_size: VolumeSize::Bytes(self.volume_size),
            next_token: None,
        })
    }

    #[tracing::instrument(level = "trace", skip(self, _ctx, _token))]
    async fn fetch_block(
        &self,
        _ctx: &CallContext,
        snapshot_id: &str,
        block_index: u64,
        _token: &str,
    ) -> Result<Bytes> {
        self.fetch_calls.fetch_add(1, Ordering::Relaxed);
        let bs = self.block_size as usize;
        let offset = block_index * self.block_size as u64;
        let mut f = fs::File::open(&self.path).await?;
        f.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; bs];
        let mut filled = 0;
        while filled < bs {
            let n = f.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        // A short tail is returned as-is; the reader rejects it as a size mismatch.
        buf.truncate(filled);
        Ok(Bytes::from(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_localfs_lists_every_block() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&vec![5u8; 4096]).unwrap();
        let svc = FileBlockService::new(tmp.path(), 1024, 4096).await.unwrap();

        let page = svc
            .list_blocks(&CallContext::new(), "snap-local", None)
            .await
            .unwrap();
        assert_eq!(page.blocks.len(), 4);
        assert!(page.blocks.iter().all(|b| b.token.is_empty()));
        assert_eq!(page.blocks[3].index, 3);
        assert_eq!(page.volume_size, VolumeSize::Bytes(4096));
        assert!(page.next_token.is_none());
        assert_eq!(svc.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_localfs_fetch_reads_block_at_offset() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..4096u32).map(|i| (i / 1024) as u8 + 1).collect();
        tmp.write_all(&data).unwrap();
        let svc = FileBlockService::new(tmp.path(), 1024, 4096).await.unwrap();

        let block = svc
            .fetch_block(&CallContext::new(), "snap-local", 2, "")
            .await
            .unwrap();
        assert_eq!(block.len(), 1024);
        assert!(block.iter().all(|&b| b == 3));
        assert_eq!(svc.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn test_localfs_short_tail() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&vec![1u8; 1500]).unwrap();
        let svc = FileBlockService::new(tmp.path(), 1024, 2048).await.unwrap();
        let block = svc
            .fetch_block(&CallContext::new(), "snap-local", 1, "")
            .await
            .unwrap();
        assert_eq!(block.len(), 476);
    }

    #[tokio::test]
    async fn test_localfs_missing_image() {
        let dir = tempfile::tempdir().unwrap();
        assert!(
            FileBlockService::new(dir.path().join("absent.img"), 512, 1024)
                .await
                .is_err()
        );
    }
}
