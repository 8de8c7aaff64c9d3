//! Opening a snapshot: build the block table, then hand out a bounded reader.

use crate::block::{BlockCache, NoopCache, SectionReader, SnapshotFile, build_block_table};
use crate::cadapter::BlockService;
use crate::context::CallContext;
use crate::error::Result;
use std::sync::Arc;

/// Open `snapshot_id` as a seekable reader over `[0, volume size)`.
///
/// Without a cache every read goes to `service`. The context is kept by the
/// reader and applies to every later block fetch as well.
pub async fn open(
    snapshot_id: &str,
    ctx: &CallContext,
    cache: Option<Arc<BlockCache>>,
    service: Arc<dyn BlockService>,
) -> Result<SectionReader> {
    let file = open_file(snapshot_id, ctx, cache, service).await?;
    Ok(SectionReader::new(file))
}

/// Like [`open`], but returns the unbounded block reader itself.
pub async fn open_file(
    snapshot_id: &str,
    ctx: &CallContext,
    cache: Option<Arc<BlockCache>>,
    service: Arc<dyn BlockService>,
) -> Result<Arc<SnapshotFile>> {
    let table = build_block_table(service.as_ref(), ctx, snapshot_id).await?;
    let cache = cache.unwrap_or_else(|| Arc::new(NoopCache) as Arc<BlockCache>);
    Ok(Arc::new(SnapshotFile::new(
        snapshot_id,
        table,
        cache,
        service,
        ctx.clone(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemoryCache;
    use crate::cadapter::memory::MemoryBlockService;
    use crate::error::Error;
    use std::io::SeekFrom;

    const BS: u32 = 512 * 1024;

    fn scenario() -> Arc<MemoryBlockService> {
        Arc::new(MemoryBlockService::new(BS, 1 << 20).with_block(0, vec![0xAAu8; BS as usize]))
    }

    #[tokio::test]
    async fn test_open_two_block_scenario() {
        let svc = scenario();
        let reader = open("snap-aa", &CallContext::new(), None, svc.clone())
            .await
            .unwrap();
        assert_eq!(reader.size(), 1 << 20);
        assert_eq!(svc.list_calls(), 1);

        let mut buf = [0u8; 4];
        assert_eq!(reader.read_at(&mut buf, 0).await.unwrap(), 4);
        assert_eq!(buf, [0xAA; 4]);
        assert_eq!(svc.fetch_calls(), 1);

        let mut buf = [0u8; 4];
        assert_eq!(reader.read_at(&mut buf, BS as u64).await.unwrap(), 4);
        assert_eq!(buf, [0; 4]);
        assert_eq!(svc.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn test_open_without_cache_uses_noop() {
        let svc = scenario();
        let mut reader = open("snap-aa", &CallContext::new(), None, svc.clone())
            .await
            .unwrap();
        let mut buf = [0u8; 512];
        reader.read(&mut buf).await.unwrap();
        reader.seek(SeekFrom::Start(0)).unwrap();
        reader.read(&mut buf).await.unwrap();
        assert_eq!(svc.fetch_calls(), 2);
    }

    #[tokio::test]
    async fn test_cache_outlives_reader() {
        let svc = scenario();
        let cache: Arc<BlockCache> = Arc::new(MemoryCache::new(4 << 20));
        {
            let reader = open("snap-aa", &CallContext::new(), Some(cache.clone()), svc.clone())
                .await
                .unwrap();
            let mut buf = [0u8; 16];
            reader.read_at(&mut buf, 10).await.unwrap();
        }
        let reader = open("snap-aa", &CallContext::new(), Some(cache), svc.clone())
            .await
            .unwrap();
        let mut buf = [0u8; 16];
        reader.read_at(&mut buf, 10).await.unwrap();
        assert_eq!(buf, [0xAA; 16]);
        assert_eq!(svc.fetch_calls(), 1);
        assert_eq!(svc.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_open_fails_with_listing_error() {
        let ctx = CallContext::new();
        ctx.cancel();
        let err = open("snap-aa", &ctx, None, scenario()).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_after_open_stops_fetches() {
        let svc = scenario();
        let ctx = CallContext::new();
        let reader = open("snap-aa", &ctx, None, svc.clone()).await.unwrap();
        ctx.cancel();

        let mut buf = [0u8; 4];
        let err = reader.read_at(&mut buf, 0).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        // sparse reads need no remote call and still succeed
        assert_eq!(reader.read_at(&mut buf, BS as u64).await.unwrap(), 4);
        assert_eq!(svc.fetch_calls(), 0);
    }
}
