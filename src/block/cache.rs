//! Best-effort block caches.
//!
//! The reader treats every cache outcome as advisory: a miss or a rejected
//! `add` only means the block is fetched from the remote service. Eviction,
//! capacity and concurrency are the implementation's business; the reader
//! calls `get`/`add` concurrently from every task sharing it.

use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::runtime::RuntimeFlavor;

/// Key/value store consulted before every remote block fetch.
pub trait Cache<K, V>: Send + Sync {
    /// Returns whether the entry was accepted.
    fn add(&self, key: K, value: V) -> bool;

    fn get(&self, key: &K) -> Option<V>;
}

/// The cache shape used by [`SnapshotFile`](super::SnapshotFile).
pub type BlockCache = dyn Cache<String, Bytes>;

/// Cache key of one block; includes the snapshot so caches can be shared.
pub fn cache_key(snapshot_id: &str, block_index: u64) -> String {
    format!("{snapshot_id}:{block_index}")
}

/// Misses on every `get`, rejects every `add`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

impl<K, V> Cache<K, V> for NoopCache {
    fn add(&self, _key: K, _value: V) -> bool {
        false
    }

    fn get(&self, _key: &K) -> Option<V> {
        None
    }
}

/// In-memory cache bounded by the total number of cached bytes.
#[derive(Clone)]
pub struct MemoryCache {
    inner: moka::sync::Cache<String, Bytes>,
}

impl MemoryCache {
    pub fn new(max_capacity_bytes: u64) -> Self {
        let inner = moka::sync::Cache::builder()
            .weigher(|_k: &String, v: &Bytes| u32::try_from(v.len()).unwrap_or(u32::MAX))
            .max_capacity(max_capacity_bytes)
            .build();
        Self { inner }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }
}

impl Cache<String, Bytes> for MemoryCache {
    fn add(&self, key: String, value: Bytes) -> bool {
        self.inner.insert(key, value);
        true
    }

    fn get(&self, key: &String) -> Option<Bytes> {
        self.inner.get(key)
    }
}

/// On-disk cache, one file per block, surviving process restarts.
///
/// Files live at `root/<sha256[..2]>/<sha256[2..]>` of the key. Writes go to a
/// temporary file first and are renamed into place, so a reader never sees a
/// partially written block.
///
/// File I/O is synchronous. On a multi-thread tokio runtime it runs inside
/// `block_in_place` so other tasks move to another worker; elsewhere it runs
/// inline on the calling thread.
pub struct DiskCache {
    root: PathBuf,
    tmp_seq: AtomicU64,
}

impl DiskCache {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            tmp_seq: AtomicU64::new(0),
        }
    }

    /// `<user cache dir>/snapfile`, if the platform has one.
    pub fn default_root() -> Option<PathBuf> {
        dirs::cache_dir().map(|d| d.join("snapfile"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_to_file_path(&self, key: &str) -> PathBuf {
        let hash_str = hex::encode(Sha256::digest(key.as_bytes()));
        self.root.join(&hash_str[0..2]).join(&hash_str[2..])
    }

    fn write(&self, path: &Path, data: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("tmp-{}-{seq}", std::process::id()));
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, path).inspect_err(|_| {
            let _ = std::fs::remove_file(&tmp);
        })
    }
}

/// Run blocking file I/O, handing the worker's other tasks off when possible.
fn blocking_io<T>(f: impl FnOnce() -> T) -> T {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

impl Cache<String, Bytes> for DiskCache {
    fn add(&self, key: String, value: Bytes) -> bool {
        let path = self.key_to_file_path(&key);
        match blocking_io(|| self.write(&path, &value)) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    key = %key,
                    path = %path.display(),
                    "failed to write cache entry: {e}"
                );
                false
            }
        }
    }

    fn get(&self, key: &String) -> Option<Bytes> {
        let path = self.key_to_file_path(key);
        match blocking_io(|| std::fs::read(&path)) {
            Ok(buf) => Some(Bytes::from(buf)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(
                    key = %key,
                    path = %path.display(),
                    "failed to read cache entry: {e}"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_cache_never_hits() {
        let cache = NoopCache;
        assert!(!Cache::<String, Bytes>::add(
            &cache,
            "k".to_string(),
            Bytes::from_static(b"v")
        ));
        assert!(Cache::<String, Bytes>::get(&cache, &"k".to_string()).is_none());
    }

    #[test]
    fn test_cache_key_includes_snapshot() {
        assert_eq!(cache_key("snap-a", 7), "snap-a:7");
        assert_ne!(cache_key("snap-a", 7), cache_key("snap-b", 7));
    }

    #[test]
    fn test_memory_cache_roundtrip() {
        let cache = MemoryCache::new(1 << 20);
        let key = cache_key("snap", 1);
        assert!(cache.get(&key).is_none());
        assert!(cache.add(key.clone(), Bytes::from(vec![4u8; 512])));
        assert_eq!(cache.get(&key).unwrap().len(), 512);
        assert!(cache.contains(&key));
    }

    #[test]
    fn test_disk_cache_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(tmp.path());
        let key = cache_key("snap", 42);
        assert!(cache.get(&key).is_none());
        assert!(cache.add(key.clone(), Bytes::from(vec![7u8; 1024])));
        assert_eq!(cache.get(&key).unwrap(), Bytes::from(vec![7u8; 1024]));

        // a second instance over the same root sees the entry
        let reopened = DiskCache::new(tmp.path());
        assert!(reopened.get(&key).is_some());
        assert!(reopened.get(&cache_key("snap", 43)).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_disk_cache_inside_multi_thread_runtime() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = std::sync::Arc::new(DiskCache::new(tmp.path()));
        let mut tasks = Vec::new();
        for i in 0..4u64 {
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move {
                let key = cache_key("snap-mt", i);
                assert!(cache.add(key.clone(), Bytes::from(vec![i as u8; 4096])));
                tokio::task::yield_now().await;
                cache.get(&key)
            }));
        }
        for (i, t) in tasks.into_iter().enumerate() {
            assert_eq!(t.await.unwrap().unwrap(), Bytes::from(vec![i as u8; 4096]));
        }
    }

    #[tokio::test]
    async fn test_disk_cache_inside_current_thread_runtime() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(tmp.path());
        let key = cache_key("snap-ct", 1);
        assert!(cache.add(key.clone(), Bytes::from_static(b"block")));
        assert_eq!(cache.get(&key).unwrap(), Bytes::from_static(b"block"));
    }

    #[test]
    fn test_disk_cache_rejects_unwritable_root() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        let cache = DiskCache::new(&file);
        assert!(!cache.add(cache_key("snap", 0), Bytes::from_static(b"data")));
        assert!(cache.get(&cache_key("snap", 0)).is_none());
    }
}
