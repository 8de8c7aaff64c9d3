//! snapfile configuration
//!
//! YAML file with an `ebs` section for the remote client and a `cache`
//! section selecting and sizing the block cache. Every field has a default,
//! so an empty file (or no file at all) is a valid configuration.

use crate::block::{BlockCache, DiskCache, MemoryCache};
use crate::cadapter::ebs::EbsConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Default in-memory cache budget (256 MiB, 512 EBS blocks).
pub const DEFAULT_CACHE_CAPACITY: u64 = 256 * 1024 * 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ebs: EbsConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    None,
    #[default]
    Memory,
    Disk,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub kind: CacheKind,
    /// Capacity of the memory cache in bytes.
    pub max_capacity_bytes: u64,
    /// Root of the disk cache; the user cache directory when unset.
    pub dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            kind: CacheKind::default(),
            max_capacity_bytes: DEFAULT_CACHE_CAPACITY,
            dir: None,
        }
    }
}

impl CacheConfig {
    pub fn kind(self, kind: CacheKind) -> Self {
        Self { kind, ..self }
    }

    pub fn max_capacity_bytes(self, max_capacity_bytes: u64) -> Self {
        Self {
            max_capacity_bytes,
            ..self
        }
    }

    pub fn dir(self, dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            ..self
        }
    }

    /// Build the configured cache; `None` means reads go straight to the service.
    pub fn build(&self) -> Result<Option<Arc<BlockCache>>, ConfigError> {
        let cache: Arc<BlockCache> = match self.kind {
            CacheKind::None => return Ok(None),
            CacheKind::Memory => Arc::new(MemoryCache::new(self.max_capacity_bytes)),
            CacheKind::Disk => {
                let root = self
                    .dir
                    .clone()
                    .or_else(DiskCache::default_root)
                    .ok_or(ConfigError::NoCacheDir)?;
                Arc::new(DiskCache::new(root))
            }
        };
        Ok(Some(cache))
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::IoError)?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// First existing file among the well-known locations, else defaults.
    pub fn from_default_path() -> Result<Self, ConfigError> {
        let possible_paths = [
            "snapfile.yml",
            "snapfile.yaml",
            "/etc/snapfile/config.yml",
        ];
        for path in &possible_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }
        Ok(Self::default())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("no cache directory configured and the platform has none")]
    NoCacheDir,
}
