//! Remote block service adapters (cadapter)
//!
//! Submodules:
//! - `client`: the `BlockService` contract and its page/entry types
//! - `ebs`: production client for the EBS direct APIs
//! - `localfs`: flat-file double that serves every block from a local image
//! - `memory`: in-memory double with sparse blocks and paginated listings
pub mod client;
pub mod ebs;
pub mod localfs;
pub mod memory;

pub use client::{BlockEntry, BlockListPage, BlockService, VolumeSize};
