//! snapfile: present a sparse, block-addressed remote volume snapshot as a
//! seekable random-access byte stream.
//!
//! The remote side is reached through [`cadapter::BlockService`]; reads are
//! translated into whole-block fetches, memoised through an injectable
//! [`block::Cache`], and unallocated blocks read back as zeros.

pub mod block;
pub mod cadapter;
pub mod config;
pub mod context;
pub mod error;
pub mod open;

pub use block::{BlockCache, BlockLayout, BlockTable, SectionReader, SnapshotFile};
pub use cadapter::{BlockEntry, BlockListPage, BlockService, VolumeSize};
pub use context::CallContext;
pub use error::{Error, Result};
pub use open::{open, open_file};
