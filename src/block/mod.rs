//! Block addressing, block table, cache and readers
//!
//! Responsibilities:
//! - Translate absolute byte offsets into (block index, offset in block).
//! - Walk the paginated listing once and freeze it into a `BlockTable`.
//! - Serve byte-range reads block by block, through an injectable cache,
//!   zero-filling blocks the snapshot never allocated.
//! - Expose the result as a bounded, seekable reader.
//!
//! Submodules:
//! - `layout`: block index arithmetic
//! - `table`: block table and its builder
//! - `cache`: cache contract and implementations
//! - `reader`: `SnapshotFile`, the random-access engine
//! - `section`: `SectionReader`, the bounded cursor over a `SnapshotFile`
pub mod cache;
pub mod layout;
pub mod reader;
pub mod section;
pub mod table;

pub use cache::{BlockCache, Cache, DiskCache, MemoryCache, NoopCache, cache_key};
pub use layout::BlockLayout;
pub use reader::SnapshotFile;
pub use section::SectionReader;
pub use table::{BlockTable, build_block_table};
