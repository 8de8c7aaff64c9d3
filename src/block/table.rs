//! Block table: the frozen sparse index of one snapshot.
//!
//! Only allocated blocks are present. An index missing from the table is a
//! block the snapshot never wrote and reads back as zeros.

use super::layout::BlockLayout;
use crate::cadapter::client::BlockService;
use crate::context::CallContext;
use crate::error::{Error, Result};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone)]
pub struct BlockTable {
    layout: BlockLayout,
    volume_size: u64,
    tokens: BTreeMap<u64, String>,
}

impl BlockTable {
    pub fn new(layout: BlockLayout, volume_size: u64, tokens: BTreeMap<u64, String>) -> Self {
        Self {
            layout,
            volume_size,
            tokens,
        }
    }

    pub fn layout(&self) -> BlockLayout {
        self.layout
    }

    pub fn block_size(&self) -> u32 {
        self.layout.block_size
    }

    /// Logical size of the snapshot in bytes.
    pub fn volume_size(&self) -> u64 {
        self.volume_size
    }

    /// Fetch token of `index`, or `None` for a sparse block.
    pub fn token(&self, index: u64) -> Option<&str> {
        self.tokens.get(&index).map(String::as_str)
    }

    pub fn is_allocated(&self, index: u64) -> bool {
        self.tokens.contains_key(&index)
    }

    pub fn allocated_blocks(&self) -> usize {
        self.tokens.len()
    }

    pub fn allocated_bytes(&self) -> u64 {
        self.tokens.len() as u64 * self.layout.block_size as u64
    }

    /// Allocated blocks in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &str)> {
        self.tokens.iter().map(|(&i, t)| (i, t.as_str()))
    }
}

/// Walk every listing page of `snapshot_id` and freeze the result.
///
/// The first page's block size is authoritative and the volume size comes
/// from the last page. Any listing failure aborts the walk; nothing gathered
/// before it escapes.
#[tracing::instrument(level = "debug", skip(service, ctx))]
pub async fn build_block_table(
    service: &dyn BlockService,
    ctx: &CallContext,
    snapshot_id: &str,
) -> Result<BlockTable> {
    let mut tokens = BTreeMap::new();
    let mut block_size: Option<u32> = None;
    let mut cursor: Option<String> = None;
    let mut seen_cursors = HashSet::new();
    let mut pages = 0u64;

    let reported = loop {
        let page = ctx
            .run(service.list_blocks(ctx, snapshot_id, cursor.as_deref()))
            .await?;
        pages += 1;
        tracing::debug!(
            snapshot_id,
            page = pages,
            blocks = page.blocks.len(),
            "listed snapshot blocks"
        );

        match block_size {
            None => {
                if !page.block_size.is_power_of_two() {
                    return Err(Error::InvalidListing(format!(
                        "block size {} is not a power of two",
                        page.block_size
                    )));
                }
                block_size = Some(page.block_size);
            }
            Some(bs) if bs != page.block_size => {
                return Err(Error::InvalidListing(format!(
                    "page {pages} reports block size {}, first page reported {bs}",
                    page.block_size
                )));
            }
            Some(_) => {}
        }

        for b in page.blocks {
            tokens.insert(b.index, b.token);
        }

        match page.next_token {
            Some(next) if !seen_cursors.insert(next.clone()) => {
                return Err(Error::InvalidListing(format!(
                    "continuation token {next:?} repeated after {pages} pages"
                )));
            }
            Some(next) => cursor = Some(next),
            None => break page.volume_size,
        }
    };

    let volume_size = reported
        .to_bytes()
        .map_err(|e| Error::InvalidListing(e.to_string()))?;
    let layout = BlockLayout::new(block_size.unwrap_or_default());
    tracing::info!(
        snapshot_id,
        pages,
        allocated = tokens.len(),
        block_size = layout.block_size,
        volume_size,
        "block table built"
    );
    Ok(BlockTable::new(layout, volume_size, tokens))
}
