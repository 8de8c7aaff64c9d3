//! EBS direct-API adapter: ListSnapshotBlocks / GetSnapshotBlock on top of
//! aws-sdk-ebs, with simple retries and SHA-256 verification of block data.

use crate::cadapter::client::{BlockEntry, BlockListPage, BlockService, VolumeSize};
use crate::context::CallContext;
use anyhow::{Context as _, Result, anyhow, bail};
use async_trait::async_trait;
use aws_sdk_ebs::Client;
use aws_sdk_ebs::types::ChecksumAlgorithm;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time::{Duration, sleep};

/// Upper bound on a single retry backoff.
const MAX_RETRY_DELAY_MS: u64 = 20_000;

/// EBS client options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EbsConfig {
    /// Region override; the default provider chain applies when unset.
    pub region: Option<String>,
    /// Endpoint override, e.g. for a local emulator.
    pub endpoint_url: Option<String>,
    /// Named profile from the shared AWS config files.
    pub profile: Option<String>,
    /// Page size for ListSnapshotBlocks (the service accepts 100..=10000).
    pub max_results: Option<i32>,
    /// Retries on top of the first attempt.
    pub max_retries: u32,
    /// Initial backoff in milliseconds, doubled per attempt.
    pub initial_retry_delay_ms: u64,
    /// Verify the SHA-256 checksum returned with each block.
    pub verify_checksum: bool,
}

impl Default for EbsConfig {
    fn default() -> Self {
        Self {
            region: None,
            endpoint_url: None,
            profile: None,
            max_results: None,
            max_retries: 3,
            initial_retry_delay_ms: 100,
            verify_checksum: true,
        }
    }
}

pub struct EbsBlockService {
    client: Client,
    config: EbsConfig,
}

impl EbsBlockService {
    /// Resolve credentials and region once and build the client.
    pub async fn new(config: EbsConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint.clone());
        }
        if let Some(profile) = &config.profile {
            loader = loader.profile_name(profile.clone());
        }
        let conf = loader.load().await;
        Self::from_client(Client::new(&conf), config)
    }

    pub fn from_client(client: Client, config: EbsConfig) -> Self {
        Self { client, config }
    }

    fn sha256_base64(data: &[u8]) -> String {
        B64.encode(Sha256::digest(data))
    }

    fn verify(
        &self,
        block_index: u64,
        data: &[u8],
        checksum: Option<&str>,
        algo: Option<&ChecksumAlgorithm>,
    ) -> Result<()> {
        if !self.config.verify_checksum {
            return Ok(());
        }
        let (Some(expected), Some(ChecksumAlgorithm::ChecksumAlgorithmSha256)) = (checksum, algo)
        else {
            return Ok(());
        };
        let actual = Self::sha256_base64(data);
        if actual != expected {
            bail!("checksum mismatch for block {block_index}: expected {expected}, got {actual}");
        }
        Ok(())
    }

    /// Backoff before retry number `attempt` (1-based), doubled per attempt and capped.
    fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.checked_pow(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        let delay_ms = self
            .config
            .initial_retry_delay_ms
            .saturating_mul(factor)
            .min(MAX_RETRY_DELAY_MS);
        Duration::from_millis(delay_ms)
    }

    async fn execute_with_retry<T, F, Fut, E>(
        &self,
        ctx: &CallContext,
        operation: F,
        operation_name: &'static str,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut attempt = 0;
        let max_retries = self.config.max_retries;
        loop {
            attempt += 1;
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if attempt > max_retries || ctx.is_cancelled() {
                        return Err(anyhow::Error::new(e)
                            .context(format!("{operation_name} failed after {attempt} attempts")));
                    }
                    tracing::warn!(operation_name, attempt, "retrying: {e}");
                    sleep(self.retry_delay(attempt)).await;
                }
            }
        }
    }
}

#[async_trait]
impl BlockService for EbsBlockService {
    #[tracing::instrument(level = "debug", skip(self, ctx))]
    async fn list_blocks(
        &self,
        ctx: &CallContext,
        snapshot_id: &str,
        next_token: Option<&str>,
    ) -> Result<BlockListPage> {
        let operation = || async move {
            self.client
                .list_snapshot_blocks()
                .snapshot_id(snapshot_id)
                .set_next_token(next_token.map(str::to_string))
                .set_max_results(self.config.max_results)
                .send()
                .await
        };
        let out = self
            .execute_with_retry(ctx, operation, "list_snapshot_blocks")
            .await?;

        let block_size = out
            .block_size()
            .ok_or_else(|| anyhow!("listing of {snapshot_id} has no block size"))?;
        let volume_size = out
            .volume_size()
            .ok_or_else(|| anyhow!("listing of {snapshot_id} has no volume size"))?;
        let mut blocks = Vec::with_capacity(out.blocks().len());
        for b in out.blocks() {
            let index = b
                .block_index()
                .ok_or_else(|| anyhow!("listing of {snapshot_id} has a block without index"))?;
            blocks.push(BlockEntry::new(
                u64::try_from(index).context("negative block index")?,
                b.block_token().unwrap_or_default(),
            ));
        }
        Ok(BlockListPage {
            blocks,
            block_size: u32::try_from(block_size).context("negative block size")?,
            volume_size: VolumeSize::GiB(
                u64::try_from(volume_size).context("negative volume size")?,
            ),
            next_token: out.next_token().map(str::to_string),
        })
    }

    #[tracing::instrument(level = "trace", skip(self, ctx, token))]
    async fn fetch_block(
        &self,
        ctx: &CallContext,
        snapshot_id: &str,
        block_index: u64,
        token: &str,
    ) -> Result<Bytes> {
        let api_index = i32::try_from(block_index)
            .with_context(|| format!("block index {block_index} out of range for the EBS API"))?;
        let operation = || async move {
            self.client
                .get_snapshot_block()
                .snapshot_id(snapshot_id)
                .block_index(api_index)
                .block_token(token)
                .send()
                .await
        };
        let out = self
            .execute_with_retry(ctx, operation, "get_snapshot_block")
            .await?;

        let checksum = out.checksum().map(str::to_string);
        let algo = out.checksum_algorithm().cloned();
        let data = out
            .block_data
            .collect()
            .await
            .with_context(|| format!("reading body of block {block_index}"))?
            .into_bytes();
        self.verify(block_index, &data, checksum.as_deref(), algo.as_ref())?;
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_service(verify_checksum: bool) -> EbsBlockService {
        let conf = aws_sdk_ebs::Config::builder()
            .behavior_version(aws_sdk_ebs::config::BehaviorVersion::latest())
            .region(aws_sdk_ebs::config::Region::new("us-east-1"))
            .build();
        EbsBlockService::from_client(
            Client::from_conf(conf),
            EbsConfig {
                verify_checksum,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_checksum_verification() {
        let svc = offline_service(true);
        let data = vec![0xAAu8; 1024];
        let good = EbsBlockService::sha256_base64(&data);
        let sha = ChecksumAlgorithm::ChecksumAlgorithmSha256;

        assert!(svc.verify(0, &data, Some(&good), Some(&sha)).is_ok());
        assert!(svc.verify(0, &data, Some("AAAA"), Some(&sha)).is_err());
        // nothing to compare against
        assert!(svc.verify(0, &data, None, Some(&sha)).is_ok());
    }

    #[test]
    fn test_checksum_verification_disabled() {
        let svc = offline_service(false);
        let sha = ChecksumAlgorithm::ChecksumAlgorithmSha256;
        assert!(svc.verify(0, b"abc", Some("AAAA"), Some(&sha)).is_ok());
    }

    #[test]
    fn test_retry_delay_doubles_and_saturates() {
        let svc = offline_service(true);
        assert_eq!(svc.retry_delay(1), Duration::from_millis(100));
        assert_eq!(svc.retry_delay(2), Duration::from_millis(200));
        assert_eq!(svc.retry_delay(4), Duration::from_millis(800));
        let cap = Duration::from_millis(MAX_RETRY_DELAY_MS);
        assert_eq!(svc.retry_delay(64), cap);
        assert_eq!(svc.retry_delay(u32::MAX), cap);
    }

    #[tokio::test]
    async fn test_fetch_rejects_index_beyond_api_range() {
        let svc = offline_service(true);
        let err = svc
            .fetch_block(&CallContext::new(), "snap-0", u64::from(u32::MAX), "t")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }
}
