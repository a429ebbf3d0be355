//! Per-upkeep permission to use Mercury, read from the admin controlled
//! off-chain config of each upkeep.

use alloy_primitives::Bytes;
use async_trait::async_trait;
use kp_upkeep::UpkeepId;
use kp_utils::cache::ExpiringCache;
use kp_utils::service::ServiceContext;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Where the admin off-chain config of an upkeep comes from.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait AdminConfigSource: Send + Sync {
    async fn admin_offchain_config(&self, id: UpkeepId) -> anyhow::Result<Bytes>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct AdminOffchainConfig {
    #[serde(rename = "mercuryEnabled", default)]
    pub mercury_enabled: bool,
}

impl AdminOffchainConfig {
    /// Empty or malformed configs grant nothing.
    pub fn parse(raw: &[u8]) -> Self {
        serde_json::from_slice(raw).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowListConfig {
    pub ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for AllowListConfig {
    fn default() -> Self {
        Self { ttl: Duration::from_secs(10 * 60), sweep_interval: Duration::from_secs(60) }
    }
}

pub struct AllowList {
    source: Arc<dyn AdminConfigSource>,
    cache: Arc<ExpiringCache<UpkeepId, bool>>,
    config: AllowListConfig,
}

impl AllowList {
    pub fn new(source: Arc<dyn AdminConfigSource>, config: AllowListConfig) -> Self {
        Self { source, cache: Arc::new(ExpiringCache::new(config.ttl)), config }
    }

    /// Whether `id` may use Mercury. Answers are cached, failures are not.
    pub async fn is_allowed(&self, id: UpkeepId) -> anyhow::Result<bool> {
        if let Some(allowed) = self.cache.get(&id) {
            return Ok(allowed);
        }
        let raw = self.source.admin_offchain_config(id).await?;
        let allowed = AdminOffchainConfig::parse(&raw).mercury_enabled;
        self.cache.set(id, allowed);
        Ok(allowed)
    }

    /// Sweeps expired answers until `ctx` is cancelled.
    pub async fn run_cleaner(&self, ctx: ServiceContext) {
        Arc::clone(&self.cache).run_cleaner(ctx, self.config.sweep_interval).await
    }
}
