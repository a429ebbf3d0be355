use alloy_primitives::Address;
use kc_automation::AutomationConfig;
use kc_registry::RegistryVersion;
use kp_utils::parsers::{parse_duration, parse_url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

#[derive(Clone, Debug, clap::Args, Deserialize, Serialize)]
pub struct RegistryParams {
    /// Chain RPC endpoint.
    #[clap(
        env = "KEEPER_RPC_URL",
        long,
        value_parser = parse_url,
        default_value = "http://localhost:8545",
        value_name = "RPC URL"
    )]
    pub rpc_url: Url,

    /// Address of the keeper registry to automate.
    #[clap(env = "KEEPER_REGISTRY_ADDRESS", long, value_name = "ADDRESS", required_unless_present = "config_file")]
    pub registry_address: Option<Address>,

    /// Registry contract version, `v2.0` or `v2.1`.
    #[clap(env = "KEEPER_REGISTRY_VERSION", long, default_value = "v2.1")]
    pub registry_version: RegistryVersion,

    /// Blocks behind the chain head considered final when indexing logs.
    #[clap(env = "KEEPER_FINALITY_DEPTH", long, default_value = "0")]
    pub finality_depth: u64,

    /// Blocks scanned back from the latest indexed block when reading
    /// registry logs.
    #[clap(env = "KEEPER_LOOKBACK_BLOCKS", long, default_value = "250")]
    pub lookback_blocks: u64,

    /// Interval between two chain head and registry log polls.
    #[clap(env = "KEEPER_POLL_INTERVAL", long, default_value = "1s", value_parser = parse_duration)]
    pub poll_interval: Duration,

    /// Interval between two full reloads of the active upkeeps.
    #[clap(env = "KEEPER_RESYNC_INTERVAL", long, default_value = "15min", value_parser = parse_duration)]
    pub resync_interval: Duration,
}

impl RegistryParams {
    pub fn apply(&self, config: &mut AutomationConfig) {
        config.head.poll_interval = self.poll_interval;
        config.events.poll_interval = self.poll_interval;
        config.events.lookback_blocks = self.lookback_blocks;
        config.coordinator.poll_interval = self.poll_interval;
        config.coordinator.lookback_blocks = self.lookback_blocks;
        config.resync_interval = self.resync_interval;
    }
}
