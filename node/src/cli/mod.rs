pub mod analytics;
pub mod plugin;
pub mod registry;

pub use analytics::*;
pub use plugin::*;
pub use registry::*;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Keeper: upkeep automation node for keeper registries.
#[derive(Clone, Debug, clap::Parser, Deserialize, Serialize)]
#[clap(version)]
pub struct RunCmd {
    /// Load the whole configuration from a toml, json or yaml file instead
    /// of the command line.
    #[clap(env = "KEEPER_CONFIG_FILE", long, value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[allow(missing_docs)]
    #[clap(flatten)]
    pub analytics_params: AnalyticsParams,

    #[allow(missing_docs)]
    #[clap(flatten)]
    pub registry_params: RegistryParams,

    #[allow(missing_docs)]
    #[clap(flatten)]
    pub plugin_params: PluginParams,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use figment::providers::Serialized;
    use figment::Figment;
    use kc_registry::RegistryVersion;
    use std::time::Duration;

    const REGISTRY: &str = "0x1111111111111111111111111111111111111111";

    #[test]
    fn cli_round_trips_through_figment() {
        let cmd = RunCmd::try_parse_from([
            "keeper",
            "--rpc-url",
            "http://localhost:8545",
            "--registry-address",
            REGISTRY,
            "--registry-version",
            "v2.0",
            "--resync-interval",
            "5min",
            "--cache-expiration",
            "60000",
        ])
        .unwrap();

        let cmd: RunCmd = Figment::new().merge(Serialized::defaults(cmd)).extract().unwrap();

        assert_eq!(cmd.registry_params.registry_version, RegistryVersion::V2_0);
        assert_eq!(cmd.registry_params.resync_interval, Duration::from_secs(300));
        assert_eq!(cmd.plugin_params.plugin_config().cache_expiration, 60_000);
        assert_eq!(cmd.registry_params.rpc_url.as_str(), "http://localhost:8545/");
        assert_eq!(cmd.registry_params.registry_address, Some(REGISTRY.parse().unwrap()));
    }

    #[test]
    fn registry_address_is_required_without_config_file() {
        assert!(RunCmd::try_parse_from(["keeper", "--rpc-url", "http://localhost:8545"]).is_err());
        assert!(RunCmd::try_parse_from(["keeper", "--config-file", "keeper.toml"]).is_ok());
    }
}
