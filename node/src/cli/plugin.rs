use kc_automation::PluginConfig;
use serde::{Deserialize, Serialize};

/// Plugin settings. Durations are in milliseconds, `0` keeps the default.
#[derive(Clone, Debug, clap::Args, Deserialize, Serialize)]
pub struct PluginParams {
    /// How long upkeep infos and Mercury permissions are cached.
    #[clap(env = "KEEPER_CACHE_EXPIRATION", long, default_value = "0", allow_negative_numbers = true)]
    pub cache_expiration: i64,

    /// Interval between two sweeps of expired cache entries. At least 1000
    /// when set.
    #[clap(env = "KEEPER_CACHE_EVICTION_INTERVAL", long, default_value = "0", allow_negative_numbers = true)]
    pub cache_eviction_interval: i64,

    /// Upkeeps whose off-chain data is fetched concurrently.
    #[clap(env = "KEEPER_MAX_SERVICE_WORKERS", long, default_value = "0", allow_negative_numbers = true)]
    pub max_service_workers: i64,

    /// Registry lifecycle events buffered before log polling waits.
    #[clap(env = "KEEPER_SERVICE_QUEUE_LENGTH", long, default_value = "0", allow_negative_numbers = true)]
    pub service_queue_length: i64,

    /// Mercury service endpoint. Off-chain data requests are not served
    /// without it.
    #[clap(env = "KEEPER_MERCURY_URL", long)]
    pub mercury_url: Option<String>,

    #[clap(env = "KEEPER_MERCURY_USERNAME", long)]
    pub mercury_username: Option<String>,

    #[clap(env = "KEEPER_MERCURY_PASSWORD", long)]
    pub mercury_password: Option<String>,
}

impl PluginParams {
    pub fn plugin_config(&self) -> PluginConfig {
        PluginConfig {
            cache_expiration: self.cache_expiration,
            cache_eviction_interval: self.cache_eviction_interval,
            max_service_workers: self.max_service_workers,
            service_queue_length: self.service_queue_length,
            mercury_url: self.mercury_url.clone(),
            mercury_username: self.mercury_username.clone(),
            mercury_password: self.mercury_password.clone(),
        }
    }
}
