use kc_mercury::{AllowListConfig, MercuryConfig};
use kc_registry::RegistryCallerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("`{field}` must not be negative, got {value}")]
    Negative { field: &'static str, value: i64 },

    #[error("`cacheEvictionInterval` must be at least 1s when set, got {0:?}")]
    EvictionIntervalTooShort(Duration),

    #[error("`{0}` is required when Mercury credentials are partially set")]
    MissingMercuryCredential(&'static str),

    #[error("`mercuryUrl` is not a valid URL: {0}")]
    InvalidMercuryUrl(String),
}

/// Plugin level settings as found in a job configuration.
///
/// Durations are in milliseconds and counts are signed so that invalid
/// input can be reported rather than wrapped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PluginConfig {
    pub cache_expiration: i64,
    pub cache_eviction_interval: i64,
    pub max_service_workers: i64,
    pub service_queue_length: i64,
    pub mercury_url: Option<String>,
    pub mercury_username: Option<String>,
    pub mercury_password: Option<String>,
}

impl PluginConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("cacheExpiration", self.cache_expiration),
            ("cacheEvictionInterval", self.cache_eviction_interval),
            ("maxServiceWorkers", self.max_service_workers),
            ("serviceQueueLength", self.service_queue_length),
        ] {
            if value < 0 {
                return Err(ConfigError::Negative { field, value });
            }
        }

        let eviction = self.cache_eviction_interval();
        if !eviction.is_zero() && eviction < Duration::from_secs(1) {
            return Err(ConfigError::EvictionIntervalTooShort(eviction));
        }

        let creds = [
            ("mercuryUrl", self.mercury_url.is_some()),
            ("mercuryUsername", self.mercury_username.is_some()),
            ("mercuryPassword", self.mercury_password.is_some()),
        ];
        if creds.iter().any(|(_, set)| *set) {
            if let Some((field, _)) = creds.iter().find(|(_, set)| !set) {
                return Err(ConfigError::MissingMercuryCredential(field));
            }
        }
        self.mercury_config().map(|_| ())
    }

    /// Mercury client settings, [None] when no credentials are configured.
    pub fn mercury_config(&self) -> Result<Option<MercuryConfig>, ConfigError> {
        let (Some(url), Some(username), Some(password)) =
            (&self.mercury_url, &self.mercury_username, &self.mercury_password)
        else {
            return Ok(None);
        };
        let url = url.parse().map_err(|e: url::ParseError| ConfigError::InvalidMercuryUrl(e.to_string()))?;
        Ok(Some(MercuryConfig::new(url, username, password)))
    }

    fn millis(value: i64) -> Duration {
        Duration::from_millis(value.max(0).unsigned_abs())
    }

    pub fn cache_expiration(&self) -> Duration {
        Self::millis(self.cache_expiration)
    }

    pub fn cache_eviction_interval(&self) -> Duration {
        Self::millis(self.cache_eviction_interval)
    }

    /// Settings derived from the plugin config, with defaults for anything
    /// left unset.
    pub fn automation_config(&self) -> AutomationConfig {
        let mut config = AutomationConfig::default();
        if self.cache_expiration > 0 {
            config.index.ttl = self.cache_expiration();
            config.allow_list.ttl = self.cache_expiration();
        }
        if self.cache_eviction_interval > 0 {
            config.allow_list.sweep_interval = self.cache_eviction_interval();
            config.coordinator.tx_cache_sweep_interval = self.cache_eviction_interval();
        }
        if self.max_service_workers > 0 {
            config.checker.max_workers = usize::try_from(self.max_service_workers).unwrap_or(usize::MAX);
        }
        if self.service_queue_length > 0 {
            config.events.queue_len = usize::try_from(self.service_queue_length).unwrap_or(usize::MAX);
        }
        config
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConfig {
    /// Entries older than this are refetched on their next access.
    pub ttl: Duration,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self { ttl: Duration::from_secs(5 * 60) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventsConfig {
    pub poll_interval: Duration,
    /// Blocks behind the latest indexed block scanned on every poll.
    pub lookback_blocks: u64,
    pub queue_len: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { poll_interval: Duration::from_secs(1), lookback_blocks: 250, queue_len: 1000 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub poll_interval: Duration,
    pub lookback_blocks: u64,
    pub subscriber_buffer: usize,
    /// How long a broadcast waits on a full subscriber before dropping the
    /// event for it.
    pub send_timeout: Duration,
    pub tx_cache_ttl: Duration,
    pub tx_cache_sweep_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            lookback_blocks: 250,
            subscriber_buffer: 100,
            send_timeout: Duration::from_secs(1),
            tx_cache_ttl: Duration::from_secs(60 * 60),
            tx_cache_sweep_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckerConfig {
    /// Upkeeps whose off-chain data is fetched concurrently.
    pub max_workers: usize,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self { max_workers: 10 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadConfig {
    pub poll_interval: Duration,
}

impl Default for HeadConfig {
    fn default() -> Self {
        Self { poll_interval: Duration::from_secs(1) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomationConfig {
    pub caller: RegistryCallerConfig,
    pub index: IndexConfig,
    pub events: EventsConfig,
    pub checker: CheckerConfig,
    pub coordinator: CoordinatorConfig,
    pub head: HeadConfig,
    pub allow_list: AllowListConfig,
    /// Interval between two full reloads of the active upkeep set.
    pub resync_interval: Duration,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            caller: RegistryCallerConfig::default(),
            index: IndexConfig::default(),
            events: EventsConfig::default(),
            checker: CheckerConfig::default(),
            coordinator: CoordinatorConfig::default(),
            head: HeadConfig::default(),
            allow_list: AllowListConfig::default(),
            resync_interval: Duration::from_secs(15 * 60),
        }
    }
}
