//! Logging setup for the keeper.
//!
//! Installs a global `tracing` subscriber with a console formatter and an
//! [EnvFilter] driven by `RUST_LOG`, defaulting to `INFO`.

use formatter::CustomFormatter;
use tracing_core::LevelFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::EnvFilter;

mod formatter;

/// Log target used for outbound Mercury HTTP calls. Events on this target
/// carrying `path`, `status` and `elapsed_ms` fields are rendered as a single
/// compact line.
pub const MERCURY_CALLS_TARGET: &str = "mercury_calls";

#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    pub service_name: String,
    /// Used when `RUST_LOG` is not set.
    pub default_level: LevelFilter,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self { service_name: "Keeper".into(), default_level: LevelFilter::INFO }
    }
}

pub struct Analytics {
    config: AnalyticsConfig,
}

impl Analytics {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self { config }
    }

    pub fn setup(&self) -> anyhow::Result<()> {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().event_format(CustomFormatter::new()))
            .with(EnvFilter::builder().with_default_directive(self.config.default_level.into()).from_env()?)
            .try_init()?;

        tracing::debug!("Logging initialized for {}", self.config.service_name);
        Ok(())
    }
}
