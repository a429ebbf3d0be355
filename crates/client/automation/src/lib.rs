//! Upkeep automation for one keeper registry.
//!
//! [UpkeepIndex] tracks the registry's upkeeps and [LogEventProcessor]
//! keeps it current from lifecycle logs. [EligibilityChecker] decides which
//! upkeeps should be performed, resolving off-chain data requests through
//! Mercury when configured. [LogCoordinator] reports what was performed or
//! rejected on chain. [AutomationService] runs all of them together.

mod checker;
mod config;
mod coordinator;
mod events;
mod head;
mod index;
mod lifecycle;
mod mercury;
mod seen;
mod service;

#[cfg(test)]
mod fixtures;

pub use checker::{CheckedUpkeeps, EligibilityChecker};
pub use config::{
    AutomationConfig, CheckerConfig, ConfigError, CoordinatorConfig, EventsConfig, HeadConfig, IndexConfig,
    PluginConfig,
};
pub use coordinator::{CoordinatorError, LogCoordinator};
pub use events::LogEventProcessor;
pub use head::{HeadObserver, HeadProvider};
pub use index::{Inactivity, UpkeepEntry, UpkeepFilter, UpkeepIndex};
pub use mercury::{admin_config_source, IndexAdminConfig, MercuryStage, RegistryAdminConfig};
pub use service::AutomationService;
