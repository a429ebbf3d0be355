use kc_analytics::AnalyticsConfig;
use serde::{Deserialize, Serialize};

/// Parameters used to config analytics.
#[derive(Debug, Clone, clap::Args, Deserialize, Serialize)]
pub struct AnalyticsParams {
    /// Name of the service, shown in the logs.
    #[clap(env = "KEEPER_ANALYTICS_SERVICE_NAME", long, default_value = "keeper")]
    pub analytics_service_name: String,
}

impl AnalyticsParams {
    pub fn as_config(&self) -> AnalyticsConfig {
        AnalyticsConfig { service_name: self.analytics_service_name.clone(), ..Default::default() }
    }
}
