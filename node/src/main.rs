//! Keeper node command line.
#![warn(missing_docs)]

mod cli;

use anyhow::{bail, Context};
use clap::Parser;
use cli::RunCmd;
use figment::{
    providers::{Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use kc_analytics::Analytics;
use kc_automation::AutomationService;
use kc_registry::{AlloyChainClient, RpcLogPoller};
use kp_utils::service::{shutdown_signal, Service, ServiceContext, ServiceGroup};
use std::sync::Arc;

const GREET_IMPL_NAME: &str = "Keeper";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli_args = RunCmd::parse();

    // A config file replaces the command line entirely.
    let config = match cli_args.config_file.clone() {
        Some(path) => match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Figment::new().merge(Toml::file(path)),
            Some("json") => Figment::new().merge(Json::file(path)),
            Some("yaml") => Figment::new().merge(Yaml::file(path)),
            _ => bail!("Unsupported file type for config file."),
        },
        None => Figment::new().merge(Serialized::defaults(cli_args)),
    };
    let run_cmd: RunCmd = config.extract().context("Loading configuration")?;

    Analytics::new(run_cmd.analytics_params.as_config()).setup().context("Setting up logging")?;

    let plugin_config = run_cmd.plugin_params.plugin_config();
    plugin_config.validate().context("Invalid plugin configuration")?;

    let registry = &run_cmd.registry_params;
    let registry_address = registry.registry_address.context("Missing registry address")?;
    tracing::info!("🤖 {} Node", GREET_IMPL_NAME);
    tracing::info!("✌️  Version {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("📜 Registry: {} ({})", registry_address, registry.registry_version);
    tracing::info!("🔗 RPC: {}", registry.rpc_url);

    let mut automation_config = plugin_config.automation_config();
    registry.apply(&mut automation_config);

    let mercury = plugin_config.mercury_config().context("Invalid Mercury configuration")?;
    if mercury.is_none() {
        tracing::info!("Mercury is not configured, off-chain data requests will not be served");
    }

    let client = AlloyChainClient::new(registry.rpc_url.clone());
    let log_poller = Arc::new(RpcLogPoller::new(client.provider().clone(), registry.finality_depth));
    let automation = AutomationService::new(
        Arc::new(client),
        log_poller,
        registry_address,
        registry.registry_version,
        automation_config,
        mercury,
    )
    .context("Initializing automation service")?;

    let app = ServiceGroup::default().with(automation)?;

    let ctx = ServiceContext::new();
    let shutdown = ctx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel_global();
    });

    app.start_and_drive_to_end(ctx).await
}
