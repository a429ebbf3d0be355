//! Wires every automation component for one registry into a [Service].

use crate::checker::{CheckedUpkeeps, EligibilityChecker};
use crate::config::AutomationConfig;
use crate::coordinator::LogCoordinator;
use crate::events::LogEventProcessor;
use crate::head::{HeadObserver, HeadProvider};
use crate::index::{UpkeepFilter, UpkeepIndex};
use crate::mercury::{admin_config_source, MercuryStage};
use alloy::primitives::Address;
use anyhow::Context;
use kc_mercury::{AllowList, MercuryClient, MercuryConfig};
use kc_registry::{BatchErrors, ChainClient, LogPoller, RegistryCaller, RegistryError, RegistryVersion};
use kp_upkeep::{TriggerType, UpkeepKey, UpkeepState};
use kp_utils::service::{Service, ServiceContext};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

/// Forwards new heads to the sweep task, dropping them while a sweep is
/// still running.
struct SweepTrigger(mpsc::Sender<u64>);

impl HeadObserver for SweepTrigger {
    fn on_new_head(&self, block: u64) {
        if self.0.try_send(block).is_err() {
            tracing::trace!(block, "Eligibility sweep busy, skipping head");
        }
    }
}

pub struct AutomationService {
    config: AutomationConfig,
    head: Arc<HeadProvider>,
    index: Arc<UpkeepIndex>,
    events: Arc<LogEventProcessor>,
    coordinator: Arc<LogCoordinator>,
    checker: Arc<EligibilityChecker>,
}

impl AutomationService {
    /// Builds the components for the registry at `registry`. Without
    /// `mercury`, off-chain data requests are left unanswered.
    pub fn new(
        client: Arc<dyn ChainClient>,
        log_poller: Arc<dyn LogPoller>,
        registry: Address,
        version: RegistryVersion,
        config: AutomationConfig,
        mercury: Option<MercuryConfig>,
    ) -> anyhow::Result<Self> {
        let caller = RegistryCaller::new(Arc::clone(&client), registry, version, config.caller.clone());
        let head = Arc::new(HeadProvider::new(client, config.head.clone()));
        let index = Arc::new(UpkeepIndex::new(caller.clone(), Arc::clone(&log_poller), config.index.clone()));
        let events = Arc::new(LogEventProcessor::new(Arc::clone(&index), Arc::clone(&log_poller), config.events.clone()));
        let coordinator = Arc::new(LogCoordinator::new(caller.clone(), log_poller, config.coordinator.clone()));

        let mercury = match mercury {
            Some(mercury) => {
                let client = MercuryClient::new(mercury).context("Creating Mercury client")?;
                let allow_list = Arc::new(AllowList::new(admin_config_source(&index), config.allow_list.clone()));
                Some(MercuryStage::new(client, allow_list, caller, config.checker.max_workers))
            }
            None => None,
        };
        let checker = Arc::new(EligibilityChecker::new(Arc::clone(&index), Arc::clone(&head), mercury));

        Ok(Self { config, head, index, events, coordinator, checker })
    }

    pub fn index(&self) -> &Arc<UpkeepIndex> {
        &self.index
    }

    pub fn checker(&self) -> &Arc<EligibilityChecker> {
        &self.checker
    }

    pub fn coordinator(&self) -> &Arc<LogCoordinator> {
        &self.coordinator
    }

    pub fn head(&self) -> &Arc<HeadProvider> {
        &self.head
    }

    /// Reloads the index with every id the registry reports as active.
    pub async fn resync(&self) -> Result<usize, RegistryError> {
        resync(&self.index).await
    }

    /// Checks every active conditional upkeep at `block`.
    pub async fn sweep(&self, block: u64) -> Result<CheckedUpkeeps, RegistryError> {
        sweep(&self.index, &self.checker, block).await
    }
}

async fn resync(index: &UpkeepIndex) -> Result<usize, RegistryError> {
    let ids = index.caller().get_active_upkeep_ids(None).await?;
    index.initialize(&ids).await?;
    Ok(ids.len())
}

async fn sweep(index: &UpkeepIndex, checker: &EligibilityChecker, block: u64) -> Result<CheckedUpkeeps, RegistryError> {
    let ids = index
        .get_active_upkeep_ids(&[
            UpkeepFilter::State(UpkeepState::Active),
            UpkeepFilter::Trigger(TriggerType::Conditional),
        ])
        .await;
    let keys: Vec<_> = ids.into_iter().map(|id| UpkeepKey::new(block, id)).collect();
    if keys.is_empty() {
        return Ok(CheckedUpkeeps { results: vec![], errors: BatchErrors::new() });
    }
    checker.check_upkeeps(&keys).await
}

#[async_trait::async_trait]
impl Service for AutomationService {
    async fn start(&mut self, join_set: &mut JoinSet<anyhow::Result<()>>, ctx: ServiceContext) -> anyhow::Result<()> {
        match self.resync().await {
            Ok(count) => tracing::info!("🤖 Tracking {count} upkeeps of registry {}", self.index.caller().address()),
            Err(e) => tracing::warn!("Initial upkeep load failed, retrying at next resync: {e:#}"),
        }

        self.head.start(join_set, &ctx)?;
        self.events.start(join_set, &ctx).await?;
        self.coordinator.start(join_set, &ctx).await?;

        if let Some(mercury) = self.checker.mercury() {
            let allow_list = Arc::clone(mercury.allow_list());
            let ctx = ctx.clone();
            join_set.spawn(async move {
                allow_list.run_cleaner(ctx).await;
                anyhow::Ok(())
            });
        }

        let (index, resync_interval) = (Arc::clone(&self.index), self.config.resync_interval);
        let resync_ctx = ctx.clone();
        join_set.spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + resync_interval, resync_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            while resync_ctx.run_until_cancelled(interval.tick()).await.is_some() {
                match resync(&index).await {
                    Ok(count) => tracing::debug!(upkeeps = count, "Resynced upkeep index"),
                    Err(e) => tracing::warn!("Upkeep resync failed: {e:#}"),
                }
            }
            anyhow::Ok(())
        });

        let (tx, mut heads) = mpsc::channel(1);
        if !self.head.on_new_head(ctx.clone(), Arc::new(SweepTrigger(tx))) {
            anyhow::bail!("Chain head already has an observer");
        }
        let (index, checker) = (Arc::clone(&self.index), Arc::clone(&self.checker));
        let sweep_ctx = ctx.clone();
        join_set.spawn(async move {
            while let Some(Some(block)) = sweep_ctx.run_until_cancelled(heads.recv()).await {
                match sweep(&index, &checker, block).await {
                    Ok(checked) => {
                        for res in checked.eligible() {
                            tracing::info!(upkeep_id = %res.key.id(), block, "Upkeep eligible");
                        }
                    }
                    Err(e) => tracing::warn!(block, "Eligibility sweep failed: {e:#}"),
                }
            }
            anyhow::Ok(())
        });

        let (head, events, coordinator) =
            (Arc::clone(&self.head), Arc::clone(&self.events), Arc::clone(&self.coordinator));
        join_set.spawn(async move {
            ctx.cancelled().await;
            head.close();
            events.close().await?;
            coordinator.close().await?;
            tracing::debug!("Automation components closed");
            anyhow::Ok(())
        });

        Ok(())
    }
}
