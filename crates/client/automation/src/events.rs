//! Keeps the [UpkeepIndex] in line with registry lifecycle events.

use crate::config::EventsConfig;
use crate::index::{Inactivity, UpkeepIndex};
use crate::lifecycle::Lifecycle;
use crate::seen::SeenLogs;
use alloy::primitives::{Address, B256};
use anyhow::Context;
use kc_registry::{
    decode_lifecycle, lifecycle_event_sigs, LifecycleEvent, LifecycleKind, LogFilter, LogPoller, LogPollerError,
    RegistryError,
};
use kp_utils::service::ServiceContext;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

pub struct LogEventProcessor {
    index: Arc<UpkeepIndex>,
    log_poller: Arc<dyn LogPoller>,
    registry: Address,
    config: EventsConfig,
    lifecycle: Lifecycle,
}

impl LogEventProcessor {
    pub fn new(index: Arc<UpkeepIndex>, log_poller: Arc<dyn LogPoller>, config: EventsConfig) -> Self {
        let registry = index.caller().address();
        Self { index, log_poller, registry, config, lifecycle: Lifecycle::default() }
    }

    pub fn filter_name(&self) -> String {
        format!("KeeperRegistry Events {} {}", self.index.caller().version(), self.registry)
    }

    /// Registers the lifecycle filter then starts polling and processing
    /// events. Starting twice is a no-op.
    pub async fn start(
        self: &Arc<Self>,
        join_set: &mut JoinSet<anyhow::Result<()>>,
        ctx: &ServiceContext,
    ) -> anyhow::Result<()> {
        let Some(ctx) = self.lifecycle.begin(ctx) else {
            return Ok(());
        };
        self.log_poller
            .register_filter(LogFilter::new(self.filter_name(), lifecycle_event_sigs(), vec![self.registry]))
            .await
            .context("Registering upkeep lifecycle filter")?;

        let (tx, rx) = mpsc::channel(self.config.queue_len.max(1));
        join_set.spawn(Arc::clone(self).poll(ctx.clone(), tx));
        join_set.spawn(Arc::clone(self).drain(ctx, rx));
        Ok(())
    }

    /// Stops both tasks and unregisters the lifecycle filter. Closing twice
    /// is a no-op.
    pub async fn close(&self) -> anyhow::Result<()> {
        if !self.lifecycle.end() {
            return Ok(());
        }
        self.log_poller.unregister_filter(self.filter_name()).await.context("Unregistering upkeep lifecycle filter")
    }

    async fn poll(self: Arc<Self>, ctx: ServiceContext, tx: mpsc::Sender<LifecycleEvent>) -> anyhow::Result<()> {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_end = None;

        while ctx.run_until_cancelled(interval.tick()).await.is_some() {
            let events = match self.fetch_events(&mut last_end).await {
                Ok(events) => events,
                Err(e) => {
                    tracing::warn!("Failed to fetch upkeep lifecycle logs: {e:#}");
                    continue;
                }
            };
            for event in events {
                // blocks while the processor catches up
                match ctx.run_until_cancelled(tx.send(event)).await {
                    Some(Ok(())) => {}
                    Some(Err(_)) | None => return Ok(()),
                }
            }
        }
        Ok(())
    }

    /// Lifecycle events of the lookback window ending at the latest indexed
    /// block, or nothing if that block did not move since the last call.
    pub async fn fetch_events(&self, last_end: &mut Option<u64>) -> Result<Vec<LifecycleEvent>, LogPollerError> {
        let end = self.log_poller.latest_block().await?;
        if last_end.is_some_and(|last| end <= last) {
            return Ok(vec![]);
        }
        let start = end.saturating_sub(self.config.lookback_blocks);
        let logs = self.log_poller.logs_with_sigs(start, end, lifecycle_event_sigs(), self.registry).await?;
        *last_end = Some(end);

        Ok(logs
            .iter()
            .filter_map(|log| {
                decode_lifecycle(log)
                    .inspect_err(|e| tracing::debug!(tx_hash = %log.tx_hash, "Skipping undecodable lifecycle log: {e:#}"))
                    .ok()
            })
            .collect())
    }

    async fn drain(self: Arc<Self>, ctx: ServiceContext, mut rx: mpsc::Receiver<LifecycleEvent>) -> anyhow::Result<()> {
        let mut seen = SeenLogs::new(self.config.lookback_blocks);
        while let Some(Some(event)) = ctx.run_until_cancelled(rx.recv()).await {
            self.process(&mut seen, event).await;
        }
        Ok(())
    }

    pub(crate) async fn process(&self, seen: &mut SeenLogs<(B256, u64)>, event: LifecycleEvent) {
        if seen.contains(event.block, &(event.tx_hash, event.log_index)) {
            return;
        }
        match self.apply(&event).await {
            Ok(()) => seen.insert(event.block, (event.tx_hash, event.log_index)),
            // retried when the log comes back in the next window
            Err(e) => tracing::warn!(
                upkeep_id = %event.id,
                block = event.block,
                tx_hash = %event.tx_hash,
                "Failed to apply {:?} event: {e:#}",
                event.kind
            ),
        }
    }

    async fn apply(&self, event: &LifecycleEvent) -> Result<(), RegistryError> {
        tracing::debug!(upkeep_id = %event.id, block = event.block, kind = ?event.kind, "Upkeep lifecycle event");
        match event.kind {
            LifecycleKind::Registered | LifecycleKind::Received | LifecycleKind::Unpaused => {
                self.index.add_active_upkeep(event.id, false).await
            }
            LifecycleKind::GasLimitSet => self.index.add_active_upkeep(event.id, true).await,
            LifecycleKind::Paused => {
                self.index.deactivate(event.id, Inactivity::Paused).await;
                Ok(())
            }
            LifecycleKind::Canceled { at_block } => {
                self.index.deactivate(event.id, Inactivity::Cancelled { at_block }).await;
                Ok(())
            }
            LifecycleKind::Migrated => {
                self.index.deactivate(event.id, Inactivity::Cancelled { at_block: event.block }).await;
                Ok(())
            }
        }
    }
}
