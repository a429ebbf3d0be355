//! Reconciles transmitted reports with what happened on chain.

use crate::config::CoordinatorConfig;
use crate::lifecycle::Lifecycle;
use crate::seen::SeenLogs;
use alloy::primitives::{Address, B256};
use anyhow::Context;
use futures::FutureExt;
use kc_registry::{ChainLog, LogFilter, LogPoller, LogPollerError, RegistryCaller};
use kp_upkeep::{PerformLog, StaleReportLog, UpkeepId, UpkeepKey};
use kp_utils::cache::ExpiringCache;
use kp_utils::service::ServiceContext;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

#[derive(thiserror::Error, Debug)]
pub enum CoordinatorError {
    #[error(transparent)]
    LogPoller(#[from] LogPollerError),

    #[error("Failed to find check block of upkeep {id} in transaction {tx_hash}: {message}")]
    TxLookup { tx_hash: B256, id: UpkeepId, message: String },

    #[error("Transaction lookup panicked: {0}")]
    Panic(String),
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".into()
    }
}

pub struct LogCoordinator {
    caller: RegistryCaller,
    log_poller: Arc<dyn LogPoller>,
    config: CoordinatorConfig,
    subscribers: Mutex<HashMap<u64, mpsc::Sender<PerformLog>>>,
    next_subscriber: AtomicU64,
    check_blocks: Arc<ExpiringCache<String, u64>>,
    lifecycle: Lifecycle,
}

impl LogCoordinator {
    pub fn new(caller: RegistryCaller, log_poller: Arc<dyn LogPoller>, config: CoordinatorConfig) -> Self {
        Self {
            caller,
            log_poller,
            check_blocks: Arc::new(ExpiringCache::new(config.tx_cache_ttl)),
            config,
            subscribers: Mutex::default(),
            next_subscriber: AtomicU64::new(0),
            lifecycle: Lifecycle::default(),
        }
    }

    fn registry(&self) -> Address {
        self.caller.address()
    }

    pub fn filter_name(&self) -> String {
        format!("KeeperRegistry Reports {} {}", self.caller.version(), self.registry())
    }

    fn subscribers(&self) -> std::sync::MutexGuard<'_, HashMap<u64, mpsc::Sender<PerformLog>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> (u64, mpsc::Receiver<PerformLog>) {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.config.subscriber_buffer.max(1));
        self.subscribers().insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        self.subscribers().remove(&id).is_some()
    }

    /// Sends `log` to every subscriber. A subscriber still full after
    /// `send_timeout` misses this log. Returns how many subscribers got it.
    pub async fn broadcast(&self, log: PerformLog) -> usize {
        let subscribers: Vec<_> = self.subscribers().iter().map(|(id, tx)| (*id, tx.clone())).collect();
        let sends = subscribers.into_iter().map(|(id, tx)| {
            let log = log.clone();
            async move { (id, tx.send_timeout(log, self.config.send_timeout).await) }
        });

        let mut delivered = 0;
        for (id, res) in futures::future::join_all(sends).await {
            match res {
                Ok(()) => delivered += 1,
                Err(SendTimeoutError::Timeout(_)) => tracing::debug!(subscriber = id, "Subscriber is full, dropping perform log"),
                Err(SendTimeoutError::Closed(_)) => {
                    self.unsubscribe(id);
                }
            }
        }
        delivered
    }

    async fn window_logs(&self, event_sigs: Vec<B256>) -> Result<(u64, Vec<ChainLog>), CoordinatorError> {
        let end = self.log_poller.latest_block().await?;
        let start = end.saturating_sub(self.config.lookback_blocks);
        let logs = self.log_poller.logs_with_sigs(start, end, event_sigs, self.registry()).await?;
        Ok((end, logs))
    }

    /// Check block of a report log: from the event when it carries one,
    /// from the transmit transaction otherwise.
    async fn resolve_check_block(&self, log: &ChainLog, id: UpkeepId, from_event: Option<u64>) -> Option<u64> {
        if from_event.is_some() {
            return from_event;
        }
        self.check_block_for_tx(log.tx_hash, id)
            .await
            .inspect_err(|e| tracing::warn!(upkeep_id = %id, tx_hash = %log.tx_hash, "{e:#}"))
            .ok()
    }

    /// Performed upkeeps in the lookback window.
    pub async fn perform_logs(&self) -> Result<Vec<PerformLog>, CoordinatorError> {
        let version = self.caller.version();
        let (end, logs) = self.window_logs(vec![version.performed_event_sig()]).await?;

        let mut performed = Vec::with_capacity(logs.len());
        for log in &logs {
            let event = match version.decode_performed(log) {
                Ok(event) => event,
                Err(e) => {
                    tracing::debug!(tx_hash = %log.tx_hash, "Skipping perform log: {e:#}");
                    continue;
                }
            };
            let Some(check_block) = self.resolve_check_block(log, event.id, event.check_block).await else {
                continue;
            };
            performed.push(PerformLog {
                key: UpkeepKey::new(check_block, event.id),
                transmit_block: log.block_number,
                transaction_hash: log.tx_hash,
                confirmations: end.saturating_sub(log.block_number),
                success: event.success,
            });
        }
        Ok(performed)
    }

    /// Reports rejected on chain in the lookback window.
    pub async fn stale_report_logs(&self) -> Result<Vec<StaleReportLog>, CoordinatorError> {
        let version = self.caller.version();
        let (end, logs) = self.window_logs(version.stale_event_sigs()).await?;

        let mut stale = Vec::with_capacity(logs.len());
        for log in &logs {
            let event = match version.decode_stale(log) {
                Ok(event) => event,
                Err(e) => {
                    tracing::debug!(tx_hash = %log.tx_hash, "Skipping stale report log: {e:#}");
                    continue;
                }
            };
            let Some(check_block) = self.resolve_check_block(log, event.id, event.check_block).await else {
                continue;
            };
            stale.push(StaleReportLog {
                key: UpkeepKey::new(check_block, event.id),
                transmit_block: log.block_number,
                transaction_hash: log.tx_hash,
                confirmations: end.saturating_sub(log.block_number),
                reason: event.reason,
            });
        }
        Ok(stale)
    }

    /// Check block `id` was reported with in the `transmit` call of
    /// `tx_hash`. Every upkeep of that report is cached.
    pub async fn check_block_for_tx(&self, tx_hash: B256, id: UpkeepId) -> Result<u64, CoordinatorError> {
        if let Some(block) = self.check_blocks.get(&cache_key(tx_hash, id)) {
            return Ok(block);
        }

        let entries = AssertUnwindSafe(self.report_entries(tx_hash, id))
            .catch_unwind()
            .await
            .map_err(|panic| CoordinatorError::Panic(panic_message(panic.as_ref())))??;

        let mut found = None;
        for (entry_id, block) in entries {
            self.check_blocks.set(cache_key(tx_hash, entry_id), block);
            if entry_id == id {
                found = Some(block);
            }
        }
        found.ok_or_else(|| CoordinatorError::TxLookup { tx_hash, id, message: "upkeep is not in the report".into() })
    }

    async fn report_entries(&self, tx_hash: B256, id: UpkeepId) -> Result<Vec<(UpkeepId, u64)>, CoordinatorError> {
        let lookup_error = |message: String| CoordinatorError::TxLookup { tx_hash, id, message };
        let input = self.caller.transaction_input(tx_hash).await.map_err(|e| lookup_error(e.to_string()))?;
        self.caller.version().decode_transmit_report(&input).map_err(|e| lookup_error(e.to_string()))
    }

    /// Registers the report filter and starts broadcasting perform logs.
    /// Starting twice is a no-op.
    pub async fn start(
        self: &Arc<Self>,
        join_set: &mut JoinSet<anyhow::Result<()>>,
        ctx: &ServiceContext,
    ) -> anyhow::Result<()> {
        let Some(ctx) = self.lifecycle.begin(ctx) else {
            return Ok(());
        };
        let version = self.caller.version();
        let mut sigs = vec![version.performed_event_sig()];
        sigs.extend(version.stale_event_sigs());
        self.log_poller
            .register_filter(LogFilter::new(self.filter_name(), sigs, vec![self.registry()]))
            .await
            .context("Registering report filter")?;

        let cache = Arc::clone(&self.check_blocks);
        let (cleaner_ctx, sweep) = (ctx.clone(), self.config.tx_cache_sweep_interval);
        join_set.spawn(async move {
            cache.run_cleaner(cleaner_ctx, sweep).await;
            anyhow::Ok(())
        });
        join_set.spawn(Arc::clone(self).run(ctx));
        Ok(())
    }

    pub async fn close(&self) -> anyhow::Result<()> {
        if !self.lifecycle.end() {
            return Ok(());
        }
        self.log_poller.unregister_filter(self.filter_name()).await.context("Unregistering report filter")
    }

    async fn run(self: Arc<Self>, ctx: ServiceContext) -> anyhow::Result<()> {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut seen = SeenLogs::new(self.config.lookback_blocks);

        while ctx.run_until_cancelled(interval.tick()).await.is_some() {
            self.broadcast_new(&mut seen).await;
        }
        Ok(())
    }

    pub(crate) async fn broadcast_new(&self, seen: &mut SeenLogs<(B256, UpkeepId)>) {
        let logs = match self.perform_logs().await {
            Ok(logs) => logs,
            Err(e) => {
                tracing::warn!("Failed to fetch perform logs: {e:#}");
                return;
            }
        };
        for log in logs {
            let key = (log.transaction_hash, log.key.id());
            if seen.contains(log.transmit_block, &key) {
                continue;
            }
            seen.insert(log.transmit_block, key);
            self.broadcast(log).await;
        }
    }
}

fn cache_key(tx_hash: B256, id: UpkeepId) -> String {
    format!("{tx_hash}|{id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;
    use alloy::primitives::{Bytes, U256};
    use alloy::sol_types::{SolCall, SolEvent, SolType, SolValue};
    use assert_matches::assert_matches;
    use kc_registry::abi::{self, v2_0};
    use kc_registry::{ChainError, MockChainClient, MockLogPoller, RegistryCallerConfig, RegistryVersion};
    use kp_upkeep::StaleReason;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn coordinator(client: MockChainClient, log_poller: MockLogPoller) -> Arc<LogCoordinator> {
        let caller =
            RegistryCaller::new(Arc::new(client), REGISTRY, RegistryVersion::V2_0, RegistryCallerConfig::default());
        let config = CoordinatorConfig {
            poll_interval: Duration::from_millis(10),
            lookback_blocks: 100,
            subscriber_buffer: 1,
            ..Default::default()
        };
        Arc::new(LogCoordinator::new(caller, Arc::new(log_poller), config))
    }

    fn perform_log(id: u64, check_block: u32, block: u64, tx: u8) -> ChainLog {
        let id = UpkeepId::from(id);
        let data = (check_block, U256::from(1u64), U256::from(2u64), U256::from(3u64)).abi_encode_params();
        chain_log(vec![v2_0::UpkeepPerformed::SIGNATURE_HASH, id_topic(id), B256::with_last_byte(1)], data, block, tx)
    }

    fn stale_log(id: u64, block: u64, tx: u8) -> ChainLog {
        chain_log(vec![v2_0::StaleUpkeepReport::SIGNATURE_HASH, id_topic(UpkeepId::from(id))], vec![], block, tx)
    }

    fn transmit_input(entries: &[(u64, u32)]) -> Bytes {
        let report = v2_0::Report {
            fastGasWei: U256::ZERO,
            linkNative: U256::ZERO,
            upkeepIds: entries.iter().map(|(id, _)| U256::from(*id)).collect(),
            wrappedPerformDatas: entries
                .iter()
                .map(|(_, block)| v2_0::PerformDataWrapper {
                    checkBlockNumber: *block,
                    checkBlockhash: B256::ZERO,
                    performData: Bytes::new(),
                })
                .collect(),
        };
        abi::transmitCall {
            reportContext: [B256::ZERO; 3],
            rawReport: <v2_0::Report as SolType>::abi_encode_params(&report).into(),
            rs: vec![],
            ss: vec![],
            rawVs: B256::ZERO,
        }
        .abi_encode()
        .into()
    }

    fn sample(id: u64) -> PerformLog {
        PerformLog {
            key: UpkeepKey::new(1, id),
            transmit_block: 2,
            transaction_hash: B256::ZERO,
            confirmations: 0,
            success: true,
        }
    }

    #[tokio::test]
    async fn perform_logs_carry_confirmations() {
        let mut log_poller = MockLogPoller::new();
        log_poller.expect_latest_block().returning(|| Ok(200));
        log_poller
            .expect_logs_with_sigs()
            .withf(|start, end, sigs, _| *start == 100 && *end == 200 && sigs == &[v2_0::UpkeepPerformed::SIGNATURE_HASH])
            .returning(|_, _, _, _| {
                Ok(vec![
                    perform_log(1, 150, 160, 1),
                    chain_log(vec![v2_0::UpkeepPerformed::SIGNATURE_HASH], vec![], 170, 2),
                    perform_log(2, 180, 190, 3),
                ])
            });

        let logs = coordinator(MockChainClient::new(), log_poller).perform_logs().await.unwrap();

        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].key, UpkeepKey::new(150, 1u64));
        assert_eq!(logs[0].confirmations, 40);
        assert_eq!(logs[1].key, UpkeepKey::new(180, 2u64));
        assert_eq!(logs[1].confirmations, 10);
        assert!(logs[1].success);
    }

    #[tokio::test]
    async fn log_fetch_failure_fails_the_query() {
        let mut log_poller = MockLogPoller::new();
        log_poller.expect_latest_block().returning(|| Err(LogPollerError::Query("database is locked".into())));

        assert_matches!(
            coordinator(MockChainClient::new(), log_poller).stale_report_logs().await,
            Err(CoordinatorError::LogPoller(_))
        );
    }

    #[tokio::test]
    async fn stale_reports_recover_check_block_from_transaction() {
        let mut client = MockChainClient::new();
        client
            .expect_transaction_input()
            .times(1)
            .returning(|_| Ok(transmit_input(&[(7, 140), (8, 141)])));

        let mut log_poller = MockLogPoller::new();
        log_poller.expect_latest_block().returning(|| Ok(150));
        log_poller.expect_logs_with_sigs().returning(|_, _, _, _| Ok(vec![stale_log(7, 145, 4), stale_log(8, 145, 4)]));

        let coordinator = coordinator(client, log_poller);
        let stale = coordinator.stale_report_logs().await.unwrap();

        assert_eq!(stale.len(), 2);
        assert_eq!(stale[0].key, UpkeepKey::new(140, 7u64));
        assert_eq!(stale[1].key, UpkeepKey::new(141, 8u64));
        assert_eq!(stale[0].reason, StaleReason::Stale);
        assert_eq!(stale[0].confirmations, 5);

        // served from the cache
        coordinator.stale_report_logs().await.unwrap();
    }

    #[tokio::test]
    async fn missing_upkeep_in_report() {
        let mut client = MockChainClient::new();
        client.expect_transaction_input().returning(|_| Ok(transmit_input(&[(7, 140)])));

        let err = coordinator(client, MockLogPoller::new())
            .check_block_for_tx(B256::with_last_byte(1), UpkeepId::from(9u64))
            .await
            .unwrap_err();
        assert_matches!(err, CoordinatorError::TxLookup { .. });
    }

    #[tokio::test]
    #[traced_test]
    async fn transaction_lookup_errors_skip_the_log() {
        let mut client = MockChainClient::new();
        client.expect_transaction_input().returning(|hash| Err(ChainError::MissingTransaction(hash)));

        let mut log_poller = MockLogPoller::new();
        log_poller.expect_latest_block().returning(|| Ok(150));
        log_poller.expect_logs_with_sigs().returning(|_, _, _, _| Ok(vec![stale_log(7, 145, 4)]));

        assert!(coordinator(client, log_poller).stale_report_logs().await.unwrap().is_empty());
        assert!(logs_contain("Failed to find check block of upkeep 7"));
    }

    #[tokio::test]
    async fn panicking_lookup_becomes_an_error() {
        let mut client = MockChainClient::new();
        client.expect_transaction_input().returning(|_| panic!("malformed transaction"));

        let err = coordinator(client, MockLogPoller::new())
            .check_block_for_tx(B256::with_last_byte(1), UpkeepId::from(7u64))
            .await
            .unwrap_err();
        assert_matches!(err, CoordinatorError::Panic(msg) if msg == "malformed transaction");
    }

    #[tokio::test(start_paused = true)]
    async fn full_subscriber_does_not_block_broadcast() {
        let coordinator = coordinator(MockChainClient::new(), MockLogPoller::new());
        let (slow_id, mut slow) = coordinator.subscribe();
        let (_, mut fast) = coordinator.subscribe();

        assert_eq!(coordinator.broadcast(sample(1)).await, 2);
        fast.recv().await.unwrap();

        // the slow subscriber's single slot is still taken
        assert_eq!(coordinator.broadcast(sample(2)).await, 1);
        assert_eq!(fast.recv().await.unwrap().key.id(), UpkeepId::from(2u64));
        assert_eq!(slow.recv().await.unwrap().key.id(), UpkeepId::from(1u64));
        assert!(slow.try_recv().is_err());

        assert!(coordinator.unsubscribe(slow_id));
        assert!(!coordinator.unsubscribe(slow_id));
        assert_eq!(coordinator.broadcast(sample(3)).await, 1);
    }

    #[tokio::test]
    async fn closed_subscribers_are_dropped() {
        let coordinator = coordinator(MockChainClient::new(), MockLogPoller::new());
        let (id, rx) = coordinator.subscribe();
        drop(rx);

        assert_eq!(coordinator.broadcast(sample(1)).await, 0);
        assert!(!coordinator.unsubscribe(id));
    }

    #[tokio::test]
    async fn background_loop_broadcasts_each_log_once() {
        let mut log_poller = MockLogPoller::new();
        log_poller.expect_register_filter().withf(|f| f.event_sigs.len() == 4).times(1).returning(|_| Ok(()));
        log_poller.expect_unregister_filter().times(1).returning(|_| Ok(()));
        log_poller.expect_latest_block().returning(|| Ok(200));
        log_poller.expect_logs_with_sigs().returning(|_, _, _, _| Ok(vec![perform_log(1, 150, 160, 1)]));

        let coordinator = coordinator(MockChainClient::new(), log_poller);
        let (_, mut rx) = coordinator.subscribe();

        let ctx = ServiceContext::new();
        let mut join_set = JoinSet::new();
        coordinator.start(&mut join_set, &ctx).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        coordinator.close().await.unwrap();
        while let Some(res) = join_set.join_next().await {
            res.unwrap().unwrap();
        }

        assert_eq!(rx.recv().await.unwrap().key, UpkeepKey::new(150, 1u64));
        assert!(rx.try_recv().is_err());
    }
}
