//! Log index boundary.
//!
//! The keeper reads chain logs through a [LogPoller]: a query interface over
//! logs that were indexed beforehand under named filters. [RpcLogPoller]
//! answers those queries directly from a JSON-RPC node.

use crate::error::LogPollerError;
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{Provider, ReqwestProvider};
use alloy::rpc::types::{Filter, Log};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use kp_upkeep::{LogTriggerConfig, UpkeepId};

/// A named set of event signatures and addresses to index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub name: String,
    pub event_sigs: Vec<B256>,
    pub addresses: Vec<Address>,
    /// Additional topic values, any of which must match.
    pub topics: Vec<B256>,
}

impl LogFilter {
    pub fn new(name: impl Into<String>, event_sigs: Vec<B256>, addresses: Vec<Address>) -> Self {
        Self { name: name.into(), event_sigs, addresses, topics: vec![] }
    }

    /// Filter tracking the logs which trigger a log upkeep.
    pub fn for_log_trigger(id: UpkeepId, config: &LogTriggerConfig) -> Self {
        Self {
            name: LogTriggerConfig::filter_name(id),
            event_sigs: vec![config.topic0],
            addresses: vec![config.contract_address],
            topics: config.selected_topics(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub block_hash: B256,
    pub tx_hash: B256,
    pub log_index: u64,
}

impl From<Log> for ChainLog {
    fn from(log: Log) -> Self {
        Self {
            address: log.address(),
            topics: log.topics().to_vec(),
            data: log.data().data.clone(),
            block_number: log.block_number.unwrap_or_default(),
            block_hash: log.block_hash.unwrap_or_default(),
            tx_hash: log.transaction_hash.unwrap_or_default(),
            log_index: log.log_index.unwrap_or_default(),
        }
    }
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait LogPoller: Send + Sync {
    /// Registering the same filter twice is a no-op. Reusing a name for a
    /// different filter is an error.
    async fn register_filter(&self, filter: LogFilter) -> Result<(), LogPollerError>;

    /// Unknown names are ignored.
    async fn unregister_filter(&self, name: String) -> Result<(), LogPollerError>;

    /// Latest block whose logs are indexed.
    async fn latest_block(&self) -> Result<u64, LogPollerError>;

    /// Logs emitted by `address` with one of `event_sigs` as first topic, in
    /// the inclusive range `[start, end]`, ordered by block then log index.
    async fn logs_with_sigs(
        &self,
        start: u64,
        end: u64,
        event_sigs: Vec<B256>,
        address: Address,
    ) -> Result<Vec<ChainLog>, LogPollerError>;
}

/// [LogPoller] answering every query with `eth_getLogs`.
pub struct RpcLogPoller {
    provider: ReqwestProvider,
    filters: DashMap<String, LogFilter>,
    /// Blocks behind the head considered not yet indexed.
    finality_depth: u64,
}

impl RpcLogPoller {
    pub fn new(provider: ReqwestProvider, finality_depth: u64) -> Self {
        Self { provider, filters: DashMap::new(), finality_depth }
    }

    pub fn filter(&self, name: &str) -> Option<LogFilter> {
        self.filters.get(name).map(|f| f.clone())
    }

    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }
}

#[async_trait]
impl LogPoller for RpcLogPoller {
    async fn register_filter(&self, filter: LogFilter) -> Result<(), LogPollerError> {
        match self.filters.entry(filter.name.clone()) {
            Entry::Occupied(entry) if entry.get() == &filter => Ok(()),
            Entry::Occupied(_) => Err(LogPollerError::FilterConflict(filter.name)),
            Entry::Vacant(entry) => {
                tracing::debug!(name = %filter.name, "Registered log filter");
                entry.insert(filter);
                Ok(())
            }
        }
    }

    async fn unregister_filter(&self, name: String) -> Result<(), LogPollerError> {
        if self.filters.remove(&name).is_some() {
            tracing::debug!(%name, "Unregistered log filter");
        }
        Ok(())
    }

    async fn latest_block(&self) -> Result<u64, LogPollerError> {
        let head = self.provider.get_block_number().await.map_err(|e| LogPollerError::Query(e.to_string()))?;
        Ok(head.saturating_sub(self.finality_depth))
    }

    async fn logs_with_sigs(
        &self,
        start: u64,
        end: u64,
        event_sigs: Vec<B256>,
        address: Address,
    ) -> Result<Vec<ChainLog>, LogPollerError> {
        if start > end || event_sigs.is_empty() {
            return Ok(vec![]);
        }
        let filter = Filter::new().address(address).event_signature(event_sigs).from_block(start).to_block(end);
        let logs = self.provider.get_logs(&filter).await.map_err(|e| LogPollerError::Query(e.to_string()))?;

        let mut logs: Vec<ChainLog> = logs.into_iter().map(ChainLog::from).collect();
        logs.sort_by_key(|log| (log.block_number, log.log_index));
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::providers::ProviderBuilder;
    use assert_matches::assert_matches;
    use httpmock::prelude::*;
    use serde_json::json;

    fn poller(url: &str) -> RpcLogPoller {
        RpcLogPoller::new(ProviderBuilder::new().on_http(url.parse().unwrap()), 0)
    }

    #[tokio::test]
    async fn filters_are_deduplicated_by_name() {
        let poller = poller("http://localhost:1");
        let filter = LogFilter::new("KeeperRegistry Events", vec![B256::with_last_byte(1)], vec![Address::ZERO]);

        poller.register_filter(filter.clone()).await.unwrap();
        poller.register_filter(filter.clone()).await.unwrap();
        assert_eq!(poller.filter_count(), 1);

        let other = LogFilter { event_sigs: vec![B256::with_last_byte(2)], ..filter };
        assert_matches!(poller.register_filter(other).await, Err(LogPollerError::FilterConflict(name)) if name == "KeeperRegistry Events");

        poller.unregister_filter("KeeperRegistry Events".into()).await.unwrap();
        poller.unregister_filter("KeeperRegistry Events".into()).await.unwrap();
        assert_eq!(poller.filter_count(), 0);
    }

    #[test]
    fn log_trigger_filter() {
        let config = LogTriggerConfig {
            contract_address: Address::with_last_byte(9),
            filter_selector: 0b001,
            topic0: B256::with_last_byte(1),
            topic1: B256::with_last_byte(2),
            topic2: B256::with_last_byte(3),
            topic3: B256::ZERO,
        };
        let filter = LogFilter::for_log_trigger(UpkeepId::from(5u64), &config);
        assert_eq!(filter.name, "KeeperRegistry LogUpkeep 5");
        assert_eq!(filter.event_sigs, vec![B256::with_last_byte(1)]);
        assert_eq!(filter.addresses, vec![Address::with_last_byte(9)]);
        assert_eq!(filter.topics, vec![B256::with_last_byte(2)]);
    }

    #[tokio::test]
    async fn logs_are_ordered() {
        let server = MockServer::start_async().await;
        let log = |block: &str, index: &str| {
            json!({
                "address": "0x0000000000000000000000000000000000000009",
                "topics": ["0x0000000000000000000000000000000000000000000000000000000000000001"],
                "data": "0x",
                "blockNumber": block,
                "blockHash": "0x0000000000000000000000000000000000000000000000000000000000000002",
                "transactionHash": "0x0000000000000000000000000000000000000000000000000000000000000003",
                "transactionIndex": "0x0",
                "logIndex": index,
                "removed": false
            })
        };
        server
            .mock_async(|when, then| {
                when.method(POST).body_contains("eth_getLogs");
                then.status(200).json_body(json!({
                    "jsonrpc": "2.0",
                    "id": 0,
                    "result": [log("0xb", "0x0"), log("0xa", "0x1"), log("0xa", "0x0")]
                }));
            })
            .await;

        let logs = poller(&server.base_url())
            .logs_with_sigs(10, 11, vec![B256::with_last_byte(1)], Address::with_last_byte(9))
            .await
            .unwrap();
        let order: Vec<_> = logs.iter().map(|l| (l.block_number, l.log_index)).collect();
        assert_eq!(order, vec![(10, 0), (10, 1), (11, 0)]);
    }
}
