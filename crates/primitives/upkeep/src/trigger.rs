use crate::UpkeepId;
use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};

/// Log trigger configuration of a log-triggered upkeep.
///
/// `filter_selector` is a bitmask over `topic1..=topic3`: bit 0 selects
/// `topic1`, bit 1 `topic2` and bit 2 `topic3`. `topic0` is the event
/// signature and is always part of the filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogTriggerConfig {
    pub contract_address: Address,
    pub filter_selector: u8,
    pub topic0: B256,
    pub topic1: B256,
    pub topic2: B256,
    pub topic3: B256,
}

impl LogTriggerConfig {
    pub fn selected_topics(&self) -> Vec<B256> {
        filters_by_selector(self.filter_selector, &[self.topic1, self.topic2, self.topic3])
    }

    /// Unique filter name for the upkeep's log filter.
    pub fn filter_name(id: UpkeepId) -> String {
        format!("KeeperRegistry LogUpkeep {id}")
    }
}

/// Returns the topics whose bit is set in `selector`, in bit order.
/// All-zero topics are skipped even when selected.
pub fn filters_by_selector(selector: u8, topics: &[B256]) -> Vec<B256> {
    topics
        .iter()
        .enumerate()
        .filter(|(i, topic)| *i < 8 && selector & (1u8 << i) != 0 && !topic.is_zero())
        .map(|(_, topic)| *topic)
        .collect()
}
