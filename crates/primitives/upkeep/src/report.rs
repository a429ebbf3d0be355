use crate::UpkeepKey;
use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

/// An `UpkeepPerformed` log, keyed by the block the upkeep was checked at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformLog {
    pub key: UpkeepKey,
    pub transmit_block: u64,
    pub transaction_hash: B256,
    pub confirmations: u64,
    pub success: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StaleReason {
    Reorged,
    Stale,
    InsufficientFunds,
}

/// A report the registry refused to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleReportLog {
    pub key: UpkeepKey,
    pub transmit_block: u64,
    pub transaction_hash: B256,
    pub confirmations: u64,
    pub reason: StaleReason,
}
