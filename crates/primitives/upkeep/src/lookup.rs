use alloy_primitives::{Bytes, U256};
use serde::{Deserialize, Serialize};

/// Off-chain data request decoded from a check revert. Lives only for the
/// duration of one lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MercuryLookup {
    pub feed_label: String,
    pub feeds: Vec<String>,
    pub query_label: String,
    /// Block number or timestamp, depending on `query_label`.
    pub query: U256,
    pub extra_data: Bytes,
}
