use crate::UpkeepKey;
use alloy_primitives::{Bytes, B256, U256};
use serde::{Deserialize, Serialize};

/// Why an upkeep is not eligible. Codes below 32 come from the registry,
/// codes from 32 onwards are decided off-chain.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FailureReason {
    #[default]
    None = 0,
    UpkeepCancelled = 1,
    UpkeepPaused = 2,
    TargetCheckReverted = 3,
    UpkeepNotNeeded = 4,
    PerformDataExceedsLimit = 5,
    InsufficientBalance = 6,
    MercuryCallbackReverted = 7,
    MercuryAccessNotAllowed = 32,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("unknown upkeep failure reason: {0}")]
pub struct UnknownFailureReason(pub u8);

impl TryFrom<u8> for FailureReason {
    type Error = UnknownFailureReason;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::None,
            1 => Self::UpkeepCancelled,
            2 => Self::UpkeepPaused,
            3 => Self::TargetCheckReverted,
            4 => Self::UpkeepNotNeeded,
            5 => Self::PerformDataExceedsLimit,
            6 => Self::InsufficientBalance,
            7 => Self::MercuryCallbackReverted,
            32 => Self::MercuryAccessNotAllowed,
            other => return Err(UnknownFailureReason(other)),
        })
    }
}

impl From<FailureReason> for u8 {
    fn from(value: FailureReason) -> Self {
        value as u8
    }
}

/// Outcome of checking one upkeep at one block.
///
/// `eligible` and `failure_reason` are only changed together through
/// [CheckResult::set_eligible] and [CheckResult::set_ineligible], so an
/// eligible result always has [FailureReason::None].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub key: UpkeepKey,
    eligible: bool,
    failure_reason: FailureReason,
    pub perform_data: Bytes,
    pub gas_used: U256,
    pub fast_gas_wei: U256,
    pub link_native: U256,
    pub check_block_number: u64,
    pub check_block_hash: B256,
    pub execute_gas: u32,
    /// Set when an off-chain dependency failed in a way worth retrying after
    /// a cool-down.
    pub retryable: bool,
}

impl CheckResult {
    pub fn new(key: UpkeepKey, check_block_number: u64) -> Self {
        Self {
            key,
            eligible: false,
            failure_reason: FailureReason::None,
            perform_data: Bytes::new(),
            gas_used: U256::ZERO,
            fast_gas_wei: U256::ZERO,
            link_native: U256::ZERO,
            check_block_number,
            check_block_hash: B256::ZERO,
            execute_gas: 0,
            retryable: false,
        }
    }

    pub fn ineligible(key: UpkeepKey, check_block_number: u64, reason: FailureReason) -> Self {
        let mut res = Self::new(key, check_block_number);
        res.set_ineligible(reason);
        res
    }

    pub fn eligible(&self) -> bool {
        self.eligible
    }

    pub fn failure_reason(&self) -> FailureReason {
        self.failure_reason
    }

    pub fn set_eligible(&mut self, perform_data: Bytes) {
        self.eligible = true;
        self.failure_reason = FailureReason::None;
        self.perform_data = perform_data;
    }

    pub fn set_ineligible(&mut self, reason: FailureReason) {
        self.eligible = false;
        self.failure_reason = reason;
    }
}
