use crate::UpkeepId;
use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

/// `maxValidBlocknumber` of an upkeep which was never cancelled.
const NOT_CANCELLED: u64 = u32::MAX as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpkeepState {
    Active,
    Inactive,
}

/// Registry view of an upkeep, as returned by `getUpkeep`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpkeepInfo {
    pub id: UpkeepId,
    pub target: Address,
    pub perform_gas_limit: u32,
    pub check_data: Bytes,
    pub balance: U256,
    pub admin: Address,
    pub max_valid_block: u64,
    pub last_perform_block: u32,
    pub amount_spent: U256,
    pub paused: bool,
    pub offchain_config: Bytes,
}

impl UpkeepInfo {
    pub fn is_cancelled(&self) -> bool {
        self.max_valid_block != NOT_CANCELLED
    }

    pub fn state(&self) -> UpkeepState {
        if self.paused || self.is_cancelled() {
            UpkeepState::Inactive
        } else {
            UpkeepState::Active
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(false, u32::MAX as u64, UpkeepState::Active)]
    #[case(true, u32::MAX as u64, UpkeepState::Inactive)]
    #[case(false, 100, UpkeepState::Inactive)]
    fn state_from_registry_fields(#[case] paused: bool, #[case] max_valid_block: u64, #[case] state: UpkeepState) {
        let info = UpkeepInfo {
            id: UpkeepId::from(1u64),
            target: Address::ZERO,
            perform_gas_limit: 500_000,
            check_data: Bytes::new(),
            balance: U256::ZERO,
            admin: Address::ZERO,
            max_valid_block,
            last_perform_block: 0,
            amount_spent: U256::ZERO,
            paused,
            offchain_config: Bytes::new(),
        };
        assert_eq!(info.state(), state);
    }
}
