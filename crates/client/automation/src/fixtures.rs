//! Encoded registry answers shared by the tests of this crate.

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::{SolCall, SolValue};
use kc_registry::abi;
use kc_registry::{ChainLog, ContractCall};
use kp_upkeep::UpkeepId;

pub const REGISTRY: Address = Address::repeat_byte(0x11);

pub fn selector(call: &ContractCall) -> [u8; 4] {
    let mut sel = [0u8; 4];
    sel.copy_from_slice(&call.data[..4]);
    sel
}

pub fn is_get_upkeep(call: &ContractCall) -> bool {
    selector(call) == abi::getUpkeepCall::SELECTOR
}

pub fn called_id(call: &ContractCall) -> UpkeepId {
    UpkeepId::from(U256::from_be_slice(&call.data[4..36]))
}

pub fn upkeep_return(paused: bool, gas_limit: u32) -> Bytes {
    let info = abi::UpkeepInfo {
        target: Address::repeat_byte(0x22),
        executeGas: gas_limit,
        checkData: Bytes::new(),
        balance: Default::default(),
        admin: Address::repeat_byte(0x33),
        maxValidBlocknumber: u64::from(u32::MAX),
        lastPerformBlockNumber: 0,
        amountSpent: Default::default(),
        paused,
        offchainConfig: Bytes::from_static(br#"{"mercuryEnabled":true}"#),
    };
    (info,).abi_encode_params().into()
}

/// A v2.1 `checkUpkeep` answer.
pub fn check_return(needed: bool, perform_data: Bytes, reason: u8) -> Bytes {
    (needed, perform_data, U256::from(reason), U256::from(21_000u64), U256::from(1u64), U256::ZERO, U256::ZERO).abi_encode_params().into()
}

/// A v2.0 `checkUpkeep` answer, which carries no gas limit.
pub fn check_return_v20(needed: bool, perform_data: Bytes, reason: u8) -> Bytes {
    (needed, perform_data, U256::from(reason), U256::from(21_000u64), U256::from(1u64), U256::ZERO).abi_encode_params().into()
}

pub fn simulate_return(success: bool) -> Bytes {
    (success, U256::from(50_000u64)).abi_encode_params().into()
}

pub fn callback_return(needed: bool, perform_data: Bytes, reason: u8) -> Bytes {
    (needed, perform_data, U256::from(reason), U256::from(30_000u64)).abi_encode_params().into()
}

pub fn id_topic(id: UpkeepId) -> B256 {
    B256::from(id.to_be_bytes())
}

pub fn log_upkeep_id(n: u8) -> UpkeepId {
    let mut bytes = [0u8; 32];
    bytes[15] = 1;
    bytes[31] = n;
    UpkeepId::from(U256::from_be_bytes(bytes))
}

pub fn chain_log(topics: Vec<B256>, data: Vec<u8>, block: u64, tx: u8) -> ChainLog {
    ChainLog {
        address: REGISTRY,
        topics,
        data: data.into(),
        block_number: block,
        block_hash: B256::repeat_byte(0xbb),
        tx_hash: B256::with_last_byte(tx),
        log_index: 0,
    }
}

/// Check revert requesting `feeds` at block 100.
pub fn mercury_revert(feeds: &[&str]) -> Bytes {
    use alloy::sol_types::SolError;
    abi::MercuryLookup {
        feedLabel: "feedIDHex".into(),
        feedList: feeds.iter().map(|f| f.to_string()).collect(),
        queryLabel: "blockNumber".into(),
        query: U256::from(100u64),
        extraData: Bytes::new(),
    }
    .abi_encode()
    .into()
}

pub fn is_check(call: &ContractCall) -> bool {
    selector(call) == abi::v2_1::checkUpkeepCall::SELECTOR
}

pub fn is_simulate(call: &ContractCall) -> bool {
    selector(call) == abi::simulatePerformUpkeepCall::SELECTOR
}

pub fn is_callback(call: &ContractCall) -> bool {
    selector(call) == abi::v2_1::checkCallbackCall::SELECTOR
}
