//! ABI packing and unpacking for each supported registry version.

use crate::abi::{self, v2_0, v2_1};
use crate::error::RegistryError;
use crate::logpoller::ChainLog;
use alloy::primitives::{Bytes, B256, U256};
use alloy::sol_types::{SolCall, SolEvent, SolType};
use kp_upkeep::{CheckResult, FailureReason, StaleReason, TriggerType, UpkeepId, UpkeepKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RegistryVersion {
    #[serde(rename = "v2.0")]
    V2_0,
    #[default]
    #[serde(rename = "v2.1")]
    V2_1,
}

impl fmt::Display for RegistryVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V2_0 => write!(f, "v2.0"),
            Self::V2_1 => write!(f, "v2.1"),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown registry version `{0}`, expected v2.0 or v2.1")]
pub struct UnknownRegistryVersion(String);

impl FromStr for RegistryVersion {
    type Err = UnknownRegistryVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches('v') {
            "2.0" => Ok(Self::V2_0),
            "2.1" => Ok(Self::V2_1),
            _ => Err(UnknownRegistryVersion(s.to_string())),
        }
    }
}

/// Decoded answer of the off-chain data callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackOutcome {
    pub upkeep_needed: bool,
    pub perform_data: Bytes,
    pub failure_reason: FailureReason,
    pub gas_used: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerformedEvent {
    pub id: UpkeepId,
    pub success: bool,
    /// `None` when the event does not carry a decodable check block.
    pub check_block: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleEvent {
    pub id: UpkeepId,
    pub reason: StaleReason,
    pub check_block: Option<u64>,
}

fn failure_reason(code: u8) -> Result<FailureReason, RegistryError> {
    FailureReason::try_from(code).map_err(|e| RegistryError::decode("upkeepFailureReason", e))
}

fn u256_to_u32_saturating(value: U256) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

impl RegistryVersion {
    pub fn encode_check(&self, id: UpkeepId) -> Bytes {
        // Same selector on both versions, only the return shape differs.
        abi::v2_0::checkUpkeepCall { id: id.as_u256() }.abi_encode().into()
    }

    /// Unpacks a `checkUpkeep` answer for `key`, checked at `block`.
    ///
    /// The raw perform data is kept on ineligible results too, since a target
    /// revert may carry an off-chain data request.
    pub fn decode_check(&self, key: UpkeepKey, block: u64, data: &[u8]) -> Result<CheckResult, RegistryError> {
        let mut res = CheckResult::new(key, block);
        let (needed, perform_data, reason) = match self {
            Self::V2_0 => {
                let ret = v2_0::checkUpkeepCall::abi_decode_returns(data, true)
                    .map_err(|e| RegistryError::decode("checkUpkeep", e))?;
                res.gas_used = ret.gasUsed;
                res.fast_gas_wei = ret.fastGasWei;
                res.link_native = ret.linkNative;
                (ret.upkeepNeeded, ret.performData, ret.upkeepFailureReason)
            }
            Self::V2_1 => {
                let ret = v2_1::checkUpkeepCall::abi_decode_returns(data, true)
                    .map_err(|e| RegistryError::decode("checkUpkeep", e))?;
                res.gas_used = ret.gasUsed;
                res.fast_gas_wei = ret.fastGasWei;
                res.link_native = ret.linkNative;
                res.execute_gas = u256_to_u32_saturating(ret.gasLimit);
                (ret.upkeepNeeded, ret.performData, ret.upkeepFailureReason)
            }
        };

        if needed {
            res.set_eligible(perform_data);
        } else {
            res.set_ineligible(failure_reason(reason)?);
            res.perform_data = perform_data;
        }
        Ok(res)
    }

    pub fn encode_simulate(&self, id: UpkeepId, perform_data: Bytes) -> Bytes {
        abi::simulatePerformUpkeepCall { id: id.as_u256(), performData: perform_data }.abi_encode().into()
    }

    pub fn decode_simulate(&self, data: &[u8]) -> Result<bool, RegistryError> {
        abi::simulatePerformUpkeepCall::abi_decode_returns(data, true)
            .map(|ret| ret.success)
            .map_err(|e| RegistryError::decode("simulatePerformUpkeep", e))
    }

    /// Name of the callback receiving off-chain values.
    pub fn callback_name(&self) -> &'static str {
        match self {
            Self::V2_0 => "mercuryCallback",
            Self::V2_1 => "checkCallback",
        }
    }

    pub fn encode_callback(&self, id: UpkeepId, values: Vec<Bytes>, extra_data: Bytes) -> Bytes {
        match self {
            Self::V2_0 => v2_0::mercuryCallbackCall { id: id.as_u256(), values, extraData: extra_data }.abi_encode(),
            Self::V2_1 => v2_1::checkCallbackCall { id: id.as_u256(), values, extraData: extra_data }.abi_encode(),
        }
        .into()
    }

    pub fn decode_callback(&self, data: &[u8]) -> Result<CallbackOutcome, RegistryError> {
        let (upkeep_needed, perform_data, reason, gas_used) = match self {
            Self::V2_0 => {
                let ret = v2_0::mercuryCallbackCall::abi_decode_returns(data, true)
                    .map_err(|e| RegistryError::decode(self.callback_name(), e))?;
                (ret.upkeepNeeded, ret.performData, ret.upkeepFailureReason, ret.gasUsed)
            }
            Self::V2_1 => {
                let ret = v2_1::checkCallbackCall::abi_decode_returns(data, true)
                    .map_err(|e| RegistryError::decode(self.callback_name(), e))?;
                (ret.upkeepNeeded, ret.performData, ret.upkeepFailureReason, ret.gasUsed)
            }
        };
        Ok(CallbackOutcome { upkeep_needed, perform_data, failure_reason: failure_reason(reason)?, gas_used })
    }

    pub fn encode_get_state(&self) -> Bytes {
        abi::v2_0::getStateCall {}.abi_encode().into()
    }

    pub fn decode_num_upkeeps(&self, data: &[u8]) -> Result<U256, RegistryError> {
        match self {
            Self::V2_0 => v2_0::getStateCall::abi_decode_returns(data, true).map(|ret| ret.state.numUpkeeps),
            Self::V2_1 => v2_1::getStateCall::abi_decode_returns(data, true).map(|ret| ret.state.numUpkeeps),
        }
        .map_err(|e| RegistryError::decode("getState", e))
    }

    pub fn performed_event_sig(&self) -> B256 {
        match self {
            Self::V2_0 => v2_0::UpkeepPerformed::SIGNATURE_HASH,
            Self::V2_1 => v2_1::UpkeepPerformed::SIGNATURE_HASH,
        }
    }

    pub fn stale_event_sigs(&self) -> Vec<B256> {
        match self {
            Self::V2_0 => vec![
                v2_0::ReorgedUpkeepReport::SIGNATURE_HASH,
                v2_0::StaleUpkeepReport::SIGNATURE_HASH,
                v2_0::InsufficientFundsUpkeepReport::SIGNATURE_HASH,
            ],
            Self::V2_1 => vec![
                v2_1::ReorgedUpkeepReport::SIGNATURE_HASH,
                v2_1::StaleUpkeepReport::SIGNATURE_HASH,
                v2_1::InsufficientFundsUpkeepReport::SIGNATURE_HASH,
            ],
        }
    }

    pub fn decode_performed(&self, log: &ChainLog) -> Result<PerformedEvent, RegistryError> {
        match self {
            Self::V2_0 => {
                let ev = decode_event::<v2_0::UpkeepPerformed>(log)?;
                Ok(PerformedEvent {
                    id: ev.id.into(),
                    success: ev.success,
                    check_block: Some(ev.checkBlockNumber.into()),
                })
            }
            Self::V2_1 => {
                let ev = decode_event::<v2_1::UpkeepPerformed>(log)?;
                let id = UpkeepId::from(ev.id);
                Ok(PerformedEvent { id, success: ev.success, check_block: decode_trigger_block(id, &ev.trigger).ok() })
            }
        }
    }

    pub fn decode_stale(&self, log: &ChainLog) -> Result<StaleEvent, RegistryError> {
        let topic0 = log.topics.first().copied().unwrap_or_default();
        match self {
            Self::V2_0 => {
                let (id, reason) = match topic0 {
                    s if s == v2_0::ReorgedUpkeepReport::SIGNATURE_HASH => {
                        (decode_event::<v2_0::ReorgedUpkeepReport>(log)?.id, StaleReason::Reorged)
                    }
                    s if s == v2_0::StaleUpkeepReport::SIGNATURE_HASH => {
                        (decode_event::<v2_0::StaleUpkeepReport>(log)?.id, StaleReason::Stale)
                    }
                    s if s == v2_0::InsufficientFundsUpkeepReport::SIGNATURE_HASH => {
                        (decode_event::<v2_0::InsufficientFundsUpkeepReport>(log)?.id, StaleReason::InsufficientFunds)
                    }
                    other => return Err(RegistryError::decode("stale report log", format!("unexpected topic {other}"))),
                };
                Ok(StaleEvent { id: id.into(), reason, check_block: None })
            }
            Self::V2_1 => {
                let (id, trigger, reason) = match topic0 {
                    s if s == v2_1::ReorgedUpkeepReport::SIGNATURE_HASH => {
                        let ev = decode_event::<v2_1::ReorgedUpkeepReport>(log)?;
                        (ev.id, ev.trigger, StaleReason::Reorged)
                    }
                    s if s == v2_1::StaleUpkeepReport::SIGNATURE_HASH => {
                        let ev = decode_event::<v2_1::StaleUpkeepReport>(log)?;
                        (ev.id, ev.trigger, StaleReason::Stale)
                    }
                    s if s == v2_1::InsufficientFundsUpkeepReport::SIGNATURE_HASH => {
                        let ev = decode_event::<v2_1::InsufficientFundsUpkeepReport>(log)?;
                        (ev.id, ev.trigger, StaleReason::InsufficientFunds)
                    }
                    other => return Err(RegistryError::decode("stale report log", format!("unexpected topic {other}"))),
                };
                let id = UpkeepId::from(id);
                Ok(StaleEvent { id, reason, check_block: decode_trigger_block(id, &trigger).ok() })
            }
        }
    }

    /// Decodes `transmit` calldata into `(upkeep id, check block)` pairs.
    pub fn decode_transmit_report(&self, input: &[u8]) -> Result<Vec<(UpkeepId, u64)>, RegistryError> {
        let call = abi::transmitCall::abi_decode(input, true).map_err(|e| RegistryError::decode("transmit", e))?;
        match self {
            Self::V2_0 => {
                let report = <v2_0::Report as SolType>::abi_decode_params(&call.rawReport, true)
                    .map_err(|e| RegistryError::decode("report", e))?;
                if report.upkeepIds.len() != report.wrappedPerformDatas.len() {
                    return Err(RegistryError::decode("report", "upkeep ids and perform data lengths differ"));
                }
                Ok(report
                    .upkeepIds
                    .into_iter()
                    .zip(report.wrappedPerformDatas)
                    .map(|(id, wrapped)| (UpkeepId::from(id), u64::from(wrapped.checkBlockNumber)))
                    .collect())
            }
            Self::V2_1 => {
                let report = <v2_1::Report as SolType>::abi_decode(&call.rawReport, true)
                    .map_err(|e| RegistryError::decode("report", e))?;
                if report.upkeepIds.len() != report.triggers.len() {
                    return Err(RegistryError::decode("report", "upkeep ids and triggers lengths differ"));
                }
                report
                    .upkeepIds
                    .into_iter()
                    .zip(report.triggers)
                    .map(|(id, trigger)| {
                        let id = UpkeepId::from(id);
                        Ok((id, decode_trigger_block(id, &trigger)?))
                    })
                    .collect()
            }
        }
    }
}

/// Reads the check block out of a v2.1 trigger, whose layout depends on the
/// trigger type carried by the upkeep id.
pub fn decode_trigger_block(id: UpkeepId, trigger: &[u8]) -> Result<u64, RegistryError> {
    match id.trigger_type() {
        TriggerType::Log => <v2_1::LogTrigger as SolType>::abi_decode_params(trigger, true)
            .map(|t| u64::from(t.blockNum))
            .map_err(|e| RegistryError::decode("log trigger", e)),
        _ => <v2_1::ConditionalTrigger as SolType>::abi_decode_params(trigger, true)
            .map(|t| u64::from(t.blockNum))
            .map_err(|e| RegistryError::decode("conditional trigger", e)),
    }
}

pub(crate) fn decode_event<E: SolEvent>(log: &ChainLog) -> Result<E, RegistryError> {
    E::decode_raw_log(log.topics.iter().copied(), &log.data, true).map_err(|e| RegistryError::decode(E::SIGNATURE, e))
}
