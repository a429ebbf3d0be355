//! Registry events which change the set of active upkeeps.

use crate::abi;
use crate::error::RegistryError;
use crate::logpoller::ChainLog;
use crate::version::decode_event;
use alloy::primitives::B256;
use alloy::sol_types::SolEvent;
use kp_upkeep::UpkeepId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleKind {
    Registered,
    Received,
    Unpaused,
    GasLimitSet,
    Paused,
    Canceled { at_block: u64 },
    Migrated,
}

impl LifecycleKind {
    /// Whether the upkeep stops being checked after this event.
    pub fn deactivates(&self) -> bool {
        matches!(self, Self::Paused | Self::Canceled { .. } | Self::Migrated)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub kind: LifecycleKind,
    pub id: UpkeepId,
    pub block: u64,
    pub tx_hash: B256,
    pub log_index: u64,
}

/// First topics of every lifecycle event, identical across registry
/// versions.
pub fn lifecycle_event_sigs() -> Vec<B256> {
    vec![
        abi::UpkeepRegistered::SIGNATURE_HASH,
        abi::UpkeepReceived::SIGNATURE_HASH,
        abi::UpkeepUnpaused::SIGNATURE_HASH,
        abi::UpkeepGasLimitSet::SIGNATURE_HASH,
        abi::UpkeepPaused::SIGNATURE_HASH,
        abi::UpkeepCanceled::SIGNATURE_HASH,
        abi::UpkeepMigrated::SIGNATURE_HASH,
    ]
}

pub fn decode_lifecycle(log: &ChainLog) -> Result<LifecycleEvent, RegistryError> {
    let topic0 = log.topics.first().copied().unwrap_or_default();
    let (kind, id) = match topic0 {
        s if s == abi::UpkeepRegistered::SIGNATURE_HASH => {
            (LifecycleKind::Registered, decode_event::<abi::UpkeepRegistered>(log)?.id)
        }
        s if s == abi::UpkeepReceived::SIGNATURE_HASH => {
            (LifecycleKind::Received, decode_event::<abi::UpkeepReceived>(log)?.id)
        }
        s if s == abi::UpkeepUnpaused::SIGNATURE_HASH => {
            (LifecycleKind::Unpaused, decode_event::<abi::UpkeepUnpaused>(log)?.id)
        }
        s if s == abi::UpkeepGasLimitSet::SIGNATURE_HASH => {
            (LifecycleKind::GasLimitSet, decode_event::<abi::UpkeepGasLimitSet>(log)?.id)
        }
        s if s == abi::UpkeepPaused::SIGNATURE_HASH => {
            (LifecycleKind::Paused, decode_event::<abi::UpkeepPaused>(log)?.id)
        }
        s if s == abi::UpkeepCanceled::SIGNATURE_HASH => {
            let ev = decode_event::<abi::UpkeepCanceled>(log)?;
            (LifecycleKind::Canceled { at_block: ev.atBlockHeight }, ev.id)
        }
        s if s == abi::UpkeepMigrated::SIGNATURE_HASH => {
            (LifecycleKind::Migrated, decode_event::<abi::UpkeepMigrated>(log)?.id)
        }
        other => return Err(RegistryError::decode("upkeep lifecycle log", format!("unexpected topic {other}"))),
    };

    Ok(LifecycleEvent {
        kind,
        id: UpkeepId::from(id),
        block: log.block_number,
        tx_hash: log.tx_hash,
        log_index: log.log_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, U256};
    use alloy::sol_types::SolValue;
    use assert_matches::assert_matches;

    fn id_topic(id: u64) -> B256 {
        B256::from(U256::from(id).to_be_bytes::<32>())
    }

    fn log_of(topics: Vec<B256>, data: Vec<u8>) -> ChainLog {
        ChainLog {
            address: Address::ZERO,
            topics,
            data: data.into(),
            block_number: 77,
            block_hash: B256::ZERO,
            tx_hash: B256::with_last_byte(9),
            log_index: 3,
        }
    }

    #[test]
    fn decodes_registered() {
        let data = (500_000u32, Address::repeat_byte(1)).abi_encode_params();
        let ev =
            decode_lifecycle(&log_of(vec![abi::UpkeepRegistered::SIGNATURE_HASH, id_topic(12)], data)).unwrap();
        assert_eq!(ev.kind, LifecycleKind::Registered);
        assert_eq!(ev.id, UpkeepId::from(12u64));
        assert_eq!(ev.block, 77);
        assert_eq!(ev.log_index, 3);
    }

    #[test]
    fn decodes_canceled_block() {
        let ev = decode_lifecycle(&log_of(
            vec![abi::UpkeepCanceled::SIGNATURE_HASH, id_topic(5), id_topic(120)],
            vec![],
        ))
        .unwrap();
        assert_eq!(ev.kind, LifecycleKind::Canceled { at_block: 120 });
        assert!(ev.kind.deactivates());
    }

    #[test]
    fn paused_deactivates_unpaused_does_not() {
        let paused = decode_lifecycle(&log_of(vec![abi::UpkeepPaused::SIGNATURE_HASH, id_topic(1)], vec![])).unwrap();
        let unpaused =
            decode_lifecycle(&log_of(vec![abi::UpkeepUnpaused::SIGNATURE_HASH, id_topic(1)], vec![])).unwrap();
        assert!(paused.kind.deactivates());
        assert!(!unpaused.kind.deactivates());
    }

    #[test]
    fn unknown_topic_is_an_error() {
        assert_matches!(
            decode_lifecycle(&log_of(vec![B256::repeat_byte(0xee)], vec![])),
            Err(RegistryError::Decode { .. })
        );
        assert_eq!(lifecycle_event_sigs().len(), 7);
    }
}
