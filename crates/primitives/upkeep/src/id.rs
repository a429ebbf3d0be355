use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Byte holding the trigger type in an upkeep id.
const TRIGGER_TYPE_BYTE: usize = 15;
/// Bytes which must all be zero for the trigger type byte to be meaningful.
/// Ids registered before trigger types existed are random and will almost
/// always have something in this range.
const TRIGGER_TYPE_PADDING: std::ops::Range<usize> = 4..TRIGGER_TYPE_BYTE;

/// How an upkeep is triggered, as encoded in its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerType {
    Conditional,
    Log,
    Cron,
    Ready,
    Unknown(u8),
}

impl From<u8> for TriggerType {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Conditional,
            1 => Self::Log,
            2 => Self::Cron,
            3 => Self::Ready,
            other => Self::Unknown(other),
        }
    }
}

/// On-chain upkeep identifier. Assigned once at registration and never
/// reused within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct UpkeepId(pub U256);

impl UpkeepId {
    pub fn new(id: U256) -> Self {
        Self(id)
    }

    pub fn as_u256(&self) -> U256 {
        self.0
    }

    pub fn to_be_bytes(&self) -> [u8; 32] {
        self.0.to_be_bytes::<32>()
    }

    /// Decodes the trigger type carried by the id.
    ///
    /// Legacy ids (anything with a non-zero byte in `4..15`) are always
    /// conditional. Otherwise byte 15 is the trigger type tag.
    pub fn trigger_type(&self) -> TriggerType {
        let bytes = self.to_be_bytes();
        if bytes[TRIGGER_TYPE_PADDING].iter().any(|b| *b != 0) {
            return TriggerType::Conditional;
        }
        TriggerType::from(bytes[TRIGGER_TYPE_BYTE])
    }
}

impl From<U256> for UpkeepId {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl From<u64> for UpkeepId {
    fn from(value: u64) -> Self {
        Self(U256::from(value))
    }
}

impl fmt::Display for UpkeepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UpkeepId {
    type Err = alloy_primitives::ruint::ParseError;

    /// Parses a base 10 id.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        U256::from_str_radix(s, 10).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn id_with(bytes: &[(usize, u8)]) -> UpkeepId {
        let mut raw = [0u8; 32];
        for (i, b) in bytes {
            raw[*i] = *b;
        }
        UpkeepId(U256::from_be_bytes(raw))
    }

    #[rstest]
    #[case::conditional(&[(0, 0xab), (15, 0), (31, 1)], TriggerType::Conditional)]
    #[case::log(&[(0, 0xab), (15, 1), (31, 1)], TriggerType::Log)]
    #[case::cron(&[(15, 2), (20, 7)], TriggerType::Cron)]
    #[case::ready(&[(15, 3)], TriggerType::Ready)]
    #[case::unknown(&[(15, 9)], TriggerType::Unknown(9))]
    #[case::legacy_id_ignores_tag(&[(4, 1), (15, 1)], TriggerType::Conditional)]
    #[case::legacy_id_padding_end(&[(14, 0xff), (15, 1)], TriggerType::Conditional)]
    fn trigger_type_from_id(#[case] bytes: &[(usize, u8)], #[case] expected: TriggerType) {
        assert_eq!(id_with(bytes).trigger_type(), expected);
    }

    #[test]
    fn registered_log_upkeep_id() {
        // 0x4779a074 00..00 01 42d7...
        let id: UpkeepId =
            "32329108151019397958065800113404894502874153543356521479058624064899121404671".parse().unwrap();
        assert_eq!(id.trigger_type(), TriggerType::Log);
    }

    #[test]
    fn display_is_decimal() {
        let id = UpkeepId::from(123456789u64);
        assert_eq!(id.to_string(), "123456789");
        assert_eq!("123456789".parse::<UpkeepId>().unwrap(), id);
    }
}
