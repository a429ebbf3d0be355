use crate::UpkeepId;
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const KEY_SEPARATOR: char = '|';

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum UpkeepKeyError {
    #[error("upkeep key `{0}` must have exactly 2 parts separated by `|`")]
    PartCount(String),
    #[error("invalid block number in upkeep key: `{0}`")]
    InvalidBlock(String),
    #[error("invalid upkeep id in upkeep key: `{0}`")]
    InvalidId(String),
}

/// Pins an eligibility check of one upkeep to one block.
///
/// Serialized as `<block>|<id>`, both in base 10. A block of `0` means "no
/// explicit block": callers fall back to the latest known head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UpkeepKey {
    block: u64,
    id: UpkeepId,
}

impl UpkeepKey {
    pub fn new(block: u64, id: impl Into<UpkeepId>) -> Self {
        Self { block, id: id.into() }
    }

    pub fn block(&self) -> u64 {
        self.block
    }

    pub fn id(&self) -> UpkeepId {
        self.id
    }

    /// The block this key is pinned to, if any.
    pub fn pinned_block(&self) -> Option<u64> {
        (self.block != 0).then_some(self.block)
    }
}

impl fmt::Display for UpkeepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{KEY_SEPARATOR}{}", self.block, self.id)
    }
}

fn is_decimal(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

impl FromStr for UpkeepKey {
    type Err = UpkeepKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(KEY_SEPARATOR).collect();
        let [block, id] = parts.as_slice() else {
            return Err(UpkeepKeyError::PartCount(s.to_string()));
        };

        if !is_decimal(block) {
            return Err(UpkeepKeyError::InvalidBlock(block.to_string()));
        }
        let block = block.parse::<u64>().map_err(|_| UpkeepKeyError::InvalidBlock(block.to_string()))?;

        if !is_decimal(id) {
            return Err(UpkeepKeyError::InvalidId(id.to_string()));
        }
        let id = U256::from_str_radix(id, 10).map_err(|_| UpkeepKeyError::InvalidId(id.to_string()))?;

        Ok(Self { block, id: UpkeepId(id) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use rstest::rstest;

    #[test]
    fn format_key() {
        let key = UpkeepKey::new(1234, 123456789u64);
        assert_eq!(key.to_string(), "1234|123456789");
        assert_eq!(key.pinned_block(), Some(1234));
        assert_eq!(UpkeepKey::new(0, 1u64).pinned_block(), None);
    }

    #[rstest]
    #[case::empty("")]
    #[case::no_separator("1234")]
    #[case::too_many_parts("1|2|3")]
    fn wrong_part_count(#[case] raw: &str) {
        assert_matches!(raw.parse::<UpkeepKey>(), Err(UpkeepKeyError::PartCount(_)));
    }

    #[rstest]
    #[case::empty_block("|12")]
    #[case::hex_block("0x10|12")]
    #[case::negative_block("-1|12")]
    #[case::block_overflow("18446744073709551616|12")]
    fn bad_block(#[case] raw: &str) {
        assert_matches!(raw.parse::<UpkeepKey>(), Err(UpkeepKeyError::InvalidBlock(_)));
    }

    #[rstest]
    #[case::empty_id("12|")]
    #[case::letters("12|abc")]
    #[case::spaces("12| 5")]
    #[case::id_overflow(
        "12|115792089237316195423570985008687907853269984665640564039457584007913129639936"
    )]
    fn bad_id(#[case] raw: &str) {
        assert_matches!(raw.parse::<UpkeepKey>(), Err(UpkeepKeyError::InvalidId(_)));
    }

    proptest! {
        #[test]
        fn key_round_trip(block in any::<u64>(), id in any::<[u8; 32]>()) {
            let key = UpkeepKey::new(block, U256::from_be_bytes(id));
            prop_assert_eq!(key.to_string().parse::<UpkeepKey>(), Ok(key));
        }

        #[test]
        fn parse_never_panics(raw in ".*") {
            let _ = raw.parse::<UpkeepKey>();
        }
    }
}
