use crate::RegistryVersion;
use alloy::primitives::{Bytes, B256};
use kp_upkeep::UpkeepId;
use std::fmt;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("RPC transport error: {0}")]
    Transport(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String, data: Option<Bytes> },

    #[error("Block {0} not found")]
    MissingBlock(u64),

    #[error("Transaction {0} not found")]
    MissingTransaction(B256),
}

impl ChainError {
    /// Whether the request never got a proper answer from the node.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LogPollerError {
    #[error("Log poller query failed: {0}")]
    Query(String),

    #[error("Log filter `{0}` is already registered with a different definition")]
    FilterConflict(String),
}

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("Failed to decode {what}: {message}")]
    Decode { what: &'static str, message: String },

    #[error("`{method}` is not available on registry {version}")]
    Unsupported { method: &'static str, version: RegistryVersion },

    #[error(transparent)]
    Batch(#[from] BatchErrors),
}

impl RegistryError {
    pub fn decode(what: &'static str, err: impl fmt::Display) -> Self {
        Self::Decode { what, message: err.to_string() }
    }
}

/// Per-item failures collected while processing a batch. Siblings of a
/// failed item are unaffected.
#[derive(Debug, Default)]
pub struct BatchErrors(Vec<(UpkeepId, RegistryError)>);

impl BatchErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, id: UpkeepId, err: RegistryError) {
        self.0.push((id, err));
    }

    pub fn extend(&mut self, other: BatchErrors) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(UpkeepId, RegistryError)> {
        self.0.iter()
    }

    /// `None` when no item failed.
    pub fn into_option(self) -> Option<Self> {
        (!self.is_empty()).then_some(self)
    }
}

impl fmt::Display for BatchErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} item(s) failed", self.0.len())?;
        for (id, err) in &self.0 {
            write!(f, "; upkeep {id}: {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for BatchErrors {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_errors_display_every_item() {
        let mut errors = BatchErrors::new();
        assert!(errors.is_empty());
        errors.push(UpkeepId::from(1u64), ChainError::Transport("timeout".into()).into());
        errors.push(UpkeepId::from(2u64), RegistryError::decode("checkUpkeep", "buffer overrun"));

        assert_eq!(
            errors.to_string(),
            "2 item(s) failed; upkeep 1: RPC transport error: timeout; upkeep 2: Failed to decode checkUpkeep: buffer overrun"
        );
        assert!(errors.into_option().is_some());
        assert!(BatchErrors::new().into_option().is_none());
    }
}
