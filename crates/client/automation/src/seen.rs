use std::collections::{BTreeMap, HashSet};
use std::hash::Hash;

/// Logs already handled, remembered only for as long as they can show up
/// again in a lookback window of `window` blocks.
pub(crate) struct SeenLogs<K> {
    window: u64,
    by_block: BTreeMap<u64, HashSet<K>>,
}

impl<K: Eq + Hash> SeenLogs<K> {
    pub fn new(window: u64) -> Self {
        Self { window, by_block: BTreeMap::new() }
    }

    pub fn contains(&self, block: u64, key: &K) -> bool {
        self.by_block.get(&block).is_some_and(|keys| keys.contains(key))
    }

    pub fn insert(&mut self, block: u64, key: K) {
        self.by_block.entry(block).or_default().insert(key);
        if let Some(&latest) = self.by_block.keys().next_back() {
            self.by_block = self.by_block.split_off(&latest.saturating_sub(self.window));
        }
    }

    pub fn len(&self) -> usize {
        self.by_block.values().map(HashSet::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::B256;

    #[test]
    fn forgets_logs_outside_the_window() {
        let mut seen = SeenLogs::new(10);
        let tx = B256::with_last_byte(1);

        seen.insert(100, (tx, 0));
        seen.insert(100, (tx, 1));
        assert!(seen.contains(100, &(tx, 0)));
        assert!(!seen.contains(100, &(tx, 2)));
        assert!(!seen.contains(101, &(tx, 0)));

        seen.insert(110, (B256::with_last_byte(2), 0));
        assert!(seen.contains(100, &(tx, 1)));
        assert_eq!(seen.len(), 3);

        seen.insert(111, (B256::with_last_byte(3), 0));
        assert!(!seen.contains(100, &(tx, 0)));
        assert_eq!(seen.len(), 2);
    }
}
