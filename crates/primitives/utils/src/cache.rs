//! A concurrent key/value cache with per-entry expiration.

use crate::service::ServiceContext;
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Expired entries are never returned by [ExpiringCache::get] but stay in
/// memory until the next [ExpiringCache::sweep], usually driven by
/// [ExpiringCache::run_cleaner].
pub struct ExpiringCache<K, V> {
    entries: DashMap<K, Entry<V>>,
    default_ttl: Duration,
}

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(default_ttl: Duration) -> Self {
        Self { entries: DashMap::new(), default_ttl }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let entry = self.entries.get(key)?;
        (entry.expires_at > Instant::now()).then(|| entry.value.clone())
    }

    pub fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, self.default_ttl)
    }

    pub fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
        self.entries.insert(key, Entry { value, expires_at: Instant::now() + ttl });
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, entry)| entry.value)
    }

    /// Drops every expired entry, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Sweeps the cache every `interval` until `ctx` is cancelled.
    pub async fn run_cleaner(self: Arc<Self>, ctx: ServiceContext, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while ctx.run_until_cancelled(ticker.tick()).await.is_some() {
            let evicted = self.sweep();
            if evicted > 0 {
                tracing::trace!(evicted, "Swept expired cache entries");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire() {
        let cache = ExpiringCache::new(Duration::from_secs(10));
        cache.set("a", 1);
        cache.set_with_ttl("b", 2, Duration::from_secs(60));
        assert_eq!(cache.get(&"a"), Some(1));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(2));
        // expired but not swept yet
        assert_eq!(cache.len(), 2);

        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cleaner_sweeps_until_cancelled() {
        let cache = Arc::new(ExpiringCache::new(Duration::from_secs(1)));
        cache.set(1u64, "x");

        let ctx = ServiceContext::new();
        let cleaner = tokio::spawn(Arc::clone(&cache).run_cleaner(ctx.clone(), Duration::from_secs(5)));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(cache.is_empty());

        ctx.cancel_global();
        cleaner.await.unwrap();
    }
}
