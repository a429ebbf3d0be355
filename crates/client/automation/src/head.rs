//! Latest chain head tracking.

use crate::config::HeadConfig;
use crate::lifecycle::Lifecycle;
use kc_registry::{ChainClient, ChainError};
use kp_utils::service::ServiceContext;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

/// Receives every new head seen by a [HeadProvider].
pub trait HeadObserver: Send + Sync {
    fn on_new_head(&self, block: u64);
}

pub struct HeadProvider {
    client: Arc<dyn ChainClient>,
    config: HeadConfig,
    head: watch::Sender<u64>,
    observed: AtomicBool,
    lifecycle: Lifecycle,
}

impl HeadProvider {
    pub fn new(client: Arc<dyn ChainClient>, config: HeadConfig) -> Self {
        let (head, _) = watch::channel(0);
        Self { client, config, head, observed: AtomicBool::new(false), lifecycle: Lifecycle::default() }
    }

    /// Highest head seen so far, `0` before the first one.
    pub fn latest_block(&self) -> u64 {
        *self.head.borrow()
    }

    /// Records `block` as the head if it is higher than the current one.
    pub fn observe(&self, block: u64) -> bool {
        self.head.send_if_modified(|current| {
            if block > *current {
                *current = block;
                true
            } else {
                false
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.head.subscribe()
    }

    /// Calls `observer` on every new head until `ctx` is cancelled.
    ///
    /// Only one observer may be attached at a time: returns `false` and
    /// does nothing while another one is active.
    pub fn on_new_head(self: &Arc<Self>, ctx: ServiceContext, observer: Arc<dyn HeadObserver>) -> bool {
        if self.observed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let this = Arc::clone(self);
        let mut heads = self.subscribe();
        tokio::spawn(async move {
            while let Some(Ok(())) = ctx.run_until_cancelled(heads.changed()).await {
                let block = *heads.borrow_and_update();
                observer.on_new_head(block);
            }
            this.observed.store(false, Ordering::Release);
        });
        true
    }

    pub async fn poll_once(&self) -> Result<u64, ChainError> {
        let block = self.client.block_number().await?;
        if self.observe(block) {
            tracing::trace!(block, "New chain head");
        }
        Ok(block)
    }

    /// Polls the chain head until closed. Starting twice is a no-op.
    pub fn start(self: &Arc<Self>, join_set: &mut JoinSet<anyhow::Result<()>>, ctx: &ServiceContext) -> anyhow::Result<()> {
        let Some(ctx) = self.lifecycle.begin(ctx) else {
            return Ok(());
        };
        let this = Arc::clone(self);
        join_set.spawn(async move {
            let mut interval = tokio::time::interval(this.config.poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            while ctx.run_until_cancelled(interval.tick()).await.is_some() {
                if let Err(e) = this.poll_once().await {
                    tracing::warn!("Failed to fetch chain head: {e:#}");
                }
            }
            anyhow::Ok(())
        });
        Ok(())
    }

    pub fn close(&self) {
        self.lifecycle.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kc_registry::MockChainClient;
    use std::sync::Mutex;
    use std::time::Duration;

    fn provider(client: MockChainClient) -> Arc<HeadProvider> {
        Arc::new(HeadProvider::new(Arc::new(client), HeadConfig { poll_interval: Duration::from_millis(10) }))
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<u64>>);

    impl HeadObserver for Recorder {
        fn on_new_head(&self, block: u64) {
            self.0.lock().unwrap().push(block);
        }
    }

    #[test]
    fn head_only_moves_forward() {
        let head = provider(MockChainClient::new());
        assert_eq!(head.latest_block(), 0);
        assert!(head.observe(10));
        assert!(!head.observe(9));
        assert!(!head.observe(10));
        assert_eq!(head.latest_block(), 10);
    }

    #[tokio::test]
    async fn single_observer_at_a_time() {
        let head = provider(MockChainClient::new());
        let ctx = ServiceContext::new().child();
        let recorder = Arc::new(Recorder::default());

        assert!(head.on_new_head(ctx.clone(), recorder.clone()));
        assert!(!head.on_new_head(ctx.clone(), recorder.clone()));

        head.observe(5);
        tokio::time::sleep(Duration::from_millis(20)).await;
        head.observe(6);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*recorder.0.lock().unwrap(), vec![5, 6]);

        ctx.cancel_local();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(head.on_new_head(ServiceContext::new(), recorder));
    }

    #[tokio::test]
    async fn polls_until_closed() {
        let mut client = MockChainClient::new();
        let mut next = 100;
        client.expect_block_number().returning(move || {
            next += 1;
            Ok(next)
        });
        let head = provider(client);

        let mut join_set = JoinSet::new();
        let ctx = ServiceContext::new();
        head.start(&mut join_set, &ctx).unwrap();
        head.start(&mut join_set, &ctx).unwrap();
        assert_eq!(join_set.len(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(head.latest_block() > 100);

        head.close();
        head.close();
        join_set.join_next().await.unwrap().unwrap().unwrap();
        assert!(!ctx.is_cancelled());
    }
}
