//! In-memory set of the registry's upkeeps.
//!
//! Readers always see a complete map: a resync builds the new map first and
//! swaps it in under a single write lock.

use crate::config::IndexConfig;
use kc_registry::{LogFilter, LogPoller, RegistryCaller, RegistryError, RegistryVersion};
use kp_upkeep::{FailureReason, LogTriggerConfig, TriggerType, UpkeepId, UpkeepInfo, UpkeepState};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpkeepEntry {
    pub info: UpkeepInfo,
    pub state: UpkeepState,
    pub updated_at: Instant,
}

impl UpkeepEntry {
    fn new(info: UpkeepInfo) -> Self {
        Self { state: info.state(), info, updated_at: Instant::now() }
    }

    /// Reason reported for checks of an inactive upkeep.
    pub fn inactive_reason(&self) -> FailureReason {
        if self.info.paused {
            FailureReason::UpkeepPaused
        } else {
            FailureReason::UpkeepCancelled
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpkeepFilter {
    State(UpkeepState),
    Trigger(TriggerType),
}

impl UpkeepFilter {
    fn matches(&self, id: &UpkeepId, entry: &UpkeepEntry) -> bool {
        match self {
            Self::State(state) => entry.state == *state,
            Self::Trigger(trigger) => id.trigger_type() == *trigger,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inactivity {
    Paused,
    Cancelled { at_block: u64 },
}

pub struct UpkeepIndex {
    caller: RegistryCaller,
    log_poller: Arc<dyn LogPoller>,
    config: IndexConfig,
    entries: RwLock<HashMap<UpkeepId, UpkeepEntry>>,
}

impl UpkeepIndex {
    pub fn new(caller: RegistryCaller, log_poller: Arc<dyn LogPoller>, config: IndexConfig) -> Self {
        Self { caller, log_poller, config, entries: RwLock::default() }
    }

    pub fn caller(&self) -> &RegistryCaller {
        &self.caller
    }

    /// Replaces the whole index with fresh infos for `ids`.
    ///
    /// Any failed item fails the resync and leaves the index untouched.
    pub async fn initialize(&self, ids: &[UpkeepId]) -> Result<(), RegistryError> {
        let (infos, errors) = self.caller.get_upkeeps(ids, None).await?;
        if let Some(errors) = errors.into_option() {
            return Err(errors.into());
        }
        let fresh: HashMap<_, _> = infos.into_iter().map(|info| (info.id, UpkeepEntry::new(info))).collect();

        let previous = std::mem::replace(&mut *self.entries.write().await, fresh.clone());
        tracing::debug!(upkeeps = fresh.len(), "Reloaded upkeep index");

        for (id, entry) in &fresh {
            if previous.get(id).map(|e| e.state) != Some(entry.state) {
                self.sync_log_filter(*id, entry.state).await;
            }
        }
        for (id, entry) in &previous {
            if entry.state == UpkeepState::Active && !fresh.contains_key(id) {
                self.sync_log_filter(*id, UpkeepState::Inactive).await;
            }
        }
        Ok(())
    }

    /// Fetches and stores `id` unless it is already tracked as active.
    /// `force` always refetches.
    pub async fn add_active_upkeep(&self, id: UpkeepId, force: bool) -> Result<(), RegistryError> {
        if !force && self.entries.read().await.get(&id).is_some_and(|e| e.state == UpkeepState::Active) {
            return Ok(());
        }
        self.refresh(id, None).await.map(|_| ())
    }

    /// Marks `id` inactive. Returns `false` if the id is unknown.
    pub async fn deactivate(&self, id: UpkeepId, inactivity: Inactivity) -> bool {
        let was_active = {
            let mut entries = self.entries.write().await;
            let Some(entry) = entries.get_mut(&id) else {
                return false;
            };
            match inactivity {
                Inactivity::Paused => entry.info.paused = true,
                Inactivity::Cancelled { at_block } => entry.info.max_valid_block = at_block,
            }
            let was_active = entry.state == UpkeepState::Active;
            entry.state = UpkeepState::Inactive;
            entry.updated_at = Instant::now();
            was_active
        };
        if was_active {
            self.sync_log_filter(id, UpkeepState::Inactive).await;
        }
        true
    }

    /// Ids matching every filter, in ascending order. No filter means
    /// active upkeeps only.
    pub async fn get_active_upkeep_ids(&self, filters: &[UpkeepFilter]) -> Vec<UpkeepId> {
        let default = [UpkeepFilter::State(UpkeepState::Active)];
        let filters = if filters.is_empty() { &default[..] } else { filters };

        let mut ids: Vec<_> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|(id, entry)| filters.iter().all(|f| f.matches(id, entry)))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Cached entry of `id`, fetched at `block` when missing, expired or
    /// when `force` is set.
    pub async fn get_upkeep_info(
        &self,
        id: UpkeepId,
        block: Option<u64>,
        force: bool,
    ) -> Result<UpkeepEntry, RegistryError> {
        if !force {
            if let Some(entry) = self.entries.read().await.get(&id) {
                if entry.updated_at.elapsed() < self.config.ttl {
                    return Ok(entry.clone());
                }
            }
        }
        self.refresh(id, block).await
    }

    /// Cached entry of `id`, without any fetch.
    pub async fn entry(&self, id: UpkeepId) -> Option<UpkeepEntry> {
        self.entries.read().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn refresh(&self, id: UpkeepId, block: Option<u64>) -> Result<UpkeepEntry, RegistryError> {
        let entry = UpkeepEntry::new(self.caller.get_upkeep(id, block).await?);
        let previous = self.entries.write().await.insert(id, entry.clone());
        if previous.map(|e| e.state) != Some(entry.state) {
            self.sync_log_filter(id, entry.state).await;
        }
        Ok(entry)
    }

    /// Keeps the log filter of a log-triggered upkeep registered exactly
    /// while it is active. Failures are logged and retried on the next
    /// state change or resync.
    async fn sync_log_filter(&self, id: UpkeepId, state: UpkeepState) {
        if id.trigger_type() != TriggerType::Log || self.caller.version() != RegistryVersion::V2_1 {
            return;
        }
        let res = match state {
            UpkeepState::Active => match self.caller.log_trigger_config(id, None).await {
                Ok(config) => self
                    .log_poller
                    .register_filter(LogFilter::for_log_trigger(id, &config))
                    .await
                    .map_err(anyhow::Error::from),
                Err(e) => Err(e.into()),
            },
            UpkeepState::Inactive => {
                self.log_poller.unregister_filter(LogTriggerConfig::filter_name(id)).await.map_err(anyhow::Error::from)
            }
        };
        if let Err(e) = res {
            tracing::warn!(upkeep_id = %id, "Failed to update log trigger filter: {e:#}");
        }
    }
}
