//! Off-chain data stage of the eligibility pipeline.
//!
//! Nothing in here fails the pipeline: every problem is logged and leaves
//! the affected result as the check stage produced it.

use crate::index::UpkeepIndex;
use alloy::primitives::{Bytes, U256};
use async_trait::async_trait;
use futures::StreamExt;
use kc_mercury::{AdminConfigSource, AllowList, MercuryClient};
use kc_registry::{decode_mercury_lookup, ChainError, RegistryCaller, RegistryError, RegistryVersion};
use kp_upkeep::{CheckResult, FailureReason, MercuryLookup, UpkeepId};
use std::sync::Arc;

/// Admin config stored by the registry next to each upkeep.
pub struct RegistryAdminConfig(RegistryCaller);

#[async_trait]
impl AdminConfigSource for RegistryAdminConfig {
    async fn admin_offchain_config(&self, id: UpkeepId) -> anyhow::Result<Bytes> {
        Ok(self.0.privilege_config(id, None).await?)
    }
}

/// Off-chain config of the upkeep itself, for registries without admin
/// config.
pub struct IndexAdminConfig(Arc<UpkeepIndex>);

#[async_trait]
impl AdminConfigSource for IndexAdminConfig {
    async fn admin_offchain_config(&self, id: UpkeepId) -> anyhow::Result<Bytes> {
        Ok(self.0.get_upkeep_info(id, None, false).await?.info.offchain_config)
    }
}

/// Where Mercury permissions are read from for the index's registry.
pub fn admin_config_source(index: &Arc<UpkeepIndex>) -> Arc<dyn AdminConfigSource> {
    match index.caller().version() {
        RegistryVersion::V2_0 => Arc::new(IndexAdminConfig(Arc::clone(index))),
        RegistryVersion::V2_1 => Arc::new(RegistryAdminConfig(index.caller().clone())),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Unchanged,
    Retryable,
    Eligible { perform_data: Bytes, gas_used: U256 },
    Ineligible(FailureReason),
}

pub struct MercuryStage {
    client: MercuryClient,
    allow_list: Arc<AllowList>,
    caller: RegistryCaller,
    max_workers: usize,
}

impl MercuryStage {
    pub fn new(client: MercuryClient, allow_list: Arc<AllowList>, caller: RegistryCaller, max_workers: usize) -> Self {
        Self { client, allow_list, caller, max_workers: max_workers.max(1) }
    }

    pub fn allow_list(&self) -> &Arc<AllowList> {
        &self.allow_list
    }

    /// The data request carried by a reverted check, if any.
    pub fn pending_lookup(result: &CheckResult) -> Option<MercuryLookup> {
        if result.eligible() || result.failure_reason() != FailureReason::TargetCheckReverted {
            return None;
        }
        decode_mercury_lookup(&result.perform_data)
    }

    /// Resolves the data requests of `results` in place.
    pub async fn lookup(&self, results: &mut [CheckResult]) {
        let pending: Vec<_> = results
            .iter()
            .enumerate()
            .filter_map(|(i, res)| Some((i, res.key.id(), res.check_block_number, Self::pending_lookup(res)?)))
            .collect();
        if pending.is_empty() {
            return;
        }

        let outcomes: Vec<(usize, Outcome)> = futures::stream::iter(pending)
            .map(|(i, id, block, lookup)| async move { (i, self.resolve(id, block, lookup).await) })
            .buffer_unordered(self.max_workers)
            .collect()
            .await;

        for (i, outcome) in outcomes {
            let res = &mut results[i];
            match outcome {
                Outcome::Unchanged => {}
                Outcome::Retryable => res.retryable = true,
                Outcome::Eligible { perform_data, gas_used } => {
                    res.set_eligible(perform_data);
                    res.gas_used = gas_used;
                }
                Outcome::Ineligible(reason) => res.set_ineligible(reason),
            }
        }
    }

    async fn resolve(&self, id: UpkeepId, block: u64, lookup: MercuryLookup) -> Outcome {
        match self.allow_list.is_allowed(id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(upkeep_id = %id, "Upkeep is not allowed to use Mercury");
                return Outcome::Unchanged;
            }
            Err(e) => {
                tracing::warn!(upkeep_id = %id, "Failed to read Mercury permission: {e:#}");
                return Outcome::Unchanged;
            }
        }

        let values = match self.client.fetch(&lookup, id).await {
            Ok(values) => values,
            Err(e) => {
                tracing::warn!(upkeep_id = %id, block, "Mercury lookup failed: {e:#}");
                return if e.is_retryable() { Outcome::Retryable } else { Outcome::Unchanged };
            }
        };

        match self.caller.callback(id, values, lookup.extra_data, block).await {
            Ok(outcome) if outcome.failure_reason == FailureReason::MercuryCallbackReverted => {
                Outcome::Ineligible(FailureReason::MercuryCallbackReverted)
            }
            Ok(outcome) if !outcome.upkeep_needed => Outcome::Ineligible(FailureReason::UpkeepNotNeeded),
            Ok(outcome) => Outcome::Eligible { perform_data: outcome.perform_data, gas_used: outcome.gas_used },
            Err(RegistryError::Chain(ChainError::Rpc { message, .. })) => {
                tracing::debug!(upkeep_id = %id, block, "{} reverted: {message}", self.caller.version().callback_name());
                Outcome::Ineligible(FailureReason::MercuryCallbackReverted)
            }
            Err(e) => {
                tracing::warn!(upkeep_id = %id, block, "{} failed: {e:#}", self.caller.version().callback_name());
                Outcome::Unchanged
            }
        }
    }
}
