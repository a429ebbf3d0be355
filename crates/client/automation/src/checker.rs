//! The eligibility pipeline: check, off-chain data, simulate.

use crate::head::HeadProvider;
use crate::index::UpkeepIndex;
use crate::mercury::MercuryStage;
use alloy::primitives::B256;
use kc_registry::{BatchErrors, ChainError, CheckRequest, RegistryError, SimulateRequest};
use kp_upkeep::{CheckResult, FailureReason, UpkeepKey, UpkeepState};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Results of a batch of checks. Items which failed are missing from
/// `results` and reported in `errors`.
#[derive(Debug)]
pub struct CheckedUpkeeps {
    pub results: Vec<CheckResult>,
    pub errors: BatchErrors,
}

impl CheckedUpkeeps {
    pub fn eligible(&self) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(|res| res.eligible())
    }
}

pub struct EligibilityChecker {
    index: Arc<UpkeepIndex>,
    head: Arc<HeadProvider>,
    mercury: Option<MercuryStage>,
}

impl EligibilityChecker {
    pub fn new(index: Arc<UpkeepIndex>, head: Arc<HeadProvider>, mercury: Option<MercuryStage>) -> Self {
        Self { index, head, mercury }
    }

    pub fn mercury(&self) -> Option<&MercuryStage> {
        self.mercury.as_ref()
    }

    /// Checks every key at its pinned block, or at the latest head for
    /// unpinned keys.
    ///
    /// Only a failure of a whole RPC batch is an error. Upkeeps known to be
    /// inactive are answered from the index without any call. Items whose
    /// check block hash cannot be fetched are moved to the batch errors.
    pub async fn check_upkeeps(&self, keys: &[UpkeepKey]) -> Result<CheckedUpkeeps, RegistryError> {
        let head = if keys.iter().any(|k| k.pinned_block().is_none()) { self.latest_head().await? } else { 0 };

        let mut skipped = Vec::new();
        let mut requests = Vec::with_capacity(keys.len());
        for key in keys {
            let block = key.pinned_block().unwrap_or(head);
            match self.index.entry(key.id()).await {
                Some(entry) if entry.state == UpkeepState::Inactive => {
                    skipped.push(CheckResult::ineligible(*key, block, entry.inactive_reason()))
                }
                _ => requests.push(CheckRequest { key: *key, block }),
            }
        }

        let (mut checked, mut errors) = if requests.is_empty() {
            (vec![], BatchErrors::new())
        } else {
            self.index.caller().check_upkeeps(&requests).await?
        };

        if let Some(mercury) = &self.mercury {
            mercury.lookup(&mut checked).await;
        }
        self.simulate(&mut checked).await?;
        let mut checked = self.fill_block_hashes(checked, &mut errors).await?;
        self.fill_execute_gas(&mut checked).await;

        let positions: HashMap<UpkeepKey, usize> = keys.iter().enumerate().rev().map(|(i, k)| (*k, i)).collect();
        let mut results: Vec<_> = skipped.into_iter().chain(checked).collect();
        results.sort_by_key(|res| positions.get(&res.key).copied().unwrap_or(usize::MAX));

        if !errors.is_empty() {
            tracing::debug!(failed = errors.len(), "Some upkeep checks failed: {errors}");
        }
        Ok(CheckedUpkeeps { results, errors })
    }

    async fn latest_head(&self) -> Result<u64, RegistryError> {
        match self.head.latest_block() {
            0 => Ok(self.index.caller().client().block_number().await?),
            head => Ok(head),
        }
    }

    /// Eligible results whose perform fails in simulation become ineligible.
    async fn simulate(&self, results: &mut [CheckResult]) -> Result<(), RegistryError> {
        let eligible: Vec<usize> = results.iter().enumerate().filter(|(_, r)| r.eligible()).map(|(i, _)| i).collect();
        if eligible.is_empty() {
            return Ok(());
        }
        let requests: Vec<_> = eligible
            .iter()
            .map(|&i| SimulateRequest {
                id: results[i].key.id(),
                perform_data: results[i].perform_data.clone(),
                block: results[i].check_block_number,
            })
            .collect();

        let simulations = self.index.caller().simulate_performs(&requests).await?;
        for (i, simulation) in eligible.into_iter().zip(simulations) {
            let res = &mut results[i];
            match simulation {
                Ok(true) => {}
                Ok(false) => res.set_ineligible(FailureReason::UpkeepNotNeeded),
                Err(e) => {
                    tracing::debug!(upkeep_id = %res.key.id(), "Perform simulation failed: {e:#}");
                    res.set_ineligible(FailureReason::UpkeepNotNeeded);
                }
            }
        }
        Ok(())
    }

    async fn fill_block_hashes(
        &self,
        results: Vec<CheckResult>,
        errors: &mut BatchErrors,
    ) -> Result<Vec<CheckResult>, RegistryError> {
        if results.is_empty() {
            return Ok(results);
        }
        let blocks: Vec<u64> = results.iter().map(|r| r.check_block_number).collect::<BTreeSet<_>>().into_iter().collect();
        let fetched = self.index.caller().client().block_hashes(blocks.clone()).await?;
        let hashes: HashMap<u64, Result<B256, ChainError>> = blocks.into_iter().zip(fetched).collect();

        let mut filled = Vec::with_capacity(results.len());
        for mut res in results {
            match hashes.get(&res.check_block_number) {
                Some(Ok(hash)) => {
                    res.check_block_hash = *hash;
                    filled.push(res);
                }
                Some(Err(e)) => errors.push(res.key.id(), e.clone().into()),
                None => errors.push(res.key.id(), ChainError::MissingBlock(res.check_block_number).into()),
            }
        }
        Ok(filled)
    }

    /// The gas limit of a perform comes from the upkeep config, fetched
    /// through the index when missing or expired.
    async fn fill_execute_gas(&self, results: &mut [CheckResult]) {
        for res in results.iter_mut().filter(|res| res.eligible()) {
            match self.index.get_upkeep_info(res.key.id(), Some(res.check_block_number), false).await {
                Ok(entry) => res.execute_gas = entry.info.perform_gas_limit,
                Err(e) => tracing::debug!(upkeep_id = %res.key.id(), "Failed to load upkeep gas limit: {e:#}"),
            }
        }
    }
}
