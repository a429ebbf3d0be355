//! Batched, block-pinned contract calls against one registry.

use crate::abi;
use crate::chain::{ChainClient, ContractCall};
use crate::error::{BatchErrors, ChainError, RegistryError};
use crate::version::{CallbackOutcome, RegistryVersion};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::{SolCall, SolType};
use kp_upkeep::{CheckResult, LogTriggerConfig, UpkeepId, UpkeepInfo, UpkeepKey};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryCallerConfig {
    /// Max `getUpkeep` calls sent in a single RPC batch.
    pub get_upkeep_batch_size: usize,
    /// Page size for `getActiveUpkeepIDs`.
    pub active_ids_batch_size: u64,
}

impl Default for RegistryCallerConfig {
    fn default() -> Self {
        Self { get_upkeep_batch_size: 10, active_ids_batch_size: 1000 }
    }
}

/// A `checkUpkeep` request pinned to `block`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRequest {
    pub key: UpkeepKey,
    pub block: u64,
}

/// A `simulatePerformUpkeep` request pinned to `block`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulateRequest {
    pub id: UpkeepId,
    pub perform_data: Bytes,
    pub block: u64,
}

#[derive(Clone)]
pub struct RegistryCaller {
    client: Arc<dyn ChainClient>,
    address: Address,
    version: RegistryVersion,
    config: RegistryCallerConfig,
}

fn info_from_abi(id: UpkeepId, info: abi::UpkeepInfo) -> UpkeepInfo {
    UpkeepInfo {
        id,
        target: info.target,
        perform_gas_limit: info.executeGas,
        check_data: info.checkData,
        balance: U256::from(info.balance),
        admin: info.admin,
        max_valid_block: info.maxValidBlocknumber,
        last_perform_block: info.lastPerformBlockNumber,
        amount_spent: U256::from(info.amountSpent),
        paused: info.paused,
        offchain_config: info.offchainConfig,
    }
}

impl RegistryCaller {
    pub fn new(
        client: Arc<dyn ChainClient>,
        address: Address,
        version: RegistryVersion,
        config: RegistryCallerConfig,
    ) -> Self {
        Self { client, address, version, config }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn version(&self) -> RegistryVersion {
        self.version
    }

    pub fn client(&self) -> &Arc<dyn ChainClient> {
        &self.client
    }

    fn call(&self, data: impl Into<Bytes>, block: Option<u64>) -> ContractCall {
        ContractCall::new(self.address, data, block)
    }

    fn decode_upkeep(id: UpkeepId, data: &[u8]) -> Result<UpkeepInfo, RegistryError> {
        let ret = abi::getUpkeepCall::abi_decode_returns(data, true).map_err(|e| RegistryError::decode("getUpkeep", e))?;
        Ok(info_from_abi(id, ret.upkeepInfo))
    }

    /// Fetches upkeep info in batches of `get_upkeep_batch_size`.
    ///
    /// Items which fail are reported in the returned [BatchErrors] and
    /// omitted from the infos.
    pub async fn get_upkeeps(
        &self,
        ids: &[UpkeepId],
        block: Option<u64>,
    ) -> Result<(Vec<UpkeepInfo>, BatchErrors), RegistryError> {
        let mut infos = Vec::with_capacity(ids.len());
        let mut errors = BatchErrors::new();

        for chunk in ids.chunks(self.config.get_upkeep_batch_size.max(1)) {
            let calls = chunk
                .iter()
                .map(|id| self.call(abi::getUpkeepCall { id: id.as_u256() }.abi_encode(), block))
                .collect();
            let results = self.client.batch_call(calls).await?;

            for (id, res) in chunk.iter().zip(results) {
                match res.map_err(RegistryError::from).and_then(|data| Self::decode_upkeep(*id, &data)) {
                    Ok(info) => infos.push(info),
                    Err(err) => errors.push(*id, err),
                }
            }
        }

        Ok((infos, errors))
    }

    pub async fn get_upkeep(&self, id: UpkeepId, block: Option<u64>) -> Result<UpkeepInfo, RegistryError> {
        let data = self.client.call(self.call(abi::getUpkeepCall { id: id.as_u256() }.abi_encode(), block)).await?;
        Self::decode_upkeep(id, &data)
    }

    /// Every id the registry reports as active.
    ///
    /// Reads the upkeep count from `getState`, then sends every
    /// `getActiveUpkeepIDs` page in a single batch.
    pub async fn get_active_upkeep_ids(&self, block: Option<u64>) -> Result<Vec<UpkeepId>, RegistryError> {
        let state = self.client.call(self.call(self.version.encode_get_state(), block)).await?;
        let count = self.version.decode_num_upkeeps(&state)?;
        let count = u64::try_from(count).map_err(|e| RegistryError::decode("getState", e))?;

        let page = self.config.active_ids_batch_size.max(1);
        let calls: Vec<_> = (0..count)
            .step_by(page as usize)
            .map(|start| {
                let call = abi::getActiveUpkeepIDsCall {
                    startIndex: U256::from(start),
                    maxCount: U256::from(page.min(count - start)),
                };
                self.call(call.abi_encode(), block)
            })
            .collect();

        let mut ids = Vec::with_capacity(count as usize);
        for res in self.client.batch_call(calls).await? {
            let data = res?;
            let ret = abi::getActiveUpkeepIDsCall::abi_decode_returns(&data, true)
                .map_err(|e| RegistryError::decode("getActiveUpkeepIDs", e))?;
            ids.extend(ret._0.into_iter().map(UpkeepId::from));
        }
        Ok(ids)
    }

    /// Sends every `checkUpkeep` in one RPC batch.
    ///
    /// Per-item failures land in [BatchErrors] and the item is omitted; only
    /// a failure of the batch as a whole is returned as an error.
    pub async fn check_upkeeps(
        &self,
        requests: &[CheckRequest],
    ) -> Result<(Vec<CheckResult>, BatchErrors), RegistryError> {
        let calls =
            requests.iter().map(|req| self.call(self.version.encode_check(req.key.id()), Some(req.block))).collect();
        let results = self.client.batch_call(calls).await?;

        let mut checks = Vec::with_capacity(requests.len());
        let mut errors = BatchErrors::new();
        for (req, res) in requests.iter().zip(results) {
            match res
                .map_err(RegistryError::from)
                .and_then(|data| self.version.decode_check(req.key, req.block, &data))
            {
                Ok(check) => checks.push(check),
                Err(err) => errors.push(req.key.id(), err),
            }
        }
        Ok((checks, errors))
    }

    /// Simulates every perform in one RPC batch. One result per request, in
    /// order.
    pub async fn simulate_performs(
        &self,
        requests: &[SimulateRequest],
    ) -> Result<Vec<Result<bool, RegistryError>>, RegistryError> {
        let calls = requests
            .iter()
            .map(|req| self.call(self.version.encode_simulate(req.id, req.perform_data.clone()), Some(req.block)))
            .collect();
        let results = self.client.batch_call(calls).await?;

        Ok(results
            .into_iter()
            .map(|res| res.map_err(RegistryError::from).and_then(|data| self.version.decode_simulate(&data)))
            .collect())
    }

    pub async fn callback(
        &self,
        id: UpkeepId,
        values: Vec<Bytes>,
        extra_data: Bytes,
        block: u64,
    ) -> Result<CallbackOutcome, RegistryError> {
        let data = self.client.call(self.call(self.version.encode_callback(id, values, extra_data), Some(block))).await?;
        self.version.decode_callback(&data)
    }

    /// Admin-controlled config of an upkeep. Only v2.1 registries store it.
    pub async fn privilege_config(&self, id: UpkeepId, block: Option<u64>) -> Result<Bytes, RegistryError> {
        if self.version != RegistryVersion::V2_1 {
            return Err(RegistryError::Unsupported { method: "getUpkeepPrivilegeConfig", version: self.version });
        }
        let call = abi::v2_1::getUpkeepPrivilegeConfigCall { upkeepId: id.as_u256() };
        let data = self.client.call(self.call(call.abi_encode(), block)).await?;
        abi::v2_1::getUpkeepPrivilegeConfigCall::abi_decode_returns(&data, true)
            .map(|ret| ret._0)
            .map_err(|e| RegistryError::decode("getUpkeepPrivilegeConfig", e))
    }

    pub async fn log_trigger_config(&self, id: UpkeepId, block: Option<u64>) -> Result<LogTriggerConfig, RegistryError> {
        if self.version != RegistryVersion::V2_1 {
            return Err(RegistryError::Unsupported { method: "getUpkeepTriggerConfig", version: self.version });
        }
        let call = abi::v2_1::getUpkeepTriggerConfigCall { upkeepId: id.as_u256() };
        let data = self.client.call(self.call(call.abi_encode(), block)).await?;
        let raw = abi::v2_1::getUpkeepTriggerConfigCall::abi_decode_returns(&data, true)
            .map_err(|e| RegistryError::decode("getUpkeepTriggerConfig", e))?
            ._0;
        let config = <abi::v2_1::LogTriggerConfig as SolType>::abi_decode_params(&raw, true)
            .map_err(|e| RegistryError::decode("log trigger config", e))?;

        Ok(LogTriggerConfig {
            contract_address: config.contractAddress,
            filter_selector: config.filterSelector,
            topic0: config.topic0,
            topic1: config.topic1,
            topic2: config.topic2,
            topic3: config.topic3,
        })
    }

    pub async fn transaction_input(&self, hash: B256) -> Result<Bytes, ChainError> {
        self.client.transaction_input(hash).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainClient;
    use alloy::sol_types::SolValue;
    use assert_matches::assert_matches;
    use kp_upkeep::FailureReason;

    const REGISTRY: Address = Address::repeat_byte(0x11);

    fn caller(client: MockChainClient, version: RegistryVersion) -> RegistryCaller {
        RegistryCaller::new(Arc::new(client), REGISTRY, version, RegistryCallerConfig::default())
    }

    fn upkeep_return(paused: bool) -> Bytes {
        let info = abi::UpkeepInfo {
            target: Address::repeat_byte(0x22),
            executeGas: 500_000,
            checkData: Bytes::from_static(&[1]),
            balance: Default::default(),
            admin: Address::repeat_byte(0x33),
            maxValidBlocknumber: u32::MAX as u64,
            lastPerformBlockNumber: 0,
            amountSpent: Default::default(),
            paused,
            offchainConfig: Bytes::new(),
        };
        (info,).abi_encode_params().into()
    }

    fn check_return(needed: bool, reason: u8) -> Bytes {
        (needed, Bytes::from_static(&[0xab]), U256::from(reason), U256::ZERO, U256::from(400_000u64), U256::ZERO, U256::ZERO)
            .abi_encode_params()
            .into()
    }

    #[tokio::test]
    async fn get_upkeeps_is_chunked() {
        let mut client = MockChainClient::new();
        client
            .expect_batch_call()
            .times(3)
            .returning(|calls| Ok(calls.iter().map(|_| Ok(upkeep_return(false))).collect()));

        let ids: Vec<UpkeepId> = (0..25u64).map(UpkeepId::from).collect();
        let (infos, errors) = caller(client, RegistryVersion::V2_1).get_upkeeps(&ids, Some(5)).await.unwrap();
        assert_eq!(infos.len(), 25);
        assert!(errors.is_empty());
        assert_eq!(infos[3].id, UpkeepId::from(3u64));
        assert_eq!(infos[3].perform_gas_limit, 500_000);
    }

    #[tokio::test]
    async fn check_upkeeps_isolates_item_errors() {
        let mut client = MockChainClient::new();
        client.expect_batch_call().times(1).returning(|calls| {
            assert!(calls.iter().all(|c| c.block == Some(10) && c.to == REGISTRY));
            Ok(vec![
                Ok(check_return(true, 0)),
                Err(ChainError::Rpc { code: -32000, message: "execution reverted".into(), data: None }),
                Ok(check_return(false, 4)),
            ])
        });

        let requests: Vec<_> =
            (1..=3u64).map(|id| CheckRequest { key: UpkeepKey::new(10, id), block: 10 }).collect();
        let (checks, errors) = caller(client, RegistryVersion::V2_1).check_upkeeps(&requests).await.unwrap();

        assert_eq!(checks.len(), 2);
        assert!(checks[0].eligible());
        assert_eq!(checks[1].failure_reason(), FailureReason::UpkeepNotNeeded);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.iter().next().map(|(id, _)| *id), Some(UpkeepId::from(2u64)));
    }

    #[tokio::test]
    async fn check_upkeeps_transport_failure_fails_batch() {
        let mut client = MockChainClient::new();
        client.expect_batch_call().returning(|_| Err(ChainError::Transport("connection refused".into())));

        let requests = vec![CheckRequest { key: UpkeepKey::new(10, 1u64), block: 10 }];
        assert_matches!(
            caller(client, RegistryVersion::V2_0).check_upkeeps(&requests).await,
            Err(RegistryError::Chain(ChainError::Transport(_)))
        );
    }

    #[tokio::test]
    async fn active_ids_are_paged() {
        let mut client = MockChainClient::new();
        client.expect_call().times(1).returning(|_| {
            let state = abi::v2_1::State {
                nonce: 0,
                ownerLinkBalance: Default::default(),
                expectedLinkBalance: U256::ZERO,
                totalPremium: Default::default(),
                numUpkeeps: U256::from(2500u64),
                configCount: 0,
                latestConfigBlockNumber: 0,
                latestConfigDigest: B256::ZERO,
                latestEpoch: 0,
                paused: false,
            };
            let config = abi::v2_1::OnchainConfig {
                paymentPremiumPPB: 0,
                flatFeeMicroLink: 0,
                checkGasLimit: 0,
                stalenessSeconds: Default::default(),
                gasCeilingMultiplier: 0,
                minUpkeepSpend: Default::default(),
                maxPerformGas: 0,
                maxCheckDataSize: 0,
                maxPerformDataSize: 0,
                maxRevertDataSize: 0,
                fallbackGasPrice: U256::ZERO,
                fallbackLinkPrice: U256::ZERO,
                transcoder: Address::ZERO,
                registrars: vec![],
                upkeepPrivilegeManager: Address::ZERO,
            };
            Ok((state, config, Vec::<Address>::new(), Vec::<Address>::new(), U256::from(1u8)).abi_encode_params().into())
        });
        client.expect_batch_call().times(1).returning(|calls| {
            assert_eq!(calls.len(), 3);
            Ok(calls
                .iter()
                .map(|call| {
                    let req = abi::getActiveUpkeepIDsCall::abi_decode(&call.data, true).unwrap();
                    let start = u64::try_from(req.startIndex).unwrap();
                    let count = u64::try_from(req.maxCount).unwrap();
                    let ids: Vec<U256> = (start..start + count).map(U256::from).collect();
                    Ok((ids,).abi_encode_params().into())
                })
                .collect())
        });

        let ids = caller(client, RegistryVersion::V2_1).get_active_upkeep_ids(None).await.unwrap();
        assert_eq!(ids.len(), 2500);
        assert_eq!(ids[2499], UpkeepId::from(2499u64));
    }

    #[tokio::test]
    async fn privilege_config_requires_v2_1() {
        let client = MockChainClient::new();
        assert_matches!(
            caller(client, RegistryVersion::V2_0).privilege_config(UpkeepId::from(1u64), None).await,
            Err(RegistryError::Unsupported { method: "getUpkeepPrivilegeConfig", .. })
        );
    }

    #[tokio::test]
    async fn callback_is_pinned_to_check_block() {
        let mut client = MockChainClient::new();
        client
            .expect_call()
            .withf(|call| call.block == Some(42) && call.data[..4] == abi::v2_1::checkCallbackCall::SELECTOR)
            .times(1)
            .returning(|_| Ok((true, Bytes::from_static(&[7]), U256::from(0u8), U256::from(5u64)).abi_encode_params().into()));

        let outcome = caller(client, RegistryVersion::V2_1)
            .callback(UpkeepId::from(1u64), vec![Bytes::from_static(&[1])], Bytes::new(), 42)
            .await
            .unwrap();
        assert!(outcome.upkeep_needed);
        assert_eq!(outcome.perform_data, Bytes::from_static(&[7]));
    }
}
