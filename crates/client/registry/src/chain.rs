//! Chain RPC boundary.

use crate::error::ChainError;
use alloy::eips::{BlockId, BlockNumberOrTag};
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{Provider, ProviderBuilder, ReqwestProvider};
use alloy::rpc::client::BatchRequest;
use alloy::rpc::types::TransactionRequest;
use alloy::transports::{RpcError, TransportErrorKind};
use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

/// A read-only contract call, optionally pinned to a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub to: Address,
    pub data: Bytes,
    /// `None` means latest.
    pub block: Option<u64>,
}

impl ContractCall {
    pub fn new(to: Address, data: impl Into<Bytes>, block: Option<u64>) -> Self {
        Self { to, data: data.into(), block }
    }
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn block_number(&self) -> Result<u64, ChainError>;

    /// Hashes of `blocks` in a single round trip, one inner result per block.
    async fn block_hashes(&self, blocks: Vec<u64>) -> Result<Vec<Result<B256, ChainError>>, ChainError>;

    async fn call(&self, call: ContractCall) -> Result<Bytes, ChainError>;

    /// Sends every call in a single round trip.
    ///
    /// The outer error means the whole batch is unusable. Otherwise there is
    /// exactly one inner result per call, in order.
    async fn batch_call(&self, calls: Vec<ContractCall>) -> Result<Vec<Result<Bytes, ChainError>>, ChainError>;

    /// Input data of a mined transaction.
    async fn transaction_input(&self, hash: B256) -> Result<Bytes, ChainError>;
}

impl From<RpcError<TransportErrorKind>> for ChainError {
    fn from(err: RpcError<TransportErrorKind>) -> Self {
        match err {
            RpcError::ErrorResp(payload) => ChainError::Rpc {
                code: payload.code,
                message: payload.message.to_string(),
                data: payload.try_data_as::<Bytes>().and_then(Result::ok),
            },
            other => ChainError::Transport(other.to_string()),
        }
    }
}

fn block_id(block: Option<u64>) -> BlockId {
    match block {
        Some(n) => BlockId::number(n),
        None => BlockId::latest(),
    }
}

fn call_params(call: &ContractCall) -> (TransactionRequest, BlockId) {
    (TransactionRequest::default().to(call.to).input(call.data.clone().into()), block_id(call.block))
}

#[derive(Debug, Deserialize)]
struct BlockHeaderHash {
    hash: B256,
}

#[derive(Debug, Deserialize)]
struct TransactionInput {
    input: Bytes,
}

/// [ChainClient] over an HTTP JSON-RPC endpoint.
#[derive(Clone)]
pub struct AlloyChainClient {
    provider: ReqwestProvider,
}

impl AlloyChainClient {
    pub fn new(url: Url) -> Self {
        Self { provider: ProviderBuilder::new().on_http(url) }
    }

    pub fn provider(&self) -> &ReqwestProvider {
        &self.provider
    }
}

#[async_trait]
impl ChainClient for AlloyChainClient {
    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn block_hashes(&self, blocks: Vec<u64>) -> Result<Vec<Result<B256, ChainError>>, ChainError> {
        if blocks.is_empty() {
            return Ok(vec![]);
        }

        let mut batch = BatchRequest::new(self.provider.client());
        let mut waiters = Vec::with_capacity(blocks.len());
        for block in &blocks {
            waiters.push(batch.add_call::<_, Option<BlockHeaderHash>>(
                "eth_getBlockByNumber",
                &(BlockNumberOrTag::Number(*block), false),
            )?);
        }
        batch.send().await?;

        let mut results = Vec::with_capacity(waiters.len());
        for (block, waiter) in blocks.into_iter().zip(waiters) {
            results.push(match waiter.await {
                Ok(Some(header)) => Ok(header.hash),
                Ok(None) => Err(ChainError::MissingBlock(block)),
                Err(e) => Err(e.into()),
            });
        }
        Ok(results)
    }

    async fn call(&self, call: ContractCall) -> Result<Bytes, ChainError> {
        Ok(self.provider.raw_request("eth_call".into(), call_params(&call)).await?)
    }

    async fn batch_call(&self, calls: Vec<ContractCall>) -> Result<Vec<Result<Bytes, ChainError>>, ChainError> {
        if calls.is_empty() {
            return Ok(vec![]);
        }

        let mut batch = BatchRequest::new(self.provider.client());
        let mut waiters = Vec::with_capacity(calls.len());
        for call in &calls {
            waiters.push(batch.add_call::<_, Bytes>("eth_call", &call_params(call))?);
        }
        batch.send().await?;

        let mut results = Vec::with_capacity(waiters.len());
        for waiter in waiters {
            results.push(waiter.await.map_err(ChainError::from));
        }
        Ok(results)
    }

    async fn transaction_input(&self, hash: B256) -> Result<Bytes, ChainError> {
        let tx: Option<TransactionInput> = self.provider.raw_request("eth_getTransactionByHash".into(), (hash,)).await?;
        tx.map(|tx| tx.input).ok_or(ChainError::MissingTransaction(hash))
    }
}
