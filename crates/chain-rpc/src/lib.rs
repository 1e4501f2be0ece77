//! Thin adapter over an Ethereum JSON-RPC node.
//!
//! Exactly the four operations the read-through core needs, nothing more.
//! "Not found" is `Ok(None)`, distinct from transport failures; retry policy
//! belongs to the caller, never to this adapter.

#![allow(clippy::missing_errors_doc)]

use std::{future::Future, str::FromStr, sync::Arc};

use alloy::{
    primitives::B256,
    providers::{Provider, ProviderBuilder, RootProvider},
    transports::{RpcError as AlloyRpcError, TransportErrorKind},
};
use chain_model::{logs_from_receipt, Block, Log, Transaction};
use thiserror::Error;
use tracing::instrument;

/// Errors from the upstream adapter.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("invalid RPC endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
    #[error("invalid transaction hash: {0}")]
    InvalidHash(String),
    #[error("upstream transport error: {0}")]
    Transport(#[from] AlloyRpcError<TransportErrorKind>),
}

/// The four upstream operations the coordinator consumes.
pub trait Upstream: Send + Sync + 'static {
    /// Current chain head height.
    fn head_number(&self) -> impl Future<Output = Result<u64, RpcError>> + Send;

    /// Full block (with hydrated transactions) at a height.
    fn block_by_number(
        &self,
        number: u64,
    ) -> impl Future<Output = Result<Option<Block>, RpcError>> + Send;

    /// Transaction metadata by hash. Logs are not part of this shape; they
    /// come from the receipt.
    fn transaction_by_hash(
        &self,
        tx_hash: &str,
    ) -> impl Future<Output = Result<Option<Transaction>, RpcError>> + Send;

    /// Ordered logs from the transaction's receipt.
    fn receipt_logs(
        &self,
        tx_hash: &str,
    ) -> impl Future<Output = Result<Option<Vec<Log>>, RpcError>> + Send;
}

/// Upstream adapter over an alloy HTTP provider.
#[derive(Debug, Clone)]
pub struct AlloyUpstream {
    provider: Arc<RootProvider>,
}

impl AlloyUpstream {
    /// Connect to the node at `endpoint`.
    pub fn connect(endpoint: &str) -> Result<Self, RpcError> {
        let url = url::Url::parse(endpoint)?;
        let provider = ProviderBuilder::new().connect_http(url);
        Ok(Self {
            provider: Arc::new(provider.root().clone()),
        })
    }

    fn parse_hash(tx_hash: &str) -> Result<B256, RpcError> {
        B256::from_str(tx_hash).map_err(|_| RpcError::InvalidHash(tx_hash.to_string()))
    }
}

impl Upstream for AlloyUpstream {
    async fn head_number(&self) -> Result<u64, RpcError> {
        Ok(self.provider.get_block_number().await?)
    }

    #[instrument(skip(self), level = "debug")]
    async fn block_by_number(&self, number: u64) -> Result<Option<Block>, RpcError> {
        let block = self
            .provider
            .get_block_by_number(number.into())
            .full()
            .await?;
        Ok(block.map(|block| Block::from_rpc(&block)))
    }

    #[instrument(skip(self), level = "debug")]
    async fn transaction_by_hash(&self, tx_hash: &str) -> Result<Option<Transaction>, RpcError> {
        let hash = Self::parse_hash(tx_hash)?;
        let tx = self.provider.get_transaction_by_hash(hash).await?;
        Ok(tx.map(|tx| Transaction::from_rpc(&tx)))
    }

    #[instrument(skip(self), level = "debug")]
    async fn receipt_logs(&self, tx_hash: &str) -> Result<Option<Vec<Log>>, RpcError> {
        let hash = Self::parse_hash(tx_hash)?;
        let receipt = self.provider.get_transaction_receipt(hash).await?;
        Ok(receipt.map(|receipt| logs_from_receipt(&receipt)))
    }
}
