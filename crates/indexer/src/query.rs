//! Query facade: input validation in front of the coordinator.
//!
//! Transports call these three operations and map the error taxonomy to
//! their own status codes; no transport reaches the coordinator directly.

use std::sync::{Arc, LazyLock};

use chain_cache::CacheBackend;
use chain_model::{Block, Transaction};
use chain_rpc::Upstream;
use chain_store::ChainStore;
use regex::Regex;

use crate::{coordinator::Coordinator, error::IndexerError};

/// Upper bound on the `latest` window.
pub const MAX_LATEST_LIMIT: usize = 1024;

static TX_HASH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("^0x[0-9A-Fa-f]{64}$").expect("transaction hash pattern is valid")
});

pub struct QueryService<S, B, U> {
    coordinator: Arc<Coordinator<S, B, U>>,
}

impl<S, B, U> QueryService<S, B, U>
where
    S: ChainStore,
    B: CacheBackend,
    U: Upstream,
{
    pub fn new(coordinator: Arc<Coordinator<S, B, U>>) -> Self {
        Self { coordinator }
    }

    /// The `limit` most recent blocks, newest first. Positions that could
    /// not be filled this cycle are `None`.
    pub async fn latest(&self, limit: usize) -> Result<Vec<Option<Block>>, IndexerError> {
        if limit > MAX_LATEST_LIMIT {
            return Err(IndexerError::InvalidInput("limit is invalid".to_string()));
        }
        self.coordinator.latest(limit).await
    }

    /// A single block with its transaction-hash projection populated.
    /// Heights above the current head are `NotFound` without an upstream
    /// call.
    pub async fn block(&self, num: u64) -> Result<Block, IndexerError> {
        let head = self.coordinator.head_number().await?;
        if num > head {
            return Err(IndexerError::NotFound);
        }
        let mut block = self
            .coordinator
            .block(num)
            .await?
            .ok_or(IndexerError::NotFound)?;
        block.project_tx_hashes();
        Ok(block)
    }

    /// A transaction with its logs.
    pub async fn transaction(&self, tx_hash: &str) -> Result<Transaction, IndexerError> {
        if !TX_HASH_RE.is_match(tx_hash) {
            return Err(IndexerError::InvalidInput("txHash is invalid".to_string()));
        }
        self.coordinator
            .transaction(tx_hash)
            .await?
            .ok_or(IndexerError::NotFound)
    }
}
