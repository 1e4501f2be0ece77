//! Shared cache gateway.
//!
//! Three keyspaces over one backing cache, plus the advisory locks that make
//! read-through single-flight possible:
//!
//! ```ignore
//! block-number                   → latest head as decimal text (TTL 5 s)
//! block:{num}                    → serialized block (TTL 1 h)
//! blocks                         → sorted index, score = block number
//! transaction:{hash}             → serialized transaction (TTL 1 h)
//! retrieve-block-number-lock     → head-number advisory lock (TTL 3 s)
//! retrieve-block-lock:{num}      → per-block advisory lock (TTL 3 s)
//! transaction-lock:{hash}        → per-transaction advisory lock (TTL 3 s)
//! ```
//!
//! Locks are set-if-absent keys whose TTL is a deadline, not a mutex:
//! correctness comes from the double-checked cache read performed by the
//! lock holder, the TTL merely bounds how long a crashed holder can stall
//! other callers.
//!
//! Commands run through [`CacheBackend`] so tests exercise the exact same
//! gateway against [`memory::MemoryBackend`].

#![allow(clippy::missing_errors_doc)]

use std::{future::Future, time::Duration};

use chain_model::{Block, ModelError, Transaction};
use thiserror::Error;
use tracing::instrument;

pub mod memory;
mod redis_backend;

pub use redis_backend::RedisCacheBackend;

const HEAD_KEY: &str = "block-number";
const HEAD_LOCK_KEY: &str = "retrieve-block-number-lock";
const BLOCK_INDEX_KEY: &str = "blocks";
const BLOCK_KEY_PREFIX: &str = "block:";
const BLOCK_LOCK_PREFIX: &str = "retrieve-block-lock:";
const TX_KEY_PREFIX: &str = "transaction:";
const TX_LOCK_PREFIX: &str = "transaction-lock:";

const HEAD_TTL: Duration = Duration::from_secs(5);
const HEAD_LOCK_TTL: Duration = Duration::from_secs(3);
const BLOCK_TTL: Duration = Duration::from_secs(60 * 60);
const BLOCK_LOCK_TTL: Duration = Duration::from_secs(3);
const TX_TTL: Duration = Duration::from_secs(60 * 60);
const TX_LOCK_TTL: Duration = Duration::from_secs(3);

/// Errors surfaced by the cache gateway. A missing key is not an error.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(#[from] redis::RedisError),
    #[error("cached entry is corrupt: {0}")]
    Corrupt(#[from] ModelError),
    #[error("cached head number is not decimal: {0}")]
    BadHeadNumber(String),
    #[error("cache command task failed: {0}")]
    Task(String),
}

/// Minimal command set the gateway needs from the backing cache.
pub trait CacheBackend: Send + Sync + 'static {
    fn get(&self, key: String) -> impl Future<Output = Result<Option<String>, CacheError>> + Send;

    /// Plain SET with an expiry.
    fn set(
        &self,
        key: String,
        value: String,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;

    /// SET each pair with the same expiry, one round-trip.
    fn set_many(
        &self,
        entries: Vec<(String, String)>,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;

    /// SET-if-absent with an expiry. Returns whether the key was planted.
    fn set_nx(
        &self,
        key: String,
        value: String,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, CacheError>> + Send;

    fn del(&self, keys: Vec<String>) -> impl Future<Output = Result<(), CacheError>> + Send;

    /// Add members to a sorted set with their scores.
    fn zadd(
        &self,
        key: String,
        members: Vec<(u64, String)>,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;

    /// Members with `min <= score <= max`, in descending score order.
    fn zrevrangebyscore(
        &self,
        key: String,
        min: u64,
        max: u64,
    ) -> impl Future<Output = Result<Vec<String>, CacheError>> + Send;

    /// Remove every member with `min <= score <= max`.
    fn zremrangebyscore(
        &self,
        key: String,
        min: u64,
        max: u64,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;
}

/// Outcome of a transaction cache read. The sentinel written for hashes
/// upstream has confirmed unknown surfaces as `NotFound`, never as a hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxCacheEntry {
    Hit(Transaction),
    NotFound,
}

/// Typed cache operations over a [`CacheBackend`].
#[derive(Debug, Clone)]
pub struct ChainCache<B> {
    backend: B,
}

impl<B: CacheBackend> ChainCache<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    fn block_key(num: u64) -> String {
        format!("{BLOCK_KEY_PREFIX}{num}")
    }

    fn block_lock_key(num: u64) -> String {
        format!("{BLOCK_LOCK_PREFIX}{num}")
    }

    fn tx_key(tx_hash: &str) -> String {
        format!("{TX_KEY_PREFIX}{tx_hash}")
    }

    fn tx_lock_key(tx_hash: &str) -> String {
        format!("{TX_LOCK_PREFIX}{tx_hash}")
    }

    // --- head number ---

    pub async fn head_number(&self) -> Result<Option<u64>, CacheError> {
        match self.backend.get(HEAD_KEY.to_string()).await? {
            Some(raw) => raw
                .parse::<u64>()
                .map(Some)
                .map_err(|_| CacheError::BadHeadNumber(raw)),
            None => Ok(None),
        }
    }

    pub async fn set_head_number(&self, num: u64) -> Result<(), CacheError> {
        self.backend
            .set(HEAD_KEY.to_string(), num.to_string(), HEAD_TTL)
            .await
    }

    pub async fn lock_head(&self) -> Result<bool, CacheError> {
        self.backend
            .set_nx(HEAD_LOCK_KEY.to_string(), "1".to_string(), HEAD_LOCK_TTL)
            .await
    }

    pub async fn unlock_head(&self) -> Result<(), CacheError> {
        self.backend.del(vec![HEAD_LOCK_KEY.to_string()]).await
    }

    // --- blocks ---

    pub async fn block(&self, num: u64) -> Result<Option<Block>, CacheError> {
        match self.backend.get(Self::block_key(num)).await? {
            Some(raw) => Ok(Some(Block::from_cache_json(&raw)?)),
            None => Ok(None),
        }
    }

    /// Publish a single block under its per-number key. The sorted index is
    /// left alone; batch paths maintain it.
    pub async fn set_block(&self, block: &Block) -> Result<(), CacheError> {
        self.backend
            .set(
                Self::block_key(block.block_num),
                block.to_cache_json(),
                BLOCK_TTL,
            )
            .await
    }

    /// Publish blocks under their per-number keys and into the sorted index.
    #[instrument(skip_all, fields(count = blocks.len()))]
    pub async fn set_blocks(&self, blocks: &[Block]) -> Result<(), CacheError> {
        if blocks.is_empty() {
            return Ok(());
        }
        let entries: Vec<(String, String)> = blocks
            .iter()
            .map(|block| (Self::block_key(block.block_num), block.to_cache_json()))
            .collect();
        self.backend.set_many(entries, BLOCK_TTL).await?;

        let members: Vec<(u64, String)> = blocks
            .iter()
            .map(|block| (block.block_num, block.to_cache_json()))
            .collect();
        self.backend.zadd(BLOCK_INDEX_KEY.to_string(), members).await
    }

    /// Drop blocks from both the per-number keyspace and the sorted index.
    /// Index members are removed by score; the score is the block number, so
    /// this removes exactly the entry for each height regardless of which
    /// serialization wrote it.
    pub async fn del_blocks(&self, nums: &[u64]) -> Result<(), CacheError> {
        if nums.is_empty() {
            return Ok(());
        }
        let keys = nums.iter().map(|num| Self::block_key(*num)).collect();
        self.backend.del(keys).await?;
        for &num in nums {
            self.backend
                .zremrangebyscore(BLOCK_INDEX_KEY.to_string(), num, num)
                .await?;
        }
        Ok(())
    }

    /// Blocks with `from_num <= number <= to_num` from the sorted index,
    /// descending by number.
    pub async fn list_blocks(&self, from_num: u64, to_num: u64) -> Result<Vec<Block>, CacheError> {
        let raw = self
            .backend
            .zrevrangebyscore(BLOCK_INDEX_KEY.to_string(), from_num, to_num)
            .await?;
        raw.iter()
            .map(|member| Block::from_cache_json(member).map_err(CacheError::from))
            .collect()
    }

    /// Trim the sorted index below `floor`. The per-number keys expire on
    /// their own TTL; the index needs explicit pruning.
    pub async fn prune_block_index(&self, floor: u64) -> Result<(), CacheError> {
        if floor == 0 {
            return Ok(());
        }
        self.backend
            .zremrangebyscore(BLOCK_INDEX_KEY.to_string(), 0, floor - 1)
            .await
    }

    pub async fn lock_block(&self, num: u64) -> Result<bool, CacheError> {
        self.backend
            .set_nx(Self::block_lock_key(num), "1".to_string(), BLOCK_LOCK_TTL)
            .await
    }

    pub async fn unlock_block(&self, num: u64) -> Result<(), CacheError> {
        self.backend.del(vec![Self::block_lock_key(num)]).await
    }

    // --- transactions ---

    pub async fn transaction(&self, tx_hash: &str) -> Result<Option<TxCacheEntry>, CacheError> {
        match self.backend.get(Self::tx_key(tx_hash)).await? {
            Some(raw) => {
                let tx = Transaction::from_cache_json(&raw)?;
                if tx.is_negative_entry() {
                    Ok(Some(TxCacheEntry::NotFound))
                } else {
                    Ok(Some(TxCacheEntry::Hit(tx)))
                }
            }
            None => Ok(None),
        }
    }

    pub async fn set_transaction(&self, tx_hash: &str, tx: &Transaction) -> Result<(), CacheError> {
        self.backend
            .set(Self::tx_key(tx_hash), tx.to_cache_json(), TX_TTL)
            .await
    }

    /// Record that upstream has confirmed the hash unknown.
    pub async fn set_transaction_negative(&self, tx_hash: &str) -> Result<(), CacheError> {
        self.backend
            .set(
                Self::tx_key(tx_hash),
                Transaction::negative_entry().to_cache_json(),
                TX_TTL,
            )
            .await
    }

    pub async fn lock_transaction(&self, tx_hash: &str) -> Result<bool, CacheError> {
        self.backend
            .set_nx(Self::tx_lock_key(tx_hash), "1".to_string(), TX_LOCK_TTL)
            .await
    }

    pub async fn unlock_transaction(&self, tx_hash: &str) -> Result<(), CacheError> {
        self.backend.del(vec![Self::tx_lock_key(tx_hash)]).await
    }
}
