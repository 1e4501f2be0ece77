//! Single-flight, three-tier read-through for head number, blocks, and
//! transactions.
//!
//! Every lookup follows the same shape:
//!
//! 1. **Fast path** — read the cache; a hit returns immediately.
//! 2. **Coordination** — on a miss, spin on the advisory lock for the key
//!    with a short jittered backoff. The lock's TTL bounds how long a dead
//!    holder can stall everyone else.
//! 3. **Double-check** — once the lock is held, re-read the cache. Another
//!    holder may have populated it during the spin; this re-read is what
//!    actually closes the stampede, not the lock itself.
//! 4. **Slow path** — consult the store (for keys that persist), then
//!    upstream. Publish whatever was learned before releasing the lock.
//!
//! The lock is released on every exit path; cancellation mid-flight leaves
//! it to expire on its TTL.

use std::{sync::Arc, time::Duration};

use chain_cache::{CacheBackend, ChainCache, TxCacheEntry};
use chain_model::{Block, Transaction};
use chain_rpc::Upstream;
use chain_store::ChainStore;
use metrics::counter;
use rand::Rng;
use tokio::{task::JoinSet, time::sleep};
use tracing::{debug, warn};

use crate::error::IndexerError;

const LOCK_RETRY_MIN_MS: u64 = 10;
const LOCK_RETRY_MAX_MS: u64 = 50;

fn lock_backoff() -> Duration {
    Duration::from_millis(rand::rng().random_range(LOCK_RETRY_MIN_MS..=LOCK_RETRY_MAX_MS))
}

/// Read-through coordinator over the three tiers of truth.
pub struct Coordinator<S, B, U> {
    store: S,
    cache: ChainCache<B>,
    upstream: U,
}

impl<S, B, U> Coordinator<S, B, U>
where
    S: ChainStore,
    B: CacheBackend,
    U: Upstream,
{
    pub fn new(store: S, cache: ChainCache<B>, upstream: U) -> Self {
        Self {
            store,
            cache,
            upstream,
        }
    }

    // --- head number ---

    /// Resolve the chain head through cache → lock → upstream. The head is
    /// never persisted; its freshness window is the cache TTL.
    pub async fn head_number(&self) -> Result<u64, IndexerError> {
        if let Some(head) = self.cache.head_number().await? {
            counter!("indexer_cache_hits_total", "key" => "head").increment(1);
            return Ok(head);
        }

        loop {
            if self.cache.lock_head().await? {
                break;
            }
            sleep(lock_backoff()).await;
        }
        let result = self.head_number_locked().await;
        if let Err(err) = self.cache.unlock_head().await {
            warn!(error = %err, "failed to release head-number lock");
        }
        result
    }

    async fn head_number_locked(&self) -> Result<u64, IndexerError> {
        if let Some(head) = self.cache.head_number().await? {
            return Ok(head);
        }
        let head = self.upstream.head_number().await?;
        counter!("indexer_upstream_fetches_total", "kind" => "head").increment(1);
        self.cache.set_head_number(head).await?;
        Ok(head)
    }

    /// Fetch the head from upstream and overwrite the cache slot, stale TTL
    /// value or not. The ingest loop calls this once per tick.
    pub async fn refresh_head(&self) -> Result<u64, IndexerError> {
        let head = self.upstream.head_number().await?;
        self.cache.set_head_number(head).await?;
        Ok(head)
    }

    // --- blocks ---

    /// Read-through for a single block. Fresh fetches are upserted to the
    /// store and indexed before returning.
    pub async fn block(&self, num: u64) -> Result<Option<Block>, IndexerError> {
        let Some((block, fresh)) = self.retrieve_block(num).await? else {
            return Ok(None);
        };
        if fresh {
            self.store
                .upsert_blocks(std::slice::from_ref(&block))
                .await?;
            self.cache.set_blocks(std::slice::from_ref(&block)).await?;
        }
        Ok(Some(block))
    }

    /// Cache → lock → double-check → store → upstream for one block.
    /// Returns the block and whether it came fresh from upstream. Fresh
    /// blocks are published under their per-number key here; batching the
    /// store upsert and index insert is the caller's business.
    pub(crate) async fn retrieve_block(
        &self,
        num: u64,
    ) -> Result<Option<(Block, bool)>, IndexerError> {
        if let Some(block) = self.cache.block(num).await? {
            counter!("indexer_cache_hits_total", "key" => "block").increment(1);
            return Ok(Some((block, false)));
        }

        loop {
            if self.cache.lock_block(num).await? {
                break;
            }
            sleep(lock_backoff()).await;
        }
        let result = self.retrieve_block_locked(num).await;
        if let Err(err) = self.cache.unlock_block(num).await {
            warn!(num, error = %err, "failed to release block lock");
        }
        result
    }

    async fn retrieve_block_locked(&self, num: u64) -> Result<Option<(Block, bool)>, IndexerError> {
        if let Some(block) = self.cache.block(num).await? {
            return Ok(Some((block, false)));
        }

        if let Some(block) = self.store.get_block(num).await? {
            self.cache.set_block(&block).await?;
            return Ok(Some((block, false)));
        }

        let Some(block) = self.upstream.block_by_number(num).await? else {
            // no sentinel for blocks; absence is expected near the head
            return Ok(None);
        };
        counter!("indexer_upstream_fetches_total", "kind" => "block").increment(1);
        self.cache.set_block(&block).await?;
        Ok(Some((block, true)))
    }

    /// The `latest(n)` window fill. Returns newest-first with `None` holes
    /// where a block could not be fetched this cycle.
    pub async fn latest(self: &Arc<Self>, limit: usize) -> Result<Vec<Option<Block>>, IndexerError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let head = self.head_number().await?;
        let from = head.saturating_sub(limit as u64 - 1);
        // clamped at genesis the window may be narrower than the limit
        let window = (head - from + 1) as usize;

        let mut results: Vec<Option<Block>> = vec![None; limit];

        let cached = self.cache.list_blocks(from, head).await?;
        if cached.len() == window {
            counter!("indexer_cache_hits_total", "key" => "window").increment(1);
            for (slot, block) in results.iter_mut().zip(cached) {
                *slot = Some(block);
            }
            return Ok(results);
        }

        let saved = self.store.list_blocks(from, head).await?;
        if saved.len() == window {
            for (slot, block) in results.iter_mut().zip(saved) {
                *slot = Some(block);
            }
            return Ok(results);
        }

        let mut fetch: JoinSet<(u64, Result<Option<(Block, bool)>, IndexerError>)> = JoinSet::new();
        let mut saved_iter = saved.into_iter().peekable();
        for num in (from..=head).rev() {
            if saved_iter
                .peek()
                .is_some_and(|block| block.block_num == num)
            {
                results[(head - num) as usize] = saved_iter.next();
                continue;
            }
            let coordinator = Arc::clone(self);
            fetch.spawn(async move { (num, coordinator.retrieve_block(num).await) });
        }

        let mut fresh = Vec::new();
        while let Some(joined) = fetch.join_next().await {
            match joined {
                Ok((num, Ok(Some((block, is_new))))) => {
                    if is_new {
                        fresh.push(block.clone());
                    }
                    results[(head - num) as usize] = Some(block);
                }
                Ok((num, Ok(None))) => {
                    debug!(num, "block absent upstream during window fill");
                }
                Ok((num, Err(err))) => {
                    warn!(num, error = %err, "window block fetch failed");
                }
                Err(err) => {
                    warn!(error = %err, "window block fetch task aborted");
                }
            }
        }

        if !fresh.is_empty() {
            self.store.upsert_blocks(&fresh).await?;
            self.cache.set_blocks(&fresh).await?;
            counter!("indexer_blocks_indexed_total").increment(fresh.len() as u64);
        }
        Ok(results)
    }

    /// Drop the cache entries (per-number keys and index members) for the
    /// given heights. Used by reorg repair; racing readers simply miss and
    /// re-fetch.
    pub async fn invalidate_blocks(&self, nums: &[u64]) -> Result<(), IndexerError> {
        self.cache.del_blocks(nums).await?;
        Ok(())
    }

    /// Trim the sorted block index to the retention window below `head`.
    pub async fn prune_index(&self, head: u64, retention: u64) -> Result<(), IndexerError> {
        self.cache
            .prune_block_index(head.saturating_sub(retention))
            .await?;
        Ok(())
    }

    // --- transactions ---

    /// Read-through for a transaction, logs included. A cached negative
    /// entry and a confirmed upstream miss both come back as `None`.
    pub async fn transaction(&self, tx_hash: &str) -> Result<Option<Transaction>, IndexerError> {
        match self.cache.transaction(tx_hash).await? {
            Some(TxCacheEntry::Hit(tx)) => {
                counter!("indexer_cache_hits_total", "key" => "transaction").increment(1);
                return Ok(Some(tx));
            }
            Some(TxCacheEntry::NotFound) => {
                counter!("indexer_negative_hits_total").increment(1);
                return Ok(None);
            }
            None => {}
        }

        loop {
            if self.cache.lock_transaction(tx_hash).await? {
                break;
            }
            sleep(lock_backoff()).await;
        }
        let result = self.transaction_locked(tx_hash).await;
        if let Err(err) = self.cache.unlock_transaction(tx_hash).await {
            warn!(tx_hash, error = %err, "failed to release transaction lock");
        }
        result
    }

    async fn transaction_locked(&self, tx_hash: &str) -> Result<Option<Transaction>, IndexerError> {
        match self.cache.transaction(tx_hash).await? {
            Some(TxCacheEntry::Hit(tx)) => return Ok(Some(tx)),
            Some(TxCacheEntry::NotFound) => return Ok(None),
            None => {}
        }

        let mut tx = match self.store.get_transaction(tx_hash).await? {
            Some(tx) => tx,
            None => {
                let Some(tx) = self.upstream.transaction_by_hash(tx_hash).await? else {
                    counter!("indexer_negative_entries_total").increment(1);
                    self.cache.set_transaction_negative(tx_hash).await?;
                    return Ok(None);
                };
                counter!("indexer_upstream_fetches_total", "kind" => "transaction").increment(1);
                // the transactions table references blocks(block_num); the
                // containing block must land before the transaction row
                if self.block(tx.block_num).await?.is_some() {
                    self.store.upsert_transaction(&tx).await?;
                } else {
                    debug!(
                        tx_hash,
                        block_num = tx.block_num,
                        "containing block absent upstream, transaction not persisted"
                    );
                }
                tx
            }
        };

        // logs live in the receipt; a transaction without any is one we have
        // not resolved yet (or one that is still pending and has no receipt)
        if tx.logs.is_empty() {
            if let Some(logs) = self.upstream.receipt_logs(tx_hash).await? {
                tx.logs = logs;
                self.store
                    .update_transaction_logs(tx_hash, &tx.logs)
                    .await?;
            }
        }

        self.cache.set_transaction(tx_hash, &tx).await?;
        Ok(Some(tx))
    }
}
