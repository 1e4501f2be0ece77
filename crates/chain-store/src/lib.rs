//! Durable storage gateway for blocks and transactions.
//!
//! Upsert is the only write shape: every non-key column is overwritten on
//! conflict (last-write-wins), and nothing is ever deleted. Reads distinguish
//! "row absent" (`Ok(None)` / empty vec) from transport failures; the gateway
//! itself never retries.

#![allow(clippy::missing_errors_doc)]

use std::future::Future;

use chain_model::{Block, Log, Transaction};
use thiserror::Error;

mod pg;

pub use pg::PgStore;

/// Errors surfaced by the store gateway. Absence is not an error; point
/// reads encode it as `Ok(None)`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("log column decode error: {0}")]
    LogDecode(#[from] serde_json::Error),
    #[error("integer column out of range: {0}")]
    OutOfRange(String),
}

/// Durable upsert and point/range reads over the two chain tables.
pub trait ChainStore: Send + Sync + 'static {
    /// Atomically upsert the given blocks and, in the same batch, every
    /// transaction they own. Last-write-wins on all non-key columns.
    fn upsert_blocks(
        &self,
        blocks: &[Block],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Point read of a block with its transaction-hash projection
    /// populated. Block position is not a persisted column, so the
    /// projection comes back in deterministic hash order, not block order.
    fn get_block(
        &self,
        num: u64,
    ) -> impl Future<Output = Result<Option<Block>, StoreError>> + Send;

    /// Point read of a transaction, logs included.
    fn get_transaction(
        &self,
        tx_hash: &str,
    ) -> impl Future<Output = Result<Option<Transaction>, StoreError>> + Send;

    /// Upsert a single transaction.
    fn upsert_transaction(
        &self,
        tx: &Transaction,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Overwrite only the serialized logs column of an existing transaction.
    fn update_transaction_logs(
        &self,
        tx_hash: &str,
        logs: &[Log],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Blocks with `from_num <= block_num <= to_num`, descending by number.
    /// Transactions are not hydrated.
    fn list_blocks(
        &self,
        from_num: u64,
        to_num: u64,
    ) -> impl Future<Output = Result<Vec<Block>, StoreError>> + Send;
}
