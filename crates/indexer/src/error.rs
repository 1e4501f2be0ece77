//! Error taxonomy visible to transport callers.

use chain_cache::CacheError;
use chain_rpc::RpcError;
use chain_store::StoreError;
use thiserror::Error;

/// Everything a query can fail with. Transports map `NotFound` to
/// 404/`NOT_FOUND`, `InvalidInput` to 400/`INVALID_ARGUMENT`, and the rest
/// to 500/`INTERNAL` after logging.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("not found")]
    NotFound,
    #[error("{0}")]
    InvalidInput(String),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("upstream error: {0}")]
    Upstream(#[from] RpcError),
}
