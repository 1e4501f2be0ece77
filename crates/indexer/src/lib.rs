//! Indexer and read-through cache for an Ethereum-compatible chain.
//!
//! The coordinator reconciles three layers of truth — upstream JSON-RPC,
//! the relational store, and the shared cache — under single-flight
//! advisory locks. The ingest loop continuously warms the same paths and
//! repairs the cache after chain reorganizations. Two transports (REST and
//! gRPC) front the query facade.

#![allow(clippy::missing_errors_doc)]

pub mod args;
pub mod coordinator;
pub mod error;
pub mod ingest;
pub mod query;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

pub use coordinator::Coordinator;
pub use error::IndexerError;
pub use query::QueryService;
