//! gRPC surface generated from `proto/chainindex.proto`.

use std::{net::SocketAddr, sync::Arc};

use chain_cache::CacheBackend;
use chain_model::{Block, Transaction};
use chain_rpc::Upstream;
use chain_store::ChainStore;
use tokio::sync::broadcast;
use tonic::{transport::Server, Request, Response, Status};
use tracing::{error, info};

use crate::{error::IndexerError, query::QueryService};

pub mod pb {
    tonic::include_proto!("chainindex.v1");
}

use pb::chain_index_server::{ChainIndex, ChainIndexServer};

/// Bind and serve until the shutdown channel fires.
pub async fn serve<S, B, U>(
    addr: SocketAddr,
    query: Arc<QueryService<S, B, U>>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), tonic::transport::Error>
where
    S: ChainStore,
    B: CacheBackend,
    U: Upstream,
{
    info!(%addr, "grpc transport listening");
    Server::builder()
        .add_service(ChainIndexServer::new(ChainIndexService::new(query)))
        .serve_with_shutdown(addr, async move {
            let _ = shutdown.recv().await;
        })
        .await
}

pub struct ChainIndexService<S, B, U> {
    query: Arc<QueryService<S, B, U>>,
}

impl<S, B, U> ChainIndexService<S, B, U> {
    pub fn new(query: Arc<QueryService<S, B, U>>) -> Self {
        Self { query }
    }
}

/// Map a facade error onto a gRPC status, with the not-found message the
/// method wants to expose.
fn status_for(err: IndexerError, not_found: &str) -> Status {
    match err {
        IndexerError::NotFound => Status::not_found(not_found),
        IndexerError::InvalidInput(text) => Status::invalid_argument(text),
        other => {
            error!(error = %other, "query failed");
            Status::internal("internal error")
        }
    }
}

/// List view of a block: header fields only.
fn pb_block_summary(block: &Block) -> pb::Block {
    pb::Block {
        block_num: block.block_num,
        block_hash: block.block_hash.clone(),
        block_time: block.block_time,
        parent_hash: block.parent_hash.clone(),
        transactions: Vec::new(),
    }
}

/// Detail view of a block: header fields plus the hash projection.
fn pb_block_detail(block: Block) -> pb::Block {
    pb::Block {
        block_num: block.block_num,
        block_hash: block.block_hash,
        block_time: block.block_time,
        parent_hash: block.parent_hash,
        transactions: block.tx_hashes,
    }
}

fn pb_transaction(tx: Transaction) -> pb::Transaction {
    pb::Transaction {
        tx_hash: tx.tx_hash,
        from_addr: tx.from_addr,
        to_addr: tx.to_addr,
        nonce: tx.nonce,
        data: tx.data,
        value: tx.value,
        logs: tx
            .logs
            .into_iter()
            .map(|log| pb::Log {
                index: log.index as u32,
                data: log.data,
            })
            .collect(),
    }
}

#[tonic::async_trait]
impl<S, B, U> ChainIndex for ChainIndexService<S, B, U>
where
    S: ChainStore,
    B: CacheBackend,
    U: Upstream,
{
    async fn list_latest_blocks(
        &self,
        request: Request<pb::ListLatestBlocksRequest>,
    ) -> Result<Response<pb::ListLatestBlocksResponse>, Status> {
        let limit = request.into_inner().limit as usize;
        let blocks = self
            .query
            .latest(limit)
            .await
            .map_err(|err| status_for(err, "block not found"))?;

        let blocks = blocks
            .iter()
            .flatten()
            .map(pb_block_summary)
            .collect();
        Ok(Response::new(pb::ListLatestBlocksResponse { blocks }))
    }

    async fn get_block(
        &self,
        request: Request<pb::GetBlockRequest>,
    ) -> Result<Response<pb::GetBlockResponse>, Status> {
        let num = request.into_inner().block_num;
        let block = self
            .query
            .block(num)
            .await
            .map_err(|err| status_for(err, "block not found"))?;
        Ok(Response::new(pb::GetBlockResponse {
            block: Some(pb_block_detail(block)),
        }))
    }

    async fn get_transaction(
        &self,
        request: Request<pb::GetTransactionRequest>,
    ) -> Result<Response<pb::GetTransactionResponse>, Status> {
        let tx_hash = request.into_inner().tx_hash;
        let tx = self
            .query
            .transaction(&tx_hash)
            .await
            .map_err(|err| status_for(err, "transaction not found"))?;
        Ok(Response::new(pb::GetTransactionResponse {
            tx: Some(pb_transaction(tx)),
        }))
    }
}
