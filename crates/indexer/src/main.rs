use std::sync::Arc;

use chain_cache::{ChainCache, RedisCacheBackend};
use chain_rpc::AlloyUpstream;
use chain_store::PgStore;
use clap::Parser;
use indexer::{
    args::IndexerArgs,
    ingest::{self, IngestConfig},
    transport, Coordinator, QueryService,
};
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = IndexerArgs::parse();

    let store = PgStore::connect(&args.postgres_dsn(), args.db_max_connections).await?;
    let cache = ChainCache::new(RedisCacheBackend::connect(&args.redis_url())?);
    let upstream = AlloyUpstream::connect(&args.rpc_endpoint)?;

    let coordinator = Arc::new(Coordinator::new(store, cache, upstream));
    let query = Arc::new(QueryService::new(coordinator.clone()));

    let (shutdown_tx, _) = broadcast::channel(1);

    let ingest_task = tokio::spawn(ingest::run(
        coordinator,
        IngestConfig::default(),
        shutdown_tx.subscribe(),
    ));
    let mut http_task = tokio::spawn(transport::http::serve(
        args.http_addr,
        query.clone(),
        shutdown_tx.subscribe(),
    ));
    let mut grpc_task = tokio::spawn(transport::grpc::serve(
        args.grpc_addr,
        query,
        shutdown_tx.subscribe(),
    ));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        result = &mut http_task => {
            error!(?result, "http transport exited");
        }
        result = &mut grpc_task => {
            error!(?result, "grpc transport exited");
        }
    }

    let _ = shutdown_tx.send(());
    let _ = ingest_task.await;
    http_task.abort();
    grpc_task.abort();
    Ok(())
}
