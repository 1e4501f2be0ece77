//! REST surface.
//!
//! ```ignore
//! GET /blocks?limit=N          → {"blocks": [...]}
//! GET /blocks/{id}             → block with transaction hashes
//! GET /transaction/{tx_hash}   → transaction with logs
//! ```
//!
//! Invalid input is 400 with a `{"message": ...}` body, unknown entities
//! are 404, anything else is a bare 500.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chain_cache::CacheBackend;
use chain_rpc::Upstream;
use chain_store::ChainStore;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::{error::IndexerError, query::QueryService};

/// Bind and serve until the shutdown channel fires.
pub async fn serve<S, B, U>(
    addr: SocketAddr,
    query: Arc<QueryService<S, B, U>>,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()>
where
    S: ChainStore,
    B: CacheBackend,
    U: Upstream,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "http transport listening");
    axum::serve(listener, router(query))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}

pub fn router<S, B, U>(query: Arc<QueryService<S, B, U>>) -> Router
where
    S: ChainStore,
    B: CacheBackend,
    U: Upstream,
{
    Router::new()
        .route("/blocks", get(list_blocks::<S, B, U>))
        .route("/blocks/{id}", get(get_block::<S, B, U>))
        .route("/transaction/{tx_hash}", get(get_transaction::<S, B, U>))
        .with_state(query)
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<String>,
}

fn message(status: StatusCode, text: &str) -> Response {
    (status, Json(json!({ "message": text }))).into_response()
}

fn internal(err: &IndexerError) -> Response {
    error!(error = %err, "query failed");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

async fn list_blocks<S, B, U>(
    State(query): State<Arc<QueryService<S, B, U>>>,
    Query(params): Query<ListParams>,
) -> Response
where
    S: ChainStore,
    B: CacheBackend,
    U: Upstream,
{
    let raw = params.limit.unwrap_or_else(|| "1".to_string());
    let Ok(limit) = raw.parse::<i64>() else {
        return message(StatusCode::BAD_REQUEST, "limit is not a number");
    };
    if limit < 0 {
        return message(StatusCode::BAD_REQUEST, "limit is invalid");
    }

    match query.latest(limit as usize).await {
        Ok(blocks) => (StatusCode::OK, Json(json!({ "blocks": blocks }))).into_response(),
        Err(IndexerError::InvalidInput(text)) => message(StatusCode::BAD_REQUEST, &text),
        Err(err) => internal(&err),
    }
}

async fn get_block<S, B, U>(
    State(query): State<Arc<QueryService<S, B, U>>>,
    Path(id): Path<String>,
) -> Response
where
    S: ChainStore,
    B: CacheBackend,
    U: Upstream,
{
    let Ok(num) = id.parse::<u64>() else {
        return message(StatusCode::BAD_REQUEST, "id is invalid");
    };

    match query.block(num).await {
        Ok(block) => (StatusCode::OK, Json(block)).into_response(),
        Err(IndexerError::NotFound) => message(StatusCode::NOT_FOUND, "block not found"),
        Err(err) => internal(&err),
    }
}

async fn get_transaction<S, B, U>(
    State(query): State<Arc<QueryService<S, B, U>>>,
    Path(tx_hash): Path<String>,
) -> Response
where
    S: ChainStore,
    B: CacheBackend,
    U: Upstream,
{
    match query.transaction(&tx_hash).await {
        Ok(tx) => (StatusCode::OK, Json(tx)).into_response(),
        Err(IndexerError::NotFound) => message(StatusCode::NOT_FOUND, "txHash not found"),
        Err(IndexerError::InvalidInput(text)) => message(StatusCode::BAD_REQUEST, &text),
        Err(err) => internal(&err),
    }
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    use super::*;
    use crate::testutil::{chain, harness, transaction, tx_hash, FakeUpstream, Harness};

    fn test_router(h: &Harness) -> Router {
        router(Arc::new(crate::QueryService::new(h.coordinator.clone())))
    }

    async fn get_json(
        router: Router,
        uri: &str,
    ) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    #[tokio::test]
    async fn list_blocks_returns_newest_first() {
        let h = harness(FakeUpstream::with_chain(100, chain(90, 100)));

        let (status, body) = get_json(test_router(&h), "/blocks?limit=2").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["blocks"][0]["block_num"], 100);
        assert_eq!(body["blocks"][1]["block_num"], 99);
    }

    #[tokio::test]
    async fn list_blocks_defaults_to_one() {
        let h = harness(FakeUpstream::with_chain(100, chain(90, 100)));

        let (status, body) = get_json(test_router(&h), "/blocks").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["blocks"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn non_numeric_limit_is_rejected() {
        let h = harness(FakeUpstream::with_chain(100, chain(90, 100)));

        let (status, body) = get_json(test_router(&h), "/blocks?limit=abc").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "limit is not a number");
    }

    #[tokio::test]
    async fn out_of_range_limits_are_rejected() {
        let h = harness(FakeUpstream::with_chain(100, chain(90, 100)));

        let (status, body) = get_json(test_router(&h), "/blocks?limit=-1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "limit is invalid");

        let (status, body) = get_json(test_router(&h), "/blocks?limit=2000").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "limit is invalid");
    }

    #[tokio::test]
    async fn block_detail_includes_transaction_hashes() {
        let hash = tx_hash(0x21);
        let mut blocks = chain(90, 100);
        blocks[5].transactions = vec![transaction(&hash, 95)];
        blocks[5].tx_hashes = vec![hash.clone()];
        let h = harness(FakeUpstream::with_chain(100, blocks));

        let (status, body) = get_json(test_router(&h), "/blocks/95").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["block_num"], 95);
        assert_eq!(body["transactions"][0], hash);
    }

    #[tokio::test]
    async fn block_above_head_is_404() {
        let h = harness(FakeUpstream::with_chain(100, chain(90, 100)));

        let (status, body) = get_json(test_router(&h), "/blocks/5000").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "block not found");
    }

    #[tokio::test]
    async fn malformed_block_id_is_400() {
        let h = harness(FakeUpstream::with_chain(100, chain(90, 100)));

        let (status, body) = get_json(test_router(&h), "/blocks/-3").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "id is invalid");
    }

    #[tokio::test]
    async fn transaction_endpoint_validates_and_resolves() {
        let upstream = FakeUpstream::with_chain(100, chain(90, 100));
        let hash = tx_hash(0x31);
        upstream.add_transaction(
            transaction(&hash, 93),
            Some(vec![chain_model::Log { index: 0, data: "0x0b".into() }]),
        );
        let h = harness(upstream);

        let (status, body) = get_json(test_router(&h), "/transaction/nothash").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "txHash is invalid");

        let (status, body) = get_json(test_router(&h), &format!("/transaction/{}", tx_hash(0x99))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "txHash not found");

        let (status, body) = get_json(test_router(&h), &format!("/transaction/{hash}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tx_hash"], hash);
        assert_eq!(body["logs"][0]["index"], 0);
    }
}
