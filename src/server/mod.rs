//! Read-only HTTP API over the last published snapshot.
//!
//! Handlers never trigger a recomputation; they clone the snapshot `Arc`
//! and serialize it.

use std::{collections::BTreeMap, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use log::{error, info};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::worker::{
    aggregator::{SwapPairInfo, SyrupPoolInfo},
    Aggregator,
};

#[derive(Serialize)]
struct StatResponse<'a> {
    update_at: DateTime<Utc>,
    #[serde(rename = "24h_total_volume")]
    total_volume: f64,
    total_value_locked: f64,
    trade_pairs: &'a [SwapPairInfo],
    total_value_locked_all: f64,
}

#[derive(Serialize)]
struct PriceResponse<'a> {
    update_at: DateTime<Utc>,
    prices: &'a BTreeMap<String, f64>,
}

#[derive(Serialize)]
struct SyrupResponse<'a> {
    update_at: DateTime<Utc>,
    tvl: f64,
    pools: &'a [SyrupPoolInfo],
}

fn pretty_json<T: Serialize>(body: &T) -> Response {
    match serde_json::to_string_pretty(body) {
        Ok(json) => ([(header::CONTENT_TYPE, "application/json")], json).into_response(),
        Err(e) => {
            error!("Failed to encode response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        },
    }
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn stat(State(aggregator): State<Arc<Aggregator>>) -> Response {
    let snapshot = aggregator.snapshot();
    pretty_json(&StatResponse {
        update_at: snapshot.updated_at,
        total_volume: snapshot.total_volume,
        total_value_locked: snapshot.total_locked,
        trade_pairs: &snapshot.pairs,
        total_value_locked_all: snapshot.total_locked + snapshot.syrup_tvl,
    })
}

async fn price(State(aggregator): State<Arc<Aggregator>>) -> Response {
    let snapshot = aggregator.snapshot();
    pretty_json(&PriceResponse {
        update_at: snapshot.updated_at,
        prices: &snapshot.token_prices,
    })
}

async fn syrup(State(aggregator): State<Arc<Aggregator>>) -> Response {
    let snapshot = aggregator.snapshot();
    pretty_json(&SyrupResponse {
        update_at: snapshot.updated_at,
        tvl: snapshot.syrup_tvl,
        pools: &snapshot.syrup_pools,
    })
}

pub fn router(aggregator: Arc<Aggregator>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/stat", get(stat))
        .route("/api/v1/price", get(price))
        .route("/api/v1/syrup", get(syrup))
        .layer(CorsLayer::permissive())
        .with_state(aggregator)
}

/// Serves the API on `addr` until the token is cancelled.
pub async fn serve(
    addr: SocketAddr,
    aggregator: Arc<Aggregator>,
    cancellation_token: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP API listening on {}", addr);

    axum::serve(listener, router(aggregator))
        .with_graceful_shutdown(async move { cancellation_token.cancelled().await })
        .await
        .context("HTTP server failed")
}
