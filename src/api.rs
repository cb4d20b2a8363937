//! Read-only HTTP API
//!
//! - GET /health - Liveness plus a database round-trip
//! - GET /metrics - Prometheus metrics
//! - GET /stats - Latency and volume of matched deposits, pending count, chain freshness
//! - GET /deposits/matched?page=N - Matched L1/L2 pairs, newest first
//! - GET /deposits/unmatched?page=N - L1 deposits still waiting for L2
//! - GET /chart-data?limit=N - Latency time series
//! - GET /pointers - Scan progress

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use eyre::WrapErr;
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::db::{self, BlockPointer};
use crate::hash::bytes_to_hex;
use crate::metrics;
use crate::types::DepositEventKind;

/// Rows per page of the deposit listings
pub const ITEMS_PER_PAGE: i64 = 10;
/// Points returned by /chart-data without a `limit`
pub const DEFAULT_CHART_LIMIT: i64 = 30;

/// Database failure surfaced as a 500
pub struct ApiError(eyre::Report);

impl From<eyre::Report> for ApiError {
    fn from(err: eyre::Report) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self.0, "API request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_matched: i64,
    pub avg_time_diff: f64,
    pub min_time_diff: f64,
    pub max_time_diff: f64,
    pub total_bridged_eth: f64,
    pub pending_deposits: i64,
    pub latest_l1_block: i64,
    pub latest_l2_block: i64,
    /// Seconds since the newest stored L1 block
    pub l1_time_since: f64,
    /// Seconds since the newest stored L2 block
    pub l2_time_since: f64,
}

#[derive(Debug, Serialize)]
pub struct MatchedDepositView {
    pub id: i64,
    pub from_address: String,
    pub to_address: String,
    pub amount: f64,
    pub l1_block_number: i64,
    pub l2_block_number: i64,
    pub l1_timestamp: String,
    pub l2_timestamp: String,
    pub time_diff_seconds: i64,
    pub tx_hash_l1: String,
    pub tx_hash_l2: String,
}

#[derive(Debug, Serialize)]
pub struct UnmatchedDepositView {
    pub id: i64,
    pub from_address: String,
    pub to_address: String,
    pub amount: f64,
    pub block_number: i64,
    pub timestamp: String,
    /// Seconds the deposit has been waiting
    pub pending_seconds: i64,
    pub tx_hash: String,
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub total_pages: i64,
    pub total: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartPoint {
    pub timestamp: String,
    pub time_diff_seconds: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChartQuery {
    pub limit: Option<String>,
}

/// Positive integer from a query value; anything else falls back to `default`
fn positive_or(value: Option<&str>, default: i64) -> i64 {
    value
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

/// Row offset of a 1-based page; saturates instead of overflowing
fn page_offset(page: i64) -> i64 {
    (page - 1).saturating_mul(ITEMS_PER_PAGE)
}

fn total_pages(total: i64) -> i64 {
    (total + ITEMS_PER_PAGE - 1) / ITEMS_PER_PAGE
}

fn format_timestamp(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_default()
}

/// Build the API router
pub fn router(db: SqlitePool) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .route("/stats", get(stats))
        .route("/deposits/matched", get(matched_deposits))
        .route("/deposits/unmatched", get(unmatched_deposits))
        .route("/chart-data", get(chart_data))
        .route("/pointers", get(pointers))
        .with_state(db)
}

/// Start the API server
pub async fn start_api_server(addr: SocketAddr, db: SqlitePool) -> eyre::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("Failed to bind API server to {}", addr))?;
    tracing::info!(%addr, "API server started");

    metrics::UP.set(1.0);

    axum::serve(listener, router(db)).await?;
    Ok(())
}

/// Resolve once the spawned API server stops, with the reason it stopped.
///
/// Never resolves when no server was started. The server only returns on
/// failure, so a clean exit is reported as an error too.
pub async fn server_exit(task: &mut Option<JoinHandle<eyre::Result<()>>>) -> eyre::Report {
    match task {
        Some(handle) => match handle.await {
            Ok(Ok(())) => eyre::eyre!("API server stopped unexpectedly"),
            Ok(Err(e)) => e,
            Err(e) => eyre::eyre!("API server task failed: {}", e),
        },
        None => std::future::pending().await,
    }
}

async fn health(State(db): State<SqlitePool>) -> Response {
    match sqlx::query("SELECT 1").execute(&db).await {
        Ok(_) => Json(HealthResponse {
            status: "ok".to_string(),
        })
        .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "database unavailable".to_string(),
                }),
            )
                .into_response()
        }
    }
}

async fn prometheus_metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response();
    }

    ([(header::CONTENT_TYPE, encoder.format_type().to_string())], buffer).into_response()
}

async fn stats(State(db): State<SqlitePool>) -> ApiResult<StatsResponse> {
    let stats = db::get_match_stats(&db).await?;
    let pending_deposits = db::count_unmatched_deposits(&db).await?;
    let latest_l1 = db::get_latest_block(&db, DepositEventKind::EthDepositInitiated)
        .await?
        .unwrap_or(db::LatestBlock {
            block_number: 0,
            block_timestamp: 0,
        });
    let latest_l2 = db::get_latest_block(&db, DepositEventKind::DepositFinalized)
        .await?
        .unwrap_or(db::LatestBlock {
            block_number: 0,
            block_timestamp: 0,
        });

    let now = Utc::now().timestamp();

    Ok(Json(StatsResponse {
        total_matched: stats.total_matched,
        avg_time_diff: stats.avg_time_diff.unwrap_or_default(),
        min_time_diff: stats.min_time_diff.unwrap_or_default(),
        max_time_diff: stats.max_time_diff.unwrap_or_default(),
        total_bridged_eth: stats.total_bridged_eth.unwrap_or_default(),
        pending_deposits,
        latest_l1_block: latest_l1.block_number,
        latest_l2_block: latest_l2.block_number,
        l1_time_since: (now - latest_l1.block_timestamp) as f64,
        l2_time_since: (now - latest_l2.block_timestamp) as f64,
    }))
}

async fn matched_deposits(
    State(db): State<SqlitePool>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Page<MatchedDepositView>> {
    let page = positive_or(query.page.as_deref(), 1);
    let rows = db::get_matched_deposits(&db, ITEMS_PER_PAGE, page_offset(page)).await?;
    let total = db::count_matched_deposits(&db).await?;

    let items = rows
        .into_iter()
        .map(|row| MatchedDepositView {
            id: row.id,
            from_address: bytes_to_hex(&row.from_address),
            to_address: bytes_to_hex(&row.to_address),
            amount: row.amount,
            l1_block_number: row.l1_block_number,
            l2_block_number: row.l2_block_number,
            l1_timestamp: format_timestamp(row.l1_timestamp),
            l2_timestamp: format_timestamp(row.l2_timestamp),
            time_diff_seconds: row.time_diff_seconds,
            tx_hash_l1: bytes_to_hex(&row.tx_hash_l1),
            tx_hash_l2: bytes_to_hex(&row.tx_hash_l2),
        })
        .collect();

    Ok(Json(Page {
        items,
        page,
        total_pages: total_pages(total),
        total,
    }))
}

async fn unmatched_deposits(
    State(db): State<SqlitePool>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Page<UnmatchedDepositView>> {
    let page = positive_or(query.page.as_deref(), 1);
    let rows = db::get_unmatched_deposits(&db, ITEMS_PER_PAGE, page_offset(page)).await?;
    let total = db::count_unmatched_deposits(&db).await?;
    let now = Utc::now().timestamp();

    let items = rows
        .into_iter()
        .map(|row| UnmatchedDepositView {
            id: row.id,
            from_address: bytes_to_hex(&row.from_address),
            to_address: bytes_to_hex(&row.to_address),
            amount: row.amount,
            block_number: row.block_number,
            timestamp: format_timestamp(row.block_timestamp),
            pending_seconds: now - row.block_timestamp,
            tx_hash: bytes_to_hex(&row.tx_hash),
        })
        .collect();

    Ok(Json(Page {
        items,
        page,
        total_pages: total_pages(total),
        total,
    }))
}

async fn chart_data(
    State(db): State<SqlitePool>,
    Query(query): Query<ChartQuery>,
) -> ApiResult<Vec<ChartPoint>> {
    let limit = positive_or(query.limit.as_deref(), DEFAULT_CHART_LIMIT);
    let points = db::get_latency_series(&db, limit).await?;

    Ok(Json(
        points
            .into_iter()
            .map(|p| ChartPoint {
                timestamp: format_timestamp(p.timestamp),
                time_diff_seconds: p.time_diff_seconds,
            })
            .collect(),
    ))
}

async fn pointers(State(db): State<SqlitePool>) -> ApiResult<Vec<BlockPointer>> {
    Ok(Json(db::list_block_pointers(&db).await?))
}
