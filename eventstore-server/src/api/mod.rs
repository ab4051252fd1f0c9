//! HTTP API endpoints

use crate::protocol::{
    DebugParams, DebugResponse, ErrorResponse, EventsRequest, HealthResponse, IngestResponse,
};
use axum::{
    extract::{rejection::JsonRejection, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use eventstore_core::{EventStore, EventStoreError, QueryRequest, QueryResponse};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Request counters, exported on `/metrics`
#[derive(Debug, Default)]
pub struct RequestMetrics {
    requests: AtomicU64,
    client_errors: AtomicU64,
    server_errors: AtomicU64,
    duration_micros: AtomicU64,
}

impl RequestMetrics {
    fn record(&self, status: StatusCode, elapsed_micros: u64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.duration_micros.fetch_add(elapsed_micros, Ordering::Relaxed);
        if status.is_client_error() {
            self.client_errors.fetch_add(1, Ordering::Relaxed);
        } else if status.is_server_error() {
            self.server_errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<EventStore>,
    pub metrics: Arc<RequestMetrics>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

impl From<EventStoreError> for ErrorResponse {
    fn from(e: EventStoreError) -> Self {
        ErrorResponse {
            error: e.to_string(),
        }
    }
}

/// Create the API router
pub fn create_router(store: Arc<EventStore>) -> Router {
    let state = AppState {
        store,
        metrics: Arc::new(RequestMetrics::default()),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(health))
        .route("/ping", get(ping))

        // Ingestion and queries
        .route("/events", post(post_events))
        .route("/query", post(query))

        // Test support
        .route("/debug", post(debug))

        // Stats
        .route("/stats", get(stats))
        .route("/metrics", get(metrics))

        .layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn track_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let start = Instant::now();
    let response = next.run(request).await;
    let elapsed = start.elapsed().as_micros() as u64;
    state.metrics.record(response.status(), elapsed);
    response
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: eventstore_core::VERSION.to_string(),
    })
}

async fn ping() -> &'static str {
    "pong"
}

async fn post_events(
    State(state): State<AppState>,
    payload: Result<Json<EventsRequest>, JsonRejection>,
) -> Result<Json<IngestResponse>, ApiError> {
    let Json(payload) = payload.map_err(|e| api_error(StatusCode::BAD_REQUEST, e.body_text()))?;
    let events = payload.into_events(chrono::Utc::now().timestamp_millis());

    let store = state.store.clone();
    let ingested = tokio::task::spawn_blocking(move || store.ingest(&events))
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map_err(|e| {
            error!(error = %e, "Failed to ingest events");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse::from(e)))
        })?;

    Ok(Json(IngestResponse { ingested }))
}

async fn query(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| api_error(StatusCode::BAD_REQUEST, e.body_text()))?;

    let store = state.store.clone();
    let response = tokio::task::spawn_blocking(move || store.query(&request))
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(response))
}

async fn debug(
    State(state): State<AppState>,
    Query(params): Query<DebugParams>,
) -> Result<Json<DebugResponse>, ApiError> {
    if !params.wipe_requested() {
        return Ok(Json(DebugResponse { wiped: false }));
    }

    let store = state.store.clone();
    tokio::task::spawn_blocking(move || store.wipe())
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse::from(e))))?;

    info!("Store wiped through debug endpoint");
    Ok(Json(DebugResponse { wiped: true }))
}

async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.stats())
}

async fn metrics(State(state): State<AppState>) -> String {
    let stats = state.store.stats();
    let requests = &state.metrics;

    // Prometheus format
    let mut output = String::new();
    let mut metric = |name: &str, help: &str, kind: &str, value: u64| {
        let _ = writeln!(output, "# HELP eventstore_{} {}", name, help);
        let _ = writeln!(output, "# TYPE eventstore_{} {}", name, kind);
        let _ = writeln!(output, "eventstore_{} {}", name, value);
    };

    metric("events_ingested_total", "Events indexed", "counter", stats.ingest.events);
    metric(
        "index_entries_written_total",
        "Index entries written",
        "counter",
        stats.ingest.index_entries,
    );
    metric("ingest_batches_total", "Ingest batches committed", "counter", stats.ingest.batches);
    metric("ingest_failures_total", "Ingest batches rejected", "counter", stats.ingest.failures);
    metric("next_event_id", "Next event id to be issued", "gauge", stats.next_event_id);
    metric("store_entries", "Keys held in memory by the store", "gauge", stats.storage.entries as u64);
    metric(
        "store_memory_bytes",
        "Bytes held in memory by the store",
        "gauge",
        stats.storage.memory_bytes as u64,
    );
    metric("store_sstables", "SSTables on disk", "gauge", stats.storage.sstables as u64);
    metric("store_disk_bytes", "SSTable bytes on disk", "gauge", stats.storage.disk_bytes);
    metric(
        "api_requests_total",
        "HTTP requests served",
        "counter",
        requests.requests.load(Ordering::Relaxed),
    );
    metric(
        "api_client_errors_total",
        "HTTP requests answered with 4xx",
        "counter",
        requests.client_errors.load(Ordering::Relaxed),
    );
    metric(
        "api_server_errors_total",
        "HTTP requests answered with 5xx",
        "counter",
        requests.server_errors.load(Ordering::Relaxed),
    );
    metric(
        "api_request_duration_microseconds_total",
        "Time spent serving HTTP requests",
        "counter",
        requests.duration_micros.load(Ordering::Relaxed),
    );

    output
}
