//! Web server module for rowgauge.
//!
//! Exposes the metrics registry in Prometheus text format, plus health probes
//! and a read-only job listing.

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};

use crate::collector::{JobInfo, Scheduler, SchedulerState};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Registry the scheduler registered its sinks with.
    pub registry: Registry,
    pub scheduler: Arc<Scheduler>,
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state: SchedulerState,
}

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let app_state = Arc::new(state);

    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/api/jobs", get(jobs_handler))
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .with_state(app_state)
}

/// Prometheus scrape endpoint.
///
/// Registered sinks come from the registry; pull-mode jobs are rendered for
/// this scrape only.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    let mut families = state.registry.gather();
    families.extend(state.scheduler.scrape().await);

    let mut buffer = Vec::new();
    match TextEncoder::new().encode(&families, &mut buffer) {
        Ok(()) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], buffer).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Metrics encoding failed");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {}", e)).into_response()
        }
    }
}

/// Liveness probe.
async fn healthz_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        state: state.scheduler.state(),
    })
}

/// Readiness probe: ready while the scheduler is running.
async fn readyz_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.scheduler.state() {
        SchedulerState::Running => Json(HealthResponse {
            status: "ok",
            state: SchedulerState::Running,
        })
        .into_response(),
        other => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "not_ready",
                state: other,
            }),
        )
            .into_response(),
    }
}

/// Job listing, in configuration order.
async fn jobs_handler(State(state): State<Arc<AppState>>) -> Json<Vec<JobInfo>> {
    Json(state.scheduler.list_jobs())
}
