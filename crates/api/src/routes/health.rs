//! Health and Metrics Routes

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: i64,
    pub version: String,
    pub uptime_seconds: u64,
    pub database: ComponentHealth,
    pub reading_count: Option<usize>,
}

/// Individual component health
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub error: Option<String>,
}

/// Health check handler. Answers 503 when storage cannot be reached.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let (status, database) = match state.service.ping().await {
        Ok(()) => (
            StatusCode::OK,
            ComponentHealth {
                status: "ok".to_string(),
                error: None,
            },
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            ComponentHealth {
                status: "unavailable".to_string(),
                error: Some(e.to_string()),
            },
        ),
    };

    let response = HealthResponse {
        status: if status.is_success() { "healthy" } else { "degraded" }.to_string(),
        timestamp: chrono::Utc::now().timestamp(),
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        database,
        reading_count: state.service.count().await.ok(),
    };

    (status, Json(response))
}

/// Prometheus exposition, 404 when no recorder is installed
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
