//! HTTP API Server
//!
//! REST API exposing the storage engine: key reads and writes, health
//! probing and engine statistics.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::store::Store;

/// Shared application state
pub struct AppState {
    /// The storage engine
    pub store: Arc<Store>,
}

/// HTTP API server
pub struct HttpServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new HTTP server over a store
    pub fn new(config: ApiConfig, store: Arc<Store>) -> Self {
        let state = Arc::new(AppState { store });
        Self { config, state }
    }

    /// Create the router
    fn create_router(state: Arc<AppState>, cors_enabled: bool) -> Router {
        let mut router = Router::new()
            .route("/db/:key", get(handle_get).post(handle_put))
            .route("/health", get(handle_health))
            .route("/status", get(handle_status))
            .with_state(state)
            .layer(TraceLayer::new_for_http());

        if cors_enabled {
            router = router.layer(CorsLayer::permissive());
        }
        router
    }

    /// Start the HTTP server; returns once the listener shuts down.
    pub async fn start(&self) -> Result<()> {
        if !self.config.enabled {
            tracing::info!("HTTP API disabled");
            return Ok(());
        }

        let app = Self::create_router(Arc::clone(&self.state), self.config.cors_enabled);

        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!("HTTP API listening on {}", self.config.bind_address);

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Shutting down HTTP API");
            })
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))?;

        Ok(())
    }
}

// ============ Request/Response Types ============

/// Put request body
#[derive(Debug, Deserialize, Serialize)]
pub struct PutRequest {
    pub value: String,
}

/// Get response
#[derive(Debug, Deserialize, Serialize)]
pub struct GetResponse {
    pub key: String,
    pub value: String,
}

/// Health response
#[derive(Debug, Deserialize, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
}

/// Status response with engine statistics
#[derive(Debug, Deserialize, Serialize)]
pub struct StatusResponse {
    pub data_dir: String,
    pub active_size: u64,
    pub active_keys: usize,
    pub sealed_segments: usize,
}

/// Error response
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// ============ Handlers ============

async fn handle_get(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    tracing::debug!(key = %key, "GET");
    match state.store.get(&key) {
        Ok(value) => Json(GetResponse { key, value }).into_response(),
        Err(e) => error_response(&key, e),
    }
}

async fn handle_put(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(req): Json<PutRequest>,
) -> impl IntoResponse {
    tracing::debug!(key = %key, "PUT");
    match state.store.put(&key, &req.value) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => error_response(&key, e),
    }
}

async fn handle_health() -> impl IntoResponse {
    Json(HealthResponse { healthy: true })
}

async fn handle_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.store.stats();
    Json(StatusResponse {
        data_dir: stats.data_dir.display().to_string(),
        active_size: stats.active_size,
        active_keys: stats.active_keys,
        sealed_segments: stats.sealed_segments,
    })
}

// ============ Helpers ============

fn error_response(key: &str, err: Error) -> axum::response::Response {
    let (status, code) = match &err {
        Error::NotFound(_) => (StatusCode::NOT_FOUND, "KEY_NOT_FOUND"),
        Error::Corruption(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CORRUPT_RECORD"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
    };
    if status.is_server_error() {
        tracing::error!(key = %key, "request failed: {}", err);
    }
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            code: code.to_string(),
        }),
    )
        .into_response()
}
