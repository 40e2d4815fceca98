//! Load Balancer Module
//!
//! Least-bytes-transferred HTTP balancer in front of a pool of API
//! backends. Every proxied response adds its header and body size to
//! the chosen backend's counter; the next request goes to the healthy
//! backend with the smallest counter. A background task probes each
//! backend's `/health` endpoint to maintain the healthy set.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use tracing::{debug, info, warn};

use crate::config::BalancerConfig;
use crate::error::{Error, Result};

/// A single proxied backend
pub struct Backend {
    /// Backend address (host:port)
    pub address: String,
    /// Total response bytes attributed to this backend
    transferred: AtomicU64,
    /// Result of the most recent health probe
    healthy: AtomicBool,
}

impl Backend {
    fn new(address: String) -> Self {
        Self {
            address,
            transferred: AtomicU64::new(0),
            healthy: AtomicBool::new(false),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    pub fn add_transferred(&self, bytes: u64) {
        self.transferred.fetch_add(bytes, Ordering::Relaxed);
    }
}

/// The backend pool with least-bytes selection
pub struct BackendPool {
    backends: Vec<Backend>,
}

impl BackendPool {
    pub fn new(addresses: &[String]) -> Self {
        Self {
            backends: addresses.iter().cloned().map(Backend::new).collect(),
        }
    }

    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }

    /// Pick the healthy backend with the fewest bytes transferred.
    /// Ties go to the lower pool position.
    pub fn pick(&self) -> Option<&Backend> {
        self.backends
            .iter()
            .filter(|b| b.is_healthy())
            .min_by_key(|b| b.transferred())
    }
}

/// Shared balancer state for the forwarding handler
struct LbState {
    pool: Arc<BackendPool>,
    client: reqwest::Client,
    trace_enabled: bool,
}

/// The load balancer frontend
pub struct Balancer {
    config: BalancerConfig,
    pool: Arc<BackendPool>,
}

impl Balancer {
    pub fn new(config: BalancerConfig) -> Self {
        let pool = Arc::new(BackendPool::new(&config.backends));
        Self { config, pool }
    }

    /// Start the health checker and the forwarding frontend; returns
    /// once the listener shuts down.
    pub async fn start(&self) -> Result<()> {
        let timeout = Duration::from_secs(self.config.request_timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(format!("HTTP client error: {}", e)))?;

        tokio::spawn(health_loop(
            Arc::clone(&self.pool),
            client.clone(),
            Duration::from_secs(self.config.health_interval_secs),
        ));

        let state = Arc::new(LbState {
            pool: Arc::clone(&self.pool),
            client,
            trace_enabled: self.config.trace_enabled,
        });
        let app = Router::new().fallback(forward).with_state(state);

        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        info!("Load balancer listening on {}", self.config.bind_address);
        info!("Tracing header enabled: {}", self.config.trace_enabled);

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutting down load balancer");
            })
            .await
            .map_err(|e| Error::Network(format!("balancer frontend error: {}", e)))?;

        Ok(())
    }
}

/// Probe every backend on a fixed interval and update the healthy set.
async fn health_loop(pool: Arc<BackendPool>, client: reqwest::Client, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        for backend in pool.backends() {
            let healthy = probe(&client, &backend.address).await;
            if healthy != backend.is_healthy() {
                info!(
                    backend = %backend.address,
                    healthy, "backend health changed"
                );
            }
            backend.set_healthy(healthy);
        }
    }
}

async fn probe(client: &reqwest::Client, address: &str) -> bool {
    match client.get(format!("http://{}/health", address)).send().await {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}

/// Forward one request to the selected backend and relay the response.
async fn forward(State(state): State<Arc<LbState>>, req: Request) -> Response {
    let backend = match state.pool.pick() {
        Some(b) => b,
        None => {
            warn!("no healthy backends available");
            return (StatusCode::SERVICE_UNAVAILABLE, "no backends available").into_response();
        }
    };

    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/");
    let url = format!("http://{}{}", backend.address, path_and_query);
    let method = reqwest::Method::from_bytes(req.method().as_str().as_bytes())
        .unwrap_or(reqwest::Method::GET);
    let headers = req.headers().clone();

    let body: bytes::Bytes = match axum::body::to_bytes(req.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("failed to read request body: {}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let mut outbound = state.client.request(method, &url);
    for (name, value) in headers.iter() {
        if name == axum::http::header::HOST {
            continue;
        }
        outbound = outbound.header(name.as_str(), value.as_bytes());
    }

    match outbound.body(body).send().await {
        Ok(response) => {
            let status = response.status();
            let response_headers = response.headers().clone();
            let bytes = response.bytes().await.unwrap_or_default();

            backend.add_transferred((header_length(&response_headers) + bytes.len()) as u64);
            debug!("fwd {} {}", status, url);

            let mut builder = Response::builder().status(status.as_u16());
            for (name, value) in response_headers.iter() {
                builder = builder.header(name.as_str(), value.as_bytes());
            }
            if state.trace_enabled {
                builder = builder.header("lb-from", backend.address.as_str());
            }
            builder
                .body(Body::from(bytes))
                .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
        }
        Err(e) => {
            warn!("failed to get response from {}: {}", backend.address, e);
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

/// Byte size of the headers as transferred on the wire, one
/// `name: value` line per header.
fn header_length(headers: &reqwest::header::HeaderMap) -> usize {
    headers
        .iter()
        .map(|(name, value)| name.as_str().len() + 2 + value.as_bytes().len() + 1)
        .sum()
}
