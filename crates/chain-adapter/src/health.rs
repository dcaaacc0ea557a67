//! Liveness endpoint: `GET /actuator/health` -> `{"status":"UP"}`.
//!
//! Liveness only; it reports UP as soon as the process serves HTTP, independent of catch-up.

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;

pub const HEALTH_PATH: &str = "/actuator/health";

async fn health() -> Json<Value> {
    Json(json!({ "status": "UP" }))
}

pub fn router() -> Router {
    Router::new().route(HEALTH_PATH, get(health))
}

pub struct HealthCheckEndpoint {
    addr: SocketAddr,
    started: AtomicBool,
}

impl HealthCheckEndpoint {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            started: AtomicBool::new(false),
        }
    }

    /// Endpoint on all interfaces at `port`.
    pub fn on_port(port: u16) -> Self {
        Self::new(SocketAddr::from(([0, 0, 0, 0], port)))
    }

    /// Bind and serve in the background. Returns the bound address, or None if already started.
    pub async fn start(&self) -> std::io::Result<Option<SocketAddr>> {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(None);
        }
        let listener = TcpListener::bind(self.addr).await?;
        let local = listener.local_addr()?;
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router()).await {
                tracing::warn!(reason = %e, "health check endpoint stopped");
            }
        });
        tracing::info!(addr = %local, "health check endpoint started");
        Ok(Some(local))
    }
}
