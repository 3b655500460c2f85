//! Helpers shared by the workspace integration tests

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{any, get, post};
use axum::{Json, Router};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct Counters {
    hits: Arc<AtomicUsize>,
    probes: Arc<AtomicUsize>,
}

/// Local HTTP server used as a load target. Because axum routes on the path,
/// it also answers absolute-form requests and can stand in for a forward
/// proxy in front of a plain HTTP target.
pub struct TargetServer {
    pub addr: SocketAddr,
    counters: Counters,
}

impl TargetServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Requests served on the load routes
    pub fn hits(&self) -> usize {
        self.counters.hits.load(Ordering::SeqCst)
    }

    /// Requests served on `/`, where health probes land
    pub fn probes(&self) -> usize {
        self.counters.probes.load(Ordering::SeqCst)
    }
}

pub async fn spawn_target() -> anyhow::Result<TargetServer> {
    let counters = Counters::default();

    let app = Router::new()
        .route("/", get(probe))
        .route("/ok", any(ok))
        .route("/limited", any(limited))
        .route("/slow", any(slow))
        .route("/echo", post(echo))
        .with_state(counters.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Target server failed: {}", e);
        }
    });

    Ok(TargetServer { addr, counters })
}

async fn probe(State(counters): State<Counters>) -> &'static str {
    counters.probes.fetch_add(1, Ordering::SeqCst);
    "ok"
}

async fn ok(State(counters): State<Counters>) -> &'static str {
    counters.hits.fetch_add(1, Ordering::SeqCst);
    "ok"
}

async fn limited(State(counters): State<Counters>) -> StatusCode {
    counters.hits.fetch_add(1, Ordering::SeqCst);
    StatusCode::TOO_MANY_REQUESTS
}

async fn slow(State(counters): State<Counters>) -> &'static str {
    counters.hits.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(200)).await;
    "slow"
}

async fn echo(State(counters): State<Counters>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    counters.hits.fetch_add(1, Ordering::SeqCst);
    (StatusCode::CREATED, Json(body))
}
