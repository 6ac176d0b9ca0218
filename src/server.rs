use std::future::Future;
use std::net::Ipv4Addr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::{
    classifier::PortClassifier,
    config::ScanConfig,
    error::ScanError,
    netdetect::{self, AddressSource},
    ports,
    scanner::{self, SubnetPrefix},
    types::{Progress, ScanReport},
};

/// Live progress counters shared between a running scan and `/api/status`.
#[derive(Clone, Debug, Default)]
pub struct SharedProgress {
    pub completed: Arc<AtomicUsize>,
    pub total: Arc<AtomicUsize>,
}

impl SharedProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, p: Progress) {
        self.total.store(p.total, Ordering::Relaxed);
        self.completed.fetch_max(p.completed, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Progress {
        Progress {
            completed: self.completed.load(Ordering::Relaxed),
            total: self.total.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    inner: Arc<RwLock<ServerState>>, // shared mutable state for progress/results
    classifier: PortClassifier,
    config: ScanConfig,
    sources: Arc<Vec<Arc<dyn AddressSource>>>,
}

impl AppState {
    pub fn new(
        classifier: PortClassifier,
        config: ScanConfig,
        sources: Vec<Arc<dyn AddressSource>>,
    ) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ServerState {
                state: "idle".into(),
                progress: SharedProgress::new(),
                results: None,
            })),
            classifier,
            config,
            sources: Arc::new(sources),
        }
    }
}

#[derive(Debug)]
struct ServerState {
    state: String, // "idle" | "running" | "done"
    progress: SharedProgress,
    results: Option<ScanReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Status {
    pub state: String,
    pub completed: usize,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    /// Comma-separated ports; omitted or blank means the default list.
    #[serde(default)]
    pub ports: String,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LocalAddresses {
    pub addresses: Vec<Ipv4Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

enum Target {
    Host(String),
    Subnet(SubnetPrefix),
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/status", get(get_status))
        .route("/scan", post(post_scan))
        .route("/results", get(get_results))
        .route("/local-addresses", get(get_local_addresses))
        .with_state(state);

    Router::new().nest("/api", api).layer(TraceLayer::new_for_http())
}

pub async fn spawn_server(bind: &str, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(%bind, "serving API");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    let p = s.progress.snapshot();
    let out = Status {
        state: s.state.clone(),
        completed: p.completed,
        total: p.total,
    };
    (StatusCode::OK, Json(out))
}

async fn get_results(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    if let Some(res) = s.results.as_ref() {
        (StatusCode::OK, Json(res.clone())).into_response()
    } else {
        StatusCode::NO_CONTENT.into_response()
    }
}

async fn get_local_addresses(State(app): State<AppState>) -> impl IntoResponse {
    let addresses = netdetect::discover_with(&app.sources, app.config.discovery_window).await;
    let hint = addresses
        .is_empty()
        .then(|| "no local address found; enter a subnet prefix such as 192.168.1. manually".to_string());
    (StatusCode::OK, Json(LocalAddresses { addresses, hint }))
}

async fn post_scan(State(app): State<AppState>, Json(req): Json<ScanRequest>) -> impl IntoResponse {
    let target = match req.prefix.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(p) => match SubnetPrefix::parse(p) {
            Ok(prefix) => Target::Subnet(prefix),
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        },
        None => Target::Host(req.host.unwrap_or_else(|| "127.0.0.1".to_string())),
    };

    let ports = if req.ports.trim().is_empty() {
        ports::default_ports()
    } else {
        ports::parse_ports(&req.ports)
    };
    if ports.is_empty() {
        return (StatusCode::BAD_REQUEST, "no valid ports to scan").into_response();
    }

    let config = app.config.clone().with_overrides(req.concurrency, req.timeout_ms);
    let progress = SharedProgress::new();
    let total = match &target {
        Target::Host(_) => ports.len(),
        Target::Subnet(prefix) => prefix.hosts().len(),
    };
    progress.record(Progress { completed: 0, total });

    {
        let mut s = app.inner.write().await;
        // A running scan cannot be cancelled, so refuse to start another.
        if s.state == "running" {
            return (StatusCode::CONFLICT, "a scan is already running").into_response();
        }
        s.state = "running".into();
        s.results = None;
        s.progress = progress.clone();
    }

    let app2 = app.clone();
    tokio::spawn(async move {
        let on_progress = |p: Progress| progress.record(p);
        let scan = async {
            match target {
                Target::Host(host) => {
                    scanner::scan_host(&app2.classifier, &host, &ports, config.timeout, on_progress)
                        .await
                }
                Target::Subnet(prefix) => {
                    scanner::scan_subnet(
                        &app2.classifier,
                        prefix,
                        &ports,
                        config.concurrency,
                        config.subnet_timeout,
                        on_progress,
                    )
                    .await
                }
            }
        };
        record_scan(&app2.inner, scan).await;
    });

    let status = Status {
        state: "running".into(),
        completed: 0,
        total,
    };
    (StatusCode::ACCEPTED, Json(status)).into_response()
}

/// Await a scan and store its outcome. The state never stays `running`
/// after the scan settles, even if it panicked.
async fn record_scan<Fut>(inner: &RwLock<ServerState>, scan: Fut)
where
    Fut: Future<Output = Result<ScanReport, ScanError>>,
{
    let outcome = AssertUnwindSafe(scan).catch_unwind().await;
    let mut s = inner.write().await;
    match outcome {
        Ok(Ok(report)) => {
            s.state = "done".into();
            s.results = Some(report);
        }
        Ok(Err(e)) => {
            s.state = "idle".into();
            error!(error = %e, "scan error");
        }
        Err(_) => {
            s.state = "idle".into();
            error!("scan task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_state() -> RwLock<ServerState> {
        RwLock::new(ServerState {
            state: "running".into(),
            progress: SharedProgress::new(),
            results: None,
        })
    }

    async fn exploding_scan() -> Result<ScanReport, ScanError> {
        panic!("scan blew up")
    }

    #[tokio::test]
    async fn panicking_scan_returns_to_idle() {
        let inner = running_state();
        record_scan(&inner, exploding_scan()).await;
        let s = inner.read().await;
        assert_eq!(s.state, "idle");
        assert!(s.results.is_none());
    }

    #[tokio::test]
    async fn finished_scan_is_stored() {
        let inner = running_state();
        record_scan(&inner, async { Ok(ScanReport::default()) }).await;
        let s = inner.read().await;
        assert_eq!(s.state, "done");
        assert!(s.results.is_some());
    }

    #[tokio::test]
    async fn failed_scan_returns_to_idle() {
        let inner = running_state();
        record_scan(&inner, async { Err(ScanError::NoPorts) }).await;
        assert_eq!(inner.read().await.state, "idle");
    }
}
