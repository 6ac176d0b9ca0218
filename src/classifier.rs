use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::DEFAULT_TIMEOUT_MS;
use crate::error::ProbeError;
use crate::probe::{ImageLoadProbe, OpaqueRequestProbe, Probe, SocketHandshakeProbe};
use crate::types::{PortFinding, PortState, ProbeMethod, ProbeResult, Scheme};

/// Scheme order for the HTTP-style strategies: secure first on 443, plain first elsewhere.
pub fn scheme_order(port: u16) -> [Scheme; 2] {
    if port == 443 {
        [Scheme::Https, Scheme::Http]
    } else {
        [Scheme::Http, Scheme::Https]
    }
}

/// Fans every probe strategy out against one host:port and reconciles the verdicts.
#[derive(Clone)]
pub struct PortClassifier {
    request: Arc<dyn Probe>,
    image: Arc<dyn Probe>,
    socket: Arc<dyn Probe>,
}

impl std::fmt::Debug for PortClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortClassifier")
            .field("request", &self.request.method())
            .field("image", &self.image.method())
            .field("socket", &self.socket.method())
            .finish()
    }
}

impl PortClassifier {
    pub fn new(request: Arc<dyn Probe>, image: Arc<dyn Probe>, socket: Arc<dyn Probe>) -> Self {
        Self {
            request,
            image,
            socket,
        }
    }

    /// Classifier wired to the real network strategies.
    pub fn with_default_probes() -> Result<Self, ProbeError> {
        Ok(Self::new(
            Arc::new(OpaqueRequestProbe::new()?),
            Arc::new(ImageLoadProbe::new()?),
            Arc::new(SocketHandshakeProbe::new()),
        ))
    }

    /// Classify `host:port`. Never fails: strategy errors and panics only
    /// remove that strategy's verdict.
    pub async fn check_port(&self, host: &str, port: u16, timeout: Option<Duration>) -> PortFinding {
        let timeout = timeout.unwrap_or(Duration::from_millis(DEFAULT_TIMEOUT_MS));
        let [first, second] = scheme_order(port);

        // Evaluation order matters for attribution in `reconcile`.
        let handles = vec![
            spawn_attempt(self.request.clone(), host, port, first, timeout),
            spawn_attempt(self.image.clone(), host, port, first, timeout),
            spawn_attempt(self.socket.clone(), host, port, first, timeout),
            spawn_attempt(self.request.clone(), host, port, second, timeout),
        ];

        let mut verdicts = Vec::with_capacity(handles.len());
        for settled in futures::future::join_all(handles).await {
            match settled {
                Ok(Ok(v)) => verdicts.push(v),
                Ok(Err(e)) => warn!(host, port, error = %e, "probe produced no verdict"),
                Err(e) => warn!(host, port, error = %e, "probe task aborted"),
            }
        }

        let finding = reconcile(host, port, &verdicts);
        debug!(
            host,
            port,
            state = %finding.state,
            via = %finding.via,
            verdicts = verdicts.len(),
            "port classified"
        );
        finding
    }
}

fn spawn_attempt(
    probe: Arc<dyn Probe>,
    host: &str,
    port: u16,
    scheme: Scheme,
    timeout: Duration,
) -> JoinHandle<Result<ProbeResult, ProbeError>> {
    let host = host.to_string();
    tokio::spawn(async move { probe.attempt(&host, port, scheme, timeout).await })
}

/// Fold per-strategy verdicts into one finding.
///
/// Priority: the first `open` in evaluation order, else the first `filtered`,
/// else the fastest `closed` (earlier verdict wins a latency tie). With no
/// verdicts at all the result is `closed` via `unknown`.
pub fn reconcile(host: &str, port: u16, verdicts: &[ProbeResult]) -> PortFinding {
    let first_with = |state: PortState| verdicts.iter().find(|v| v.status == state);

    let chosen = first_with(PortState::Open)
        .or_else(|| first_with(PortState::Filtered))
        .or_else(|| {
            verdicts
                .iter()
                .enumerate()
                .filter(|(_, v)| v.status == PortState::Closed)
                .min_by_key(|(idx, v)| (v.latency_ms, *idx))
                .map(|(_, v)| v)
        });

    match chosen {
        Some(v) => PortFinding {
            host: host.to_string(),
            port,
            state: v.status,
            via: v.method,
            scheme: v.scheme,
            latency_ms: Some(v.latency_ms),
            detail: v.detail.clone(),
        },
        None => PortFinding {
            host: host.to_string(),
            port,
            state: PortState::Closed,
            via: ProbeMethod::Unknown,
            scheme: None,
            latency_ms: None,
            detail: "n/a".to_string(),
        },
    }
}
