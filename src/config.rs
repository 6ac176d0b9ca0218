use std::time::Duration;

/// Per-probe deadline for single-host scans.
pub const DEFAULT_TIMEOUT_MS: u64 = 1200;
/// Per-probe deadline for subnet scans, shorter to keep 254-host sweeps bounded.
pub const SUBNET_TIMEOUT_MS: u64 = 900;
pub const DEFAULT_CONCURRENCY: usize = 50;
pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 256;
/// Window given to local-address discovery.
pub const DISCOVERY_WINDOW_MS: u64 = 2500;
pub const DEFAULT_BIND: &str = "127.0.0.1:8080";

/// Clamp a requested worker-pool size into the supported range.
pub fn clamp_concurrency(requested: usize) -> usize {
    requested.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY)
}

/// Resolved scan settings shared by the CLI and the HTTP API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    pub timeout: Duration,
    pub subnet_timeout: Duration,
    pub concurrency: usize,
    pub discovery_window: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            subnet_timeout: Duration::from_millis(SUBNET_TIMEOUT_MS),
            concurrency: DEFAULT_CONCURRENCY,
            discovery_window: Duration::from_millis(DISCOVERY_WINDOW_MS),
        }
    }
}

impl ScanConfig {
    /// Apply optional overrides; a single `timeout_ms` drives both deadlines.
    pub fn with_overrides(mut self, concurrency: Option<usize>, timeout_ms: Option<u64>) -> Self {
        if let Some(c) = concurrency {
            self.concurrency = clamp_concurrency(c);
        }
        if let Some(ms) = timeout_ms.filter(|ms| *ms > 0) {
            self.timeout = Duration::from_millis(ms);
            self.subnet_timeout = Duration::from_millis(ms);
        }
        self
    }
}
