use std::fmt;

use serde::{Deserialize, Serialize};

/// Authoritative (or per-probe) state of a host:port pair.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
    Filtered,
    Closed,
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PortState::Open => "open",
            PortState::Filtered => "filtered",
            PortState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Which probe strategy produced a verdict.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeMethod {
    #[serde(rename = "fetch")]
    OpaqueRequest,
    #[serde(rename = "img")]
    ImageLoad,
    #[serde(rename = "ws")]
    SocketHandshake,
    /// Attribution of the fallback finding when no strategy produced a verdict.
    #[serde(rename = "unknown")]
    Unknown,
}

impl fmt::Display for ProbeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProbeMethod::OpaqueRequest => "fetch",
            ProbeMethod::ImageLoad => "img",
            ProbeMethod::SocketHandshake => "ws",
            ProbeMethod::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// URL scheme used by the HTTP-style strategies.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local verdict of a single probe attempt. Consumed by the classifier, never stored.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub method: ProbeMethod,
    pub scheme: Option<Scheme>,
    pub status: PortState,
    pub latency_ms: u64,
    pub detail: String,
}

impl ProbeResult {
    pub fn new(
        method: ProbeMethod,
        scheme: Option<Scheme>,
        status: PortState,
        latency_ms: u64,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            method,
            scheme,
            status,
            latency_ms,
            detail: detail.into(),
        }
    }
}

/// One classified host:port pair.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PortFinding {
    pub host: String,
    pub port: u16,
    pub state: PortState,
    pub via: ProbeMethod,
    pub scheme: Option<Scheme>,
    pub latency_ms: Option<u64>,
    pub detail: String,
}

/// Findings for one host of a subnet scan.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HostReport {
    pub host: String,
    pub findings: Vec<PortFinding>,
}

/// Runner progress, reported after every settled task.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

/// Aggregate results of one scan pass.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ScanReport {
    pub started_at: String,
    pub finished_at: String,
    pub target: String,
    pub ports: Vec<u16>,
    pub open_count: u64,
    pub filtered_count: u64,
    pub hosts: Vec<HostReport>,
}

impl ScanReport {
    /// Recompute the open/filtered counters from `hosts`.
    pub fn tally(&mut self) {
        let (mut open, mut filtered) = (0u64, 0u64);
        for f in self.hosts.iter().flat_map(|h| h.findings.iter()) {
            match f.state {
                PortState::Open => open += 1,
                PortState::Filtered => filtered += 1,
                PortState::Closed => {}
            }
        }
        self.open_count = open;
        self.filtered_count = filtered;
    }
}
