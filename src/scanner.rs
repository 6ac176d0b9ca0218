use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use ::time::{format_description::well_known, OffsetDateTime};
use ipnet::IpNet;
use regex::Regex;
use tracing::{info, warn};

use crate::classifier::PortClassifier;
use crate::error::ScanError;
use crate::netdetect;
use crate::runner::run_bounded;
use crate::types::{HostReport, PortState, Progress, ScanReport};

/// The first three octets of a /24, written `192.168.1.`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubnetPrefix([u8; 3]);

fn prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)\.(\d+)\.(\d+)\.$").expect("static regex"))
}

impl SubnetPrefix {
    pub fn parse(text: &str) -> Result<Self, ScanError> {
        let text = text.trim();
        let invalid = || ScanError::InvalidPrefix(text.to_string());
        let caps = prefix_re().captures(text).ok_or_else(invalid)?;
        let mut octets = [0u8; 3];
        for (i, o) in octets.iter_mut().enumerate() {
            *o = caps[i + 1].parse().map_err(|_| invalid())?;
        }
        Ok(Self(octets))
    }

    /// The /24 an address belongs to.
    pub fn from_address(ip: Ipv4Addr) -> Self {
        let o = ip.octets();
        Self([o[0], o[1], o[2]])
    }

    /// Host addresses `.1` through `.254`.
    pub fn hosts(&self) -> Vec<String> {
        let [a, b, c] = self.0;
        let net = netdetect::ipv4_to_default_cidr(Ipv4Addr::new(a, b, c, 0));
        netdetect::expand_cidr_to_ips(IpNet::V4(net))
            .into_iter()
            .map(|ip: IpAddr| ip.to_string())
            .collect()
    }
}

impl FromStr for SubnetPrefix {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SubnetPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.0;
        write!(f, "{a}.{b}.{c}.")
    }
}

/// Classify every port of one host, in order. Closed findings are kept.
pub async fn scan_host<P>(
    classifier: &PortClassifier,
    host: &str,
    ports: &[u16],
    timeout: Duration,
    on_progress: P,
) -> Result<ScanReport, ScanError>
where
    P: Fn(Progress),
{
    if ports.is_empty() {
        return Err(ScanError::NoPorts);
    }
    let started_at = now_rfc3339();
    let mut findings = Vec::with_capacity(ports.len());
    for (i, &port) in ports.iter().enumerate() {
        findings.push(classifier.check_port(host, port, Some(timeout)).await);
        on_progress(Progress {
            completed: i + 1,
            total: ports.len(),
        });
    }

    let mut report = ScanReport {
        started_at,
        finished_at: now_rfc3339(),
        target: host.to_string(),
        ports: ports.to_vec(),
        hosts: vec![HostReport {
            host: host.to_string(),
            findings,
        }],
        ..Default::default()
    };
    report.tally();
    info!(
        host,
        open = report.open_count,
        filtered = report.filtered_count,
        "host scan finished"
    );
    Ok(report)
}

/// Sweep `.1`-`.254` of a /24 with a bounded worker pool.
///
/// One task per host; each classifies the ports sequentially and keeps only
/// open or filtered findings. `on_progress` counts hosts.
pub async fn scan_subnet<P>(
    classifier: &PortClassifier,
    prefix: SubnetPrefix,
    ports: &[u16],
    concurrency: usize,
    timeout: Duration,
    on_progress: P,
) -> Result<ScanReport, ScanError>
where
    P: Fn(Progress),
{
    if ports.is_empty() {
        return Err(ScanError::NoPorts);
    }
    let started_at = now_rfc3339();
    let hosts = prefix.hosts();
    info!(%prefix, hosts = hosts.len(), ports = ports.len(), concurrency, "subnet scan starting");

    let ports: Arc<[u16]> = Arc::from(ports);
    let tasks: Vec<_> = hosts
        .iter()
        .map(|host| {
            let host = host.clone();
            let classifier = classifier.clone();
            let ports = Arc::clone(&ports);
            move || async move {
                let mut findings = Vec::new();
                for &port in ports.iter() {
                    let f = classifier.check_port(&host, port, Some(timeout)).await;
                    if f.state != PortState::Closed {
                        findings.push(f);
                    }
                }
                Ok::<_, anyhow::Error>(HostReport { host, findings })
            }
        })
        .collect();

    let results = run_bounded(concurrency, tasks, on_progress).await;

    let reports = hosts
        .iter()
        .zip(results)
        .map(|(host, res)| {
            res.unwrap_or_else(|e| {
                warn!(host = %host, error = %e, "host scan failed");
                HostReport {
                    host: host.clone(),
                    findings: Vec::new(),
                }
            })
        })
        .collect();

    let mut report = ScanReport {
        started_at,
        finished_at: now_rfc3339(),
        target: prefix.to_string(),
        ports: ports.to_vec(),
        hosts: reports,
        ..Default::default()
    };
    report.tally();
    info!(
        %prefix,
        open = report.open_count,
        filtered = report.filtered_count,
        "subnet scan finished"
    );
    Ok(report)
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
