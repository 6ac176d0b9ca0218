use anyhow::{Context, Result};
use async_trait::async_trait;
use if_addrs::{get_if_addrs, IfAddr};
use ipnet::{IpNet, Ipv4Net};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time;
use tracing::{debug, warn};

use crate::config::DISCOVERY_WINDOW_MS;

/// A best-effort side channel that may reveal addresses of this machine.
#[async_trait]
pub trait AddressSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn candidates(&self) -> Result<Vec<IpAddr>>;
}

/// Enumerates local interfaces.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterfaceSource;

#[async_trait]
impl AddressSource for InterfaceSource {
    fn name(&self) -> &'static str {
        "interfaces"
    }

    async fn candidates(&self) -> Result<Vec<IpAddr>> {
        let ifaces = tokio::task::spawn_blocking(get_if_addrs)
            .await
            .context("interface enumeration task failed")??;
        Ok(ifaces
            .into_iter()
            .filter_map(|iface| match iface.addr {
                IfAddr::V4(v4) => Some(IpAddr::V4(v4.ip)),
                IfAddr::V6(_) => None,
            })
            .collect())
    }
}

/// Learns the outbound source address by "connecting" a UDP socket. No packet
/// is sent; the OS routing table picks the local address.
#[derive(Debug, Clone, Copy)]
pub struct RouteSource {
    pub probe_target: Ipv4Addr,
}

impl Default for RouteSource {
    fn default() -> Self {
        Self {
            probe_target: Ipv4Addr::new(192, 168, 0, 1),
        }
    }
}

#[async_trait]
impl AddressSource for RouteSource {
    fn name(&self) -> &'static str {
        "route"
    }

    async fn candidates(&self) -> Result<Vec<IpAddr>> {
        let sock = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        sock.connect((self.probe_target, 9)).await?;
        Ok(vec![sock.local_addr()?.ip()])
    }
}

/// Private IPv4 ranges worth scanning: 10/8, 172.16/12, 192.168/16 and link-local 169.254/16.
pub fn is_candidate(ip: Ipv4Addr) -> bool {
    ip.is_private() || ip.is_link_local()
}

/// Discover private IPv4 addresses of this machine using the built-in sources.
///
/// Returns an empty list when nothing is found; callers should then ask for a
/// subnet prefix instead of treating it as an error.
pub async fn discover_local_addresses(window: Option<Duration>) -> Vec<Ipv4Addr> {
    let sources: Vec<Arc<dyn AddressSource>> =
        vec![Arc::new(InterfaceSource), Arc::new(RouteSource::default())];
    discover_with(&sources, window.unwrap_or(Duration::from_millis(DISCOVERY_WINDOW_MS))).await
}

/// Query every source concurrently, each bounded by `window`, and merge the
/// distinct candidates in source order.
pub async fn discover_with(sources: &[Arc<dyn AddressSource>], window: Duration) -> Vec<Ipv4Addr> {
    let lookups = sources.iter().map(|src| async move {
        match time::timeout(window, src.candidates()).await {
            Ok(Ok(ips)) => ips,
            Ok(Err(e)) => {
                warn!(source = src.name(), error = %e, "address source failed");
                Vec::new()
            }
            Err(_) => {
                debug!(source = src.name(), "address source timed out");
                Vec::new()
            }
        }
    });

    let mut out: Vec<Ipv4Addr> = Vec::new();
    for ips in futures::future::join_all(lookups).await {
        for ip in ips {
            if let IpAddr::V4(v4) = ip {
                if is_candidate(v4) && !out.contains(&v4) {
                    out.push(v4);
                }
            }
        }
    }
    debug!(found = out.len(), "local address discovery finished");
    out
}

/// Expand a CIDR into individual IP addresses suitable for host scanning.
///
/// For IPv4, excludes the network and broadcast addresses.
/// IPv6 is not scanned in this project and returns an empty list.
pub fn expand_cidr_to_ips(cidr: IpNet) -> Vec<IpAddr> {
    match cidr {
        IpNet::V4(n4) => expand_ipv4net_hosts(n4)
            .into_iter()
            .map(IpAddr::V4)
            .collect(),
        IpNet::V6(_) => Vec::new(),
    }
}

/// Convert an IPv4 address into its /24 network.
pub fn ipv4_to_default_cidr(ip: Ipv4Addr) -> Ipv4Net {
    let o = ip.octets();
    Ipv4Net::new(Ipv4Addr::new(o[0], o[1], o[2], 0), 24).expect("/24 is always valid")
}

fn expand_ipv4net_hosts(net: Ipv4Net) -> Vec<Ipv4Addr> {
    let start = u32::from(net.network());
    let end = u32::from(net.broadcast());
    if end <= start + 1 {
        return Vec::new();
    }
    (start + 1..end).map(Ipv4Addr::from).collect()
}
