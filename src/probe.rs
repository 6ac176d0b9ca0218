//! Probe strategies: three ways of inferring a port's state from ordinary
//! client-side connections, without raw sockets.
//!
//! Each strategy returns its own best-effort local verdict. None of them can
//! tell "closed" apart from "open but speaking another protocol" on its own;
//! the classifier reconciles them.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::redirect::Policy;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::trace;

use crate::error::ProbeError;
use crate::timeout::with_timeout;
use crate::types::{PortState, ProbeMethod, ProbeResult, Scheme};

/// Upper bound on the bytes read while waiting for a handshake reply.
const MAX_HANDSHAKE_REPLY: usize = 4096;

/// Appended to `Sec-WebSocket-Key` before hashing (RFC 6455 section 1.3).
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// A single connection-like attempt against `host:port`.
///
/// Normal outcomes (open, filtered, closed) are always `Ok`. An `Err` means the
/// strategy itself broke and produced no verdict.
#[async_trait]
pub trait Probe: Send + Sync {
    fn method(&self) -> ProbeMethod;

    async fn attempt(
        &self,
        host: &str,
        port: u16,
        scheme: Scheme,
        timeout: Duration,
    ) -> Result<ProbeResult, ProbeError>;
}

fn build_client() -> Result<reqwest::Client, ProbeError> {
    reqwest::Client::builder()
        .redirect(Policy::none())
        .danger_accept_invalid_certs(true)
        .no_proxy()
        .build()
        .map_err(|e| ProbeError::Client(e.to_string()))
}

fn classify_send_error(e: reqwest::Error) -> ProbeError {
    if e.is_builder() {
        ProbeError::Client(e.to_string())
    } else {
        ProbeError::ConnectionRejected(e.to_string())
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Cross-origin style request whose response body is never inspected.
///
/// Any settled response means a listener accepted the connection.
#[derive(Debug, Clone)]
pub struct OpaqueRequestProbe {
    client: reqwest::Client,
}

impl OpaqueRequestProbe {
    pub fn new() -> Result<Self, ProbeError> {
        Ok(Self {
            client: build_client()?,
        })
    }
}

#[async_trait]
impl Probe for OpaqueRequestProbe {
    fn method(&self) -> ProbeMethod {
        ProbeMethod::OpaqueRequest
    }

    async fn attempt(
        &self,
        host: &str,
        port: u16,
        scheme: Scheme,
        timeout: Duration,
    ) -> Result<ProbeResult, ProbeError> {
        let url = format!("{scheme}://{host}:{port}/");
        let client = self.client.clone();
        let start = Instant::now();

        let outcome = with_timeout(
            |_| async move {
                client
                    .get(&url)
                    .header(CACHE_CONTROL, "no-store")
                    .send()
                    .await
                    .map(|resp| resp.status())
                    .map_err(classify_send_error)
            },
            timeout,
        )
        .await;

        let latency = elapsed_ms(start);
        let (status, detail) = match outcome {
            Ok(code) => {
                trace!(host, port, %scheme, %code, "opaque request settled");
                (PortState::Open, "opaque/accessible")
            }
            Err(ProbeError::Timeout) => (PortState::Filtered, "timeout"),
            Err(ProbeError::ConnectionRejected(reason)) => {
                trace!(host, port, %scheme, %reason, "opaque request failed");
                (PortState::Closed, "network-error")
            }
            Err(e @ ProbeError::Client(_)) => return Err(e),
        };
        Ok(ProbeResult::new(
            ProbeMethod::OpaqueRequest,
            Some(scheme),
            status,
            latency,
            detail,
        ))
    }
}

/// Fetch of a favicon-like resource.
///
/// Both a successful load and an error response prove a listener answered. A
/// connection-level failure is indistinguishable from silence here: the probe
/// keeps waiting and reports `filtered` at the deadline, so this strategy
/// never yields `closed`.
#[derive(Debug, Clone)]
pub struct ImageLoadProbe {
    client: reqwest::Client,
}

impl ImageLoadProbe {
    pub fn new() -> Result<Self, ProbeError> {
        Ok(Self {
            client: build_client()?,
        })
    }
}

#[async_trait]
impl Probe for ImageLoadProbe {
    fn method(&self) -> ProbeMethod {
        ProbeMethod::ImageLoad
    }

    async fn attempt(
        &self,
        host: &str,
        port: u16,
        scheme: Scheme,
        timeout: Duration,
    ) -> Result<ProbeResult, ProbeError> {
        let buster = format!("{:x}", rand::random::<u64>());
        let url = format!("{scheme}://{host}:{port}/favicon.ico?{buster}");
        let client = self.client.clone();
        let start = Instant::now();

        let outcome = with_timeout(
            |cancel| async move {
                match client.get(&url).header(ACCEPT, "image/*").send().await {
                    Ok(resp) => {
                        let is_image = resp
                            .headers()
                            .get(CONTENT_TYPE)
                            .and_then(|v| v.to_str().ok())
                            .is_some_and(|ct| ct.starts_with("image/"));
                        if resp.status().is_success() && is_image {
                            Ok("load")
                        } else {
                            Ok("http-error-or-cross")
                        }
                    }
                    Err(e) if e.is_builder() => Err(ProbeError::Client(e.to_string())),
                    Err(_) => {
                        cancel.cancelled().await;
                        Err(ProbeError::Timeout)
                    }
                }
            },
            timeout,
        )
        .await;

        let latency = elapsed_ms(start);
        let (status, detail) = match outcome {
            Ok(detail) => (PortState::Open, detail),
            Err(ProbeError::Timeout) => (PortState::Filtered, "timeout"),
            Err(e) => return Err(e),
        };
        Ok(ProbeResult::new(
            ProbeMethod::ImageLoad,
            Some(scheme),
            status,
            latency,
            detail,
        ))
    }
}

/// WebSocket opening handshake (`ws://host:port`) over a plain TCP stream.
///
/// The scheme argument is ignored; this strategy always speaks plain `ws`.
#[derive(Debug, Clone, Default)]
pub struct SocketHandshakeProbe;

impl SocketHandshakeProbe {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Probe for SocketHandshakeProbe {
    fn method(&self) -> ProbeMethod {
        ProbeMethod::SocketHandshake
    }

    async fn attempt(
        &self,
        host: &str,
        port: u16,
        _scheme: Scheme,
        timeout: Duration,
    ) -> Result<ProbeResult, ProbeError> {
        let start = Instant::now();
        let target = host.to_string();

        // Dropping the stream on timeout closes the socket.
        let outcome = with_timeout(
            |_| async move {
                let mut stream = TcpStream::connect((target.as_str(), port))
                    .await
                    .map_err(|e| ProbeError::ConnectionRejected(e.to_string()))?;
                let res = ws_handshake(&mut stream, &target, port).await;
                let _ = stream.shutdown().await;
                res
            },
            timeout,
        )
        .await;

        let latency = elapsed_ms(start);
        let (status, detail) = match outcome {
            Ok(()) => (PortState::Open, "handshake-ok"),
            Err(ProbeError::Timeout) => (PortState::Filtered, "timeout"),
            Err(ProbeError::ConnectionRejected(reason)) => {
                trace!(host, port, %reason, "ws handshake failed");
                (PortState::Closed, "error")
            }
            Err(e) => return Err(e),
        };
        Ok(ProbeResult::new(
            ProbeMethod::SocketHandshake,
            None,
            status,
            latency,
            detail,
        ))
    }
}

async fn ws_handshake(stream: &mut TcpStream, host: &str, port: u16) -> Result<(), ProbeError> {
    let key = STANDARD.encode(rand::random::<[u8; 16]>());
    let request = format!(
        "GET / HTTP/1.1\r\n\
         Host: {host}:{port}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n"
    );
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| ProbeError::ConnectionRejected(e.to_string()))?;

    let mut reply = Vec::with_capacity(512);
    let mut chunk = [0u8; 512];
    loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| ProbeError::ConnectionRejected(e.to_string()))?;
        if n == 0 {
            break;
        }
        reply.extend_from_slice(&chunk[..n]);
        // Greeting-first services never send a terminator; fail on the first bad byte.
        if let Some(reason) = reject_early(&reply) {
            return Err(ProbeError::ConnectionRejected(reason.into()));
        }
        if reply.windows(4).any(|w| w == b"\r\n\r\n") || reply.len() >= MAX_HANDSHAKE_REPLY {
            break;
        }
    }

    if is_upgrade_reply(&String::from_utf8_lossy(&reply), &accept_for(&key)) {
        Ok(())
    } else if reply.is_empty() {
        Err(ProbeError::ConnectionRejected(
            "closed before handshake reply".into(),
        ))
    } else {
        Err(ProbeError::ConnectionRejected("not a websocket upgrade".into()))
    }
}

/// Expected `Sec-WebSocket-Accept` value for a request key.
pub fn accept_for(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// `Some(reason)` once the bytes received so far rule out a `101` reply.
///
/// The reply must open with `HTTP/1.<d> <ddd>`; a complete status line with
/// any other code is rejected without waiting for the headers.
fn reject_early(reply: &[u8]) -> Option<&'static str> {
    const SHAPE: &[u8] = b"HTTP/1.# ###";
    let shape_ok = reply.iter().zip(SHAPE).all(|(&b, &want)| match want {
        b'#' => b.is_ascii_digit(),
        _ => b == want,
    });
    if !shape_ok {
        return Some("not an http reply");
    }
    if reply.len() >= SHAPE.len() && &reply[9..12] != b"101" {
        return Some("status is not 101");
    }
    None
}

/// `true` for a `101` status line carrying `Upgrade: websocket` and the
/// expected `Sec-WebSocket-Accept`.
fn is_upgrade_reply(reply: &str, expected_accept: &str) -> bool {
    let mut lines = reply.split("\r\n");
    let switching = lines
        .next()
        .and_then(|status| status.split_whitespace().nth(1))
        .is_some_and(|code| code == "101");
    if !switching {
        return false;
    }
    let (mut upgrade, mut accepted) = (false, false);
    for (name, value) in lines.filter_map(|line| line.split_once(':')) {
        let (name, value) = (name.trim(), value.trim());
        if name.eq_ignore_ascii_case("upgrade") {
            upgrade |= value.eq_ignore_ascii_case("websocket");
        } else if name.eq_ignore_ascii_case("sec-websocket-accept") {
            accepted |= value == expected_accept;
        }
    }
    upgrade && accepted
}
