#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lan_probe_rs::classifier::PortClassifier;
use lan_probe_rs::error::ProbeError;
use lan_probe_rs::probe::Probe;
use lan_probe_rs::types::{PortState, ProbeMethod, ProbeResult, Scheme};

type Responder = dyn Fn(&str, u16, Scheme) -> Result<ProbeResult, ProbeError> + Send + Sync;

/// Scripted probe: answers from a closure and records every call.
pub struct FakeProbe {
    method: ProbeMethod,
    respond: Box<Responder>,
    pub calls: Arc<Mutex<Vec<(String, u16, Scheme)>>>,
}

impl FakeProbe {
    pub fn new<F>(method: ProbeMethod, respond: F) -> Self
    where
        F: Fn(&str, u16, Scheme) -> Result<ProbeResult, ProbeError> + Send + Sync + 'static,
    {
        Self {
            method,
            respond: Box::new(respond),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Always reports `status` with a fixed latency.
    pub fn fixed(method: ProbeMethod, status: PortState, latency_ms: u64) -> Self {
        Self::new(method, move |_, _, scheme| {
            let scheme = (method != ProbeMethod::SocketHandshake).then_some(scheme);
            Ok::<_, ProbeError>(ProbeResult::new(method, scheme, status, latency_ms, "scripted"))
        })
    }

    /// Always fails without a verdict.
    pub fn broken(method: ProbeMethod) -> Self {
        Self::new(method, |_, _, _| Err(ProbeError::Client("scripted failure".into())))
    }
}

#[async_trait]
impl Probe for FakeProbe {
    fn method(&self) -> ProbeMethod {
        self.method
    }

    async fn attempt(
        &self,
        host: &str,
        port: u16,
        scheme: Scheme,
        _timeout: Duration,
    ) -> Result<ProbeResult, ProbeError> {
        self.calls
            .lock()
            .unwrap()
            .push((host.to_string(), port, scheme));
        (self.respond)(host, port, scheme)
    }
}

/// Probe that panics inside its attempt.
pub struct PanickingProbe(pub ProbeMethod);

#[async_trait]
impl Probe for PanickingProbe {
    fn method(&self) -> ProbeMethod {
        self.0
    }

    async fn attempt(
        &self,
        _host: &str,
        _port: u16,
        _scheme: Scheme,
        _timeout: Duration,
    ) -> Result<ProbeResult, ProbeError> {
        panic!("probe blew up")
    }
}

pub fn classifier(request: FakeProbe, image: FakeProbe, socket: FakeProbe) -> PortClassifier {
    PortClassifier::new(Arc::new(request), Arc::new(image), Arc::new(socket))
}

/// Classifier whose strategies all report `closed` except on the given open ports.
pub fn classifier_open_on(open_ports: &'static [u16]) -> PortClassifier {
    let respond = move |method: ProbeMethod| {
        move |_host: &str, port: u16, scheme: Scheme| {
            let status = if open_ports.contains(&port) {
                PortState::Open
            } else {
                PortState::Closed
            };
            let scheme = (method != ProbeMethod::SocketHandshake).then_some(scheme);
            Ok::<_, ProbeError>(ProbeResult::new(method, scheme, status, 1, "scripted"))
        }
    };
    classifier(
        FakeProbe::new(ProbeMethod::OpaqueRequest, respond(ProbeMethod::OpaqueRequest)),
        FakeProbe::new(ProbeMethod::ImageLoad, respond(ProbeMethod::ImageLoad)),
        FakeProbe::new(ProbeMethod::SocketHandshake, respond(ProbeMethod::SocketHandshake)),
    )
}
