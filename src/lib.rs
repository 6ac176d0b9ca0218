//! Library crate for lan-probe-rs: port-state inference from HTTP, image-fetch
//! and WebSocket probes, a bounded task runner, and local address discovery.
pub mod classifier;
pub mod config;
pub mod error;
pub mod netdetect;
pub mod ports;
pub mod probe;
pub mod runner;
pub mod scanner;
pub mod server;
pub mod timeout;
pub mod types;
