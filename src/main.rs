use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lan_probe_rs::classifier::PortClassifier;
use lan_probe_rs::config::{self, ScanConfig};
use lan_probe_rs::netdetect::{self, AddressSource, InterfaceSource, RouteSource};
use lan_probe_rs::scanner::{self, SubnetPrefix};
use lan_probe_rs::server::{self, AppState};
use lan_probe_rs::types::{Progress, ScanReport};
use lan_probe_rs::ports;

/// lan-probe-rs: infer open/filtered/closed ports from HTTP, image-fetch and WebSocket probes.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "lan-probe-rs",
    version,
    about = "Infer open/filtered/closed ports on a host or a /24 using HTTP, image-fetch and WebSocket probes.",
    long_about = None
)]
struct Cli {
    /// Single host to scan. Defaults to 127.0.0.1 when no subnet is requested.
    #[arg(long, conflicts_with_all = ["prefix", "subnet"])]
    host: Option<String>,

    /// Subnet prefix to sweep, written like `192.168.1.` (hosts .1-.254).
    #[arg(long)]
    prefix: Option<String>,

    /// Sweep the /24 of the first discovered local address.
    #[arg(long, default_value_t = false)]
    subnet: bool,

    /// Comma-separated ports, e.g. `80,443,8080`.
    #[arg(long)]
    ports: Option<String>,

    /// File with ports (commas or newlines, `#` comments). Used when --ports is absent.
    #[arg(long = "ports-file")]
    ports_file: Option<PathBuf>,

    /// Hosts scanned in parallel during a subnet sweep (1-256).
    #[arg(long, default_value_t = config::DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Per-probe timeout in milliseconds (default 1200 for a host, 900 for a subnet).
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// Write results as pretty JSON to this path (optional).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Serve the JSON API instead of running a one-shot scan.
    #[arg(long = "serve-ui", default_value_t = false)]
    serve_ui: bool,

    /// Bind address for --serve-ui.
    #[arg(long, default_value = config::DEFAULT_BIND)]
    bind: String,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG wins when set.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = ScanConfig::default().with_overrides(Some(cli.concurrency), cli.timeout_ms);
    let classifier = PortClassifier::with_default_probes().context("failed to build probes")?;

    if cli.serve_ui {
        let sources: Vec<Arc<dyn AddressSource>> =
            vec![Arc::new(InterfaceSource), Arc::new(RouteSource::default())];
        let state = AppState::new(classifier, cfg, sources);
        let bind = cli.bind.clone();
        tokio::select! {
            res = server::spawn_server(&bind, state) => res?,
            _ = tokio::signal::ctrl_c() => info!("shutting down"),
        }
        return Ok(ExitCode::SUCCESS);
    }

    let requested_ports = match (&cli.ports, &cli.ports_file) {
        (Some(text), _) => ports::parse_ports(text),
        (None, Some(path)) => ports::load_ports_from_path(path)?,
        (None, None) => ports::default_ports(),
    };
    if requested_ports.is_empty() {
        eprintln!("No valid ports given (expected values between 1 and 65535).");
        return Ok(ExitCode::from(2));
    }

    let prefix = if let Some(p) = cli.prefix.as_deref() {
        match SubnetPrefix::parse(p) {
            Ok(prefix) => Some(prefix),
            Err(e) => {
                eprintln!("{e}");
                return Ok(ExitCode::from(2));
            }
        }
    } else if cli.subnet {
        let found = netdetect::discover_local_addresses(Some(cfg.discovery_window)).await;
        match found.first() {
            Some(ip) => {
                if found.len() > 1 {
                    println!("Found {ip} (and {} more)", found.len() - 1);
                } else {
                    println!("Found {ip}");
                }
                Some(SubnetPrefix::from_address(*ip))
            }
            None => {
                eprintln!(
                    "Could not discover a local IPv4 address. Pass the subnet prefix manually, e.g. --prefix 192.168.1."
                );
                return Ok(ExitCode::from(2));
            }
        }
    } else {
        None
    };

    let report = match prefix {
        Some(prefix) => {
            println!(
                "Sweeping {prefix}1-254 on {} port(s), concurrency {}...",
                requested_ports.len(),
                cfg.concurrency
            );
            scanner::scan_subnet(
                &classifier,
                prefix,
                &requested_ports,
                cfg.concurrency,
                cfg.subnet_timeout,
                print_progress,
            )
            .await?
        }
        None => {
            let host = cli.host.as_deref().unwrap_or("127.0.0.1");
            scanner::scan_host(&classifier, host, &requested_ports, cfg.timeout, |_| {}).await?
        }
    };

    print_results_table(&report);
    if let Some(path) = cli.output.as_deref() {
        match write_results_json(path, &report) {
            Ok(()) => println!("Wrote JSON results to {}", path.display()),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to write JSON"),
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();
}

fn print_progress(p: Progress) {
    if p.completed == p.total || p.completed % 25 == 0 {
        eprintln!("  progress: {}/{} hosts", p.completed, p.total);
    }
}

fn print_results_table(report: &ScanReport) {
    let rows: Vec<_> = report.hosts.iter().flat_map(|h| h.findings.iter()).collect();

    let mut host_w = "host".len();
    let mut via_w = "via".len();
    for f in &rows {
        host_w = host_w.max(f.host.len());
        let via = match f.scheme {
            Some(s) => format!("{}/{}", f.via, s),
            None => f.via.to_string(),
        };
        via_w = via_w.max(via.len());
    }
    let port_w = 5usize;
    let state_w = "filtered".len();
    let lat_w = "latency_ms".len();

    println!(
        "\n{}: open {}, filtered {} (ports: {})",
        report.target,
        report.open_count,
        report.filtered_count,
        report.ports.len()
    );
    if rows.is_empty() {
        println!("nothing found");
        return;
    }
    println!(
        "{:<host_w$}  {:>port_w$}  {:<state_w$}  {:<via_w$}  {:>lat_w$}  detail",
        "host", "port", "state", "via", "latency_ms",
    );
    println!(
        "{:-<host_w$}  {:-<port_w$}  {:-<state_w$}  {:-<via_w$}  {:-<lat_w$}  ------",
        "", "", "", "", "",
    );
    for f in rows {
        let via = match f.scheme {
            Some(s) => format!("{}/{}", f.via, s),
            None => f.via.to_string(),
        };
        let latency = f
            .latency_ms
            .map(|l| l.to_string())
            .unwrap_or_else(|| "?".to_string());
        println!(
            "{:<host_w$}  {:>port_w$}  {:<state_w$}  {:<via_w$}  {:>lat_w$}  {}",
            f.host,
            f.port,
            f.state.to_string(),
            via,
            latency,
            f.detail,
        );
    }
}

fn write_results_json(path: &Path, report: &ScanReport) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}
