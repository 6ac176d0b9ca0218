mod common;

use std::sync::Mutex;
use std::time::Duration;

use common::classifier_open_on;
use lan_probe_rs::error::ScanError;
use lan_probe_rs::scanner::{scan_host, scan_subnet, SubnetPrefix};
use lan_probe_rs::types::{PortState, Progress};

const T: Duration = Duration::from_millis(50);

#[tokio::test]
async fn host_scan_keeps_every_finding_in_port_order() {
    let c = classifier_open_on(&[80]);
    let seen = Mutex::new(Vec::new());
    let report = scan_host(&c, "127.0.0.1", &[22, 80, 443], T, |p| {
        seen.lock().unwrap().push(p.completed)
    })
    .await
    .unwrap();

    assert_eq!(report.target, "127.0.0.1");
    assert_eq!(report.hosts.len(), 1);
    let findings = &report.hosts[0].findings;
    let ports: Vec<u16> = findings.iter().map(|f| f.port).collect();
    assert_eq!(ports, vec![22, 80, 443]);
    assert_eq!(findings[1].state, PortState::Open);
    assert_eq!(findings[0].state, PortState::Closed);
    assert_eq!(report.open_count, 1);
    assert_eq!(report.filtered_count, 0);
    assert_eq!(seen.into_inner().unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn subnet_scan_covers_254_hosts_and_drops_closed() {
    let c = classifier_open_on(&[8080]);
    let last = Mutex::new(Progress::default());
    let prefix = SubnetPrefix::parse("10.9.8.").unwrap();

    let report = scan_subnet(&c, prefix, &[22, 8080], 16, T, |p| {
        *last.lock().unwrap() = p;
    })
    .await
    .unwrap();

    assert_eq!(report.target, "10.9.8.");
    assert_eq!(report.hosts.len(), 254);
    assert_eq!(report.hosts[0].host, "10.9.8.1");
    assert_eq!(report.hosts[253].host, "10.9.8.254");
    for h in &report.hosts {
        assert_eq!(h.findings.len(), 1, "{}", h.host);
        assert_eq!(h.findings[0].port, 8080);
    }
    assert_eq!(report.open_count, 254);
    assert_eq!(
        last.into_inner().unwrap(),
        Progress {
            completed: 254,
            total: 254
        }
    );
}

#[tokio::test]
async fn empty_port_list_is_rejected_before_scanning() {
    let c = classifier_open_on(&[]);
    let prefix = SubnetPrefix::parse("10.9.8.").unwrap();
    let err = scan_subnet(&c, prefix, &[], 4, T, |_| {}).await.unwrap_err();
    assert_eq!(err, ScanError::NoPorts);
    let err = scan_host(&c, "h", &[], T, |_| {}).await.unwrap_err();
    assert_eq!(err, ScanError::NoPorts);
}
