//! End-to-end flow over the public API: allocate a domain, publish records,
//! resolve them, renew, release, and let the sweep reclaim what expired.

use hermitdns::clock::{Clock, ManualClock};
use hermitdns::config::{Config, StorageConfig, StorageDriver};
use hermitdns::records::{Lifecycle, RecordStore};
use hermitdns::resolver::Resolver;
use hermitdns::TreeStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use trust_dns_server::client::rr::RecordType;

const LEASE: Duration = Duration::from_secs(3600);
const LEASE_NANOS: i64 = 3600 * 1_000_000_000;

struct Harness {
    lifecycle: Arc<Lifecycle>,
    resolver: Resolver,
    clock: Arc<ManualClock>,
}

fn harness() -> Harness {
    let config = Arc::new(Config {
        zones: vec!["lb.example.".to_string()],
        path_prefix: "rdnsv3".to_string(),
        wildcard_bound: 4,
        lease_duration: LEASE,
        sweep_interval: Duration::from_secs(60),
        default_ttl: 300,
        default_priority: 10,
        backend_timeout: Duration::from_secs(5),
        storage: StorageConfig {
            driver: StorageDriver::Memory,
            dsn: None,
        },
        dns_udp_bind_addr: "127.0.0.1:5353".parse().unwrap(),
        dns_tcp_bind_addr: "127.0.0.1:5353".parse().unwrap(),
        dns_tcp_timeout: Duration::from_secs(10),
        api_bind_addr: "127.0.0.1:3000".parse().unwrap(),
        api_timeout: Duration::from_secs(30),
        ns_domain: "ns1.example.".to_string(),
        ns_admin: "dns-admin@example.com".to_string(),
        ns_records: HashMap::new(),
        upstreams: Vec::new(),
    });
    let clock = Arc::new(ManualClock::new(1_000));
    let tree = Arc::new(TreeStore::new("rdnsv3", LEASE, clock.clone()));
    let records = Arc::new(RecordStore::new(
        tree.clone(),
        clock.clone(),
        Duration::from_secs(5),
    ));
    Harness {
        lifecycle: Arc::new(Lifecycle::new(records, config.clone(), clock.clone())),
        resolver: Resolver::new(config, tree),
        clock,
    }
}

#[tokio::test]
async fn published_records_resolve() {
    let h = harness();
    let alloc = h.lifecycle.allocate().await.unwrap();
    h.lifecycle
        .put_domain(
            &alloc.fqdn,
            &alloc.token,
            vec!["1.1.1.1".into(), "3.3.3.3".into()],
            HashMap::from([("sub1".to_string(), vec!["9.9.9.9".to_string()])]),
        )
        .await
        .unwrap();

    let services = h
        .resolver
        .records(&format!("{}.", alloc.fqdn), RecordType::A, false)
        .await
        .unwrap();
    let mut hosts: Vec<&str> = services.iter().map(|s| s.host.as_str()).collect();
    hosts.sort_unstable();
    assert_eq!(hosts, vec!["1.1.1.1", "3.3.3.3"]);

    let services = h
        .resolver
        .records(&format!("sub1.{}.", alloc.fqdn), RecordType::A, false)
        .await
        .unwrap();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].host, "9.9.9.9");
}

#[tokio::test]
async fn wildcard_records_cover_deep_names() {
    let h = harness();
    let alloc = h.lifecycle.allocate().await.unwrap();
    h.lifecycle
        .put_domain(
            &format!("*.{}", alloc.fqdn),
            &alloc.token,
            vec!["1.2.3.4".into()],
            HashMap::new(),
        )
        .await
        .unwrap();

    // With the bound at base labels + 1, any name two or more labels below
    // the domain collapses onto its wildcard answer set.
    for name in [
        format!("foo.bar.{}.", alloc.fqdn),
        format!("w.x.y.z.{}.", alloc.fqdn),
    ] {
        let services = h.resolver.records(&name, RecordType::A, false).await.unwrap();
        assert_eq!(services.len(), 1, "{name}");
        assert_eq!(services[0].host, "1.2.3.4");
        assert_eq!(services[0].priority, 10);
    }
}

#[tokio::test]
async fn challenge_records_serve_txt() {
    let h = harness();
    let alloc = h.lifecycle.allocate().await.unwrap();
    let challenge = format!("_acme-challenge.{}", alloc.fqdn);
    h.lifecycle
        .put_txt(&challenge, &alloc.token, "acme challenge record")
        .await
        .unwrap();

    let services = h
        .resolver
        .records(&format!("{challenge}."), RecordType::TXT, false)
        .await
        .unwrap();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].text, "acme challenge record");

    h.lifecycle
        .put_txt(&challenge, &alloc.token, "acme challenge record updated")
        .await
        .unwrap();
    let services = h
        .resolver
        .records(&format!("{challenge}."), RecordType::TXT, false)
        .await
        .unwrap();
    assert_eq!(services[0].text, "acme challenge record updated");
}

#[tokio::test]
async fn release_makes_names_vanish() {
    let h = harness();
    let alloc = h.lifecycle.allocate().await.unwrap();
    h.lifecycle
        .put_domain(&alloc.fqdn, &alloc.token, vec!["2.2.2.2".into()], HashMap::new())
        .await
        .unwrap();
    h.lifecycle.release(&alloc.fqdn).await.unwrap();

    let err = h
        .resolver
        .records(&format!("{}.", alloc.fqdn), RecordType::A, false)
        .await
        .unwrap_err();
    assert!(err.is_name_error());
}

#[tokio::test]
async fn renewals_outlive_the_original_lease() {
    let h = harness();
    let alloc = h.lifecycle.allocate().await.unwrap();
    h.lifecycle
        .put_domain(&alloc.fqdn, &alloc.token, vec!["2.2.2.2".into()], HashMap::new())
        .await
        .unwrap();

    // Renew halfway through, then cross the original expiry.
    h.clock.advance(LEASE_NANOS / 2);
    h.lifecycle.renew(&alloc.fqdn).await.unwrap();
    h.clock.advance((LEASE_NANOS / 2) + 1);
    h.lifecycle.sweep(h.clock.now_nanos()).await.unwrap();

    let services = h
        .resolver
        .records(&format!("{}.", alloc.fqdn), RecordType::A, false)
        .await
        .unwrap();
    assert_eq!(services.len(), 1);

    // Without further renewals the next sweep reclaims it.
    h.clock.advance(LEASE_NANOS + 1);
    h.lifecycle.sweep(h.clock.now_nanos()).await.unwrap();
    let err = h
        .resolver
        .records(&format!("{}.", alloc.fqdn), RecordType::A, false)
        .await
        .unwrap_err();
    assert!(err.is_name_error());
}
