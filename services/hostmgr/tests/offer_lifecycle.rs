//! End-to-end offer lifecycle against the pool: add → acquire → claim →
//! sweep, exercising the state machine the way the placement driver does.

use std::collections::BTreeMap;
use std::sync::Arc;

use armada_api::{
    HostFilter, HostStatus, Offer, ResourceConstraint, ResourceSpec,
};
use armada_hostmgr::pool::{OfferPool, PoolConfig, RankerKind};
use armada_hostmgr::summary::SummaryConfig;
use armada_id::{JobId, OfferId, TaskId};
use chrono::{Duration, Utc};

fn offer(id: &str, hostname: &str, cpu: f64, gpu: f64) -> Offer {
    Offer {
        id: OfferId::from(id),
        hostname: hostname.into(),
        agent_id: hostname.into(),
        resources: ResourceSpec {
            cpu,
            mem_mb: 2048.0,
            disk_mb: 4096.0,
            gpu,
            ports: 8,
        },
        revocable: false,
        attributes: BTreeMap::new(),
        reservation: None,
    }
}

fn filter(cpu: f64, gpu: f64, max_hosts: u32) -> HostFilter {
    HostFilter {
        resource_constraint: ResourceConstraint {
            minimum: ResourceSpec {
                cpu,
                mem_mb: 1024.0,
                gpu,
                ..ResourceSpec::ZERO
            },
            num_ports: 1,
            revocable: false,
        },
        max_hosts,
        ..HostFilter::default()
    }
}

fn gpu_aware_pool() -> OfferPool {
    OfferPool::new(PoolConfig {
        summary: SummaryConfig {
            placing_timeout: Duration::minutes(1),
            held_timeout: Duration::minutes(1),
            scarce_resource_types: vec!["gpu".to_string()],
        },
        offer_hold_time: Duration::minutes(10),
        ranker: RankerKind::FirstFit,
    })
}

#[test]
fn full_acquire_claim_cycle() {
    let pool = gpu_aware_pool();
    let now = Utc::now();

    pool.add_offers(
        vec![
            offer("o1", "cpu-host", 8.0, 0.0),
            offer("o2", "gpu-host", 8.0, 2.0),
        ],
        now,
    );

    // Plain demand skips the GPU host entirely.
    let (matches, counts) = pool.acquire_host_offers(&filter(2.0, 0.0, 10), now).unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].hostname, "cpu-host");
    assert_eq!(counts.get("SCARCE_RESOURCES"), Some(&1));

    // GPU demand lands on the GPU host.
    let (gpu_matches, _) = pool.acquire_host_offers(&filter(2.0, 1.0, 10), now).unwrap();
    assert_eq!(gpu_matches.len(), 1);
    assert_eq!(gpu_matches[0].hostname, "gpu-host");

    // Claim the CPU host's offers and confirm the handshake.
    let task = TaskId::new(JobId::new(), 0);
    let consumed = pool
        .claim_for_launch("cpu-host", matches[0].host_offer_id, &[task])
        .unwrap();
    assert_eq!(consumed.len(), 1);
    assert_eq!(
        pool.summary("cpu-host").unwrap().status(),
        HostStatus::Ready
    );

    // Release the GPU host instead of launching.
    pool.release_host_offers(&gpu_matches);
    assert_eq!(
        pool.summary("gpu-host").unwrap().status(),
        HostStatus::Ready
    );
    assert_eq!(pool.summary("gpu-host").unwrap().ready_count(), 1);
}

#[test]
fn placing_expiry_restores_matching() {
    let pool = gpu_aware_pool();
    let now = Utc::now();
    pool.add_offers(vec![offer("o1", "h1", 4.0, 0.0)], now);

    let (matches, _) = pool.acquire_host_offers(&filter(1.0, 0.0, 1), now).unwrap();
    assert_eq!(matches.len(), 1);

    // While Placing, nothing else can match the host.
    let (empty, counts) = pool.acquire_host_offers(&filter(1.0, 0.0, 1), now).unwrap();
    assert!(empty.is_empty());
    assert_eq!(counts.get("MISMATCH_STATUS"), Some(&1));

    // After the placing timeout the sweep restores the host.
    pool.sweep(now + Duration::minutes(2));
    let summary = pool.summary("h1").unwrap();
    assert_eq!(summary.status(), HostStatus::Ready);
    assert_eq!(summary.ready_count(), 1);
    assert!(summary.host_offer_id().is_none());

    let (again, _) = pool.acquire_host_offers(&filter(1.0, 0.0, 1), now).unwrap();
    assert_eq!(again.len(), 1);
}

#[test]
fn at_most_one_concurrent_match_per_host() {
    let pool = Arc::new(gpu_aware_pool());
    let now = Utc::now();
    pool.add_offers(vec![offer("o1", "h1", 8.0, 0.0)], now);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pool = Arc::clone(&pool);
        handles.push(std::thread::spawn(move || {
            let (matches, _) = pool.acquire_host_offers(&filter(1.0, 0.0, 1), now).unwrap();
            matches.len()
        }));
    }

    let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(total, 1, "exactly one acquirer may win the host");
}
