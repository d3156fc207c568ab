//! The offer pool: every known host's summary, indexed and ranked.
//!
//! Locking: the hostname → summary map sits behind a read-write lock;
//! mutations of the map (new host) take the write lock, everything else
//! reads. Per-host operations go through the summary's own lock once the
//! `Arc` is cloned out, so two hosts never contend. The reverse indexes
//! (offer id → hostname, held task → hostname) have their own locks and are
//! only touched after the summary operation completes — a summary lock is
//! never held while acquiring a pool-level lock.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use armada_api::{
    HostFilter, HostFilterResult, HostInfo, HostOffer, HostQuery, HostStatus, Offer,
};
use armada_id::{HostOfferId, OfferId, TaskId};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::constraints::{Evaluator, LabelEvaluator};
use crate::summary::{HostSummary, SummaryConfig, SummaryError};

/// Errors from pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The filter constrains nothing; matching would hand out every host.
    #[error("host filter is empty")]
    EmptyFilter,

    #[error("unknown host: {0}")]
    UnknownHost(String),

    #[error(transparent)]
    Summary(#[from] SummaryError),
}

/// How hosts are ordered for acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RankerKind {
    /// Stable hostname order; first host that fits wins.
    #[default]
    FirstFit,
    /// Least available supply first, packing work onto already-busy hosts
    /// and keeping large hosts whole.
    Defrag,
}

impl RankerKind {
    /// Parses a ranker name from configuration.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "first_fit" | "firstfit" => Some(Self::FirstFit),
            "defrag" => Some(Self::Defrag),
            _ => None,
        }
    }
}

/// Pool tunables.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub summary: SummaryConfig,

    /// How long an unclaimed offer is kept before being pruned.
    pub offer_hold_time: chrono::Duration,

    pub ranker: RankerKind,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            summary: SummaryConfig::default(),
            offer_hold_time: chrono::Duration::minutes(10),
            ranker: RankerKind::default(),
        }
    }
}

struct RankedCache {
    dirty: bool,
    order: Vec<String>,
}

/// Aggregates host summaries and implements the acquire / claim / release
/// handshake used by placement.
pub struct OfferPool {
    config: PoolConfig,
    hosts: RwLock<HashMap<String, Arc<HostSummary>>>,
    offer_index: Mutex<HashMap<OfferId, String>>,
    held_index: Mutex<HashMap<TaskId, String>>,
    ranked: Mutex<RankedCache>,
    draining: Mutex<HashSet<String>>,
    evaluator: LabelEvaluator,
}

impl OfferPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            hosts: RwLock::new(HashMap::new()),
            offer_index: Mutex::new(HashMap::new()),
            held_index: Mutex::new(HashMap::new()),
            ranked: Mutex::new(RankedCache {
                dirty: false,
                order: Vec::new(),
            }),
            draining: Mutex::new(HashSet::new()),
            evaluator: LabelEvaluator,
        }
    }

    /// Number of hosts the pool knows about.
    pub fn host_count(&self) -> usize {
        self.hosts.read().expect("pool lock poisoned").len()
    }

    /// Summary for a host, if known.
    pub fn summary(&self, hostname: &str) -> Option<Arc<HostSummary>> {
        self.hosts
            .read()
            .expect("pool lock poisoned")
            .get(hostname)
            .cloned()
    }

    fn summary_or_err(&self, hostname: &str) -> Result<Arc<HostSummary>, PoolError> {
        self.summary(hostname)
            .ok_or_else(|| PoolError::UnknownHost(hostname.to_string()))
    }

    fn ensure_summary(&self, hostname: &str) -> Arc<HostSummary> {
        if let Some(summary) = self.summary(hostname) {
            return summary;
        }
        let mut hosts = self.hosts.write().expect("pool lock poisoned");
        hosts
            .entry(hostname.to_string())
            .or_insert_with(|| {
                info!(hostname, "First offer for host, creating summary");
                Arc::new(HostSummary::new(hostname, self.config.summary.clone()))
            })
            .clone()
    }

    fn mark_ranker_dirty(&self) {
        self.ranked.lock().expect("pool lock poisoned").dirty = true;
    }

    fn is_draining(&self, hostname: &str) -> bool {
        self.draining
            .lock()
            .expect("pool lock poisoned")
            .contains(hostname)
    }

    /// Ingests offers from the cluster manager, grouped by host.
    pub fn add_offers(&self, offers: Vec<Offer>, now: DateTime<Utc>) {
        let mut by_host: HashMap<String, Vec<Offer>> = HashMap::new();
        for offer in offers {
            by_host.entry(offer.hostname.clone()).or_default().push(offer);
        }

        for (hostname, host_offers) in by_host {
            if self.is_draining(&hostname) {
                debug!(hostname, count = host_offers.len(), "Dropping offers for draining host");
                continue;
            }
            let ids: Vec<OfferId> = host_offers.iter().map(|o| o.id.clone()).collect();
            let summary = self.ensure_summary(&hostname);
            summary.add_offers(host_offers, now);

            let mut index = self.offer_index.lock().expect("pool lock poisoned");
            for id in ids {
                index.insert(id, hostname.clone());
            }
        }
        self.mark_ranker_dirty();
    }

    /// Removes a single offer, wherever it lives.
    ///
    /// Returns the removed offer; a rescind for an unknown offer is not an
    /// error. The host keeps its status even when the offer was part of an
    /// outstanding placing claim.
    pub fn rescind_offer(&self, offer_id: &OfferId, reason: &str) -> Option<Offer> {
        let hostname = self
            .offer_index
            .lock()
            .expect("pool lock poisoned")
            .remove(offer_id)?;
        let summary = self.summary(&hostname)?;
        let (_, removed) = summary.remove_offer(offer_id, reason);
        self.mark_ranker_dirty();
        removed
    }

    /// Acquires up to `filter.max_hosts` matched hosts in ranked order.
    ///
    /// Returns the matches plus a tally of why the other hosts were passed
    /// over, keyed by filter-result name.
    pub fn acquire_host_offers(
        &self,
        filter: &HostFilter,
        now: DateTime<Utc>,
    ) -> Result<(Vec<HostOffer>, BTreeMap<String, u32>), PoolError> {
        if filter.resource_constraint.minimum.is_zero() && filter.resource_constraint.num_ports == 0
        {
            return Err(PoolError::EmptyFilter);
        }

        let order = self.ranked_hosts();
        let mut matches = Vec::new();
        let mut result_counts: BTreeMap<String, u32> = BTreeMap::new();

        for hostname in order {
            if matches.len() as u32 >= filter.max_hosts {
                break;
            }
            if self.is_draining(&hostname) {
                continue;
            }
            let Some(summary) = self.summary(&hostname) else {
                continue;
            };
            let outcome = summary.try_match(filter, Some(&self.evaluator), now);
            match outcome.result {
                HostFilterResult::Match => {
                    if let Some(host_offer) = outcome.host_offer {
                        matches.push(host_offer);
                    }
                }
                other => {
                    *result_counts.entry(other.as_str().to_string()).or_insert(0) += 1;
                }
            }
        }

        debug!(
            matched = matches.len(),
            passed_over = result_counts.values().sum::<u32>(),
            "Acquired host offers"
        );
        Ok((matches, result_counts))
    }

    /// Reverts previously acquired hosts from Placing back to matching.
    pub fn release_host_offers(&self, host_offers: &[HostOffer]) {
        for host_offer in host_offers {
            let Some(summary) = self.summary(&host_offer.hostname) else {
                warn!(hostname = %host_offer.hostname, "Release for unknown host");
                continue;
            };
            if let Err(error) = summary.return_placing_host() {
                warn!(
                    hostname = %host_offer.hostname,
                    %error,
                    "Failed to return placing host"
                );
            }
        }
        self.mark_ranker_dirty();
    }

    /// Claims a placing session's offers for launch.
    pub fn claim_for_launch(
        &self,
        hostname: &str,
        host_offer_id: HostOfferId,
        task_ids: &[TaskId],
    ) -> Result<Vec<Offer>, PoolError> {
        let summary = self.summary_or_err(hostname)?;
        let consumed = summary.claim_for_launch(host_offer_id, task_ids)?;

        {
            let mut index = self.offer_index.lock().expect("pool lock poisoned");
            for offer in &consumed {
                index.remove(&offer.id);
            }
        }
        {
            let mut held = self.held_index.lock().expect("pool lock poisoned");
            for task in task_ids {
                held.remove(task);
            }
        }
        self.mark_ranker_dirty();
        Ok(consumed)
    }

    /// Holds a host for the given tasks.
    pub fn hold_for_tasks(
        &self,
        hostname: &str,
        task_ids: &[TaskId],
        now: DateTime<Utc>,
    ) -> Result<(), PoolError> {
        let summary = self.summary_or_err(hostname)?;
        for task in task_ids {
            summary.hold_for_task(*task, now)?;
        }
        let mut held = self.held_index.lock().expect("pool lock poisoned");
        for task in task_ids {
            held.insert(*task, hostname.to_string());
        }
        Ok(())
    }

    /// Releases a task's hold, wherever it is.
    pub fn release_hold_for_task(&self, task_id: &TaskId) -> Result<(), PoolError> {
        let hostname = self
            .held_index
            .lock()
            .expect("pool lock poisoned")
            .remove(task_id);
        let Some(hostname) = hostname else {
            return Ok(());
        };
        let summary = self.summary_or_err(&hostname)?;
        summary.release_hold_for_task(task_id)?;
        Ok(())
    }

    /// Host the task currently holds, if any.
    pub fn held_host_for_task(&self, task_id: &TaskId) -> Option<String> {
        self.held_index
            .lock()
            .expect("pool lock poisoned")
            .get(task_id)
            .cloned()
    }

    /// Read-only scan; never changes any host's status.
    pub fn get_hosts_by_query(&self, query: &HostQuery) -> Vec<HostInfo> {
        let hosts = self.hosts.read().expect("pool lock poisoned");
        let mut rows: Vec<HostInfo> = hosts
            .values()
            .filter(|summary| {
                query.hostnames.is_empty()
                    || query.hostnames.iter().any(|h| h == summary.hostname())
            })
            .map(|summary| summary.host_info())
            .filter(|info| match &query.min_resources {
                Some(min) => info.resources.contains(min),
                None => true,
            })
            .collect();
        rows.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        rows
    }

    /// Hosts filtered by status, plus the draining set.
    pub fn query_hosts(&self, statuses: &[HostStatus]) -> (Vec<HostInfo>, Vec<String>) {
        let hosts = self.hosts.read().expect("pool lock poisoned");
        let mut rows: Vec<HostInfo> = hosts
            .values()
            .map(|summary| summary.host_info())
            .filter(|info| statuses.is_empty() || statuses.contains(&info.status))
            .collect();
        rows.sort_by(|a, b| a.hostname.cmp(&b.hostname));

        let mut draining: Vec<String> = self
            .draining
            .lock()
            .expect("pool lock poisoned")
            .iter()
            .cloned()
            .collect();
        draining.sort();
        (rows, draining)
    }

    /// Starts draining hosts for maintenance: stop matching them and drop
    /// their offers in-memory.
    pub fn start_maintenance(&self, hostnames: &[String]) {
        {
            let mut draining = self.draining.lock().expect("pool lock poisoned");
            for hostname in hostnames {
                draining.insert(hostname.clone());
            }
        }
        for hostname in hostnames {
            let Some(summary) = self.summary(hostname) else {
                continue;
            };
            for offer in summary.get_offers(crate::summary::OfferKind::All) {
                summary.remove_offer(&offer.id, "host entering maintenance");
                self.offer_index
                    .lock()
                    .expect("pool lock poisoned")
                    .remove(&offer.id);
            }
            info!(hostname, "Host draining for maintenance");
        }
        self.mark_ranker_dirty();
    }

    /// Completes maintenance; the host matches again once offers arrive.
    pub fn complete_maintenance(&self, hostnames: &[String]) {
        let mut draining = self.draining.lock().expect("pool lock poisoned");
        for hostname in hostnames {
            if draining.remove(hostname) {
                info!(hostname, "Host maintenance complete");
            }
        }
    }

    /// One sweep pass: expire placing statuses and held tasks, prune stale
    /// offers. Returns the tasks whose holds expired so the caller can
    /// signal releases upstream.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<TaskId> {
        let summaries: Vec<Arc<HostSummary>> = {
            let hosts = self.hosts.read().expect("pool lock poisoned");
            hosts.values().cloned().collect()
        };

        let mut expired_tasks = Vec::new();
        let mut changed = false;

        for summary in summaries {
            if summary.reset_expired_placing(now) {
                changed = true;
            }
            let (reset, expired) = summary.reset_expired_held(now);
            if reset {
                changed = true;
                let mut held = self.held_index.lock().expect("pool lock poisoned");
                for task in &expired {
                    held.remove(task);
                }
                expired_tasks.extend(expired);
            }
            let pruned = summary.prune_expired_offers(now, self.config.offer_hold_time);
            if !pruned.is_empty() {
                changed = true;
                let mut index = self.offer_index.lock().expect("pool lock poisoned");
                for id in &pruned {
                    index.remove(id);
                }
            }
        }

        if changed {
            self.mark_ranker_dirty();
        }
        expired_tasks
    }

    /// Host order for acquisition, recomputed lazily after offer churn.
    fn ranked_hosts(&self) -> Vec<String> {
        let mut ranked = self.ranked.lock().expect("pool lock poisoned");
        if ranked.dirty {
            let hosts = self.hosts.read().expect("pool lock poisoned");
            let mut entries: Vec<(String, f64)> = hosts
                .values()
                .map(|summary| {
                    let (supply, _) = summary.unreserved_supply();
                    (summary.hostname().to_string(), supply.total().magnitude())
                })
                .collect();
            match self.config.ranker {
                RankerKind::FirstFit => {
                    entries.sort_by(|a, b| a.0.cmp(&b.0));
                }
                RankerKind::Defrag => {
                    entries.sort_by(|a, b| {
                        a.1.partial_cmp(&b.1)
                            .unwrap_or(std::cmp::Ordering::Equal)
                            .then_with(|| a.0.cmp(&b.0))
                    });
                }
            }
            ranked.order = entries.into_iter().map(|(hostname, _)| hostname).collect();
            ranked.dirty = false;
        }
        ranked.order.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_api::{ResourceConstraint, ResourceSpec};
    use armada_id::JobId;
    use std::collections::BTreeMap as StdBTreeMap;

    fn offer(id: &str, hostname: &str, cpu: f64) -> Offer {
        Offer {
            id: OfferId::from(id),
            hostname: hostname.into(),
            agent_id: hostname.into(),
            resources: ResourceSpec {
                cpu,
                mem_mb: 1024.0,
                disk_mb: 1024.0,
                gpu: 0.0,
                ports: 4,
            },
            revocable: false,
            attributes: StdBTreeMap::new(),
            reservation: None,
        }
    }

    fn cpu_filter(cpu: f64, max_hosts: u32) -> HostFilter {
        HostFilter {
            resource_constraint: ResourceConstraint {
                minimum: ResourceSpec {
                    cpu,
                    ..ResourceSpec::ZERO
                },
                num_ports: 0,
                revocable: false,
            },
            max_hosts,
            ..HostFilter::default()
        }
    }

    fn pool() -> OfferPool {
        OfferPool::new(PoolConfig::default())
    }

    #[test]
    fn test_add_and_rescind_restores_pool() {
        let p = pool();
        let now = Utc::now();
        p.add_offers(
            vec![offer("o1", "h1", 1.0), offer("o2", "h1", 1.0), offer("o3", "h2", 1.0)],
            now,
        );
        assert_eq!(p.host_count(), 2);
        assert_eq!(p.summary("h1").unwrap().ready_count(), 2);

        for id in ["o1", "o2", "o3"] {
            assert!(p.rescind_offer(&OfferId::from(id), "test").is_some());
        }
        assert_eq!(p.summary("h1").unwrap().ready_count(), 0);
        assert_eq!(p.summary("h2").unwrap().ready_count(), 0);

        // Unknown rescind is a no-op.
        assert!(p.rescind_offer(&OfferId::from("o1"), "again").is_none());
    }

    #[test]
    fn test_acquire_rejects_empty_filter() {
        let p = pool();
        let err = p
            .acquire_host_offers(&HostFilter::default(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, PoolError::EmptyFilter));
    }

    #[test]
    fn test_acquire_up_to_max_hosts() {
        let p = pool();
        let now = Utc::now();
        p.add_offers(
            vec![offer("o1", "h1", 2.0), offer("o2", "h2", 2.0), offer("o3", "h3", 2.0)],
            now,
        );

        let (matches, _) = p.acquire_host_offers(&cpu_filter(1.0, 2), now).unwrap();
        assert_eq!(matches.len(), 2);
        for m in &matches {
            let summary = p.summary(&m.hostname).unwrap();
            assert_eq!(summary.status(), HostStatus::Placing);
        }

        // The third host is still available.
        let (more, _) = p.acquire_host_offers(&cpu_filter(1.0, 2), now).unwrap();
        assert_eq!(more.len(), 1);
    }

    #[test]
    fn test_acquire_tallies_mismatches() {
        let p = pool();
        let now = Utc::now();
        p.add_offers(vec![offer("o1", "h1", 0.5)], now);

        let (matches, counts) = p.acquire_host_offers(&cpu_filter(1.0, 5), now).unwrap();
        assert!(matches.is_empty());
        assert_eq!(counts.get("INSUFFICIENT_OFFER_RESOURCES"), Some(&1));
    }

    #[test]
    fn test_release_returns_hosts_to_ready() {
        let p = pool();
        let now = Utc::now();
        p.add_offers(vec![offer("o1", "h1", 2.0)], now);

        let (matches, _) = p.acquire_host_offers(&cpu_filter(1.0, 1), now).unwrap();
        assert_eq!(matches.len(), 1);
        p.release_host_offers(&matches);
        assert_eq!(p.summary("h1").unwrap().status(), HostStatus::Ready);
        assert_eq!(p.summary("h1").unwrap().ready_count(), 1);
    }

    #[test]
    fn test_claim_for_launch_consumes_offers() {
        let p = pool();
        let now = Utc::now();
        p.add_offers(vec![offer("o1", "h1", 2.0)], now);

        let (matches, _) = p.acquire_host_offers(&cpu_filter(1.0, 1), now).unwrap();
        let host_offer = &matches[0];
        let task = TaskId::new(JobId::new(), 0);
        let consumed = p
            .claim_for_launch("h1", host_offer.host_offer_id, &[task])
            .unwrap();
        assert_eq!(consumed.len(), 1);
        assert_eq!(p.summary("h1").unwrap().status(), HostStatus::Ready);

        // The offer id no longer resolves.
        assert!(p.rescind_offer(&OfferId::from("o1"), "late rescind").is_none());
    }

    #[test]
    fn test_claim_with_wrong_id_is_noop() {
        let p = pool();
        let now = Utc::now();
        p.add_offers(vec![offer("o1", "h1", 2.0)], now);
        p.acquire_host_offers(&cpu_filter(1.0, 1), now).unwrap();

        let err = p
            .claim_for_launch("h1", HostOfferId::new(), &[])
            .unwrap_err();
        assert!(matches!(
            err,
            PoolError::Summary(SummaryError::HostOfferIdMismatch)
        ));
        assert_eq!(p.summary("h1").unwrap().status(), HostStatus::Placing);
    }

    #[test]
    fn test_hold_and_release_via_index() {
        let p = pool();
        let now = Utc::now();
        p.add_offers(vec![offer("o1", "h1", 2.0)], now);

        let task = TaskId::new(JobId::new(), 3);
        p.hold_for_tasks("h1", &[task], now).unwrap();
        assert_eq!(p.held_host_for_task(&task), Some("h1".to_string()));
        assert_eq!(p.summary("h1").unwrap().status(), HostStatus::Held);

        p.release_hold_for_task(&task).unwrap();
        assert_eq!(p.held_host_for_task(&task), None);
        assert_eq!(p.summary("h1").unwrap().status(), HostStatus::Ready);
    }

    #[test]
    fn test_maintenance_drains_host() {
        let p = pool();
        let now = Utc::now();
        p.add_offers(vec![offer("o1", "h1", 2.0), offer("o2", "h2", 2.0)], now);

        p.start_maintenance(&["h1".to_string()]);

        // Draining host no longer matches and new offers are dropped.
        let (matches, _) = p.acquire_host_offers(&cpu_filter(1.0, 5), now).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].hostname, "h2");

        p.add_offers(vec![offer("o3", "h1", 2.0)], now);
        assert_eq!(p.summary("h1").unwrap().ready_count(), 0);

        let (_, draining) = p.query_hosts(&[]);
        assert_eq!(draining, vec!["h1".to_string()]);

        p.complete_maintenance(&["h1".to_string()]);
        p.add_offers(vec![offer("o4", "h1", 2.0)], now);
        assert_eq!(p.summary("h1").unwrap().ready_count(), 1);
    }

    #[test]
    fn test_sweep_expires_placing() {
        let p = pool();
        let now = Utc::now();
        p.add_offers(vec![offer("o1", "h1", 2.0)], now);
        p.acquire_host_offers(&cpu_filter(1.0, 1), now).unwrap();
        assert_eq!(p.summary("h1").unwrap().status(), HostStatus::Placing);

        // Before the timeout nothing changes.
        p.sweep(now);
        assert_eq!(p.summary("h1").unwrap().status(), HostStatus::Placing);

        let later = now + chrono::Duration::minutes(6);
        p.sweep(later);
        let summary = p.summary("h1").unwrap();
        assert_eq!(summary.status(), HostStatus::Ready);
        assert_eq!(summary.ready_count(), 1);
        assert!(summary.host_offer_id().is_none());
    }

    #[test]
    fn test_sweep_reports_expired_holds() {
        let p = pool();
        let now = Utc::now();
        p.add_offers(vec![offer("o1", "h1", 2.0)], now);

        let task = TaskId::new(JobId::new(), 1);
        p.hold_for_tasks("h1", &[task], now).unwrap();

        let later = now + chrono::Duration::minutes(10);
        let expired = p.sweep(later);
        assert_eq!(expired, vec![task]);
        assert_eq!(p.held_host_for_task(&task), None);
        assert_eq!(p.summary("h1").unwrap().status(), HostStatus::Ready);
    }

    #[test]
    fn test_defrag_ranker_prefers_smaller_hosts() {
        let p = OfferPool::new(PoolConfig {
            ranker: RankerKind::Defrag,
            ..PoolConfig::default()
        });
        let now = Utc::now();
        p.add_offers(vec![offer("o1", "big", 16.0), offer("o2", "small", 2.0)], now);

        let (matches, _) = p.acquire_host_offers(&cpu_filter(1.0, 1), now).unwrap();
        assert_eq!(matches[0].hostname, "small");
    }

    #[test]
    fn test_get_hosts_by_query_is_read_only() {
        let p = pool();
        let now = Utc::now();
        p.add_offers(vec![offer("o1", "h1", 4.0), offer("o2", "h2", 1.0)], now);

        let rows = p.get_hosts_by_query(&HostQuery {
            min_resources: Some(ResourceSpec {
                cpu: 2.0,
                ..ResourceSpec::ZERO
            }),
            hostnames: vec![],
        });
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].hostname, "h1");
        assert_eq!(p.summary("h1").unwrap().status(), HostStatus::Ready);
    }

    #[test]
    fn test_concurrent_add_and_acquire() {
        let p = Arc::new(pool());
        let now = Utc::now();

        let mut handles = Vec::new();
        for i in 0..8 {
            let p = Arc::clone(&p);
            handles.push(std::thread::spawn(move || {
                let hostname = format!("h{}", i % 4);
                let id = format!("offer-{i}");
                p.add_offers(vec![offer(&id, &hostname, 2.0)], now);
                let _ = p.acquire_host_offers(&cpu_filter(1.0, 1), now);
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(p.host_count(), 4);
    }
}
