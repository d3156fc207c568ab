//! Per-host offer summary and status state machine.
//!
//! A summary aggregates the unreserved and reserved offers of one host and
//! drives its status through Ready ↔ Placing ↔ Held ↔ Reserved. Matching
//! and claiming are atomic with respect to the status: at most one caller
//! can win a Ready→Placing transition, and only the holder of the minted
//! host-offer id can claim the placed offers for launch.
//!
//! `ready_count` mirrors the number of unreserved offers available for
//! matching and is zero whenever the status is Placing or Reserved.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use armada_api::{HostFilter, HostFilterResult, HostInfo, HostOffer, HostStatus, Offer};
use armada_fsm::TransitionTable;
use armada_id::{HostOfferId, OfferId, TaskId};
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::constraints::{Evaluator, HostLabelValues};
use crate::matcher::match_host_filter;
use crate::scalar::UnreservedSupply;

/// Errors from summary operations.
#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("host status is not Placing")]
    NotPlacing { status: HostStatus },

    #[error("host offer id does not match")]
    HostOfferIdMismatch,

    #[error("cannot hold a host in {status} status")]
    InvalidStatusForHold { status: HostStatus },

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: HostStatus, to: HostStatus },
}

/// Tunables shared by every summary in the pool.
#[derive(Debug, Clone)]
pub struct SummaryConfig {
    /// How long a host may sit in Placing before the sweep reverts it.
    pub placing_timeout: Duration,

    /// How long a held-for-task entry survives without a launch.
    pub held_timeout: Duration,

    /// Resource types whose hosts are exclusive to demand requesting them.
    pub scarce_resource_types: Vec<String>,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            placing_timeout: Duration::minutes(5),
            held_timeout: Duration::minutes(3),
            scarce_resource_types: Vec::new(),
        }
    }
}

/// Which offers a read should cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferKind {
    Unreserved,
    Reserved,
    All,
}

/// Outcome of a `try_match` call.
#[derive(Debug)]
pub struct TryMatchResult {
    pub result: HostFilterResult,

    /// Present only on `Match`: the minted placing session and the offers
    /// snapshot handed to the caller.
    pub host_offer: Option<HostOffer>,
}

struct OfferEntry {
    offer: Offer,
    added_at: DateTime<Utc>,
}

struct SummaryState {
    status: HostStatus,
    host_offer_id: Option<HostOfferId>,
    unreserved: HashMap<OfferId, OfferEntry>,
    reserved: HashMap<OfferId, OfferEntry>,
    held_tasks: HashMap<TaskId, DateTime<Utc>>,
    placing_expiration: Option<DateTime<Utc>>,
}

/// Summary of one host's offers and placement status.
pub struct HostSummary {
    hostname: String,
    config: SummaryConfig,
    ready_count: AtomicI32,
    state: Mutex<SummaryState>,
    status_table: Arc<TransitionTable<HostStatus>>,
}

fn status_table() -> Arc<TransitionTable<HostStatus>> {
    TransitionTable::builder()
        .allow(HostStatus::Ready, HostStatus::Placing)
        .allow(HostStatus::Placing, HostStatus::Ready)
        .allow(HostStatus::Placing, HostStatus::Held)
        .allow(HostStatus::Ready, HostStatus::Held)
        .allow(HostStatus::Held, HostStatus::Ready)
        .allow(HostStatus::Held, HostStatus::Placing)
        .allow_from(
            &[HostStatus::Ready, HostStatus::Placing, HostStatus::Held],
            HostStatus::Reserved,
        )
        .allow(HostStatus::Reserved, HostStatus::Ready)
        .build()
}

impl HostSummary {
    /// Creates an empty summary for a host.
    pub fn new(hostname: impl Into<String>, config: SummaryConfig) -> Self {
        Self {
            hostname: hostname.into(),
            config,
            ready_count: AtomicI32::new(0),
            state: Mutex::new(SummaryState {
                status: HostStatus::Ready,
                host_offer_id: None,
                unreserved: HashMap::new(),
                reserved: HashMap::new(),
                held_tasks: HashMap::new(),
                placing_expiration: None,
            }),
            status_table: status_table(),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn status(&self) -> HostStatus {
        self.state.lock().expect("summary lock poisoned").status
    }

    pub fn host_offer_id(&self) -> Option<HostOfferId> {
        self.state
            .lock()
            .expect("summary lock poisoned")
            .host_offer_id
    }

    /// Number of unreserved offers available for matching.
    pub fn ready_count(&self) -> i32 {
        self.ready_count.load(Ordering::SeqCst)
    }

    /// Whether any unreserved offer is present.
    pub fn has_offer(&self) -> bool {
        !self
            .state
            .lock()
            .expect("summary lock poisoned")
            .unreserved
            .is_empty()
    }

    /// Whether any offer, reserved or not, is present.
    pub fn has_any_offer(&self) -> bool {
        let state = self.state.lock().expect("summary lock poisoned");
        !state.unreserved.is_empty() || !state.reserved.is_empty()
    }

    /// Tasks currently holding this host.
    pub fn held_tasks(&self) -> Vec<TaskId> {
        self.state
            .lock()
            .expect("summary lock poisoned")
            .held_tasks
            .keys()
            .copied()
            .collect()
    }

    /// Adds offers to the summary, returning the status after the add.
    pub fn add_offers(&self, offers: Vec<Offer>, now: DateTime<Utc>) -> HostStatus {
        let mut state = self.state.lock().expect("summary lock poisoned");
        for offer in offers {
            let entry = OfferEntry {
                added_at: now,
                offer,
            };
            if entry.offer.is_reserved() {
                state.reserved.insert(entry.offer.id.clone(), entry);
            } else {
                state.unreserved.insert(entry.offer.id.clone(), entry);
            }
        }
        self.refresh_ready_count(&state);
        state.status
    }

    /// Removes one offer by id, returning the status and the removed offer.
    ///
    /// Removing an offer from a Placing host does not change its status;
    /// the outstanding claim simply sees fewer offers.
    pub fn remove_offer(&self, offer_id: &OfferId, reason: &str) -> (HostStatus, Option<Offer>) {
        let mut state = self.state.lock().expect("summary lock poisoned");
        let removed = state
            .unreserved
            .remove(offer_id)
            .or_else(|| state.reserved.remove(offer_id))
            .map(|entry| entry.offer);
        if removed.is_some() {
            debug!(
                hostname = %self.hostname,
                offer_id = %offer_id,
                reason,
                "Removed offer"
            );
            self.refresh_ready_count(&state);
        }
        (state.status, removed)
    }

    /// Aggregate unreserved supply and the current status, read together.
    pub fn unreserved_supply(&self) -> (UnreservedSupply, HostStatus) {
        let state = self.state.lock().expect("summary lock poisoned");
        let supply = UnreservedSupply::from_offers(state.unreserved.values().map(|e| &e.offer));
        (supply, state.status)
    }

    /// Snapshot of offers of the given kind.
    pub fn get_offers(&self, kind: OfferKind) -> Vec<Offer> {
        let state = self.state.lock().expect("summary lock poisoned");
        let mut offers = Vec::new();
        if matches!(kind, OfferKind::Unreserved | OfferKind::All) {
            offers.extend(state.unreserved.values().map(|e| e.offer.clone()));
        }
        if matches!(kind, OfferKind::Reserved | OfferKind::All) {
            offers.extend(state.reserved.values().map(|e| e.offer.clone()));
        }
        offers
    }

    /// Matches the filter against this host and, on success, atomically
    /// transitions to Placing and mints a fresh host-offer id.
    ///
    /// A Placing or Reserved host never matches. A Held host matches only
    /// when the filter's hint names it.
    pub fn try_match(
        &self,
        filter: &HostFilter,
        evaluator: Option<&dyn Evaluator>,
        now: DateTime<Utc>,
    ) -> TryMatchResult {
        let mut state = self.state.lock().expect("summary lock poisoned");

        match state.status {
            HostStatus::Placing | HostStatus::Reserved => {
                return TryMatchResult {
                    result: HostFilterResult::MismatchStatus,
                    host_offer: None,
                };
            }
            HostStatus::Held => {
                let hinted = filter
                    .hint
                    .as_ref()
                    .is_some_and(|hint| hint.names(&self.hostname));
                if !hinted {
                    return TryMatchResult {
                        result: HostFilterResult::MismatchStatus,
                        host_offer: None,
                    };
                }
            }
            HostStatus::Ready => {}
        }

        let offers: Vec<Offer> = state.unreserved.values().map(|e| e.offer.clone()).collect();
        let labels = host_labels(&offers);
        let result = match_host_filter(
            &offers,
            filter,
            evaluator,
            &labels,
            &self.config.scarce_resource_types,
        );
        if result != HostFilterResult::Match {
            return TryMatchResult {
                result,
                host_offer: None,
            };
        }

        let host_offer_id = HostOfferId::new();
        state.status = HostStatus::Placing;
        state.host_offer_id = Some(host_offer_id);
        state.placing_expiration = Some(now + self.config.placing_timeout);
        self.ready_count.store(0, Ordering::SeqCst);

        debug!(
            hostname = %self.hostname,
            host_offer_id = %host_offer_id,
            offer_count = offers.len(),
            "Host matched, transitioned to Placing"
        );

        TryMatchResult {
            result: HostFilterResult::Match,
            host_offer: Some(HostOffer {
                hostname: self.hostname.clone(),
                host_offer_id,
                offers,
            }),
        }
    }

    /// Claims the placed unreserved offers for launch.
    ///
    /// Accepted only while Placing and only with the matching host-offer id;
    /// a mismatch is an error without side effect. On success the consumed
    /// offers are removed and the host lands on Held when claimed-away tasks
    /// leave other holds outstanding, Ready otherwise.
    pub fn claim_for_launch(
        &self,
        host_offer_id: HostOfferId,
        claimed_tasks: &[TaskId],
    ) -> Result<Vec<Offer>, SummaryError> {
        let mut state = self.state.lock().expect("summary lock poisoned");

        if state.status != HostStatus::Placing {
            return Err(SummaryError::NotPlacing {
                status: state.status,
            });
        }
        if state.host_offer_id != Some(host_offer_id) {
            return Err(SummaryError::HostOfferIdMismatch);
        }

        let consumed: Vec<Offer> = state
            .unreserved
            .drain()
            .map(|(_, entry)| entry.offer)
            .collect();

        for task in claimed_tasks {
            state.held_tasks.remove(task);
        }

        state.status = if state.held_tasks.is_empty() {
            HostStatus::Ready
        } else {
            HostStatus::Held
        };
        state.host_offer_id = None;
        state.placing_expiration = None;
        self.refresh_ready_count(&state);

        info!(
            hostname = %self.hostname,
            consumed = consumed.len(),
            status = %state.status,
            "Claimed offers for launch"
        );

        Ok(consumed)
    }

    /// Claims every reserved offer for a stateful launch.
    ///
    /// Reserved offers are bound to their reservation rather than a placing
    /// session, so no host-offer id handshake applies and the status and
    /// ready count are untouched.
    pub fn claim_reserved_for_launch(&self) -> Vec<Offer> {
        let mut state = self.state.lock().expect("summary lock poisoned");
        state
            .reserved
            .drain()
            .map(|(_, entry)| entry.offer)
            .collect()
    }

    /// Records that a task wants this host kept for later placement.
    pub fn hold_for_task(&self, task_id: TaskId, now: DateTime<Utc>) -> Result<(), SummaryError> {
        let mut state = self.state.lock().expect("summary lock poisoned");
        if state.status == HostStatus::Reserved {
            return Err(SummaryError::InvalidStatusForHold {
                status: state.status,
            });
        }
        state
            .held_tasks
            .insert(task_id, now + self.config.held_timeout);
        if state.status == HostStatus::Ready {
            state.status = HostStatus::Held;
        }
        Ok(())
    }

    /// Drops a task's hold. The host returns to Ready when the held set
    /// drains and nothing else pins the status.
    pub fn release_hold_for_task(&self, task_id: &TaskId) -> Result<(), SummaryError> {
        let mut state = self.state.lock().expect("summary lock poisoned");
        state.held_tasks.remove(task_id);
        if state.status == HostStatus::Held && state.held_tasks.is_empty() {
            state.status = HostStatus::Ready;
        }
        Ok(())
    }

    /// Returns a Placing host without launching.
    ///
    /// Lands on Held when tasks still hold the host, Ready otherwise.
    pub fn return_placing_host(&self) -> Result<(), SummaryError> {
        let mut state = self.state.lock().expect("summary lock poisoned");
        if state.status != HostStatus::Placing {
            return Err(SummaryError::NotPlacing {
                status: state.status,
            });
        }
        state.status = if state.held_tasks.is_empty() {
            HostStatus::Ready
        } else {
            HostStatus::Held
        };
        state.host_offer_id = None;
        state.placing_expiration = None;
        self.refresh_ready_count(&state);
        Ok(())
    }

    /// Reverts an expired Placing status back to Ready (or Held).
    ///
    /// Declines when `ready_count` is nonzero: that means the Placing
    /// invariant was already broken elsewhere, and resetting on top of it
    /// would compound the damage.
    pub fn reset_expired_placing(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock().expect("summary lock poisoned");
        if state.status != HostStatus::Placing {
            return false;
        }
        let expired = state.placing_expiration.is_some_and(|exp| exp <= now);
        if !expired || self.ready_count.load(Ordering::SeqCst) != 0 {
            return false;
        }

        state.status = if state.held_tasks.is_empty() {
            HostStatus::Ready
        } else {
            HostStatus::Held
        };
        state.host_offer_id = None;
        state.placing_expiration = None;
        self.refresh_ready_count(&state);

        warn!(
            hostname = %self.hostname,
            status = %state.status,
            "Placing status expired, host returned to matching"
        );
        true
    }

    /// Drops held-task entries past their deadline.
    ///
    /// Returns whether anything expired and the expired task ids so the
    /// caller can signal their releases. The status downgrades Held → Ready
    /// only when the held set drains; a Placing host keeps its status.
    pub fn reset_expired_held(&self, now: DateTime<Utc>) -> (bool, Vec<TaskId>) {
        let mut state = self.state.lock().expect("summary lock poisoned");
        let expired: Vec<TaskId> = state
            .held_tasks
            .iter()
            .filter(|(_, exp)| **exp <= now)
            .map(|(task, _)| *task)
            .collect();
        for task in &expired {
            state.held_tasks.remove(task);
        }
        if !expired.is_empty() && state.status == HostStatus::Held && state.held_tasks.is_empty() {
            state.status = HostStatus::Ready;
        }
        (!expired.is_empty(), expired)
    }

    /// Removes unreserved offers held longer than `hold_time`.
    ///
    /// A Placing host is skipped: its offers belong to the outstanding
    /// claim until it completes or expires.
    pub fn prune_expired_offers(&self, now: DateTime<Utc>, hold_time: Duration) -> Vec<OfferId> {
        let mut state = self.state.lock().expect("summary lock poisoned");
        if state.status == HostStatus::Placing {
            return Vec::new();
        }
        let expired: Vec<OfferId> = state
            .unreserved
            .iter()
            .filter(|(_, entry)| entry.added_at + hold_time <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            state.unreserved.remove(id);
        }
        if !expired.is_empty() {
            self.refresh_ready_count(&state);
        }
        expired
    }

    /// Marks the host Reserved once a create-op ties its offers to a
    /// persistent volume.
    pub fn mark_reserved(&self) -> Result<(), SummaryError> {
        let mut state = self.state.lock().expect("summary lock poisoned");
        let from = state.status;
        if !self.status_table.allows(from, HostStatus::Reserved) {
            return Err(SummaryError::InvalidTransition {
                from,
                to: HostStatus::Reserved,
            });
        }
        state.status = HostStatus::Reserved;
        state.host_offer_id = None;
        state.placing_expiration = None;
        self.refresh_ready_count(&state);
        Ok(())
    }

    /// Host row for query responses.
    pub fn host_info(&self) -> HostInfo {
        let state = self.state.lock().expect("summary lock poisoned");
        let supply = UnreservedSupply::from_offers(state.unreserved.values().map(|e| &e.offer));
        HostInfo {
            hostname: self.hostname.clone(),
            status: state.status,
            resources: supply.total(),
            held_tasks: state.held_tasks.keys().map(|t| t.to_string()).collect(),
        }
    }

    fn refresh_ready_count(&self, state: &SummaryState) {
        let count = match state.status {
            HostStatus::Placing | HostStatus::Reserved => 0,
            HostStatus::Ready | HostStatus::Held => state.unreserved.len() as i32,
        };
        self.ready_count.store(count, Ordering::SeqCst);
    }
}

/// Union of host attributes across the host's offers.
fn host_labels(offers: &[Offer]) -> HostLabelValues {
    let mut merged: HashMap<(String, String), u32> = HashMap::new();
    for offer in offers {
        for (key, value) in &offer.attributes {
            merged.entry((key.clone(), value.clone())).or_insert(1);
        }
    }
    HostLabelValues {
        host_labels: merged,
        task_labels: HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_api::{ResourceConstraint, ResourceSpec};
    use armada_id::JobId;
    use std::collections::BTreeMap;

    fn unreserved_offer(id: &str, cpu: f64) -> Offer {
        Offer {
            id: OfferId::from(id),
            hostname: "agent-1".into(),
            agent_id: "agent-1".into(),
            resources: ResourceSpec {
                cpu,
                mem_mb: 1024.0,
                disk_mb: 1024.0,
                gpu: 0.0,
                ports: 4,
            },
            revocable: false,
            attributes: BTreeMap::new(),
            reservation: None,
        }
    }

    fn reserved_offer(id: &str) -> Offer {
        let mut offer = unreserved_offer(id, 1.0);
        offer.reservation = Some(armada_api::ReservationInfo {
            pool: "default".into(),
            volume_id: Some("v1".into()),
        });
        offer
    }

    fn cpu_filter(cpu: f64) -> HostFilter {
        HostFilter {
            resource_constraint: ResourceConstraint {
                minimum: ResourceSpec {
                    cpu,
                    ..ResourceSpec::ZERO
                },
                num_ports: 0,
                revocable: false,
            },
            ..HostFilter::default()
        }
    }

    fn summary() -> HostSummary {
        HostSummary::new("agent-1", SummaryConfig::default())
    }

    fn task(n: u32) -> TaskId {
        TaskId::new(JobId::new(), n)
    }

    #[test]
    fn test_add_remove_offers_roundtrip() {
        let s = summary();
        let now = Utc::now();
        assert!(!s.has_offer());

        // Removing a non-existent offer is a no-op in Ready status.
        let (status, removed) = s.remove_offer(&OfferId::from("nope"), "expired");
        assert_eq!(status, HostStatus::Ready);
        assert!(removed.is_none());

        s.add_offers(
            vec![
                unreserved_offer("u1", 1.0),
                unreserved_offer("u2", 1.0),
                reserved_offer("r1"),
            ],
            now,
        );
        assert_eq!(s.ready_count(), 2);
        assert!(s.has_offer());
        assert!(s.has_any_offer());
        assert_eq!(s.get_offers(OfferKind::All).len(), 3);

        for id in ["u1", "u2", "r1"] {
            let (_, removed) = s.remove_offer(&OfferId::from(id), "rescinded");
            assert!(removed.is_some());
        }
        assert_eq!(s.ready_count(), 0);
        assert!(!s.has_any_offer());
        assert_eq!(s.status(), HostStatus::Ready);
    }

    #[test]
    fn test_try_match_transitions_to_placing() {
        let s = summary();
        let now = Utc::now();
        s.add_offers(vec![unreserved_offer("u1", 2.0)], now);

        let matched = s.try_match(&cpu_filter(1.0), None, now);
        assert_eq!(matched.result, HostFilterResult::Match);
        let host_offer = matched.host_offer.unwrap();
        assert_eq!(host_offer.offers.len(), 1);
        assert_eq!(s.status(), HostStatus::Placing);
        assert_eq!(s.ready_count(), 0);
        assert!(s.host_offer_id().is_some());

        // A second match while Placing loses.
        let again = s.try_match(&cpu_filter(1.0), None, now);
        assert_eq!(again.result, HostFilterResult::MismatchStatus);
        assert!(again.host_offer.is_none());
    }

    #[test]
    fn test_try_match_revocable() {
        let s = summary();
        let now = Utc::now();
        let mut revocable = unreserved_offer("u1", 1.0);
        revocable.revocable = true;
        revocable.resources.mem_mb = 0.0;
        revocable.resources.disk_mb = 0.0;
        s.add_offers(vec![revocable, unreserved_offer("u2", 1.0)], now);

        let mut filter = cpu_filter(1.0);
        filter.resource_constraint.revocable = true;
        let matched = s.try_match(&filter, None, now);
        assert_eq!(matched.result, HostFilterResult::Match);
        assert_eq!(s.status(), HostStatus::Placing);
        assert!(s.host_offer_id().is_some());
    }

    #[test]
    fn test_held_host_needs_hint() {
        let s = summary();
        let now = Utc::now();
        s.add_offers(vec![unreserved_offer("u1", 2.0)], now);
        s.hold_for_task(task(0), now).unwrap();
        assert_eq!(s.status(), HostStatus::Held);

        // No hint: mismatch.
        let unhinted = s.try_match(&cpu_filter(1.0), None, now);
        assert_eq!(unhinted.result, HostFilterResult::MismatchStatus);
        assert_eq!(s.status(), HostStatus::Held);

        // Hint naming this host: match.
        let mut filter = cpu_filter(1.0);
        filter.hint = Some(armada_api::FilterHint {
            hosts: vec!["agent-1".into()],
        });
        let hinted = s.try_match(&filter, None, now);
        assert_eq!(hinted.result, HostFilterResult::Match);
        assert_eq!(s.status(), HostStatus::Placing);
    }

    #[test]
    fn test_claim_for_launch() {
        let s = summary();
        let now = Utc::now();
        s.add_offers(vec![unreserved_offer("u1", 2.0), reserved_offer("r1")], now);

        let matched = s.try_match(&cpu_filter(1.0), None, now);
        let host_offer = matched.host_offer.unwrap();

        // Wrong id: error, no side effect.
        let err = s
            .claim_for_launch(HostOfferId::new(), &[task(0)])
            .unwrap_err();
        assert!(matches!(err, SummaryError::HostOfferIdMismatch));
        assert_eq!(s.status(), HostStatus::Placing);

        let consumed = s
            .claim_for_launch(host_offer.host_offer_id, &[task(0)])
            .unwrap();
        assert_eq!(consumed.len(), 1);
        assert_eq!(s.status(), HostStatus::Ready);
        assert_eq!(s.ready_count(), 0);
        assert!(s.host_offer_id().is_none());
        // Reserved offers are untouched by an unreserved claim.
        assert_eq!(s.get_offers(OfferKind::Reserved).len(), 1);
    }

    #[test]
    fn test_claim_lands_on_held_when_holds_remain() {
        let s = summary();
        let now = Utc::now();
        s.add_offers(vec![unreserved_offer("u1", 2.0)], now);
        let t1 = task(1);
        let t2 = task(2);
        s.hold_for_task(t1, now).unwrap();
        s.hold_for_task(t2, now).unwrap();

        let mut filter = cpu_filter(1.0);
        filter.hint = Some(armada_api::FilterHint {
            hosts: vec!["agent-1".into()],
        });
        let host_offer = s.try_match(&filter, None, now).host_offer.unwrap();

        // Claiming only t1 leaves t2's hold outstanding.
        s.claim_for_launch(host_offer.host_offer_id, &[t1]).unwrap();
        assert_eq!(s.status(), HostStatus::Held);
        assert_eq!(s.held_tasks(), vec![t2]);
    }

    #[test]
    fn test_claim_not_placing() {
        let s = summary();
        let now = Utc::now();
        s.add_offers(vec![unreserved_offer("u1", 2.0)], now);
        let err = s.claim_for_launch(HostOfferId::new(), &[]).unwrap_err();
        assert!(matches!(err, SummaryError::NotPlacing { .. }));
        assert_eq!(s.ready_count(), 1);
    }

    #[test]
    fn test_claim_reserved_keeps_status() {
        let s = summary();
        let now = Utc::now();
        s.add_offers(vec![reserved_offer("r1"), unreserved_offer("u1", 1.0)], now);
        assert_eq!(s.ready_count(), 1);

        let claimed = s.claim_reserved_for_launch();
        assert_eq!(claimed.len(), 1);
        assert_eq!(s.status(), HostStatus::Ready);
        assert_eq!(s.ready_count(), 1);
        assert!(s.get_offers(OfferKind::Reserved).is_empty());
    }

    #[test]
    fn test_hold_release_roundtrip() {
        let s = summary();
        let now = Utc::now();
        let t1 = task(1);

        let before = s.status();
        s.hold_for_task(t1, now).unwrap();
        assert_eq!(s.status(), HostStatus::Held);
        s.release_hold_for_task(&t1).unwrap();
        assert_eq!(s.status(), before);
    }

    #[test]
    fn test_release_hold_keeps_held_while_others_remain() {
        let s = summary();
        let now = Utc::now();
        let t1 = task(1);
        let t2 = task(2);
        s.hold_for_task(t1, now).unwrap();
        s.hold_for_task(t2, now).unwrap();

        s.release_hold_for_task(&t1).unwrap();
        assert_eq!(s.status(), HostStatus::Held);
        s.release_hold_for_task(&t2).unwrap();
        assert_eq!(s.status(), HostStatus::Ready);
    }

    #[test]
    fn test_return_placing_host() {
        let s = summary();
        let now = Utc::now();
        s.add_offers(vec![unreserved_offer("u1", 2.0)], now);

        // Ready host cannot be returned.
        assert!(s.return_placing_host().is_err());

        s.try_match(&cpu_filter(1.0), None, now);
        s.return_placing_host().unwrap();
        assert_eq!(s.status(), HostStatus::Ready);
        assert_eq!(s.ready_count(), 1);
        assert!(s.host_offer_id().is_none());

        // With a hold outstanding the return lands on Held.
        s.hold_for_task(task(1), now).unwrap();
        let mut filter = cpu_filter(1.0);
        filter.hint = Some(armada_api::FilterHint {
            hosts: vec!["agent-1".into()],
        });
        s.try_match(&filter, None, now);
        s.return_placing_host().unwrap();
        assert_eq!(s.status(), HostStatus::Held);
    }

    #[test]
    fn test_reset_expired_placing() {
        let s = summary();
        let now = Utc::now();
        s.add_offers(vec![unreserved_offer("u1", 2.0)], now);

        // Ready host: nothing to reset.
        assert!(!s.reset_expired_placing(now));

        s.try_match(&cpu_filter(1.0), None, now);

        // Not yet expired.
        assert!(!s.reset_expired_placing(now));
        assert_eq!(s.status(), HostStatus::Placing);

        // Past the deadline: back to Ready with count restored and id
        // cleared.
        let later = now + Duration::minutes(10);
        assert!(s.reset_expired_placing(later));
        assert_eq!(s.status(), HostStatus::Ready);
        assert_eq!(s.ready_count(), 1);
        assert!(s.host_offer_id().is_none());
    }

    #[test]
    fn test_reset_expired_held() {
        let now = Utc::now();
        let t1 = task(1);
        let t2 = task(2);

        // Both expired: Held drains to Ready.
        let s = summary();
        s.hold_for_task(t1, now - Duration::minutes(30)).unwrap();
        s.hold_for_task(t2, now - Duration::minutes(30)).unwrap();
        let (reset, expired) = s.reset_expired_held(now);
        assert!(reset);
        assert_eq!(expired.len(), 2);
        assert_eq!(s.status(), HostStatus::Ready);

        // Partial expiry keeps Held.
        let s = summary();
        s.hold_for_task(t1, now - Duration::minutes(30)).unwrap();
        s.hold_for_task(t2, now).unwrap();
        let (reset, expired) = s.reset_expired_held(now);
        assert!(reset);
        assert_eq!(expired, vec![t1]);
        assert_eq!(s.status(), HostStatus::Held);

        // Nothing held: no reset.
        let s = summary();
        let (reset, expired) = s.reset_expired_held(now);
        assert!(!reset);
        assert!(expired.is_empty());
    }

    #[test]
    fn test_reset_expired_held_keeps_placing_status() {
        let s = summary();
        let now = Utc::now();
        s.add_offers(vec![unreserved_offer("u1", 2.0)], now);
        s.hold_for_task(task(1), now - Duration::minutes(30)).unwrap();

        let mut filter = cpu_filter(1.0);
        filter.hint = Some(armada_api::FilterHint {
            hosts: vec!["agent-1".into()],
        });
        s.try_match(&filter, None, now);
        assert_eq!(s.status(), HostStatus::Placing);

        let (reset, expired) = s.reset_expired_held(now);
        assert!(reset);
        assert_eq!(expired.len(), 1);
        assert_eq!(s.status(), HostStatus::Placing);
    }

    #[test]
    fn test_prune_expired_offers() {
        let s = summary();
        let now = Utc::now();
        s.add_offers(vec![unreserved_offer("u1", 1.0)], now - Duration::minutes(20));
        s.add_offers(vec![unreserved_offer("u2", 1.0)], now);

        let pruned = s.prune_expired_offers(now, Duration::minutes(10));
        assert_eq!(pruned, vec![OfferId::from("u1")]);
        assert_eq!(s.ready_count(), 1);
    }

    #[test]
    fn test_prune_skips_placing_host() {
        let s = summary();
        let now = Utc::now();
        s.add_offers(vec![unreserved_offer("u1", 2.0)], now - Duration::minutes(20));
        s.try_match(&cpu_filter(1.0), None, now);

        let pruned = s.prune_expired_offers(now, Duration::minutes(10));
        assert!(pruned.is_empty());
        assert_eq!(s.get_offers(OfferKind::Unreserved).len(), 1);
    }
}
