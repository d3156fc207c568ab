//! Host, offer, and filter wire types for the host manager surface.

use std::collections::BTreeMap;

use armada_id::{HostOfferId, OfferId};
use serde::{Deserialize, Serialize};

use crate::resources::ResourceSpec;

/// Lifecycle status of a host summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostStatus {
    /// Has offers and is available for matching.
    #[default]
    Ready,
    /// Handed to a matcher; offers are reserved in-memory for the caller.
    Placing,
    /// At least one task asked for this host to be kept for later placement.
    Held,
    /// Offers carry cluster-manager reservations tied to a persistent volume.
    Reserved,
}

impl HostStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Placing => "PLACING",
            Self::Held => "HELD",
            Self::Reserved => "RESERVED",
        }
    }
}

impl std::fmt::Display for HostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reservation attached to an offer by the cluster manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationInfo {
    /// Resource pool the reservation belongs to.
    pub pool: String,

    /// Persistent volume backing the reservation, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_id: Option<String>,
}

/// A resource offer for one host, as received from the cluster manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub hostname: String,

    /// Cluster-manager agent the offer originates from.
    pub agent_id: String,

    pub resources: ResourceSpec,

    /// Revocable offers may be preempted; they only satisfy revocable demand.
    #[serde(default)]
    pub revocable: bool,

    /// Host attributes, matched by label constraints and scarce-resource
    /// classification.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation: Option<ReservationInfo>,
}

impl Offer {
    /// Whether the offer carries a cluster-manager reservation.
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        self.reservation.is_some()
    }
}

// =============================================================================
// Scheduling constraints
// =============================================================================

/// A key/value label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label {
    pub key: String,
    pub value: String,
}

/// What the label occurrence count is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LabelCondition {
    LessThan,
    Equal,
    GreaterThan,
}

/// Whose labels the constraint inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LabelKind {
    /// Host attributes advertised with offers.
    Host,
    /// Labels of tasks already placed on the host.
    Task,
}

/// Requires a label to occur a bounded number of times on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelConstraint {
    pub kind: LabelKind,
    pub condition: LabelCondition,
    pub label: Label,
    pub requirement: u32,
}

/// Scheduling constraint tree evaluated against a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constraint {
    Label(LabelConstraint),
    And(Vec<Constraint>),
    Or(Vec<Constraint>),
}

// =============================================================================
// Host filter
// =============================================================================

/// Minimum resources a matched host must offer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceConstraint {
    pub minimum: ResourceSpec,

    /// Number of ports required on top of `minimum.ports`.
    #[serde(default)]
    pub num_ports: u32,

    /// Match against revocable supply instead of non-revocable.
    #[serde(default)]
    pub revocable: bool,
}

/// Pins matching to specific hosts (used to reach held hosts).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FilterHint {
    #[serde(default)]
    pub hosts: Vec<String>,
}

impl FilterHint {
    #[must_use]
    pub fn names(&self, hostname: &str) -> bool {
        self.hosts.iter().any(|h| h == hostname)
    }
}

/// Filter handed to the matcher by `AcquireHostOffers`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HostFilter {
    pub resource_constraint: ResourceConstraint,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduling_constraint: Option<Constraint>,

    /// Upper bound on hosts returned by one acquire call.
    #[serde(default = "default_max_hosts")]
    pub max_hosts: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<FilterHint>,
}

fn default_max_hosts() -> u32 {
    10
}

/// Outcome of matching one host against a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostFilterResult {
    Match,
    InsufficientOfferResources,
    MismatchConstraints,
    /// Host owns a scarce resource the filter does not request; scarce hosts
    /// are exclusive to scarce demand.
    ScarceResources,
    MismatchStatus,
    NoOffer,
}

impl HostFilterResult {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Match => "MATCH",
            Self::InsufficientOfferResources => "INSUFFICIENT_OFFER_RESOURCES",
            Self::MismatchConstraints => "MISMATCH_CONSTRAINTS",
            Self::ScarceResources => "SCARCE_RESOURCES",
            Self::MismatchStatus => "MISMATCH_STATUS",
            Self::NoOffer => "NO_OFFER",
        }
    }
}

/// A matched host handed back from `AcquireHostOffers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostOffer {
    pub hostname: String,

    /// Session token binding a later claim or release to this match.
    pub host_offer_id: HostOfferId,

    /// Snapshot of the unreserved offers at match time.
    pub offers: Vec<Offer>,
}

/// Read-only predicate for `GetHostsByQuery`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostQuery {
    /// Only hosts whose aggregate unreserved resources contain this spec.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_resources: Option<ResourceSpec>,

    /// Restrict to these hostnames; empty means all.
    #[serde(default)]
    pub hostnames: Vec<String>,
}

/// Host row returned by queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostInfo {
    pub hostname: String,
    pub status: HostStatus,
    pub resources: ResourceSpec,

    /// Tasks currently holding this host.
    #[serde(default)]
    pub held_tasks: Vec<String>,
}
