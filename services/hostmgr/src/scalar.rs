//! Aggregation helpers over offer resources.
//!
//! Revocable and non-revocable supply are tracked separately so that
//! non-revocable demand can never be satisfied from revocable offers.

use armada_api::{Offer, ResourceSpec};

/// Aggregate unreserved supply for one host, split by revocability.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UnreservedSupply {
    /// Sum over non-revocable offers.
    pub non_revocable: ResourceSpec,

    /// Sum over revocable offers.
    pub revocable: ResourceSpec,
}

impl UnreservedSupply {
    /// Sums the given offers, splitting by the revocable flag.
    pub fn from_offers<'a>(offers: impl IntoIterator<Item = &'a Offer>) -> Self {
        let mut supply = Self::default();
        for offer in offers {
            if offer.revocable {
                supply.revocable = supply.revocable.add(&offer.resources);
            } else {
                supply.non_revocable = supply.non_revocable.add(&offer.resources);
            }
        }
        supply
    }

    /// Total across both classes, used for scarce-resource classification
    /// and host queries.
    #[must_use]
    pub fn total(&self) -> ResourceSpec {
        self.non_revocable.add(&self.revocable)
    }

    /// Whether the supply satisfies a minimum for the given demand class.
    ///
    /// Revocable demand draws cpu and gpu from revocable supply but memory,
    /// disk, and ports from non-revocable supply (those are never revoked).
    /// Non-revocable demand draws everything from non-revocable supply.
    #[must_use]
    pub fn satisfies(&self, minimum: &ResourceSpec, num_ports: u32, revocable: bool) -> bool {
        let ports_needed = minimum.ports + num_ports;
        if revocable {
            self.revocable.cpu >= minimum.cpu
                && self.revocable.gpu >= minimum.gpu
                && self.non_revocable.mem_mb >= minimum.mem_mb
                && self.non_revocable.disk_mb >= minimum.disk_mb
                && self.non_revocable.ports >= ports_needed
        } else {
            self.non_revocable.cpu >= minimum.cpu
                && self.non_revocable.gpu >= minimum.gpu
                && self.non_revocable.mem_mb >= minimum.mem_mb
                && self.non_revocable.disk_mb >= minimum.disk_mb
                && self.non_revocable.ports >= ports_needed
        }
    }
}

/// Returns true when the resource type name holds a nonzero quantity.
///
/// Type names follow the filter vocabulary: `cpu`, `mem`, `disk`, `gpu`,
/// `ports`. Unknown names never match, so misconfigured scarce types do not
/// affect scheduling.
#[must_use]
pub fn has_resource_type(resources: &ResourceSpec, type_name: &str) -> bool {
    match type_name.to_ascii_lowercase().as_str() {
        "cpu" => resources.cpu > 0.0,
        "mem" => resources.mem_mb > 0.0,
        "disk" => resources.disk_mb > 0.0,
        "gpu" => resources.gpu > 0.0,
        "ports" => resources.ports > 0,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_id::OfferId;
    use std::collections::BTreeMap;

    fn offer(id: &str, cpu: f64, mem_mb: f64, revocable: bool) -> Offer {
        Offer {
            id: OfferId::from(id),
            hostname: "h1".into(),
            agent_id: "a1".into(),
            resources: ResourceSpec {
                cpu,
                mem_mb,
                disk_mb: 10.0,
                gpu: 0.0,
                ports: 2,
            },
            revocable,
            attributes: BTreeMap::new(),
            reservation: None,
        }
    }

    #[test]
    fn test_supply_splits_by_revocability() {
        let offers = vec![
            offer("o1", 1.0, 512.0, false),
            offer("o2", 2.0, 256.0, true),
        ];
        let supply = UnreservedSupply::from_offers(&offers);
        assert_eq!(supply.non_revocable.cpu, 1.0);
        assert_eq!(supply.revocable.cpu, 2.0);
        assert_eq!(supply.total().cpu, 3.0);
    }

    #[test]
    fn test_revocable_demand_uses_slack_cpu() {
        let offers = vec![
            offer("o1", 1.0, 512.0, false),
            offer("o2", 1.0, 0.0, true),
        ];
        let supply = UnreservedSupply::from_offers(&offers);

        let min = ResourceSpec {
            cpu: 1.0,
            mem_mb: 256.0,
            ..ResourceSpec::ZERO
        };
        // Revocable demand: cpu from revocable, mem from non-revocable.
        assert!(supply.satisfies(&min, 0, true));

        // Non-revocable demand for 2 cpu cannot borrow the revocable core.
        let min2 = ResourceSpec {
            cpu: 2.0,
            ..ResourceSpec::ZERO
        };
        assert!(!supply.satisfies(&min2, 0, false));
    }

    #[test]
    fn test_port_demand_adds_up() {
        let offers = vec![offer("o1", 1.0, 512.0, false)];
        let supply = UnreservedSupply::from_offers(&offers);
        let min = ResourceSpec {
            ports: 1,
            ..ResourceSpec::ZERO
        };
        assert!(supply.satisfies(&min, 1, false));
        assert!(!supply.satisfies(&min, 2, false));
    }

    #[test]
    fn test_has_resource_type() {
        let resources = ResourceSpec {
            gpu: 1.0,
            ..ResourceSpec::ZERO
        };
        assert!(has_resource_type(&resources, "gpu"));
        assert!(has_resource_type(&resources, "GPU"));
        assert!(!has_resource_type(&resources, "cpu"));
        assert!(!has_resource_type(&resources, "DUMMY_RES"));
    }
}
