//! Placement: assigning pending tasks to acquired host offers.

mod driver;

pub use driver::{PlacementConfig, PlacementDriver};

use std::collections::HashMap;

use armada_api::{
    FilterHint, HostFilter, HostOffer, ResourceConstraint, ResourceSpec, TaskConfig,
};
use armada_id::TaskId;

fn offers_supply(offers: &[armada_api::Offer]) -> ResourceSpec {
    offers
        .iter()
        .fold(ResourceSpec::ZERO, |acc, offer| acc.add(&offer.resources))
}

/// One task awaiting placement.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub task_id: TaskId,
    pub config: TaskConfig,

    /// Host this task must land on (held-host affinity), if any.
    pub preferred_host: Option<String>,
}

/// Pluggable assignment of task groups to acquired host offers.
///
/// `place` maps assignment index → host index; tasks that could not be
/// placed are absent from the map. Strategies that are not concurrency
/// safe are serialized by the caller.
pub trait PlacementStrategy: Send + Sync {
    /// Groups assignments into host filters to acquire offers with.
    fn filters(&self, assignments: &[Assignment]) -> Vec<(HostFilter, Vec<usize>)>;

    /// Assigns tasks (by index into `assignments`) to hosts (by index into
    /// `hosts`).
    fn place(&self, assignments: &[Assignment], hosts: &[HostOffer]) -> HashMap<usize, usize>;

    /// Whether multiple `place` calls may run concurrently.
    fn concurrency_safe(&self) -> bool;
}

/// First-fit batch strategy: one filter per distinct resource demand, then
/// tasks packed onto hosts in order while capacity lasts.
#[derive(Debug, Default)]
pub struct BatchStrategy;

fn demand_key(config: &TaskConfig) -> String {
    let r = &config.resource;
    format!(
        "{:.3}:{:.1}:{:.1}:{:.3}:{}:{}",
        r.cpu, r.mem_mb, r.disk_mb, r.gpu, r.ports, config.revocable
    )
}

impl PlacementStrategy for BatchStrategy {
    fn filters(&self, assignments: &[Assignment]) -> Vec<(HostFilter, Vec<usize>)> {
        let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, assignment) in assignments.iter().enumerate() {
            let mut key = demand_key(&assignment.config);
            if let Some(host) = &assignment.preferred_host {
                key.push(':');
                key.push_str(host);
            }
            groups.entry(key).or_default().push(index);
        }

        let mut filters = Vec::with_capacity(groups.len());
        for indices in groups.into_values() {
            let first = &assignments[indices[0]];
            let hint = first.preferred_host.as_ref().map(|host| FilterHint {
                hosts: vec![host.clone()],
            });
            filters.push((
                HostFilter {
                    resource_constraint: ResourceConstraint {
                        minimum: first.config.resource,
                        num_ports: 0,
                        revocable: first.config.revocable,
                    },
                    scheduling_constraint: None,
                    max_hosts: indices.len() as u32,
                    hint,
                },
                indices,
            ));
        }
        filters
    }

    fn place(&self, assignments: &[Assignment], hosts: &[HostOffer]) -> HashMap<usize, usize> {
        let mut placements = HashMap::new();
        let mut remaining: Vec<ResourceSpec> = hosts
            .iter()
            .map(|host| offers_supply(&host.offers))
            .collect();

        for (task_index, assignment) in assignments.iter().enumerate() {
            let demand = &assignment.config.resource;
            for (host_index, host) in hosts.iter().enumerate() {
                if let Some(preferred) = &assignment.preferred_host {
                    if preferred != &host.hostname {
                        continue;
                    }
                }
                if remaining[host_index].contains(demand) {
                    remaining[host_index] = remaining[host_index].subtract(demand);
                    placements.insert(task_index, host_index);
                    break;
                }
            }
        }
        placements
    }

    fn concurrency_safe(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_id::{HostOfferId, JobId, OfferId};
    use std::collections::BTreeMap;

    fn assignment(cpu: f64, instance: u32) -> Assignment {
        Assignment {
            task_id: TaskId::new(JobId::new(), instance),
            config: TaskConfig {
                resource: ResourceSpec {
                    cpu,
                    mem_mb: 512.0,
                    ..ResourceSpec::ZERO
                },
                ..TaskConfig::default()
            },
            preferred_host: None,
        }
    }

    fn host_offer(hostname: &str, cpu: f64) -> HostOffer {
        HostOffer {
            hostname: hostname.into(),
            host_offer_id: HostOfferId::new(),
            offers: vec![armada_api::Offer {
                id: OfferId::from(format!("{hostname}-o1")),
                hostname: hostname.into(),
                agent_id: hostname.into(),
                resources: ResourceSpec {
                    cpu,
                    mem_mb: 4096.0,
                    disk_mb: 4096.0,
                    gpu: 0.0,
                    ports: 8,
                },
                revocable: false,
                attributes: BTreeMap::new(),
                reservation: None,
            }],
        }
    }

    #[test]
    fn test_filters_group_by_demand() {
        let assignments = vec![assignment(1.0, 0), assignment(1.0, 1), assignment(2.0, 2)];
        let filters = BatchStrategy.filters(&assignments);
        assert_eq!(filters.len(), 2);
        let total: usize = filters.iter().map(|(_, idx)| idx.len()).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn test_place_first_fit_respects_capacity() {
        let assignments = vec![assignment(2.0, 0), assignment(2.0, 1), assignment(2.0, 2)];
        let hosts = vec![host_offer("h1", 4.0), host_offer("h2", 2.0)];

        let placements = BatchStrategy.place(&assignments, &hosts);
        assert_eq!(placements.len(), 3);
        // Two fit on h1, the third spills to h2.
        assert_eq!(placements[&0], 0);
        assert_eq!(placements[&1], 0);
        assert_eq!(placements[&2], 1);
    }

    #[test]
    fn test_place_leaves_unplaceable_absent() {
        let assignments = vec![assignment(8.0, 0)];
        let hosts = vec![host_offer("h1", 4.0)];
        let placements = BatchStrategy.place(&assignments, &hosts);
        assert!(placements.is_empty());
    }

    #[test]
    fn test_preferred_host_pins_placement() {
        let mut pinned = assignment(1.0, 0);
        pinned.preferred_host = Some("h2".into());
        let hosts = vec![host_offer("h1", 4.0), host_offer("h2", 4.0)];
        let placements = BatchStrategy.place(&[pinned], &hosts);
        assert_eq!(placements[&0], 1);
    }
}
