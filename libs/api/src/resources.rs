//! Resource quantities carried by offers, task configs, and host filters.

use serde::{Deserialize, Serialize};

/// A vector of schedulable resource quantities.
///
/// Ports are counted, not enumerated: an offer advertises how many ports it
/// can provide and a filter asks for a minimum count. Concrete port numbers
/// are assigned by the cluster manager at launch.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// CPU cores.
    #[serde(default)]
    pub cpu: f64,

    /// Memory in megabytes.
    #[serde(default)]
    pub mem_mb: f64,

    /// Disk in megabytes.
    #[serde(default)]
    pub disk_mb: f64,

    /// GPU cores.
    #[serde(default)]
    pub gpu: f64,

    /// Number of ports.
    #[serde(default)]
    pub ports: u32,
}

impl ResourceSpec {
    /// A spec with every quantity zero.
    pub const ZERO: Self = Self {
        cpu: 0.0,
        mem_mb: 0.0,
        disk_mb: 0.0,
        gpu: 0.0,
        ports: 0,
    };

    /// Returns true if every quantity is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.cpu == 0.0
            && self.mem_mb == 0.0
            && self.disk_mb == 0.0
            && self.gpu == 0.0
            && self.ports == 0
    }

    /// Component-wise sum.
    #[must_use]
    pub fn add(&self, other: &Self) -> Self {
        Self {
            cpu: self.cpu + other.cpu,
            mem_mb: self.mem_mb + other.mem_mb,
            disk_mb: self.disk_mb + other.disk_mb,
            gpu: self.gpu + other.gpu,
            ports: self.ports + other.ports,
        }
    }

    /// Component-wise subtraction, clamped at zero.
    #[must_use]
    pub fn subtract(&self, other: &Self) -> Self {
        Self {
            cpu: (self.cpu - other.cpu).max(0.0),
            mem_mb: (self.mem_mb - other.mem_mb).max(0.0),
            disk_mb: (self.disk_mb - other.disk_mb).max(0.0),
            gpu: (self.gpu - other.gpu).max(0.0),
            ports: self.ports.saturating_sub(other.ports),
        }
    }

    /// Returns true if every quantity in `other` fits within `self`.
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        self.cpu >= other.cpu
            && self.mem_mb >= other.mem_mb
            && self.disk_mb >= other.disk_mb
            && self.gpu >= other.gpu
            && self.ports >= other.ports
    }

    /// Scalar magnitude used for bin-packing order (smaller packs tighter).
    #[must_use]
    pub fn magnitude(&self) -> f64 {
        self.cpu + self.mem_mb / 1024.0 + self.disk_mb / 1024.0 + self.gpu
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(cpu: f64, mem_mb: f64) -> ResourceSpec {
        ResourceSpec {
            cpu,
            mem_mb,
            ..ResourceSpec::ZERO
        }
    }

    #[test]
    fn test_add_subtract() {
        let a = spec(2.0, 1024.0);
        let b = spec(1.0, 512.0);
        assert_eq!(a.add(&b), spec(3.0, 1536.0));
        assert_eq!(a.subtract(&b), spec(1.0, 512.0));
    }

    #[test]
    fn test_subtract_clamps_at_zero() {
        let a = spec(1.0, 100.0);
        let b = spec(2.0, 500.0);
        assert_eq!(a.subtract(&b), ResourceSpec::ZERO);
    }

    #[test]
    fn test_contains() {
        let have = ResourceSpec {
            cpu: 4.0,
            mem_mb: 4096.0,
            disk_mb: 1000.0,
            gpu: 1.0,
            ports: 4,
        };
        let want = ResourceSpec {
            cpu: 4.0,
            mem_mb: 4096.0,
            disk_mb: 1000.0,
            gpu: 0.0,
            ports: 2,
        };
        assert!(have.contains(&want));
        assert!(!want.contains(&have));
    }
}
