use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::execution::PortAllocation;
use crate::job::PortSpec;

/// Inclusive range of host ports available for dynamic allocation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 20000,
            end: 32767,
        }
    }
}

/// Picks host ports for a job's logical port map.
///
/// Allocation is all-or-nothing: either every named port receives a host
/// port disjoint from `used` and from the other ports picked in the same
/// call, or the whole request is refused. Explicitly requested ports are
/// honored first; the remainder get the lowest free port in the configured
/// range. Identical inputs always produce identical assignments.
#[derive(Clone, Copy, Debug)]
pub struct PortAllocator {
    range: PortRange,
}

impl PortAllocator {
    pub fn new(range: PortRange) -> Self {
        Self { range }
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    /// Assign one host port per named port, or `None` if any single port
    /// cannot be satisfied.
    pub fn allocate(
        &self,
        ports: &BTreeMap<String, PortSpec>,
        used: &HashSet<u16>,
    ) -> Option<PortAllocation> {
        let mut assigned = PortAllocation::new();
        let mut taken = used.clone();

        // Explicitly requested host ports first.
        for (name, spec) in ports {
            if let Some(port) = spec.external {
                if !taken.insert(port) {
                    return None;
                }
                assigned.insert(name.clone(), port);
            }
        }

        // Lowest free port in range for the rest.
        for (name, spec) in ports {
            if spec.external.is_some() {
                continue;
            }
            let port = (self.range.start..=self.range.end)
                .find(|candidate| !taken.contains(candidate))?;
            taken.insert(port);
            assigned.insert(name.clone(), port);
        }

        Some(assigned)
    }
}
