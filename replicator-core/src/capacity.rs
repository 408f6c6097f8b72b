use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{node::Resources, Direction, NodeId};

/// Which resource dimension is driving the scaling decision, preferred over a bare string (see
/// SPEC_FULL §11: the struct form of `ScalingMetric` is authoritative).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricKind {
    #[default]
    None,
    Cpu,
    Memory,
    Disk,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct ScalingMetric {
    pub kind: MetricKind,
    pub capacity: u64,
    pub utilization: f64,
}

/// Disposable, per-tick snapshot of a pool's resource picture, computed by the capacity
/// evaluator (§4.3).
#[derive(Clone, Debug, Default)]
pub struct ClusterCapacity {
    pub total: Resources,
    pub used: Resources,
    /// Capacity to hold one more replica of every scalable task running against this pool.
    pub task_reserve: Resources,

    pub nodes: Vec<NodeId>,
    pub used_per_node: HashMap<NodeId, Resources>,

    pub metric: ScalingMetric,
    pub max_allowed_utilization: f64,
    pub direction: Direction,
}

impl ClusterCapacity {
    pub fn node_count(&self) -> u64 {
        self.nodes.len() as u64
    }

    /// `(capacityTotal - taskReserve) - (avgNode * faultTolerance)`, per §4.3 step 5. When
    /// `simulate_scale_in` is set, `capacityTotal` is replaced by `capacityTotal - avgNode`.
    pub fn max_allowed(total_dim: u64, task_reserve_dim: u64, fault_tolerance: u64, node_count: u64, simulate_scale_in: bool) -> f64 {
        if node_count == 0 {
            return 0.0;
        }
        let avg_node = total_dim as f64 / node_count as f64;
        let effective_total = if simulate_scale_in {
            total_dim as f64 - avg_node
        } else {
            total_dim as f64
        };
        (effective_total - task_reserve_dim as f64) - (avg_node * fault_tolerance as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_allowed_with_zero_nodes_is_zero() {
        assert_eq!(ClusterCapacity::max_allowed(100, 10, 1, 0, false), 0.0);
    }

    #[test]
    fn max_allowed_matches_formula() {
        // total=1000, 4 nodes -> avg=250, reserve=100, fault_tolerance=1
        // maxAllowed = (1000 - 100) - (250 * 1) = 650
        assert_eq!(ClusterCapacity::max_allowed(1000, 100, 1, 4, false), 650.0);
    }

    #[test]
    fn max_allowed_simulated_scale_in_drops_one_avg_node() {
        // effective_total = 1000 - 250 = 750; maxAllowed = (750-100) - 250 = 400
        assert_eq!(ClusterCapacity::max_allowed(1000, 100, 1, 4, true), 400.0);
    }
}
