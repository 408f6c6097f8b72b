//! Pool capacity evaluator (§4.3): totals, consumption, the dominant scaling metric, the task
//! reserve, and the resulting direction.

use std::collections::{HashMap, HashSet};

use replicator_core::{
    capacity::{ClusterCapacity, MetricKind, ScalingMetric},
    job::GroupScalingPolicy,
    node::Resources,
    pool::WorkerPool,
    Direction,
};
use snafu::{ResultExt, Snafu};

use crate::orchestrator::{Job, Orchestrator, OrchestratorImplementation};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("Failed to list allocations for node {node_id:?}"))]
    ListNodeAllocations { source: crate::orchestrator::Error, node_id: String },

    #[snafu(display("Failed to fetch job {job_name:?}"))]
    GetJob { source: crate::orchestrator::Error, job_name: String },
}

pub async fn evaluate(
    orchestrator: &OrchestratorImplementation,
    pool: &WorkerPool,
    policies: &[GroupScalingPolicy],
) -> Result<ClusterCapacity, Error> {
    let mut cap = ClusterCapacity { nodes: pool.members.keys().cloned().collect(), ..Default::default() };
    cap.total = pool.members.values().map(|n| n.resources()).sum();

    let scalable_jobs: HashSet<&str> = policies.iter().map(|p| p.job_name.as_str()).collect();
    let mut job_cache: HashMap<String, Job> = HashMap::new();
    let mut jobs_intersecting_pool: HashSet<String> = HashSet::new();

    for node_id in &cap.nodes {
        let allocations = orchestrator
            .list_node_allocations(node_id)
            .await
            .context(ListNodeAllocationsSnafu { node_id: node_id.clone() })?;

        let mut used = Resources::ZERO;
        for allocation in allocations.iter().filter(|a| a.is_active()) {
            if scalable_jobs.contains(allocation.job_name.as_str()) {
                jobs_intersecting_pool.insert(allocation.job_name.clone());
            }

            if !job_cache.contains_key(&allocation.job_name) {
                let job = orchestrator
                    .get_job(&allocation.job_name)
                    .await
                    .context(GetJobSnafu { job_name: allocation.job_name.clone() })?;
                job_cache.insert(allocation.job_name.clone(), job);
            }

            if let Some(group) = job_cache[&allocation.job_name].groups.iter().find(|g| g.name == allocation.group_name) {
                used += Resources { cpu_mhz: group.cpu_mhz, memory_mb: group.memory_mb, disk_mb: 0 };
            }
        }

        cap.used += used;
        cap.used_per_node.insert(node_id.clone(), used);
    }

    // Task reserve (§4.3 step 3): one replica's worth of resources for every group of every
    // scalable job whose allocations actually run in this pool.
    for job_name in &jobs_intersecting_pool {
        if let Some(job) = job_cache.get(job_name) {
            for group in &job.groups {
                cap.task_reserve += Resources { cpu_mhz: group.cpu_mhz, memory_mb: group.memory_mb, disk_mb: 0 };
            }
        }
    }

    let (cpu_pct, mem_pct, disk_pct) = cap.used.percentages_of(&cap.total);
    let candidates = [
        (MetricKind::Cpu, cpu_pct, cap.used.cpu_mhz, cap.total.cpu_mhz, cap.task_reserve.cpu_mhz),
        (MetricKind::Memory, mem_pct, cap.used.memory_mb, cap.total.memory_mb, cap.task_reserve.memory_mb),
        (MetricKind::Disk, disk_pct, cap.used.disk_mb, cap.total.disk_mb, cap.task_reserve.disk_mb),
    ];
    let (kind, pct, used_raw, total_raw, reserve_raw) = candidates
        .into_iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).expect("percentages are never NaN"))
        .expect("three candidates are always present");

    cap.metric = if pct == 0.0 {
        ScalingMetric { kind: MetricKind::None, capacity: 0, utilization: 0.0 }
    } else {
        ScalingMetric { kind, capacity: total_raw, utilization: used_raw as f64 }
    };

    let node_count = cap.node_count();
    cap.max_allowed_utilization =
        ClusterCapacity::max_allowed(total_raw, reserve_raw, pool.config.fault_tolerance, node_count, false);

    cap.direction = if cap.metric.kind == MetricKind::None || cap.metric.utilization < cap.max_allowed_utilization {
        Direction::In
    } else {
        Direction::Out
    };

    Ok(cap)
}

/// Scan per-node used capacity, in the dimension matching the pool's scaling metric, for the
/// smallest percentage used, skipping the protected node (§4.6).
pub fn select_scale_in_target(pool: &WorkerPool, capacity: &ClusterCapacity) -> Option<String> {
    pool.members
        .keys()
        .filter(|id| pool.protected_node.as_deref() != Some(id.as_str()))
        .min_by(|a, b| {
            node_dim_percentage(pool, capacity, a, capacity.metric.kind)
                .partial_cmp(&node_dim_percentage(pool, capacity, b, capacity.metric.kind))
                .expect("percentages are never NaN")
        })
        .cloned()
}

fn node_dim_percentage(pool: &WorkerPool, capacity: &ClusterCapacity, node_id: &str, kind: MetricKind) -> f64 {
    let used = capacity.used_per_node.get(node_id).copied().unwrap_or(Resources::ZERO);
    let total = pool.members.get(node_id).map(|n| n.resources()).unwrap_or(Resources::ZERO);
    let (cpu, mem, disk) = used.percentages_of(&total);
    match kind {
        MetricKind::Cpu => cpu,
        MetricKind::Memory => mem,
        MetricKind::Disk => disk,
        MetricKind::None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use replicator_core::{node::NodeStatus, pool::WorkerPoolConfig};

    use super::*;

    fn pool_with(members: Vec<(&str, u64, u64)>, protected: Option<&str>) -> WorkerPool {
        let config = WorkerPoolConfig {
            name: "web".into(),
            region: "us-east-1".into(),
            provider: "aws".into(),
            enabled: true,
            min: 1,
            max: 10,
            fault_tolerance: 1,
            cooldown: std::time::Duration::from_secs(60),
            retry_threshold: 3,
            scaling_threshold: 3,
            notification_uid: None,
        };
        let mut pool = WorkerPool::new(config);
        for (id, cpu, mem) in members {
            pool.members.insert(
                id.to_string(),
                replicator_core::node::Node {
                    id: id.to_string(),
                    address: format!("10.0.0.{id}"),
                    cpu_mhz: cpu,
                    memory_mb: mem,
                    disk_mb: 1000,
                    status: NodeStatus::Ready,
                    drain: false,
                    metadata: Default::default(),
                },
            );
        }
        pool.protected_node = protected.map(|s| s.to_string());
        pool
    }

    #[test]
    fn scale_in_skips_protected_node_even_if_least_used() {
        let pool = pool_with(vec![("n1", 1000, 1000), ("n2", 1000, 1000)], Some("n1"));
        let mut capacity = ClusterCapacity { metric: ScalingMetric { kind: MetricKind::Cpu, capacity: 0, utilization: 0.0 }, ..Default::default() };
        capacity.used_per_node.insert("n1".into(), Resources { cpu_mhz: 0, memory_mb: 0, disk_mb: 0 });
        capacity.used_per_node.insert("n2".into(), Resources { cpu_mhz: 900, memory_mb: 0, disk_mb: 0 });

        assert_eq!(select_scale_in_target(&pool, &capacity), Some("n2".to_string()));
    }

    #[test]
    fn scale_in_picks_least_utilized_non_protected_node() {
        let pool = pool_with(vec![("n1", 1000, 1000), ("n2", 1000, 1000), ("n3", 1000, 1000)], None);
        let mut capacity = ClusterCapacity { metric: ScalingMetric { kind: MetricKind::Cpu, capacity: 0, utilization: 0.0 }, ..Default::default() };
        capacity.used_per_node.insert("n1".into(), Resources { cpu_mhz: 500, memory_mb: 0, disk_mb: 0 });
        capacity.used_per_node.insert("n2".into(), Resources { cpu_mhz: 100, memory_mb: 0, disk_mb: 0 });
        capacity.used_per_node.insert("n3".into(), Resources { cpu_mhz: 900, memory_mb: 0, disk_mb: 0 });

        assert_eq!(select_scale_in_target(&pool, &capacity), Some("n2".to_string()));
    }
}
