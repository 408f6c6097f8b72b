use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    node::Node,
    NodeId, PoolName,
};

/// Immutable, orchestrator-derived configuration of a worker pool. Decoded from node metadata
/// (see [`crate::metadata`]) by the node watcher and kept up to date whenever the metadata hash
/// changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    pub name: PoolName,
    pub region: String,
    pub provider: String,
    pub enabled: bool,
    pub min: u64,
    pub max: u64,
    pub fault_tolerance: u64,
    pub cooldown: Duration,
    pub retry_threshold: u64,
    pub scaling_threshold: u64,
    pub notification_uid: Option<String>,
}

/// A named group of nodes with identical scaling policy, plus the transient state the current
/// tick has computed for it.
#[derive(Clone, Debug)]
pub struct WorkerPool {
    pub config: WorkerPoolConfig,
    pub members: HashMap<NodeId, Node>,
    /// The node hosting the current leader's own allocation; never a scale-in candidate. Refreshed
    /// once per cluster tick via a reverse lookup against the orchestrator.
    pub protected_node: Option<NodeId>,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Self {
        Self {
            config,
            members: HashMap::new(),
            protected_node: None,
        }
    }

    pub fn state_path(&self) -> String {
        format!("state/nodes/{}", self.config.name)
    }

    /// `true` once membership is within `[min, max]`; scaling decisions whose result would violate
    /// this must be rejected upstream by the provider safety check, not enforced here.
    pub fn is_within_bounds(&self) -> bool {
        let count = self.members.len() as u64;
        count >= self.config.min && count <= self.config.max
    }
}
