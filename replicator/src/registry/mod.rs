//! The only shared mutable structures between the watchers and the engines (§5): a
//! readers-writer lock guards each map, engines snapshot under a read lock and release it before
//! any blocking I/O, and only the watchers ever write.

use std::{
    collections::{hash_map::DefaultHasher, HashMap, HashSet},
    hash::{Hash, Hasher},
};

use replicator_core::{
    job::GroupScalingPolicy,
    node::Node,
    pool::{WorkerPool, WorkerPoolConfig},
    GroupName, JobName, NodeId, PoolName,
};
use tokio::sync::RwLock;

#[derive(Default)]
struct NodeRegistryInner {
    pools: HashMap<PoolName, WorkerPool>,
    node_to_pool: HashMap<NodeId, PoolName>,
    last_change_index: u64,
    content_hash: u64,
}

#[derive(Default)]
pub struct NodeRegistry {
    inner: RwLock<NodeRegistryInner>,
}

impl NodeRegistry {
    pub async fn last_change_index(&self) -> u64 {
        self.inner.read().await.last_change_index
    }

    pub async fn set_last_change_index(&self, index: u64) {
        self.inner.write().await.last_change_index = index;
    }

    /// Snapshot of every pool for the cluster engine to fan out over.
    pub async fn snapshot_pools(&self) -> Vec<WorkerPool> {
        self.inner.read().await.pools.values().cloned().collect()
    }

    pub async fn get_pool(&self, name: &str) -> Option<WorkerPool> {
        self.inner.read().await.pools.get(name).cloned()
    }

    pub async fn set_protected_node(&self, pool_name: &str, node_id: Option<NodeId>) {
        if let Some(pool) = self.inner.write().await.pools.get_mut(pool_name) {
            pool.protected_node = node_id;
        }
    }

    pub async fn is_known(&self, node_id: &NodeId) -> bool {
        self.inner.read().await.node_to_pool.contains_key(node_id)
    }

    /// Applies a decoded pool draft for `node`: creates the pool on first sight, updates its
    /// mutable fields when the draft changed, and adds the node as a member when scaling is
    /// enabled for its pool. Returns `true` if the registered-nodes content hash changed.
    pub async fn register(&self, node: Node, draft: WorkerPoolConfig) -> bool {
        let mut inner = self.inner.write().await;
        let pool_name = draft.name.clone();

        let pool = inner.pools.entry(pool_name.clone()).or_insert_with(|| WorkerPool::new(draft.clone()));
        if pool.config != draft {
            pool.config = draft.clone();
        }

        if draft.enabled {
            inner.node_to_pool.insert(node.id.clone(), pool_name.clone());
            let pool = inner.pools.get_mut(&pool_name).expect("just inserted above");
            pool.members.insert(node.id.clone(), node);
        }

        Self::recompute_hash(&mut inner)
    }

    /// Removes `node_id` from its pool; deletes the pool entirely once it becomes empty. Returns
    /// `true` if the content hash changed.
    pub async fn deregister(&self, node_id: &NodeId) -> bool {
        let mut inner = self.inner.write().await;
        if let Some(pool_name) = inner.node_to_pool.remove(node_id) {
            if let Some(pool) = inner.pools.get_mut(&pool_name) {
                pool.members.remove(node_id);
                if pool.members.is_empty() {
                    inner.pools.remove(&pool_name);
                }
            }
        }
        Self::recompute_hash(&mut inner)
    }

    fn recompute_hash(inner: &mut NodeRegistryInner) -> bool {
        let mut ids: Vec<&NodeId> = inner.node_to_pool.keys().collect();
        ids.sort();
        let mut hasher = DefaultHasher::new();
        ids.hash(&mut hasher);
        let new_hash = hasher.finish();
        let changed = new_hash != inner.content_hash;
        inner.content_hash = new_hash;
        changed
    }
}

#[derive(Default)]
struct JobPolicyRegistryInner {
    policies: HashMap<JobName, HashMap<GroupName, GroupScalingPolicy>>,
    last_change_index: u64,
}

#[derive(Default)]
pub struct JobPolicyRegistry {
    inner: RwLock<JobPolicyRegistryInner>,
}

impl JobPolicyRegistry {
    pub async fn last_change_index(&self) -> u64 {
        self.inner.read().await.last_change_index
    }

    pub async fn set_last_change_index(&self, index: u64) {
        self.inner.write().await.last_change_index = index;
    }

    /// Snapshot of every job's group policies for the job engine to iterate over.
    pub async fn snapshot(&self) -> HashMap<JobName, Vec<GroupScalingPolicy>> {
        self.inner
            .read()
            .await
            .policies
            .iter()
            .map(|(job, groups)| (job.clone(), groups.values().cloned().collect()))
            .collect()
    }

    /// All currently known policies flattened, for the pool capacity evaluator's task-reserve
    /// computation (§4.3 step 3), which only cares "is this job/group scalable" across all pools.
    pub async fn all_policies(&self) -> Vec<GroupScalingPolicy> {
        self.inner.read().await.policies.values().flat_map(|groups| groups.values().cloned()).collect()
    }

    pub async fn upsert(&self, policy: GroupScalingPolicy) {
        let mut inner = self.inner.write().await;
        inner.policies.entry(policy.job_name.clone()).or_default().insert(policy.group_name.clone(), policy);
    }

    pub async fn remove(&self, job_name: &JobName, group_name: &GroupName) {
        let mut inner = self.inner.write().await;
        if let Some(groups) = inner.policies.get_mut(job_name) {
            groups.remove(group_name);
            if groups.is_empty() {
                inner.policies.remove(job_name);
            }
        }
    }

    pub async fn remove_job(&self, job_name: &JobName) {
        self.inner.write().await.policies.remove(job_name);
    }

    /// Orphan check (§4.2): drops policies for groups no longer present in the job.
    pub async fn retain_groups(&self, job_name: &JobName, current_groups: &HashSet<GroupName>) {
        let mut inner = self.inner.write().await;
        if let Some(groups) = inner.policies.get_mut(job_name) {
            groups.retain(|name, _| current_groups.contains(name));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use replicator_core::node::{NodeStatus, Resources};

    use super::*;

    fn draft(name: &str, enabled: bool) -> WorkerPoolConfig {
        WorkerPoolConfig {
            name: name.to_owned(),
            region: "us-east-1".to_owned(),
            provider: "aws".to_owned(),
            enabled,
            min: 1,
            max: 5,
            fault_tolerance: 1,
            cooldown: Duration::from_secs(60),
            retry_threshold: 3,
            scaling_threshold: 3,
            notification_uid: None,
        }
    }

    fn node(id: &str) -> Node {
        Node {
            id: id.to_owned(),
            address: format!("10.0.0.{id}"),
            cpu_mhz: 1000,
            memory_mb: 1024,
            disk_mb: 1024,
            status: NodeStatus::Ready,
            drain: false,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn registering_a_new_node_creates_its_pool() {
        let registry = NodeRegistry::default();
        registry.register(node("n1"), draft("web", true)).await;

        let pool = registry.get_pool("web").await.unwrap();
        assert_eq!(pool.members.len(), 1);
        assert!(registry.is_known(&"n1".to_owned()).await);
    }

    #[tokio::test]
    async fn deregistering_last_member_deletes_the_pool() {
        let registry = NodeRegistry::default();
        registry.register(node("n1"), draft("web", true)).await;
        registry.deregister(&"n1".to_owned()).await;

        assert!(registry.get_pool("web").await.is_none());
        assert!(!registry.is_known(&"n1".to_owned()).await);
    }

    #[tokio::test]
    async fn content_hash_changes_only_on_membership_change() {
        let registry = NodeRegistry::default();
        let changed = registry.register(node("n1"), draft("web", true)).await;
        assert!(changed);

        let changed_again = registry.register(node("n1"), draft("web", true)).await;
        assert!(!changed_again, "re-registering the same member should not change the hash");
    }

    #[tokio::test]
    async fn job_policy_orphan_groups_are_pruned() {
        let registry = JobPolicyRegistry::default();
        let policy = |group: &str| GroupScalingPolicy {
            job_name: "web".into(),
            group_name: group.into(),
            enabled: true,
            min: 1,
            max: 5,
            cooldown: Duration::from_secs(60),
            retry_threshold: 3,
            scale_out_cpu: 80.0,
            scale_out_mem: 80.0,
            scale_in_cpu: 20.0,
            scale_in_mem: 20.0,
            notification_uid: None,
        };

        registry.upsert(policy("api")).await;
        registry.upsert(policy("worker")).await;

        registry.retain_groups(&"web".to_owned(), &HashSet::from(["api".to_owned()])).await;

        let snapshot = registry.snapshot().await;
        let groups = &snapshot["web"];
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].group_name, "api");
    }
}
