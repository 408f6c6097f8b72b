//! Read-only view of nodes, allocations and jobs, plus the handful of write operations the
//! engines need (drain a node, register an updated job). The concrete shape of the wire protocol
//! is an external collaborator (§1); [`http::HttpOrchestrator`] is one thin implementation of it.

use std::collections::HashMap;

use enum_dispatch::enum_dispatch;
use replicator_core::{node::Node, JobName, NodeId};
use snafu::Snafu;

pub mod http;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("Failed to contact orchestrator"), context(false))]
    Http { source: http::Error },
}

/// Pagination/blocking-query metadata returned alongside list calls.
#[derive(Clone, Copy, Debug, Default)]
pub struct ListMeta {
    pub index: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Lost,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DesiredStatus {
    Run,
    Stop,
    Evict,
}

#[derive(Clone, Debug)]
pub struct Allocation {
    pub id: String,
    pub job_name: JobName,
    pub group_name: String,
    pub node_id: NodeId,
    pub client_status: AllocStatus,
    pub desired_status: DesiredStatus,
}

impl Allocation {
    /// The allocation both wants to keep running and is currently running: the definition of
    /// "occupies capacity" used by the pool capacity evaluator (§4.3 step 2).
    pub fn is_active(&self) -> bool {
        self.client_status == AllocStatus::Running && self.desired_status == DesiredStatus::Run
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AllocationStats {
    pub cpu_total_ticks: u64,
    pub memory_rss_mb: u64,
}

#[derive(Clone, Debug)]
pub struct TaskGroup {
    pub name: String,
    pub count: u64,
    pub cpu_mhz: u64,
    pub memory_mb: u64,
    pub metadata: HashMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Dead,
}

#[derive(Clone, Debug)]
pub struct JobSummary {
    pub name: JobName,
    pub modify_index: u64,
    pub status: JobStatus,
}

#[derive(Clone, Debug)]
pub struct Job {
    pub name: JobName,
    pub modify_index: u64,
    pub status: JobStatus,
    pub groups: Vec<TaskGroup>,
}

#[derive(Clone, Debug)]
pub struct Evaluation {
    pub id: String,
    pub deployment_id: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeploymentStatus {
    Running,
    Successful,
    Failed,
    Cancelled,
}

#[derive(Clone, Debug)]
pub struct Deployment {
    pub id: String,
    pub status: DeploymentStatus,
    pub modify_index: u64,
}

#[trait_variant::make(SendOrchestrator: Send)]
#[enum_dispatch(OrchestratorImplementation)]
pub trait Orchestrator {
    async fn list_nodes(&self, wait_index: u64, allow_stale: bool) -> Result<(Vec<Node>, ListMeta), Error>;
    async fn get_node(&self, id: &NodeId) -> Result<Node, Error>;
    async fn list_node_allocations(&self, id: &NodeId) -> Result<Vec<Allocation>, Error>;

    async fn list_jobs(&self, wait_index: u64) -> Result<(Vec<JobSummary>, ListMeta), Error>;
    async fn get_job(&self, name: &JobName) -> Result<Job, Error>;
    async fn list_job_allocations(&self, name: &JobName) -> Result<Vec<Allocation>, Error>;
    async fn register_job(&self, job: &Job) -> Result<String, Error>;
    async fn latest_deployment(&self, name: &JobName) -> Result<Option<Deployment>, Error>;

    async fn get_evaluation(&self, id: &str) -> Result<Evaluation, Error>;
    async fn get_deployment(&self, id: &str, wait_index: u64) -> Result<Deployment, Error>;
    async fn get_allocation(&self, id: &str) -> Result<Allocation, Error>;
    async fn get_allocation_stats(&self, id: &str) -> Result<AllocationStats, Error>;

    async fn toggle_drain(&self, node_id: &NodeId, enable: bool) -> Result<(), Error>;
}

#[enum_dispatch]
pub enum OrchestratorImplementation {
    Http(http::HttpOrchestrator),
}
