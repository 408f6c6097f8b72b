use replicator_core::{
    config::OrchestratorConfig,
    node::{Node as CoreNode, NodeStatus},
    JobName, NodeId,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt, Snafu};
use url::Url;

use super::{
    AllocStatus, Allocation, AllocationStats, Deployment, DeploymentStatus, Evaluation, Job,
    JobStatus, JobSummary, ListMeta, Orchestrator, TaskGroup,
};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("Failed to build request to {url}"))]
    BuildRequest { source: reqwest::Error, url: Url },

    #[snafu(display("Request to {url} failed"))]
    SendRequest { source: reqwest::Error, url: Url },

    #[snafu(display("Orchestrator returned status {status} for {url}"))]
    UnexpectedStatus { status: StatusCode, url: Url },

    #[snafu(display("Failed to decode orchestrator response body from {url}"))]
    DecodeResponse { source: reqwest::Error, url: Url },
}

pub struct HttpOrchestrator {
    client: Client,
    address: Url,
    token: Option<String>,
}

impl HttpOrchestrator {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            client: Client::new(),
            address: config.address.clone(),
            token: config.token.clone(),
        }
    }

    fn url(&self, path: &str) -> Url {
        self.address.join(path).expect("path is a valid relative URL")
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str, query: &[(&str, String)]) -> Result<T, Error> {
        let url = self.url(path);
        let mut request = self.client.get(url.clone());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request = request.query(query);

        let response = request.build().context(BuildRequestSnafu { url: url.clone() })?;
        self.send(response, url).await
    }

    async fn send<T: for<'de> Deserialize<'de>>(&self, request: reqwest::Request, url: Url) -> Result<T, Error> {
        let response = self
            .client
            .execute(request)
            .await
            .context(SendRequestSnafu { url: url.clone() })?;

        ensure!(
            response.status().is_success(),
            UnexpectedStatusSnafu { status: response.status(), url: url.clone() }
        );

        response.json().await.context(DecodeResponseSnafu { url })
    }

    async fn post<B: Serialize + ?Sized, T: for<'de> Deserialize<'de>>(&self, path: &str, body: &B) -> Result<T, Error> {
        let url = self.url(path);
        let mut request = self.client.post(url.clone()).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .context(SendRequestSnafu { url: url.clone() })?;

        ensure!(
            response.status().is_success(),
            UnexpectedStatusSnafu { status: response.status(), url: url.clone() }
        );

        response.json().await.context(DecodeResponseSnafu { url })
    }
}

impl Orchestrator for HttpOrchestrator {
    async fn list_nodes(&self, wait_index: u64, allow_stale: bool) -> Result<(Vec<CoreNode>, ListMeta), super::Error> {
        let nodes: Vec<WireNode> = self
            .get(
                "v1/nodes",
                &[
                    ("index".to_string(), wait_index.to_string()),
                    ("stale".to_string(), allow_stale.to_string()),
                ],
            )
            .await?;

        let index = nodes.iter().map(|n| n.modify_index).max().unwrap_or(wait_index);
        Ok((nodes.into_iter().map(Into::into).collect(), ListMeta { index }))
    }

    async fn get_node(&self, id: &NodeId) -> Result<CoreNode, super::Error> {
        let node: WireNode = self.get(&format!("v1/node/{id}"), &[]).await?;
        Ok(node.into())
    }

    async fn list_node_allocations(&self, id: &NodeId) -> Result<Vec<Allocation>, super::Error> {
        let allocations: Vec<WireAllocation> = self.get(&format!("v1/node/{id}/allocations"), &[]).await?;
        Ok(allocations.into_iter().map(Into::into).collect())
    }

    async fn list_jobs(&self, wait_index: u64) -> Result<(Vec<JobSummary>, ListMeta), super::Error> {
        let jobs: Vec<WireJobSummary> = self.get("v1/jobs", &[("index".to_string(), wait_index.to_string())]).await?;
        let index = jobs.iter().map(|j| j.modify_index).max().unwrap_or(wait_index);
        Ok((jobs.into_iter().map(Into::into).collect(), ListMeta { index }))
    }

    async fn get_job(&self, name: &JobName) -> Result<Job, super::Error> {
        let job: WireJob = self.get(&format!("v1/job/{name}"), &[]).await?;
        Ok(job.into())
    }

    async fn list_job_allocations(&self, name: &JobName) -> Result<Vec<Allocation>, super::Error> {
        let allocations: Vec<WireAllocation> = self.get(&format!("v1/job/{name}/allocations"), &[]).await?;
        Ok(allocations.into_iter().map(Into::into).collect())
    }

    async fn register_job(&self, job: &Job) -> Result<String, super::Error> {
        #[derive(Serialize)]
        struct RegisterRequest<'a> {
            job: &'a WireJobRegistration<'a>,
        }
        #[derive(Serialize)]
        struct WireJobRegistration<'a> {
            #[serde(rename = "ID")]
            id: &'a str,
            #[serde(rename = "TaskGroups")]
            task_groups: Vec<WireTaskGroupRegistration<'a>>,
        }
        #[derive(Serialize)]
        struct WireTaskGroupRegistration<'a> {
            #[serde(rename = "Name")]
            name: &'a str,
            #[serde(rename = "Count")]
            count: u64,
        }
        #[derive(Deserialize)]
        struct RegisterResponse {
            #[serde(rename = "EvalID")]
            eval_id: String,
        }

        let registration = WireJobRegistration {
            id: &job.name,
            task_groups: job
                .groups
                .iter()
                .map(|g| WireTaskGroupRegistration { name: &g.name, count: g.count })
                .collect(),
        };
        let response: RegisterResponse = self
            .post(&format!("v1/job/{}", job.name), &RegisterRequest { job: &registration })
            .await?;
        Ok(response.eval_id)
    }

    async fn latest_deployment(&self, name: &JobName) -> Result<Option<Deployment>, super::Error> {
        let deployment: Option<WireDeployment> = self.get(&format!("v1/job/{name}/deployment"), &[]).await?;
        Ok(deployment.map(Into::into))
    }

    async fn get_evaluation(&self, id: &str) -> Result<Evaluation, super::Error> {
        let evaluation: WireEvaluation = self.get(&format!("v1/evaluation/{id}"), &[]).await?;
        Ok(evaluation.into())
    }

    async fn get_deployment(&self, id: &str, wait_index: u64) -> Result<Deployment, super::Error> {
        let deployment: WireDeployment = self
            .get(&format!("v1/deployment/{id}"), &[("index".to_string(), wait_index.to_string())])
            .await?;
        Ok(deployment.into())
    }

    async fn get_allocation(&self, id: &str) -> Result<Allocation, super::Error> {
        let allocation: WireAllocation = self.get(&format!("v1/allocation/{id}"), &[]).await?;
        Ok(allocation.into())
    }

    async fn get_allocation_stats(&self, id: &str) -> Result<AllocationStats, super::Error> {
        let stats: WireAllocationStats = self.get(&format!("v1/client/allocation/{id}/stats"), &[]).await?;
        Ok(stats.into())
    }

    async fn toggle_drain(&self, node_id: &NodeId, enable: bool) -> Result<(), super::Error> {
        #[derive(Serialize)]
        struct DrainRequest {
            #[serde(rename = "DrainSpec")]
            drain_spec: Option<DrainSpec>,
        }
        #[derive(Serialize)]
        struct DrainSpec {}
        #[derive(Deserialize)]
        struct DrainResponse {}

        let _: DrainResponse = self
            .post(
                &format!("v1/node/{node_id}/drain"),
                &DrainRequest { drain_spec: enable.then_some(DrainSpec {}) },
            )
            .await?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct WireNode {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Address")]
    address: String,
    #[serde(rename = "CpuMhz")]
    cpu_mhz: u64,
    #[serde(rename = "MemoryMb")]
    memory_mb: u64,
    #[serde(rename = "DiskMb")]
    disk_mb: u64,
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "Drain")]
    drain: bool,
    #[serde(rename = "Meta", default)]
    meta: std::collections::HashMap<String, String>,
    #[serde(rename = "ModifyIndex", default)]
    modify_index: u64,
}

impl From<WireNode> for CoreNode {
    fn from(node: WireNode) -> Self {
        let status = match node.status.as_str() {
            "ready" => NodeStatus::Ready,
            "down" => NodeStatus::Down,
            _ => NodeStatus::Initializing,
        };
        CoreNode {
            id: node.id,
            address: node.address,
            cpu_mhz: node.cpu_mhz,
            memory_mb: node.memory_mb,
            disk_mb: node.disk_mb,
            status,
            drain: node.drain,
            metadata: node.meta,
        }
    }
}

#[derive(Deserialize)]
struct WireAllocation {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "JobID")]
    job_id: String,
    #[serde(rename = "TaskGroup")]
    task_group: String,
    #[serde(rename = "NodeID")]
    node_id: String,
    #[serde(rename = "ClientStatus")]
    client_status: String,
    #[serde(rename = "DesiredStatus")]
    desired_status: String,
}

impl From<WireAllocation> for Allocation {
    fn from(allocation: WireAllocation) -> Self {
        let client_status = match allocation.client_status.as_str() {
            "running" => AllocStatus::Running,
            "complete" => AllocStatus::Complete,
            "failed" => AllocStatus::Failed,
            "lost" => AllocStatus::Lost,
            _ => AllocStatus::Pending,
        };
        let desired_status = match allocation.desired_status.as_str() {
            "stop" => super::DesiredStatus::Stop,
            "evict" => super::DesiredStatus::Evict,
            _ => super::DesiredStatus::Run,
        };
        Allocation {
            id: allocation.id,
            job_name: allocation.job_id,
            group_name: allocation.task_group,
            node_id: allocation.node_id,
            client_status,
            desired_status,
        }
    }
}

#[derive(Deserialize)]
struct WireAllocationStats {
    #[serde(rename = "CpuTotalTicks", default)]
    cpu_total_ticks: u64,
    #[serde(rename = "MemoryRssMb", default)]
    memory_rss_mb: u64,
}

impl From<WireAllocationStats> for AllocationStats {
    fn from(stats: WireAllocationStats) -> Self {
        AllocationStats { cpu_total_ticks: stats.cpu_total_ticks, memory_rss_mb: stats.memory_rss_mb }
    }
}

#[derive(Deserialize)]
struct WireJobSummary {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "ModifyIndex", default)]
    modify_index: u64,
    #[serde(rename = "Status")]
    status: String,
}

impl From<WireJobSummary> for JobSummary {
    fn from(job: WireJobSummary) -> Self {
        JobSummary { name: job.id, modify_index: job.modify_index, status: parse_job_status(&job.status) }
    }
}

#[derive(Deserialize)]
struct WireTaskGroup {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Count")]
    count: u64,
    #[serde(rename = "CpuMhz", default)]
    cpu_mhz: u64,
    #[serde(rename = "MemoryMb", default)]
    memory_mb: u64,
    #[serde(rename = "Meta", default)]
    meta: std::collections::HashMap<String, String>,
}

#[derive(Deserialize)]
struct WireJob {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "ModifyIndex", default)]
    modify_index: u64,
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "TaskGroups", default)]
    task_groups: Vec<WireTaskGroup>,
}

impl From<WireJob> for Job {
    fn from(job: WireJob) -> Self {
        Job {
            name: job.id,
            modify_index: job.modify_index,
            status: parse_job_status(&job.status),
            groups: job
                .task_groups
                .into_iter()
                .map(|g| TaskGroup { name: g.name, count: g.count, cpu_mhz: g.cpu_mhz, memory_mb: g.memory_mb, metadata: g.meta })
                .collect(),
        }
    }
}

fn parse_job_status(status: &str) -> JobStatus {
    match status {
        "running" => JobStatus::Running,
        "dead" => JobStatus::Dead,
        _ => JobStatus::Pending,
    }
}

#[derive(Deserialize)]
struct WireEvaluation {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "DeploymentID", default)]
    deployment_id: Option<String>,
}

impl From<WireEvaluation> for Evaluation {
    fn from(evaluation: WireEvaluation) -> Self {
        Evaluation { id: evaluation.id, deployment_id: evaluation.deployment_id }
    }
}

#[derive(Deserialize)]
struct WireDeployment {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "ModifyIndex", default)]
    modify_index: u64,
}

impl From<WireDeployment> for Deployment {
    fn from(deployment: WireDeployment) -> Self {
        let status = match deployment.status.as_str() {
            "successful" => DeploymentStatus::Successful,
            "running" => DeploymentStatus::Running,
            "cancelled" => DeploymentStatus::Cancelled,
            _ => DeploymentStatus::Failed,
        };
        Deployment { id: deployment.id, status, modify_index: deployment.modify_index }
    }
}
