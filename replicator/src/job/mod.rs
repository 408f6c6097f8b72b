//! Job scaling engine (§4.7): per job-group, evaluates live CPU/memory utilization against the
//! group's scaling policy, then submits and confirms a job deployment (§4.7.1) when the replica
//! count needs to change.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use futures::{stream, StreamExt};
use replicator_core::{job::GroupScalingPolicy, state::ScalingState, Direction, JobName, ResourceType};
use replicator_state::{StateStore, StateStoreImplementation};
use snafu::Snafu;
use tracing::{error, instrument, warn};

use crate::{
    metrics::Metrics,
    notifier::{NotificationMessage, Notifier, NotifierImplementation},
    orchestrator::{DeploymentStatus, Job, Orchestrator, OrchestratorImplementation},
    registry::JobPolicyRegistry,
};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("Orchestrator error"), context(false))]
    Orchestrator { source: crate::orchestrator::Error },
    #[snafu(display("State store error"), context(false))]
    StateStore { source: replicator_state::Error },
}

const EVAL_TO_DEPLOYMENT_TIMEOUT: Duration = Duration::from_secs(30);
const DEPLOYMENT_TIMEOUT: Duration = Duration::from_secs(15 * 60);
const DEPLOYMENT_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct JobEngine {
    orchestrator: Arc<OrchestratorImplementation>,
    state_store: Arc<StateStoreImplementation>,
    notifier: Arc<NotifierImplementation>,
    job_registry: Arc<JobPolicyRegistry>,
    metrics: Arc<Metrics>,
}

impl JobEngine {
    pub fn new(
        orchestrator: Arc<OrchestratorImplementation>,
        state_store: Arc<StateStoreImplementation>,
        notifier: Arc<NotifierImplementation>,
        job_registry: Arc<JobPolicyRegistry>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { orchestrator, state_store, notifier, job_registry, metrics }
    }

    #[instrument(name = "JobEngine::tick", skip(self))]
    pub async fn tick(&self) {
        let policies = self.job_registry.snapshot().await;
        if policies.is_empty() {
            return;
        }

        stream::iter(policies.into_iter())
            .for_each_concurrent(None, |(job_name, groups)| async move {
                if let Err(error) = self.process_job(&job_name, &groups).await {
                    error!(%error, job = %job_name, "Job scaling tick failed");
                }
            })
            .await;
    }

    async fn process_job(&self, job_name: &JobName, groups: &[GroupScalingPolicy]) -> Result<(), Error> {
        match self.orchestrator.latest_deployment(job_name).await {
            Ok(Some(deployment)) if deployment.status == DeploymentStatus::Running => return Ok(()),
            Ok(_) => {}
            Err(error) => {
                warn!(%error, job = %job_name, "Failed to check deployment status, skipping this tick");
                return Ok(());
            }
        }

        for policy in groups.iter().filter(|p| p.enabled) {
            if let Err(error) = self.process_group(job_name, policy).await {
                error!(%error, job = %job_name, group = %policy.group_name, "Group scaling evaluation failed");
            }
        }
        Ok(())
    }

    async fn process_group(&self, job_name: &JobName, policy: &GroupScalingPolicy) -> Result<(), Error> {
        let state_path = policy.state_path();
        let mut state = match self.state_store.read_state(&state_path).await {
            Ok(Some(state)) => state,
            Ok(None) => ScalingState::new(ResourceType::Job, state_path.clone(), state_path.clone()),
            Err(error) => {
                warn!(%error, %state_path, "Failed to load group state, starting from a fresh one this tick");
                ScalingState::new(ResourceType::Job, state_path.clone(), state_path.clone())
            }
        };

        if state.failsafe_mode {
            return Ok(());
        }

        let now = Utc::now();
        let cooldown = chrono::Duration::from_std(policy.cooldown).unwrap_or(chrono::Duration::zero());
        if state.is_in_cooldown(now, cooldown) {
            return Ok(());
        }

        let job = self.orchestrator.get_job(job_name).await?;
        let Some(group) = job.groups.iter().find(|g| g.name == policy.group_name) else {
            return Ok(());
        };

        let allocations: Vec<_> = self
            .orchestrator
            .list_job_allocations(job_name)
            .await?
            .into_iter()
            .filter(|a| a.group_name == policy.group_name && a.is_active())
            .collect();

        if allocations.is_empty() {
            self.persist(&state).await;
            return Ok(());
        }

        let mut cpu_percent_sum = 0.0;
        let mut memory_percent_sum = 0.0;
        let mut sampled = 0u32;
        for allocation in &allocations {
            match self.orchestrator.get_allocation_stats(&allocation.id).await {
                Ok(stats) => {
                    cpu_percent_sum += stats.cpu_total_ticks as f64 / group.cpu_mhz.max(1) as f64 * 100.0;
                    memory_percent_sum += stats.memory_rss_mb as f64 / group.memory_mb.max(1) as f64 * 100.0;
                    sampled += 1;
                }
                Err(error) => warn!(%error, allocation = %allocation.id, "Failed to fetch allocation stats, excluding from average"),
            }
        }

        if sampled == 0 {
            self.persist(&state).await;
            return Ok(());
        }

        let cpu_percent = cpu_percent_sum / sampled as f64;
        let memory_percent = memory_percent_sum / sampled as f64;
        let direction = policy.direction_for(cpu_percent, memory_percent);
        state.scaling_direction = direction;

        if !direction.is_scaling() {
            self.persist(&state).await;
            return Ok(());
        }

        let new_count = match direction {
            Direction::Out => group.count + 1,
            Direction::In => group.count.saturating_sub(1),
            Direction::None => unreachable!("guarded above by is_scaling"),
        };
        if new_count < policy.min || new_count > policy.max {
            self.persist(&state).await;
            return Ok(());
        }

        let mut updated_job = job.clone();
        if let Some(updated_group) = updated_job.groups.iter_mut().find(|g| g.name == policy.group_name) {
            updated_group.count = new_count;
        }

        match self.submit_and_confirm(&updated_job).await {
            Ok(true) => {
                state.record_scaling_success(now);
                let direction_label = if direction == Direction::Out { "out" } else { "in" };
                self.metrics.scaling_decisions_total.with_label_values(&["job", &state_path, direction_label]).inc();
            }
            Ok(false) => {
                state.failure_count += 1;
                self.trip_failsafe_and_notify(policy, &mut state, "job deployment did not reach successful").await;
            }
            Err(error) => {
                warn!(%error, %state_path, "Failed to submit job update");
                state.failure_count += 1;
                self.trip_failsafe_and_notify(policy, &mut state, "job submission failed").await;
            }
        }

        self.persist(&state).await;
        Ok(())
    }

    /// Submits `job` and confirms the resulting deployment reaches `successful` within the
    /// deployment timeout (§4.7.1).
    async fn submit_and_confirm(&self, job: &Job) -> Result<bool, Error> {
        let evaluation_id = self.orchestrator.register_job(job).await?;

        let eval_deadline = tokio::time::Instant::now() + EVAL_TO_DEPLOYMENT_TIMEOUT;
        let deployment_id = loop {
            let evaluation = self.orchestrator.get_evaluation(&evaluation_id).await?;
            if let Some(deployment_id) = evaluation.deployment_id {
                break deployment_id;
            }
            if tokio::time::Instant::now() >= eval_deadline {
                return Ok(false);
            }
            tokio::time::sleep(DEPLOYMENT_POLL_INTERVAL).await;
        };

        let deployment_deadline = tokio::time::Instant::now() + DEPLOYMENT_TIMEOUT;
        let mut wait_index = 0;
        loop {
            if tokio::time::Instant::now() >= deployment_deadline {
                return Ok(false);
            }

            let deployment = self.orchestrator.get_deployment(&deployment_id, wait_index).await?;
            wait_index = deployment.modify_index;

            match deployment.status {
                DeploymentStatus::Successful => return Ok(true),
                DeploymentStatus::Running => tokio::time::sleep(DEPLOYMENT_POLL_INTERVAL).await,
                DeploymentStatus::Failed | DeploymentStatus::Cancelled => return Ok(false),
            }
        }
    }

    async fn trip_failsafe_and_notify(&self, policy: &GroupScalingPolicy, state: &mut ScalingState, reason: &str) {
        let tripped = state.maybe_trip_failsafe(policy.retry_threshold);
        self.metrics.failsafe_active.with_label_values(&["job", &state.resource_name]).set(state.failsafe_mode as i64);

        if !tripped || state.failsafe_admin {
            return;
        }

        let now = Utc::now();
        let cooldown = chrono::Duration::from_std(policy.cooldown).unwrap_or(chrono::Duration::zero());
        if !state.should_notify(now, cooldown) {
            return;
        }

        let message = NotificationMessage {
            alert_uid: policy.notification_uid.as_deref(),
            resource_id: &state.resource_name,
            resource_type: ResourceType::Job,
            reason,
        };
        if let Err(error) = self.notifier.notify(&message).await {
            error!(%error, resource = %state.resource_name, "Failed to deliver failsafe notification");
        } else {
            state.last_notification = Some(now);
            self.metrics.failsafe_trips_total.with_label_values(&["job", &state.resource_name]).inc();
        }
    }

    async fn persist(&self, state: &ScalingState) {
        if let Err(error) = self.state_store.persist_state(state).await {
            error!(%error, resource = %state.resource_name, "Failed to persist group scaling state");
        }
    }
}
