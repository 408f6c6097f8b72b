//! Pool capacity evaluation and the pool scaling engine state machine (§4.3, §4.4): load state,
//! check the failsafe gate, evaluate capacity, confirm the provider-side safety check, respect
//! cooldown and the consecutive-request threshold, then scale out (with verification/retry, §4.5)
//! or scale in (with node selection, §4.6).

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use futures::{stream, StreamExt};
use replicator_core::{pool::WorkerPool, state::ScalingState, Direction, ResourceType};
use replicator_state::{StateStore, StateStoreImplementation};
use snafu::Snafu;
use tracing::{error, instrument, warn};

use crate::{
    metrics::Metrics,
    notifier::{NotificationMessage, Notifier, NotifierImplementation},
    orchestrator::{Orchestrator, OrchestratorImplementation},
    provider::{ScalingProvider, ScalingProviderImplementation},
    registry::{JobPolicyRegistry, NodeRegistry},
};

pub mod capacity;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("Failed to evaluate pool capacity"), context(false))]
    Capacity { source: capacity::Error },
    #[snafu(display("Orchestrator error"), context(false))]
    Orchestrator { source: crate::orchestrator::Error },
    #[snafu(display("Scaling provider error"), context(false))]
    Provider { source: crate::provider::Error },
    #[snafu(display("State store error"), context(false))]
    StateStore { source: replicator_state::Error },
}

/// Bounds on the drain wait (§4.6) and the post-scale-out instance identification poll (§4.5).
const DRAIN_TIMEOUT: Duration = Duration::from_secs(3 * 60);
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(500);
const LAUNCH_IDENTIFY_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const LAUNCH_IDENTIFY_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct ClusterEngine {
    orchestrator: Arc<OrchestratorImplementation>,
    provider: Arc<ScalingProviderImplementation>,
    state_store: Arc<StateStoreImplementation>,
    notifier: Arc<NotifierImplementation>,
    node_registry: Arc<NodeRegistry>,
    job_registry: Arc<JobPolicyRegistry>,
    metrics: Arc<Metrics>,
    concurrency: usize,
    alloc_id_env_var: String,
}

impl ClusterEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orchestrator: Arc<OrchestratorImplementation>,
        provider: Arc<ScalingProviderImplementation>,
        state_store: Arc<StateStoreImplementation>,
        notifier: Arc<NotifierImplementation>,
        node_registry: Arc<NodeRegistry>,
        job_registry: Arc<JobPolicyRegistry>,
        metrics: Arc<Metrics>,
        concurrency: usize,
        alloc_id_env_var: String,
    ) -> Self {
        Self {
            orchestrator,
            provider,
            state_store,
            notifier,
            node_registry,
            job_registry,
            metrics,
            concurrency,
            alloc_id_env_var,
        }
    }

    /// One full pass over every known pool, fanned out across at most `concurrency` pools at a
    /// time. Returns once every pool has been processed (§4.4 "fan-out").
    #[instrument(name = "ClusterEngine::tick", skip(self))]
    pub async fn tick(&self) {
        let pools = self.node_registry.snapshot_pools().await;
        if pools.is_empty() {
            return;
        }

        self.refresh_protected_nodes(&pools).await;

        stream::iter(pools.into_iter().filter(|p| p.config.enabled))
            .for_each_concurrent(self.concurrency, |pool| async move {
                if let Err(error) = self.process_pool(pool.clone()).await {
                    error!(%error, pool = %pool.config.name, "Pool scaling tick failed");
                }
            })
            .await;
    }

    /// Reverse lookup (§4.6): find which pool, if any, hosts the allocation named by this
    /// replica's own environment variable, and mark its node as protected.
    async fn refresh_protected_nodes(&self, pools: &[WorkerPool]) {
        let Ok(alloc_id) = std::env::var(&self.alloc_id_env_var) else {
            return;
        };

        let allocation = match self.orchestrator.get_allocation(&alloc_id).await {
            Ok(allocation) => allocation,
            Err(error) => {
                warn!(%error, "Failed to resolve this replica's own allocation for protected-node lookup");
                return;
            }
        };

        for pool in pools {
            if pool.members.contains_key(&allocation.node_id) {
                self.node_registry.set_protected_node(&pool.config.name, Some(allocation.node_id.clone())).await;
            }
        }
    }

    async fn process_pool(&self, pool: WorkerPool) -> Result<(), Error> {
        let state_path = pool.state_path();

        let mut state = match self.state_store.read_state(&state_path).await {
            Ok(Some(state)) => state,
            Ok(None) => ScalingState::new(ResourceType::Cluster, pool.config.name.clone(), state_path.clone()),
            Err(error) => {
                warn!(%error, pool = %pool.config.name, "Failed to load pool state, starting from a fresh one this tick");
                ScalingState::new(ResourceType::Cluster, pool.config.name.clone(), state_path.clone())
            }
        };

        if state.failsafe_mode {
            return Ok(());
        }

        let policies = self.job_registry.all_policies().await;
        let cap = capacity::evaluate(&self.orchestrator, &pool, &policies).await?;

        if !cap.direction.is_scaling() {
            return Ok(());
        }

        let members = pool.members.len() as u64;
        let simulated_members = match cap.direction {
            Direction::Out => members + 1,
            Direction::In => members.saturating_sub(1),
            Direction::None => members,
        };
        if simulated_members < pool.config.min || simulated_members > pool.config.max {
            return Ok(());
        }

        match self.provider.safety_check(&pool.config, members).await {
            Ok(true) => {}
            Ok(false) => return Ok(()),
            Err(error) => {
                warn!(%error, pool = %pool.config.name, "Provider safety check failed, skipping this tick");
                return Ok(());
            }
        }

        let now = Utc::now();
        let cooldown = chrono::Duration::from_std(pool.config.cooldown).unwrap_or(chrono::Duration::zero());
        if state.is_in_cooldown(now, cooldown) {
            return Ok(());
        }

        let counter = state.record_direction(cap.direction);
        if counter != pool.config.scaling_threshold {
            self.persist(&state).await;
            return Ok(());
        }
        state.reset_threshold_counter(cap.direction);

        let direction_label = match cap.direction {
            Direction::Out => "out",
            Direction::In => "in",
            Direction::None => "none",
        };

        let outcome = match cap.direction {
            Direction::Out => self.scale_out(&pool, &mut state).await,
            Direction::In => self.scale_in(&pool, &mut state, &cap).await,
            Direction::None => unreachable!("guarded above by is_scaling"),
        };

        match outcome {
            Ok(true) => {
                self.metrics.scaling_decisions_total.with_label_values(&["cluster", &pool.config.name, direction_label]).inc();
            }
            Ok(false) => {}
            Err(error) => error!(%error, pool = %pool.config.name, "Scaling action failed"),
        }

        self.persist(&state).await;
        Ok(())
    }

    /// Adjusts the pool's desired count and verifies a new member actually joined before the
    /// retry threshold is exhausted (§4.5). Returns `Ok(true)` if a scale-out was carried out
    /// successfully.
    async fn scale_out(&self, pool: &WorkerPool, state: &mut ScalingState) -> Result<bool, Error> {
        self.provider.scale(&pool.config, Direction::Out).await?;

        loop {
            let launched = self.poll_most_recently_launched(pool).await?;
            let joined = launched.as_deref().is_some_and(|address| pool.members.values().any(|n| n.address == address));

            if joined {
                state.record_scaling_success(Utc::now());
                return Ok(true);
            }

            state.failure_count += 1;
            self.persist(state).await;

            if state.failure_count < pool.config.retry_threshold {
                if let Some(address) = &launched {
                    self.provider.terminate(&pool.config, address).await?;
                }
                continue;
            }

            if let Some(address) = &launched {
                self.provider.detach(&pool.config, address, true).await?;
            }
            self.trip_failsafe_and_notify(pool, state, "scale-out verification exhausted the retry threshold").await;
            return Ok(false);
        }
    }

    /// Polls the provider for the most-recently-launched instance's address, up to
    /// [`LAUNCH_IDENTIFY_TIMEOUT`] (§4.5).
    async fn poll_most_recently_launched(&self, pool: &WorkerPool) -> Result<Option<String>, Error> {
        let deadline = tokio::time::Instant::now() + LAUNCH_IDENTIFY_TIMEOUT;
        loop {
            if let Some(address) = self.provider.most_recently_launched(&pool.config).await? {
                return Ok(Some(address));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(LAUNCH_IDENTIFY_POLL_INTERVAL).await;
        }
    }

    /// Drains and removes the selected node (§4.6). Returns `Ok(true)` if a member was removed.
    async fn scale_in(&self, pool: &WorkerPool, state: &mut ScalingState, cap: &replicator_core::capacity::ClusterCapacity) -> Result<bool, Error> {
        let Some(target) = capacity::select_scale_in_target(pool, cap) else {
            return Ok(false);
        };

        let address = pool.members[&target].address.clone();
        state.eligible_nodes.push(address.clone());

        self.orchestrator.toggle_drain(&target, true).await?;
        self.wait_for_drain(&target).await;

        self.provider.scale(&pool.config, Direction::In).await?;
        self.provider.detach(&pool.config, &address, false).await.ok();

        state.record_scaling_success(Utc::now());
        Ok(true)
    }

    async fn wait_for_drain(&self, node_id: &str) {
        let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            match self.orchestrator.list_node_allocations(&node_id.to_string()).await {
                Ok(allocations) if allocations.iter().all(|a| !a.is_active()) => return,
                Ok(_) => {}
                Err(error) => warn!(%error, node_id, "Failed to poll drain progress, retrying"),
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
        warn!(node_id, "Drain timed out, proceeding with the provider-side removal anyway");
    }

    async fn trip_failsafe_and_notify(&self, pool: &WorkerPool, state: &mut ScalingState, reason: &str) {
        let tripped = state.maybe_trip_failsafe(pool.config.retry_threshold);
        self.metrics.failsafe_active.with_label_values(&["cluster", &pool.config.name]).set(state.failsafe_mode as i64);

        if !tripped || state.failsafe_admin {
            return;
        }

        let now = Utc::now();
        let cooldown = chrono::Duration::from_std(pool.config.cooldown).unwrap_or(chrono::Duration::zero());
        if !state.should_notify(now, cooldown) {
            return;
        }

        let message = NotificationMessage {
            alert_uid: pool.config.notification_uid.as_deref(),
            resource_id: &pool.config.name,
            resource_type: ResourceType::Cluster,
            reason,
        };
        if let Err(error) = self.notifier.notify(&message).await {
            error!(%error, pool = %pool.config.name, "Failed to deliver failsafe notification");
        } else {
            state.last_notification = Some(now);
            self.metrics.failsafe_trips_total.with_label_values(&["cluster", &pool.config.name]).inc();
        }
    }

    async fn persist(&self, state: &ScalingState) {
        if let Err(error) = self.state_store.persist_state(state).await {
            error!(%error, resource = %state.resource_name, "Failed to persist pool scaling state");
        }
    }
}
