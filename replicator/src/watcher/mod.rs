//! Long-lived loops that populate the node and job registries by following the orchestrator's
//! change index (§4.2). Each runs indefinitely in its own task and sleeps a fixed interval after
//! transient errors to cap the retry rate.

use std::{collections::HashSet, sync::Arc, time::Duration};

use replicator_core::metadata::{decode_group_policy, decode_pool_config};
use tokio::sync::Notify;
use tracing::{error, info, instrument, warn};

use crate::{
    orchestrator::{JobStatus, Orchestrator, OrchestratorImplementation},
    registry::{JobPolicyRegistry, NodeRegistry},
};

const ERROR_BACKOFF: Duration = Duration::from_secs(20);

#[instrument(name = "node_watcher", skip_all)]
pub async fn run_node_watcher(orchestrator: Arc<OrchestratorImplementation>, registry: Arc<NodeRegistry>, shutdown: Arc<Notify>) {
    loop {
        let wait_index = registry.last_change_index().await;

        let result = tokio::select! {
            result = orchestrator.list_nodes(wait_index, true) => result,
            _ = shutdown.notified() => return,
        };

        match result {
            Ok((nodes, meta)) => {
                if meta.index == wait_index {
                    continue;
                }

                let mut changed = false;
                for node in nodes {
                    if node.drain {
                        changed |= registry.deregister(&node.id).await;
                        continue;
                    }

                    match node.status {
                        replicator_core::node::NodeStatus::Down => {
                            changed |= registry.deregister(&node.id).await;
                        }
                        replicator_core::node::NodeStatus::Ready => match decode_pool_config(&node.id, &node.metadata) {
                            Ok(Some(draft)) => changed |= registry.register(node, draft).await,
                            Ok(None) => {
                                if registry.is_known(&node.id).await {
                                    changed |= registry.deregister(&node.id).await;
                                }
                            }
                            Err(error) => {
                                error!(%error, node_id = %node.id, "Invalid worker pool metadata, skipping node");
                                if registry.is_known(&node.id).await {
                                    changed |= registry.deregister(&node.id).await;
                                }
                            }
                        },
                        replicator_core::node::NodeStatus::Initializing => {}
                    }
                }

                if changed {
                    info!("Node registry membership changed");
                }
                registry.set_last_change_index(meta.index).await;
            }
            Err(error) => {
                warn!(%error, "Node watcher list call failed, backing off");
                tokio::select! {
                    _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                    _ = shutdown.notified() => return,
                }
            }
        }
    }
}

#[instrument(name = "job_watcher", skip_all)]
pub async fn run_job_watcher(orchestrator: Arc<OrchestratorImplementation>, registry: Arc<JobPolicyRegistry>, shutdown: Arc<Notify>) {
    loop {
        let wait_index = registry.last_change_index().await;

        let result = tokio::select! {
            result = orchestrator.list_jobs(wait_index) => result,
            _ = shutdown.notified() => return,
        };

        match result {
            Ok((jobs, meta)) => {
                if meta.index == wait_index {
                    continue;
                }

                for summary in &jobs {
                    if summary.modify_index <= wait_index {
                        continue;
                    }

                    if summary.status == JobStatus::Dead {
                        registry.remove_job(&summary.name).await;
                        continue;
                    }

                    match orchestrator.get_job(&summary.name).await {
                        Ok(job) => {
                            let mut seen_groups = HashSet::with_capacity(job.groups.len());
                            for group in &job.groups {
                                seen_groups.insert(group.name.clone());

                                match decode_group_policy(&job.name, &group.name, &group.metadata) {
                                    Ok(Some(policy)) => registry.upsert(policy).await,
                                    Ok(None) => registry.remove(&job.name, &group.name).await,
                                    Err(error) => {
                                        error!(%error, job = %job.name, group = %group.name, "Invalid group scaling metadata, skipping");
                                    }
                                }
                            }
                            registry.retain_groups(&job.name, &seen_groups).await;
                        }
                        Err(error) => error!(%error, job = %summary.name, "Failed to fetch job detail"),
                    }
                }

                registry.set_last_change_index(meta.index).await;
            }
            Err(error) => {
                warn!(%error, "Job watcher list call failed, backing off");
                tokio::select! {
                    _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                    _ = shutdown.notified() => return,
                }
            }
        }
    }
}
