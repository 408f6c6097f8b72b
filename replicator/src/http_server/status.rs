//! `GET /v1/status` (§6): leader flag plus the last known scaling decision and failsafe state for
//! every pool and job group. Reads are best-effort — a state store error for one resource just
//! omits its `scaling_state` rather than failing the whole response.

use std::sync::Arc;

use axum::{extract::State, Json};
use replicator_core::{state::ScalingState, Direction};
use replicator_state::StateStore;
use serde::Serialize;

use crate::http_server::AppState;

#[derive(Serialize)]
pub struct StatusResponse {
    is_leader: bool,
    pools: Vec<PoolStatus>,
    groups: Vec<GroupStatus>,
}

#[derive(Serialize)]
struct PoolStatus {
    name: String,
    members: usize,
    failsafe_mode: bool,
    scaling_direction: Direction,
}

#[derive(Serialize)]
struct GroupStatus {
    job_name: String,
    group_name: String,
    failsafe_mode: bool,
    scaling_direction: Direction,
}

async fn load(state_store: &replicator_state::StateStoreImplementation, state_path: &str) -> Option<ScalingState> {
    state_store.read_state(state_path).await.ok().flatten()
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let mut pools = Vec::new();
    for pool in state.node_registry.snapshot_pools().await {
        let scaling_state = load(&state.state_store, &pool.state_path()).await;
        pools.push(PoolStatus {
            name: pool.config.name.clone(),
            members: pool.members.len(),
            failsafe_mode: scaling_state.as_ref().map(|s| s.failsafe_mode).unwrap_or(false),
            scaling_direction: scaling_state.map(|s| s.scaling_direction).unwrap_or_default(),
        });
    }

    let mut groups = Vec::new();
    for (job_name, policies) in state.job_registry.snapshot().await {
        for policy in policies {
            let scaling_state = load(&state.state_store, &policy.state_path()).await;
            groups.push(GroupStatus {
                job_name: job_name.clone(),
                group_name: policy.group_name,
                failsafe_mode: scaling_state.as_ref().map(|s| s.failsafe_mode).unwrap_or(false),
                scaling_direction: scaling_state.map(|s| s.scaling_direction).unwrap_or_default(),
            });
        }
    }

    Json(StatusResponse { is_leader: state.leader.is_leader(), pools, groups })
}
