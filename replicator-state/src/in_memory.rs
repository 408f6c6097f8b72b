use std::{collections::HashMap, time::Duration};

use replicator_core::state::ScalingState;
use snafu::Snafu;
use tokio::{
    sync::RwLock,
    time::Instant,
};
use tracing::{info, instrument};

use crate::StateStore;

struct Lease {
    holder: String,
    expires_at: Instant,
}

#[derive(Snafu, Debug)]
pub enum Error {}

/// Single-process state store, useful for local development and the `init`/single-replica case.
/// Leases are simulated with [`tokio::time::Instant`] rather than wall-clock time so tests can
/// drive them without sleeping.
pub struct InMemoryStateStore {
    states: RwLock<HashMap<String, ScalingState>>,
    locks: RwLock<HashMap<String, Lease>>,
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        info!("Using in-memory state store");

        Self {
            states: RwLock::new(HashMap::new()),
            locks: RwLock::new(HashMap::new()),
        }
    }
}

impl StateStore for InMemoryStateStore {
    #[instrument(skip(self))]
    async fn read_state(&self, state_path: &str) -> Result<Option<ScalingState>, super::Error> {
        Ok(self.states.read().await.get(state_path).cloned())
    }

    #[instrument(skip(self, state))]
    async fn persist_state(&self, state: &ScalingState) -> Result<(), super::Error> {
        self.states
            .write()
            .await
            .insert(state.state_path.clone(), state.clone());

        Ok(())
    }

    #[instrument(skip(self))]
    async fn acquire_lock(&self, lock_key: &str, holder: &str, ttl: Duration) -> Result<bool, super::Error> {
        let mut locks = self.locks.write().await;
        let now = Instant::now();

        let acquired = match locks.get(lock_key) {
            Some(lease) if lease.holder == holder || lease.expires_at <= now => true,
            Some(_) => false,
            None => true,
        };

        if acquired {
            locks.insert(
                lock_key.to_string(),
                Lease {
                    holder: holder.to_string(),
                    expires_at: now + ttl,
                },
            );
        }

        Ok(acquired)
    }

    #[instrument(skip(self))]
    async fn renew_lock(&self, lock_key: &str, holder: &str, ttl: Duration) -> Result<bool, super::Error> {
        let mut locks = self.locks.write().await;

        match locks.get_mut(lock_key) {
            Some(lease) if lease.holder == holder => {
                lease.expires_at = Instant::now() + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    #[instrument(skip(self))]
    async fn release_lock(&self, lock_key: &str, holder: &str) -> Result<(), super::Error> {
        let mut locks = self.locks.write().await;

        if let Some(lease) = locks.get(lock_key) {
            if lease.holder == holder {
                locks.remove(lock_key);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use replicator_core::{state::ScalingState, ResourceType};

    use super::*;

    #[tokio::test]
    async fn second_holder_cannot_steal_an_active_lease() {
        let store = InMemoryStateStore::default();
        assert!(store.acquire_lock("leader", "a", Duration::from_secs(60)).await.unwrap());
        assert!(!store.acquire_lock("leader", "b", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn renew_fails_for_non_holder() {
        let store = InMemoryStateStore::default();
        store.acquire_lock("leader", "a", Duration::from_secs(60)).await.unwrap();
        assert!(!store.renew_lock("leader", "b", Duration::from_secs(60)).await.unwrap());
        assert!(store.renew_lock("leader", "a", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn release_by_non_holder_is_a_noop() {
        let store = InMemoryStateStore::default();
        store.acquire_lock("leader", "a", Duration::from_secs(60)).await.unwrap();
        store.release_lock("leader", "b").await.unwrap();
        assert!(!store.acquire_lock("leader", "b", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn state_round_trips() {
        let store = InMemoryStateStore::default();
        assert_eq!(store.read_state("state/nodes/pool-a").await.unwrap(), None);

        let state = ScalingState::new(ResourceType::Cluster, "pool-a", "state/nodes/pool-a");
        store.persist_state(&state).await.unwrap();
        assert_eq!(store.read_state("state/nodes/pool-a").await.unwrap(), Some(state));
    }
}
