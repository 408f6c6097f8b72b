//! Leader election (§4.1): a named lock key in the state store, held by whichever replica last
//! won `run_election`, kept alive by a background renewer at `ttl / 2`.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use rand::Rng;
use replicator_state::{StateStore, StateStoreImplementation};
use snafu::Snafu;
use tokio::{sync::Notify, task::JoinHandle, time};
use tracing::{error, info, instrument, warn};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("State store error during leader election"), context(false))]
    StateStore { source: replicator_state::Error },
}

pub struct LeaderCandidate {
    store: Arc<StateStoreImplementation>,
    lock_key: String,
    holder_id: String,
    ttl: Duration,
    is_leader: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    renewer: Mutex<Option<JoinHandle<()>>>,
}

impl LeaderCandidate {
    pub fn new(store: Arc<StateStoreImplementation>, lock_key: String, ttl: Duration) -> Self {
        let holder_id = format!("{:016x}", rand::thread_rng().gen::<u64>());
        Self {
            store,
            lock_key,
            holder_id,
            ttl,
            is_leader: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
            renewer: Mutex::new(None),
        }
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    /// Attempts to acquire (or re-confirm) the lock for one tick. Lock-acquisition failures are
    /// non-fatal: the candidate simply reports non-leader until the next tick.
    #[instrument(name = "LeaderCandidate::run_election", skip(self))]
    pub async fn run_election(&self) {
        match self.store.acquire_lock(&self.lock_key, &self.holder_id, self.ttl).await {
            Ok(true) => {
                if !self.is_leader.swap(true, Ordering::SeqCst) {
                    info!("Acquired leader lease");
                    self.spawn_renewer();
                }
            }
            Ok(false) => {
                if self.is_leader.swap(false, Ordering::SeqCst) {
                    warn!("Lost leader lease");
                }
            }
            Err(error) => {
                if self.is_leader.swap(false, Ordering::SeqCst) {
                    warn!(%error, "Lost leader lease due to a state store error");
                } else {
                    warn!(%error, "Failed to acquire leader lock this tick");
                }
            }
        }
    }

    fn spawn_renewer(&self) {
        let store = Arc::clone(&self.store);
        let lock_key = self.lock_key.clone();
        let holder_id = self.holder_id.clone();
        let ttl = self.ttl;
        let is_leader = Arc::clone(&self.is_leader);
        let shutdown = Arc::clone(&self.shutdown);

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(ttl / 2);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match store.renew_lock(&lock_key, &holder_id, ttl).await {
                            Ok(true) => {}
                            Ok(false) => {
                                warn!("Lease renewal rejected, no longer the holder");
                                is_leader.store(false, Ordering::SeqCst);
                                break;
                            }
                            Err(error) => error!(%error, "Failed to renew leader lease"),
                        }
                    }
                    _ = shutdown.notified() => break,
                }
            }
        });

        *self.renewer.lock().expect("renewer lock poisoned") = Some(handle);
    }

    /// Closes the renewer and destroys the lease with bounded retries, so another replica does
    /// not have to wait out the TTL.
    #[instrument(name = "LeaderCandidate::shutdown", skip(self))]
    pub async fn shutdown(&self) {
        self.shutdown.notify_waiters();
        if let Some(handle) = self.renewer.lock().expect("renewer lock poisoned").take() {
            handle.abort();
        }

        if !self.is_leader.load(Ordering::SeqCst) {
            return;
        }

        const MAX_ATTEMPTS: u32 = 5;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.store.release_lock(&self.lock_key, &self.holder_id).await {
                Ok(()) => {
                    info!("Released leader lease");
                    return;
                }
                Err(error) => warn!(%error, attempt, "Failed to release leader lease"),
            }
        }
        error!("Giving up releasing the leader lease after {MAX_ATTEMPTS} attempts, relying on TTL expiry");
    }
}
