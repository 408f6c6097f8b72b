use std::time::Duration;

use enum_dispatch::enum_dispatch;
use replicator_core::state::ScalingState;
use snafu::Snafu;

pub mod in_memory;
pub mod redis;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("In-memory state store error"), context(false))]
    InMemoryError { source: in_memory::Error },

    #[snafu(display("Redis state store error"), context(false))]
    RedisError { source: redis::Error },
}

/// The state store backs both [`ScalingState`] persistence and leader election. Every method
/// *must* be safe to call concurrently from multiple replicas: this crate is built on the
/// assumption that exactly one replica at a time holds the leader lock, but reads of persisted
/// state can race a leader failover and must never tear.
#[enum_dispatch(StateStoreImplementation)]
#[trait_variant::make(SendStateStore: Send)]
pub trait StateStore {
    /// Reads the state blob at `state_path`. Returns `Ok(None)` the first time a resource is
    /// evaluated, before anything has ever been persisted for it.
    async fn read_state(&self, state_path: &str) -> Result<Option<ScalingState>, Error>;

    async fn persist_state(&self, state: &ScalingState) -> Result<(), Error>;

    /// Attempts to create or steal the lock named `lock_key` for `holder`, valid for `ttl`.
    /// Returns `true` if `holder` now owns the lock (either because it was free, already held by
    /// `holder`, or its previous holder's lease had lapsed).
    async fn acquire_lock(&self, lock_key: &str, holder: &str, ttl: Duration) -> Result<bool, Error>;

    /// Extends `holder`'s lease on `lock_key` by `ttl`. Returns `false` (without renewing) if
    /// `holder` is not the current owner, meaning leadership has been lost.
    async fn renew_lock(&self, lock_key: &str, holder: &str, ttl: Duration) -> Result<bool, Error>;

    /// Releases `lock_key` only if it is still held by `holder`, so a replica that has already
    /// lost its lease can never clobber the next leader's lock on shutdown.
    async fn release_lock(&self, lock_key: &str, holder: &str) -> Result<(), Error>;
}

#[enum_dispatch]
pub enum StateStoreImplementation {
    InMemory(in_memory::InMemoryStateStore),
    Redis(redis::RedisStateStore),
}
