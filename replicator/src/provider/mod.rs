//! Desired-count adjustment for a pool, detach/terminate of a specific instance, and the
//! provider-side half of the scale-in/scale-out safety check (§4.4 PROVIDER_SAFETY, §4.5, §4.6).

use enum_dispatch::enum_dispatch;
use replicator_core::{pool::WorkerPoolConfig, Direction};
use snafu::Snafu;

pub mod http;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("Cloud scaling provider error"), context(false))]
    Http { source: http::Error },
}

#[trait_variant::make(SendScalingProvider: Send)]
#[enum_dispatch(ScalingProviderImplementation)]
pub trait ScalingProvider {
    /// Adjusts the pool's desired instance count by exactly one in `direction` and waits for the
    /// provider's own desired=actual convergence (bounded, §4.5). Does not perform the retry loop
    /// itself; that lives in the cluster engine.
    async fn scale(&self, pool: &WorkerPoolConfig, direction: Direction) -> Result<(), Error>;

    /// Provider-side safety predicate: does `current_members` sit within the provider's own
    /// min/max, and does the provider's desired count already match `current_members`.
    async fn safety_check(&self, pool: &WorkerPoolConfig, current_members: u64) -> Result<bool, Error>;

    /// Address of the most recently launched instance in this pool, if any launched within the
    /// provider's own bookkeeping window (§4.5).
    async fn most_recently_launched(&self, pool: &WorkerPoolConfig) -> Result<Option<String>, Error>;

    /// Terminates a specific instance outright; the group launches a replacement.
    async fn terminate(&self, pool: &WorkerPoolConfig, address: &str) -> Result<(), Error>;

    /// Removes a specific instance from the group without terminating it, for forensics. When
    /// `decrement_desired` is set the group's desired count drops by one to compensate.
    async fn detach(&self, pool: &WorkerPoolConfig, address: &str, decrement_desired: bool) -> Result<(), Error>;
}

#[enum_dispatch]
pub enum ScalingProviderImplementation {
    Http(http::HttpScalingProvider),
}
