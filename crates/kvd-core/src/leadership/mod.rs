//! Lease-based leader election for a fleet of identical instances.
//!
//! Every instance runs the same [`ElectionLoop`]. The loop drives a
//! [`LeaseStateMachine`] which talks to a shared key/value store through the
//! [`LeaseStore`] contract and starts or stops the leader-only activity
//! through the [`DutyController`] contract.
//!
//! # Overview
//!
//! 1. A standby instance tries to **create** the lease record under a fixed key,
//!    writing its own [`InstanceId`] as the holder token with a **TTL**
//! 2. If creation succeeds it becomes **leader** and starts its duty
//! 3. The leader **extends** the TTL periodically, but only while the stored
//!    token is still its own
//! 4. Any failed attempt, whatever the cause, leaves the instance in standby
//!    with its duty stopped
//!
//! Leases are never deleted by the instances. A crashed or stopped leader is
//! replaced once its record expires in the store.
//!
//! # Example
//!
//! ```rust,no_run
//! use kvd_core::leadership::{
//!     ElectionConfig, ElectionLoop, MockLeaseStore, RecordingDuty,
//! };
//! use std::sync::Arc;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ElectionConfig::with_generated_instance_id("my-service-leader");
//!     config.validate()?;
//!
//!     let store = Arc::new(MockLeaseStore::new());
//!     let duty = Arc::new(RecordingDuty::new());
//!     let (shutdown_tx, shutdown_rx) = watch::channel(false);
//!
//!     let handle = tokio::spawn(ElectionLoop::new(config, store, duty).run(shutdown_rx));
//!
//!     // ... later
//!     shutdown_tx.send(true)?;
//!     handle.await?;
//!     Ok(())
//! }
//! ```
//!
//! # Implementations
//!
//! - [`RedisLeaseStore`]: `SET NX PX` for acquisition, a Lua compare-and-extend for renewal
//! - [`MockLeaseStore`]: in-memory store with simulated time and fault injection

mod error;
mod machine;
mod mock;
mod redis_store;
mod scheduler;
mod types;

pub use error::{ConfigError, LeaseStoreError};
pub use machine::LeaseStateMachine;
pub use mock::{DutyEvent, MockLeaseStore, RecordingDuty};
pub use redis_store::{RedisLeaseStore, RedisStoreConfig};
pub use scheduler::ElectionLoop;
pub use types::{
    ElectionConfig, InstanceId, LeadershipState, LeadershipStats, StepOutcome,
    DEFAULT_LEASE_TTL, DEFAULT_RECOVERY_DELAY, DEFAULT_RENEW_INTERVAL, DEFAULT_STANDBY_RETRY,
};

use async_trait::async_trait;
use std::time::Duration;

/// Atomic lease operations offered by the shared store.
///
/// Both operations must be atomic with respect to every other caller using
/// the same key. Implementations must bound every call with a timeout and
/// report *any* failure (timeout, lost connection, protocol error, conflict)
/// as `false`. Nothing is propagated to the caller.
#[async_trait]
pub trait LeaseStore: Send + Sync + 'static {
    /// Creates `key -> token` with expiry `ttl` only if no record exists.
    ///
    /// Returns `true` if the record was created by this call.
    async fn acquire(&self, key: &str, token: &str, ttl: Duration) -> bool;

    /// Resets the expiry of `key` to `ttl` only if it currently holds `token`.
    ///
    /// The comparison and the extension must happen in one store operation.
    /// A separate read followed by a write would let a stale holder extend a
    /// lease that another instance acquired in between.
    async fn renew(&self, key: &str, token: &str, ttl: Duration) -> bool;
}

/// Start/stop hooks for the leader-only activity.
///
/// Both hooks must be idempotent and return quickly; long-running work
/// belongs in a task the hook spawns or signals.
#[async_trait]
pub trait DutyController: Send + Sync + 'static {
    /// Begins the exclusive duty. Called once per leadership span.
    async fn start(&self);

    /// Ends the exclusive duty. Called on every tick that is not provably leader.
    async fn stop(&self);
}
