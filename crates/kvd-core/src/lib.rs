//! # kvd-core
//!
//! Lease-based leader election for kvdistlead.
//!
//! This crate provides the lease state machine, the scheduling loop that drives
//! it, and the two collaborator contracts it depends on: a [`LeaseStore`] with
//! atomic create-if-absent and compare-and-extend, and a [`DutyController`]
//! that starts and stops the leader-only activity.

pub mod leadership;

pub use leadership::{
    ConfigError, DutyController, ElectionConfig, ElectionLoop, InstanceId, LeadershipState,
    LeadershipStats, LeaseStateMachine, LeaseStore, LeaseStoreError, RedisLeaseStore,
    RedisStoreConfig, StepOutcome,
};
