//! The scheduling loop that drives the state machine.

use super::{DutyController, ElectionConfig, LeaseStateMachine, LeaseStore, StepOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Polls the lease at a cadence chosen by the outcome of the previous tick.
///
/// Each tick finishes completely (store call, transition, duty hook) before
/// the wait for the next one begins. The wait is:
///
/// - the renewal interval after acquiring or renewing,
/// - the standby retry interval after a failed acquisition,
/// - the recovery delay right after losing leadership.
#[derive(Debug)]
pub struct ElectionLoop {
    machine: LeaseStateMachine,
}

impl ElectionLoop {
    /// Creates a loop around a fresh state machine.
    pub fn new(
        config: ElectionConfig,
        store: Arc<dyn LeaseStore>,
        duty: Arc<dyn DutyController>,
    ) -> Self {
        Self {
            machine: LeaseStateMachine::new(config, store, duty),
        }
    }

    /// The state machine this loop drives.
    pub fn machine(&self) -> &LeaseStateMachine {
        &self.machine
    }

    /// Runs one tick and returns its outcome with the delay before the next one.
    pub async fn tick(&mut self) -> (StepOutcome, Duration) {
        let outcome = self.machine.step().await;
        let delay = self.machine.config().delay_after(outcome);
        debug!(
            instance_id = %self.machine.instance_id(),
            outcome = %outcome,
            delay_ms = delay.as_millis() as u64,
            "Election tick complete"
        );
        (outcome, delay)
    }

    /// Runs until `shutdown` becomes `true` or its sender is dropped.
    ///
    /// On exit duty is stopped and the state returns to standby. The lease
    /// itself is not deleted; it expires after its TTL. Returns the state
    /// machine so callers can inspect its final stats.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> LeaseStateMachine {
        let config = self.machine.config();
        info!(
            instance_id = %config.instance_id,
            key = %config.lock_key,
            ttl_ms = config.lease_ttl.as_millis() as u64,
            renew_ms = config.renew_interval.as_millis() as u64,
            standby_ms = config.standby_retry.as_millis() as u64,
            recovery_ms = config.recovery_delay.as_millis() as u64,
            "Starting election loop"
        );

        while !*shutdown.borrow() {
            let (_, delay) = self.tick().await;

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(
            instance_id = %self.machine.instance_id(),
            "Election loop shutting down"
        );
        self.machine.relinquish().await;
        self.machine
    }
}
