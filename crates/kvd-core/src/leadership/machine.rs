//! The lease state machine.
//!
//! | Current state | Attempt   | Outcome | Next state | Side effect |
//! |---------------|-----------|---------|------------|-------------|
//! | Standby       | `acquire` | success | Leader     | duty start  |
//! | Standby       | `acquire` | failure | Standby    | duty stop   |
//! | Leader        | `renew`   | success | Leader     | none        |
//! | Leader        | `renew`   | failure | Standby    | duty stop   |
//!
//! Duty stop runs on every tick that does not end in `Leader`, not only on the
//! Leader -> Standby edge. Duty start runs only on the Standby -> Leader edge.

use super::{
    DutyController, ElectionConfig, InstanceId, LeadershipState, LeadershipStats, LeaseStore,
    StepOutcome,
};
use kvd_observability::metrics::{
    ACQUIRE_ATTEMPTS_TOTAL, ELECTIONS_LOST_TOTAL, ELECTIONS_WON_TOTAL, IS_LEADER, RENEWALS_TOTAL,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Owns the leadership state of one instance and all transitions out of it.
pub struct LeaseStateMachine {
    config: ElectionConfig,
    store: Arc<dyn LeaseStore>,
    duty: Arc<dyn DutyController>,
    state: LeadershipState,
    stats: LeadershipStats,
}

impl LeaseStateMachine {
    /// Creates a state machine in `Standby`.
    pub fn new(
        config: ElectionConfig,
        store: Arc<dyn LeaseStore>,
        duty: Arc<dyn DutyController>,
    ) -> Self {
        Self {
            config,
            store,
            duty,
            state: LeadershipState::Standby,
            stats: LeadershipStats::default(),
        }
    }

    /// The current leadership state.
    pub fn state(&self) -> LeadershipState {
        self.state
    }

    /// Returns `true` while this instance holds the lease.
    pub fn is_leader(&self) -> bool {
        self.state.is_leader()
    }

    /// The configuration this machine runs with.
    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    /// The holder token this machine writes into the lease.
    pub fn instance_id(&self) -> &InstanceId {
        &self.config.instance_id
    }

    /// Leadership counters collected so far.
    pub fn stats(&self) -> &LeadershipStats {
        &self.stats
    }

    /// Runs one tick: one store call, the resulting transition and its duty hook.
    #[instrument(
        skip(self),
        fields(instance_id = %self.config.instance_id, key = %self.config.lock_key, state = %self.state)
    )]
    pub async fn step(&mut self) -> StepOutcome {
        let outcome = match self.state {
            LeadershipState::Standby => self.try_acquire().await,
            LeadershipState::Leader => self.try_renew().await,
        };
        self.state = outcome.state();
        let is_leader = if self.state.is_leader() { 1.0 } else { 0.0 };
        metrics::gauge!(IS_LEADER).set(is_leader);
        outcome
    }

    async fn try_acquire(&mut self) -> StepOutcome {
        let config = &self.config;
        let acquired = self
            .store
            .acquire(
                &config.lock_key,
                config.instance_id.as_str(),
                config.lease_ttl,
            )
            .await;

        if acquired {
            info!(
                instance_id = %config.instance_id,
                key = %config.lock_key,
                ttl_ms = config.lease_ttl.as_millis() as u64,
                "Acquired leadership"
            );
            metrics::counter!(ACQUIRE_ATTEMPTS_TOTAL, "status" => "success").increment(1);
            metrics::counter!(ELECTIONS_WON_TOTAL).increment(1);
            self.stats.record_acquired();
            self.duty.start().await;
            StepOutcome::Acquired
        } else {
            debug!(
                instance_id = %config.instance_id,
                key = %config.lock_key,
                "Lease not acquired, staying on standby"
            );
            metrics::counter!(ACQUIRE_ATTEMPTS_TOTAL, "status" => "failure").increment(1);
            self.stats.acquire_failures += 1;
            // Re-asserted every standby tick, in case duty was left running.
            self.duty.stop().await;
            StepOutcome::Standby
        }
    }

    async fn try_renew(&mut self) -> StepOutcome {
        let config = &self.config;
        let renewed = self
            .store
            .renew(
                &config.lock_key,
                config.instance_id.as_str(),
                config.lease_ttl,
            )
            .await;

        if renewed {
            debug!(
                instance_id = %config.instance_id,
                key = %config.lock_key,
                "Leadership renewed"
            );
            metrics::counter!(RENEWALS_TOTAL, "status" => "success").increment(1);
            self.stats.renewals_successful += 1;
            StepOutcome::Renewed
        } else {
            warn!(
                instance_id = %config.instance_id,
                key = %config.lock_key,
                "Lost leadership during renewal, stopping duty"
            );
            metrics::counter!(RENEWALS_TOTAL, "status" => "failure").increment(1);
            metrics::counter!(ELECTIONS_LOST_TOTAL).increment(1);
            self.stats.renewals_failed += 1;
            self.stats.elections_lost += 1;
            self.stats.record_leadership_ended();
            self.duty.stop().await;
            StepOutcome::Lost
        }
    }

    /// Drops back to `Standby` and stops duty without touching the store.
    ///
    /// Used when the loop exits. The lease is left to expire on its own.
    pub async fn relinquish(&mut self) {
        if self.state.is_leader() {
            info!(
                instance_id = %self.config.instance_id,
                key = %self.config.lock_key,
                "Relinquishing leadership, lease will expire after its TTL"
            );
            self.stats.record_leadership_ended();
        }
        self.state = LeadershipState::Standby;
        metrics::gauge!(IS_LEADER).set(0.0);
        self.duty.stop().await;
    }
}

impl std::fmt::Debug for LeaseStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseStateMachine")
            .field("instance_id", &self.config.instance_id)
            .field("lock_key", &self.config.lock_key)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leadership::{DutyEvent, MockLeaseStore, RecordingDuty};
    use std::time::Duration;

    fn machine(
        token: &str,
        store: &MockLeaseStore,
        duty: &RecordingDuty,
    ) -> LeaseStateMachine {
        LeaseStateMachine::new(
            ElectionConfig::new("lk", token),
            Arc::new(store.clone()),
            Arc::new(duty.clone()),
        )
    }

    #[tokio::test]
    async fn test_starts_in_standby() {
        let store = MockLeaseStore::new();
        let duty = RecordingDuty::new();
        let sm = machine("A", &store, &duty);

        assert_eq!(sm.state(), LeadershipState::Standby);
        assert!(!sm.is_leader());
        assert_eq!(sm.instance_id().as_str(), "A");
    }

    #[tokio::test]
    async fn test_acquire_on_empty_store() {
        let store = MockLeaseStore::new();
        let duty_a = RecordingDuty::new();
        let duty_b = RecordingDuty::new();
        let mut a = machine("A", &store, &duty_a);
        let mut b = machine("B", &store, &duty_b);

        assert_eq!(a.step().await, StepOutcome::Acquired);
        assert!(a.is_leader());
        assert_eq!(duty_a.starts(), 1);
        assert_eq!(store.holder("lk").await.as_deref(), Some("A"));

        assert_eq!(b.step().await, StepOutcome::Standby);
        assert_eq!(b.state(), LeadershipState::Standby);
        assert_eq!(duty_b.starts(), 0);
        assert_eq!(duty_b.stops(), 1);
    }

    #[tokio::test]
    async fn test_renew_while_holder() {
        let store = MockLeaseStore::new();
        let duty = RecordingDuty::new();
        let mut a = machine("A", &store, &duty);

        a.step().await;
        assert_eq!(a.step().await, StepOutcome::Renewed);
        assert_eq!(a.step().await, StepOutcome::Renewed);

        assert!(a.is_leader());
        assert_eq!(duty.events().await, vec![DutyEvent::Started]);
        assert_eq!(a.stats().renewals_successful, 2);
        assert_eq!(store.acquire_calls(), 1);
        assert_eq!(store.renew_calls(), 2);
    }

    #[tokio::test]
    async fn test_renew_after_takeover_loses_leadership() {
        let store = MockLeaseStore::new();
        let duty = RecordingDuty::new();
        let mut a = machine("A", &store, &duty);

        a.step().await;
        store.force_holder("lk", "B", Duration::from_secs(15)).await;

        assert_eq!(a.step().await, StepOutcome::Lost);
        assert_eq!(a.state(), LeadershipState::Standby);
        assert!(!duty.is_running());
        assert_eq!(
            duty.events().await,
            vec![DutyEvent::Started, DutyEvent::Stopped]
        );
        assert_eq!(a.stats().elections_lost, 1);
    }

    #[tokio::test]
    async fn test_renew_after_expiry_loses_leadership() {
        let store = MockLeaseStore::new();
        let duty = RecordingDuty::new();
        let mut a = machine("A", &store, &duty);

        a.step().await;
        store.expire("lk").await;

        assert_eq!(a.step().await, StepOutcome::Lost);
        assert!(!a.is_leader());
        assert_eq!(duty.stops(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_is_fail_closed() {
        let store = MockLeaseStore::new();
        let duty = RecordingDuty::new();
        let mut a = machine("A", &store, &duty);

        a.step().await;
        store.set_unavailable(true);

        // Still the recorded holder, but renewal could not be proven
        assert_eq!(a.step().await, StepOutcome::Lost);
        assert_eq!(store.holder("lk").await.as_deref(), Some("A"));
        assert!(!a.is_leader());
        assert!(!duty.is_running());

        // Every further standby tick re-asserts stop
        assert_eq!(a.step().await, StepOutcome::Standby);
        assert_eq!(a.step().await, StepOutcome::Standby);
        assert_eq!(duty.stops(), 3);
        assert_eq!(duty.starts(), 1);
    }

    #[tokio::test]
    async fn test_single_start_per_leadership_epoch() {
        let store = MockLeaseStore::new();
        let duty = RecordingDuty::new();
        let mut a = machine("A", &store, &duty);

        for _ in 0..5 {
            a.step().await;
        }
        assert_eq!(duty.starts(), 1);

        // Lose and regain: a second epoch, a second start
        store.expire("lk").await;
        assert_eq!(a.step().await, StepOutcome::Lost);
        assert_eq!(a.step().await, StepOutcome::Acquired);
        for _ in 0..3 {
            a.step().await;
        }

        assert_eq!(duty.starts(), 2);
        assert_eq!(a.stats().elections_won, 2);
        assert_eq!(
            duty.events().await,
            vec![DutyEvent::Started, DutyEvent::Stopped, DutyEvent::Started]
        );
    }

    #[tokio::test]
    async fn test_relinquish_stops_duty_without_releasing() {
        let store = MockLeaseStore::new();
        let duty = RecordingDuty::new();
        let mut a = machine("A", &store, &duty);

        a.step().await;
        a.relinquish().await;

        assert!(!a.is_leader());
        assert!(!duty.is_running());
        // The record stays until it expires
        assert_eq!(store.holder("lk").await.as_deref(), Some("A"));
    }

    /// Collects the names of every metric registered through it.
    #[derive(Default)]
    struct NameRecorder {
        names: std::sync::Mutex<Vec<String>>,
    }

    impl NameRecorder {
        fn record(&self, key: &metrics::Key) {
            self.names.lock().unwrap().push(key.name().to_string());
        }
    }

    impl metrics::Recorder for NameRecorder {
        fn describe_counter(
            &self,
            _: metrics::KeyName,
            _: Option<metrics::Unit>,
            _: metrics::SharedString,
        ) {
        }

        fn describe_gauge(
            &self,
            _: metrics::KeyName,
            _: Option<metrics::Unit>,
            _: metrics::SharedString,
        ) {
        }

        fn describe_histogram(
            &self,
            _: metrics::KeyName,
            _: Option<metrics::Unit>,
            _: metrics::SharedString,
        ) {
        }

        fn register_counter(
            &self,
            key: &metrics::Key,
            _: &metrics::Metadata<'_>,
        ) -> metrics::Counter {
            self.record(key);
            metrics::Counter::noop()
        }

        fn register_gauge(&self, key: &metrics::Key, _: &metrics::Metadata<'_>) -> metrics::Gauge {
            self.record(key);
            metrics::Gauge::noop()
        }

        fn register_histogram(
            &self,
            key: &metrics::Key,
            _: &metrics::Metadata<'_>,
        ) -> metrics::Histogram {
            self.record(key);
            metrics::Histogram::noop()
        }
    }

    #[test]
    fn test_emits_only_described_metrics() {
        use kvd_observability::metrics::LEADERSHIP_METRICS;

        let recorder = NameRecorder::default();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();

        metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                let store = MockLeaseStore::new();
                let mut a = machine("A", &store, &RecordingDuty::new());
                let mut b = machine("B", &store, &RecordingDuty::new());

                a.step().await; // acquired
                b.step().await; // standby
                a.step().await; // renewed
                store.expire("lk").await;
                a.step().await; // lost
                a.relinquish().await;
            })
        });

        let names = recorder.names.lock().unwrap().clone();
        for name in &names {
            assert!(LEADERSHIP_METRICS.contains(&name.as_str()), "undescribed {}", name);
        }
        for name in LEADERSHIP_METRICS {
            assert!(names.iter().any(|n| n == name), "never emitted {}", name);
        }
    }
}
