//! Types for leader election.
//!
//! This module defines the data the election loop works with:
//! - `InstanceId`: the holder token this process writes into the lease
//! - `LeadershipState` / `StepOutcome`: where the state machine is and what the last tick did
//! - `ElectionConfig`: lease key, TTL and loop cadences
//! - `LeadershipStats`: in-process counters about won and lost elections

use super::ConfigError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Default lease TTL.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_millis(15_000);
/// Default renewal interval while leader.
pub const DEFAULT_RENEW_INTERVAL: Duration = Duration::from_millis(5_000);
/// Default wait between acquisition attempts while standing by.
pub const DEFAULT_STANDBY_RETRY: Duration = Duration::from_millis(2_000);
/// Default wait after losing leadership before trying to acquire again.
pub const DEFAULT_RECOVERY_DELAY: Duration = Duration::from_millis(1_000);

/// The token identifying this process as a lease holder.
///
/// Generated once per process and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Wraps an explicitly configured identity.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh identity of the form `<hostname>-<uuid>`.
    ///
    /// The hostname keeps logs readable; the UUID makes two processes on the
    /// same host (or a restarted process) distinct.
    pub fn generate() -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        Self(format!("{}-{}", hostname, Uuid::new_v4()))
    }

    /// Returns the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for InstanceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for InstanceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Whether this instance currently holds the lease.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadershipState {
    /// Not the leader. Duty must not run.
    #[default]
    Standby,
    /// Holds the lease. Duty runs.
    Leader,
}

impl LeadershipState {
    /// Returns `true` for [`LeadershipState::Leader`].
    pub fn is_leader(&self) -> bool {
        matches!(self, Self::Leader)
    }
}

impl fmt::Display for LeadershipState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standby => write!(f, "standby"),
            Self::Leader => write!(f, "leader"),
        }
    }
}

/// What a single tick of the state machine did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    /// Standby -> Leader: the lease was created for us.
    Acquired,
    /// Standby -> Standby: acquisition failed (held elsewhere or store unavailable).
    Standby,
    /// Leader -> Leader: the lease was extended.
    Renewed,
    /// Leader -> Standby: renewal failed for any reason.
    Lost,
}

impl StepOutcome {
    /// The state the machine is in after this outcome.
    pub fn state(&self) -> LeadershipState {
        match self {
            Self::Acquired | Self::Renewed => LeadershipState::Leader,
            Self::Standby | Self::Lost => LeadershipState::Standby,
        }
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acquired => write!(f, "acquired"),
            Self::Standby => write!(f, "standby"),
            Self::Renewed => write!(f, "renewed"),
            Self::Lost => write!(f, "lost"),
        }
    }
}

/// Configuration for one election participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// Key of the lease record in the store. Fixed for the process lifetime.
    pub lock_key: String,

    /// Token written into the lease when this instance acquires it.
    pub instance_id: InstanceId,

    /// How long the store keeps the lease without a renewal.
    #[serde(with = "humantime_serde")]
    pub lease_ttl: Duration,

    /// How often the leader renews. Must be shorter than `lease_ttl`.
    #[serde(with = "humantime_serde")]
    pub renew_interval: Duration,

    /// Wait between acquisition attempts while standing by.
    #[serde(with = "humantime_serde")]
    pub standby_retry: Duration,

    /// Wait after losing leadership before the next attempt.
    ///
    /// Must be shorter than `renew_interval`.
    #[serde(with = "humantime_serde")]
    pub recovery_delay: Duration,
}

impl ElectionConfig {
    /// Creates a configuration with default timings.
    pub fn new(lock_key: impl Into<String>, instance_id: impl Into<InstanceId>) -> Self {
        Self {
            lock_key: lock_key.into(),
            instance_id: instance_id.into(),
            lease_ttl: DEFAULT_LEASE_TTL,
            renew_interval: DEFAULT_RENEW_INTERVAL,
            standby_retry: DEFAULT_STANDBY_RETRY,
            recovery_delay: DEFAULT_RECOVERY_DELAY,
        }
    }

    /// Creates a configuration with a freshly generated instance identity.
    pub fn with_generated_instance_id(lock_key: impl Into<String>) -> Self {
        Self::new(lock_key, InstanceId::generate())
    }

    /// Sets the lease TTL.
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    /// Sets the renewal interval.
    pub fn with_renew_interval(mut self, interval: Duration) -> Self {
        self.renew_interval = interval;
        self
    }

    /// Sets the standby retry interval.
    pub fn with_standby_retry(mut self, interval: Duration) -> Self {
        self.standby_retry = interval;
        self
    }

    /// Sets the recovery delay.
    pub fn with_recovery_delay(mut self, delay: Duration) -> Self {
        self.recovery_delay = delay;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_key.trim().is_empty() {
            return Err(ConfigError::missing("lock_key"));
        }

        if self.instance_id.as_str().trim().is_empty() {
            return Err(ConfigError::missing("instance_id"));
        }

        for (name, value) in [
            ("lease_ttl", self.lease_ttl),
            ("renew_interval", self.renew_interval),
            ("standby_retry", self.standby_retry),
            ("recovery_delay", self.recovery_delay),
        ] {
            if value.is_zero() {
                return Err(ConfigError::zero_duration(name));
            }
        }

        if self.renew_interval >= self.lease_ttl {
            return Err(ConfigError::RenewalNotBelowTtl {
                renew_interval: self.renew_interval,
                ttl: self.lease_ttl,
            });
        }

        if self.recovery_delay >= self.renew_interval {
            return Err(ConfigError::RecoveryNotBelowRenewal {
                recovery_delay: self.recovery_delay,
                renew_interval: self.renew_interval,
            });
        }

        Ok(())
    }

    /// Checks that a renewal fits before expiry even when the store is slow.
    ///
    /// `max_call` is the longest one store call may block, retries included.
    /// The leader keeps its duty running while a renewal is in flight, so the
    /// last confirmed renewal plus the next interval plus that call must end
    /// before the lease TTL runs out.
    pub fn validate_renewal_margin(&self, max_call: Duration) -> Result<(), ConfigError> {
        if self.renew_interval + max_call >= self.lease_ttl {
            return Err(ConfigError::RenewalMarginTooSmall {
                renew_interval: self.renew_interval,
                max_call,
                ttl: self.lease_ttl,
            });
        }
        Ok(())
    }

    /// How long the loop waits after a tick with the given outcome.
    pub fn delay_after(&self, outcome: StepOutcome) -> Duration {
        match outcome {
            StepOutcome::Acquired | StepOutcome::Renewed => self.renew_interval,
            StepOutcome::Standby => self.standby_retry,
            StepOutcome::Lost => self.recovery_delay,
        }
    }
}

/// Counters describing this instance's leadership history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeadershipStats {
    /// Number of times leadership was acquired.
    pub elections_won: u64,
    /// Number of times leadership was lost through a failed renewal.
    pub elections_lost: u64,
    /// Number of failed acquisition attempts.
    pub acquire_failures: u64,
    /// Number of successful renewals.
    pub renewals_successful: u64,
    /// Number of failed renewals.
    pub renewals_failed: u64,
    /// When the current leadership span began.
    pub leadership_acquired_at: Option<DateTime<Utc>>,
    /// Total seconds spent as leader across finished leadership spans.
    pub total_leadership_seconds: u64,
}

impl LeadershipStats {
    pub(crate) fn record_acquired(&mut self) {
        self.elections_won += 1;
        self.leadership_acquired_at = Some(Utc::now());
    }

    pub(crate) fn record_leadership_ended(&mut self) {
        if let Some(acquired_at) = self.leadership_acquired_at.take() {
            let duration = (Utc::now() - acquired_at).num_seconds().max(0) as u64;
            self.total_leadership_seconds += duration;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> ElectionConfig {
        ElectionConfig::new("lk", "instance-1")
    }

    #[test]
    fn test_election_config_defaults() {
        let config = valid_config();

        assert_eq!(config.lock_key, "lk");
        assert_eq!(config.instance_id.as_str(), "instance-1");
        assert_eq!(config.lease_ttl, Duration::from_millis(15_000));
        assert_eq!(config.renew_interval, Duration::from_millis(5_000));
        assert_eq!(config.standby_retry, Duration::from_millis(2_000));
        assert_eq!(config.recovery_delay, Duration::from_millis(1_000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_election_config_builder() {
        let config = valid_config()
            .with_lease_ttl(Duration::from_secs(60))
            .with_renew_interval(Duration::from_secs(20))
            .with_standby_retry(Duration::from_secs(3))
            .with_recovery_delay(Duration::from_millis(500));

        assert_eq!(config.lease_ttl, Duration::from_secs(60));
        assert_eq!(config.renew_interval, Duration::from_secs(20));
        assert_eq!(config.standby_retry, Duration::from_secs(3));
        assert_eq!(config.recovery_delay, Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_renewal_equal_to_ttl() {
        let config = valid_config()
            .with_lease_ttl(Duration::from_secs(10))
            .with_renew_interval(Duration::from_secs(10));

        assert!(matches!(
            config.validate(),
            Err(ConfigError::RenewalNotBelowTtl { .. })
        ));
    }

    #[test]
    fn test_rejects_renewal_longer_than_ttl() {
        let config = valid_config()
            .with_lease_ttl(Duration::from_secs(10))
            .with_renew_interval(Duration::from_secs(30));

        assert!(matches!(
            config.validate(),
            Err(ConfigError::RenewalNotBelowTtl { .. })
        ));
    }

    #[test]
    fn test_rejects_recovery_delay_not_below_renewal() {
        let config = valid_config().with_recovery_delay(Duration::from_secs(5));

        assert!(matches!(
            config.validate(),
            Err(ConfigError::RecoveryNotBelowRenewal { .. })
        ));
    }

    #[test]
    fn test_rejects_blank_key_and_identity() {
        let config = ElectionConfig::new("  ", "instance-1");
        assert_eq!(config.validate(), Err(ConfigError::missing("lock_key")));

        let config = ElectionConfig::new("lk", "");
        assert_eq!(config.validate(), Err(ConfigError::missing("instance_id")));
    }

    #[test]
    fn test_rejects_zero_durations() {
        let config = valid_config().with_standby_retry(Duration::ZERO);
        assert_eq!(
            config.validate(),
            Err(ConfigError::zero_duration("standby_retry"))
        );
    }

    #[test]
    fn test_renewal_margin() {
        let config = valid_config();

        // 5s interval + 4s worst-case call < 15s TTL
        assert!(config.validate_renewal_margin(Duration::from_secs(4)).is_ok());
        assert_eq!(
            config.validate_renewal_margin(Duration::from_secs(10)),
            Err(ConfigError::RenewalMarginTooSmall {
                renew_interval: Duration::from_secs(5),
                max_call: Duration::from_secs(10),
                ttl: Duration::from_secs(15),
            })
        );

        // Passes the plain interval check but leaves no room for a slow call
        let tight = valid_config().with_renew_interval(Duration::from_millis(14_999));
        assert!(tight.validate().is_ok());
        assert!(tight
            .validate_renewal_margin(Duration::from_millis(1))
            .is_err());
    }

    #[test]
    fn test_delay_after_each_outcome() {
        let config = valid_config();

        assert_eq!(config.delay_after(StepOutcome::Acquired), config.renew_interval);
        assert_eq!(config.delay_after(StepOutcome::Renewed), config.renew_interval);
        assert_eq!(config.delay_after(StepOutcome::Standby), config.standby_retry);
        assert_eq!(config.delay_after(StepOutcome::Lost), config.recovery_delay);
        assert!(config.delay_after(StepOutcome::Lost) < config.renew_interval);
    }

    #[test]
    fn test_outcome_state() {
        assert_eq!(StepOutcome::Acquired.state(), LeadershipState::Leader);
        assert_eq!(StepOutcome::Renewed.state(), LeadershipState::Leader);
        assert_eq!(StepOutcome::Standby.state(), LeadershipState::Standby);
        assert_eq!(StepOutcome::Lost.state(), LeadershipState::Standby);
    }

    #[test]
    fn test_generated_instance_ids_are_unique() {
        let a = InstanceId::generate();
        let b = InstanceId::generate();

        assert_ne!(a, b);
        assert!(a.as_str().contains('-'));
    }

    #[test]
    fn test_config_serializes_humantime_durations() {
        let json = serde_json::to_value(valid_config()).unwrap();

        assert_eq!(json["lease_ttl"], "15s");
        assert_eq!(json["recovery_delay"], "1s");
        assert_eq!(json["instance_id"], "instance-1");
    }

    #[test]
    fn test_stats_track_leadership_span() {
        let mut stats = LeadershipStats::default();

        stats.record_acquired();
        assert_eq!(stats.elections_won, 1);
        assert!(stats.leadership_acquired_at.is_some());

        stats.record_leadership_ended();
        assert!(stats.leadership_acquired_at.is_none());
    }
}
