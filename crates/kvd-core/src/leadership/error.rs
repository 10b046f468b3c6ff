//! Error types for leader election.
//!
//! Store errors never leave a [`LeaseStore`](super::LeaseStore) implementation:
//! adapters log them and report a failed attempt instead. Configuration errors
//! are fatal and surface before the election loop starts.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while talking to the lease store.
#[derive(Error, Debug, Clone)]
pub enum LeaseStoreError {
    /// The store could not be reached or a connection could not be checked out.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// The operation did not complete within its timeout.
    #[error("Operation '{operation}' timed out after {elapsed:?}")]
    Timeout {
        /// The store operation that timed out (e.g. "acquire").
        operation: String,
        /// The timeout that was exceeded.
        elapsed: Duration,
    },

    /// The store answered with something we did not expect.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol error.
        message: String,
    },
}

impl LeaseStoreError {
    /// Creates a `Connection` error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a `Timeout` error.
    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed,
        }
    }

    /// Creates a `Protocol` error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a connection error.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Returns `true` if this is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if this is a protocol error.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }
}

/// Errors found while validating election or store configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required setting is missing or blank.
    #[error("Setting '{name}' is required")]
    Missing {
        /// The name of the missing setting.
        name: String,
    },

    /// A duration setting was zero.
    #[error("Setting '{name}' must be greater than zero")]
    ZeroDuration {
        /// The name of the offending setting.
        name: String,
    },

    /// The renewal interval leaves no room to renew before the lease expires.
    #[error("Renewal interval ({renew_interval:?}) must be shorter than the lease TTL ({ttl:?})")]
    RenewalNotBelowTtl {
        /// Configured renewal interval.
        renew_interval: Duration,
        /// Configured lease TTL.
        ttl: Duration,
    },

    /// A renewal started on schedule could still be running when the lease expires.
    #[error(
        "Renewal interval ({renew_interval:?}) plus the worst-case store call ({max_call:?}) must be shorter than the lease TTL ({ttl:?})"
    )]
    RenewalMarginTooSmall {
        /// Configured renewal interval.
        renew_interval: Duration,
        /// Longest a single store call may take, retries included.
        max_call: Duration,
        /// Configured lease TTL.
        ttl: Duration,
    },

    /// The recovery delay is not shorter than the renewal interval.
    #[error(
        "Recovery delay ({recovery_delay:?}) must be shorter than the renewal interval ({renew_interval:?})"
    )]
    RecoveryNotBelowRenewal {
        /// Configured recovery delay.
        recovery_delay: Duration,
        /// Configured renewal interval.
        renew_interval: Duration,
    },

    /// Any other invalid value.
    #[error("Invalid value for '{name}': {reason}")]
    Invalid {
        /// The name of the offending setting.
        name: String,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// Creates a `Missing` error.
    pub fn missing(name: impl Into<String>) -> Self {
        Self::Missing { name: name.into() }
    }

    /// Creates a `ZeroDuration` error.
    pub fn zero_duration(name: impl Into<String>) -> Self {
        Self::ZeroDuration { name: name.into() }
    }

    /// Creates an `Invalid` error.
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
