//! Redis implementation of the [`LeaseStore`] contract.
//!
//! # How it works
//!
//! - `acquire` is `SET key token NX PX ttl`: the reply is `OK` only if the key
//!   did not exist.
//! - `renew` runs a Lua script that compares the stored token and extends the
//!   expiry with `PEXPIRE` in one atomic step on the server.
//! - Every pool checkout is bounded by `connect_timeout` and every command by
//!   `operation_timeout`. With `retry_on_timeout`, a timed-out operation is
//!   tried once more.
//!
//! Failures are logged and reported as `false`; the caller never sees an error.
//!
//! Retrying `renew` is harmless: extending an expiry twice leaves the same
//! result. Retrying `acquire` is not. If the timed-out `SET` did reach the
//! server, the retry finds our own record and gets no reply, so the attempt
//! reports failure and this instance stays on standby until that record
//! expires. The retry only helps when the first `SET` never arrived.
//!
//! # Example
//!
//! ```rust,ignore
//! use kvd_core::leadership::{LeaseStore, RedisLeaseStore, RedisStoreConfig};
//! use std::time::Duration;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = RedisLeaseStore::new(RedisStoreConfig::new("localhost", 6379))?;
//!
//!     if store.acquire("my-service-leader", "instance-a", Duration::from_secs(15)).await {
//!         println!("We are the leader");
//!     }
//!     Ok(())
//! }
//! ```

use super::{ConfigError, LeaseStore, LeaseStoreError};
use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Compare-and-extend: extends the key only while it still holds our token.
const RENEW_SCRIPT: &str = r#"
    if redis.call("GET", KEYS[1]) == ARGV[1] then
        return redis.call("PEXPIRE", KEYS[1], ARGV[2])
    else
        return 0
    end
"#;

/// Connection settings for the Redis lease store.
#[derive(Clone, Serialize, Deserialize)]
pub struct RedisStoreConfig {
    /// Redis host name or address.
    pub host: String,
    /// Redis port.
    pub port: u16,
    /// Logical database index.
    pub db: i64,
    /// Optional password (AUTH).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Upper bound for obtaining a connection.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Upper bound for a single command.
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,
    /// Retry an operation once after it times out.
    pub retry_on_timeout: bool,
    /// Maximum number of pooled connections.
    pub max_connections: u32,
}

impl RedisStoreConfig {
    /// Creates a configuration for `host:port` with default timeouts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            db: 0,
            password: None,
            connect_timeout: Duration::from_secs(1),
            operation_timeout: Duration::from_secs(1),
            retry_on_timeout: true,
            max_connections: 4,
        }
    }

    /// Sets the logical database index.
    pub fn with_db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    /// Sets the password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the per-operation timeout.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Enables or disables the single retry after a timeout.
    pub fn with_retry_on_timeout(mut self, retry: bool) -> Self {
        self.retry_on_timeout = retry;
        self
    }

    /// Sets the maximum pool size.
    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// The longest a single `acquire` or `renew` call may take.
    ///
    /// Each attempt waits at most `connect_timeout` for a connection and
    /// `operation_timeout` for the command; a retry doubles that.
    pub fn max_call_duration(&self) -> Duration {
        let attempts = if self.retry_on_timeout { 2 } else { 1 };
        (self.connect_timeout + self.operation_timeout) * attempts
    }

    /// Builds the `redis://` connection URL.
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) if !password.is_empty() => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.db
            ),
            _ => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }

    /// Returns a copy with the password replaced by a placeholder.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.password.is_some() {
            config.password = Some("***REDACTED***".to_string());
        }
        config
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::missing("host"));
        }
        if self.port == 0 {
            return Err(ConfigError::invalid("port", "must be non-zero"));
        }
        if self.db < 0 {
            return Err(ConfigError::invalid("db", "must not be negative"));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::zero_duration("connect_timeout"));
        }
        if self.operation_timeout.is_zero() {
            return Err(ConfigError::zero_duration("operation_timeout"));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::invalid("max_connections", "must be non-zero"));
        }
        Ok(())
    }
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self::new("redis", 6379)
    }
}

impl std::fmt::Debug for RedisStoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStoreConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("connect_timeout", &self.connect_timeout)
            .field("operation_timeout", &self.operation_timeout)
            .field("retry_on_timeout", &self.retry_on_timeout)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// A [`LeaseStore`] backed by a single Redis endpoint.
pub struct RedisLeaseStore {
    pool: Pool,
    config: RedisStoreConfig,
    renew_script: redis::Script,
}

impl RedisLeaseStore {
    /// Creates the store and its connection pool.
    ///
    /// Connections are opened lazily, so an unreachable server is not an
    /// error here; it shows up as failed attempts later.
    ///
    /// # Errors
    ///
    /// Returns `LeaseStoreError::Connection` if the pool cannot be configured.
    pub fn new(config: RedisStoreConfig) -> Result<Self, LeaseStoreError> {
        let pool = PoolConfig::from_url(config.url())
            .builder()
            .map_err(|e| {
                LeaseStoreError::connection(format!("Failed to create pool config: {}", e))
            })?
            .max_size(config.max_connections as usize)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| LeaseStoreError::connection(format!("Failed to build pool: {}", e)))?;

        Ok(Self {
            pool,
            config,
            renew_script: redis::Script::new(RENEW_SCRIPT),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RedisStoreConfig {
        &self.config
    }

    /// Checks that the server answers `PING` within the configured timeouts.
    pub async fn ping(&self) -> Result<(), LeaseStoreError> {
        let mut conn = self.connection().await?;
        let reply: String = self
            .bounded("ping", redis::cmd("PING").query_async(&mut *conn))
            .await?;
        if reply != "PONG" {
            return Err(LeaseStoreError::protocol(format!(
                "Unexpected PING reply: {}",
                reply
            )));
        }
        Ok(())
    }

    /// Gets a connection from the pool within `connect_timeout`.
    async fn connection(&self) -> Result<deadpool_redis::Connection, LeaseStoreError> {
        match tokio::time::timeout(self.config.connect_timeout, self.pool.get()).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(LeaseStoreError::connection(format!(
                "Failed to get connection: {}",
                e
            ))),
            Err(_) => Err(LeaseStoreError::timeout(
                "connect",
                self.config.connect_timeout,
            )),
        }
    }

    /// Awaits a Redis command within `operation_timeout`.
    async fn bounded<T>(
        &self,
        operation: &str,
        command: impl Future<Output = redis::RedisResult<T>>,
    ) -> Result<T, LeaseStoreError> {
        match tokio::time::timeout(self.config.operation_timeout, command).await {
            Ok(result) => result
                .map_err(|e| convert_redis_error(e, operation, self.config.operation_timeout)),
            Err(_) => Err(LeaseStoreError::timeout(
                operation,
                self.config.operation_timeout,
            )),
        }
    }

    /// Runs `attempt`, retrying once on timeout when configured to.
    async fn with_retry<T, F, Fut>(
        &self,
        operation: &str,
        mut attempt: F,
    ) -> Result<T, LeaseStoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LeaseStoreError>>,
    {
        let attempts = if self.config.retry_on_timeout { 2 } else { 1 };
        let mut last_error = None;

        for n in 1..=attempts {
            match attempt().await {
                Err(e) if e.is_timeout() && n < attempts => {
                    debug!(operation = %operation, error = %e, "Retrying after timeout");
                    last_error = Some(e);
                }
                result => return result,
            }
        }

        Err(last_error
            .unwrap_or_else(|| LeaseStoreError::timeout(operation, self.config.operation_timeout)))
    }

    async fn acquire_once(
        &self,
        key: &str,
        token: &str,
        ttl_ms: u64,
    ) -> Result<bool, LeaseStoreError> {
        let mut conn = self.connection().await?;

        // SET with NX and PX for atomic create-if-absent with expiry
        let reply: Option<String> = self
            .bounded(
                "acquire",
                redis::cmd("SET")
                    .arg(key)
                    .arg(token)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl_ms)
                    .query_async(&mut *conn),
            )
            .await?;

        Ok(reply.is_some())
    }

    async fn renew_once(
        &self,
        key: &str,
        token: &str,
        ttl_ms: u64,
    ) -> Result<bool, LeaseStoreError> {
        let mut conn = self.connection().await?;

        let extended: i64 = self
            .bounded(
                "renew",
                self.renew_script
                    .key(key)
                    .arg(token)
                    .arg(ttl_ms)
                    .invoke_async(&mut *conn),
            )
            .await?;

        Ok(extended == 1)
    }
}

impl std::fmt::Debug for RedisLeaseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLeaseStore")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("db", &self.config.db)
            .finish()
    }
}

/// Redis expiries are whole milliseconds and must be at least one.
fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

/// Convert redis errors to LeaseStoreError.
fn convert_redis_error(
    err: redis::RedisError,
    operation: &str,
    timeout: Duration,
) -> LeaseStoreError {
    if err.is_timeout() {
        LeaseStoreError::timeout(operation, timeout)
    } else if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
        LeaseStoreError::connection(err.to_string())
    } else {
        LeaseStoreError::protocol(err.to_string())
    }
}

#[async_trait]
impl LeaseStore for RedisLeaseStore {
    async fn acquire(&self, key: &str, token: &str, ttl: Duration) -> bool {
        let ttl_ms = ttl_millis(ttl);
        match self
            .with_retry("acquire", || self.acquire_once(key, token, ttl_ms))
            .await
        {
            Ok(acquired) => acquired,
            Err(e) => {
                warn!(key = %key, error = %e, "Lease acquisition failed, treating as not acquired");
                false
            }
        }
    }

    async fn renew(&self, key: &str, token: &str, ttl: Duration) -> bool {
        let ttl_ms = ttl_millis(ttl);
        match self
            .with_retry("renew", || self.renew_once(key, token, ttl_ms))
            .await
        {
            Ok(renewed) => renewed,
            Err(e) => {
                warn!(key = %key, error = %e, "Lease renewal failed, treating as lost");
                false
            }
        }
    }
}
