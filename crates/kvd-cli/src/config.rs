//! Configuration loading for the kvdistlead CLI.
//!
//! Every setting is a command-line flag that falls back to an environment
//! variable, so the binary can be configured 12-factor style. A `.env` file,
//! when present, seeds the environment before the flags are parsed.

use clap::Args;
use kvd_core::leadership::{ConfigError, ElectionConfig, InstanceId, RedisStoreConfig};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// Loads a `.env` file from the working directory or one of its parents.
///
/// Variables already set in the process environment take precedence over the
/// file. Returns the path of the loaded file, if one was found.
pub fn load_env_file() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}

/// Raw settings as given on the command line or in the environment.
#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
    /// Key of the lease record shared by all instances
    #[arg(long, env = "LOCK_KEY")]
    pub lock_key: String,

    /// Lease time-to-live in milliseconds
    #[arg(long, env = "LOCK_TTL_MS", default_value_t = 15_000)]
    pub lock_ttl_ms: u64,

    /// Renewal interval in milliseconds while leader (must be below the TTL)
    #[arg(long, env = "LOCK_RENEW_EVERY_MS", default_value_t = 5_000)]
    pub lock_renew_every_ms: u64,

    /// Wait between acquisition attempts in milliseconds while standing by
    #[arg(long, env = "STANDBY_SLEEP_MS", default_value_t = 2_000)]
    pub standby_sleep_ms: u64,

    /// Wait in milliseconds after losing leadership before retrying
    #[arg(long, env = "LOCK_RECOVERY_DELAY_MS", default_value_t = 1_000)]
    pub lock_recovery_delay_ms: u64,

    /// Identity written into the lease (generated when unset)
    #[arg(long, env = "INSTANCE_ID")]
    pub instance_id: Option<String>,

    /// Redis host
    #[arg(long, env = "REDIS_HOST", default_value = "redis")]
    pub redis_host: String,

    /// Redis port
    #[arg(long, env = "REDIS_PORT", default_value_t = 6379)]
    pub redis_port: u16,

    /// Redis logical database
    #[arg(long, env = "REDIS_DB", default_value_t = 0)]
    pub redis_db: i64,

    /// Redis password
    #[arg(long, env = "REDIS_PASSWORD", hide_env_values = true)]
    pub redis_password: Option<String>,

    /// Connect timeout in seconds
    #[arg(long, env = "REDIS_SOCKET_CONNECT_TIMEOUT", default_value_t = 1.0)]
    pub redis_socket_connect_timeout: f64,

    /// Per-command timeout in seconds
    #[arg(long, env = "REDIS_SOCKET_TIMEOUT", default_value_t = 1.0)]
    pub redis_socket_timeout: f64,

    /// Retry a command once after it times out (1/true/yes/y/t)
    #[arg(
        long,
        env = "REDIS_RETRY_ON_TIMEOUT",
        default_value = "true",
        value_parser = parse_truthy,
        action = clap::ArgAction::Set
    )]
    pub redis_retry_on_timeout: bool,
}

/// Accepts `1`, `true`, `yes`, `y` and `t` (any case) as true; anything else is false.
fn parse_truthy(value: &str) -> Result<bool, String> {
    Ok(matches!(
        value.to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "t"
    ))
}

/// Converts fractional seconds into a `Duration`, rejecting negative or non-finite values.
fn seconds(name: &str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        ConfigError::invalid(name, format!("'{}' is not a valid number of seconds", value))
    })
}

/// Validated application configuration.
#[derive(Debug, Clone, Serialize)]
pub struct AppConfig {
    /// Lease and loop settings.
    pub election: ElectionConfig,
    /// Redis connection settings.
    pub redis: RedisStoreConfig,
}

impl AppConfig {
    /// Builds and validates the configuration.
    ///
    /// Any error here is fatal: the election loop must not start with
    /// settings that cannot keep a lease alive.
    pub fn from_args(args: &ConfigArgs) -> Result<Self, ConfigError> {
        let instance_id = match args.instance_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => InstanceId::new(id),
            _ => InstanceId::generate(),
        };

        let election = ElectionConfig::new(args.lock_key.trim(), instance_id)
            .with_lease_ttl(Duration::from_millis(args.lock_ttl_ms))
            .with_renew_interval(Duration::from_millis(args.lock_renew_every_ms))
            .with_standby_retry(Duration::from_millis(args.standby_sleep_ms))
            .with_recovery_delay(Duration::from_millis(args.lock_recovery_delay_ms));
        election.validate()?;

        let mut redis = RedisStoreConfig::new(args.redis_host.clone(), args.redis_port)
            .with_db(args.redis_db)
            .with_connect_timeout(seconds(
                "REDIS_SOCKET_CONNECT_TIMEOUT",
                args.redis_socket_connect_timeout,
            )?)
            .with_operation_timeout(seconds(
                "REDIS_SOCKET_TIMEOUT",
                args.redis_socket_timeout,
            )?)
            .with_retry_on_timeout(args.redis_retry_on_timeout);
        if let Some(password) = args.redis_password.as_ref().filter(|p| !p.is_empty()) {
            redis = redis.with_password(password.clone());
        }
        redis.validate()?;
        election.validate_renewal_margin(redis.max_call_duration())?;

        Ok(Self { election, redis })
    }

    /// Creates a copy with secrets redacted.
    pub fn redact_secrets(&self) -> Self {
        Self {
            election: self.election.clone(),
            redis: self.redis.redacted(),
        }
    }
}
