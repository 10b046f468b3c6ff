//! # kvd-observability
//!
//! Logging and metrics infrastructure for kvdistlead.
//!
//! Logging uses the tracing ecosystem with text or JSON output. Metrics are
//! emitted through the `metrics` facade; installing a recorder/exporter is up
//! to the embedding process.

pub mod logging;
pub mod metrics;

pub use self::logging::{init_logging_with_config, LoggingConfig};
pub use self::metrics::describe_leadership_metrics;
