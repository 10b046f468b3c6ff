//! Placeholder leader duty.
//!
//! Stands in for the real exclusive activity (for example, holding a session
//! to an upstream that tolerates only one client). It logs transitions and
//! tracks whether it is running so repeated calls are harmless.

use async_trait::async_trait;
use kvd_core::leadership::{DutyController, InstanceId};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// A duty that only logs when it starts and stops.
#[derive(Debug)]
pub struct LoggingDuty {
    instance_id: InstanceId,
    running: AtomicBool,
}

impl LoggingDuty {
    /// Creates a stopped duty for the given instance.
    pub fn new(instance_id: InstanceId) -> Self {
        Self {
            instance_id,
            running: AtomicBool::new(false),
        }
    }

    /// Whether the duty is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DutyController for LoggingDuty {
    async fn start(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            info!(instance_id = %self.instance_id, "Leader duty started");
        }
    }

    async fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!(instance_id = %self.instance_id, "Leader duty stopped");
        }
    }
}
