//! In-memory collaborators for testing the election loop.
//!
//! `MockLeaseStore` keeps lease records in memory and honors the same
//! create-if-absent and compare-and-extend rules a real store does. Expiry is
//! measured with `tokio::time::Instant`, so tests running on a paused clock see
//! leases expire as virtual time advances. `RecordingDuty` records every
//! start/stop call it receives.

use super::{DutyController, LeaseStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::debug;

/// A stored lease record.
#[derive(Debug, Clone)]
pub(crate) struct LeaseRecord {
    pub(crate) token: String,
    pub(crate) expires_at: Instant,
}

/// An in-memory [`LeaseStore`].
///
/// Clones share the same records, so one store can be handed to several
/// simulated instances. The store can be made unavailable to simulate a
/// partition or timeouts: while unavailable, every call fails.
///
/// # Example
///
/// ```rust
/// use kvd_core::leadership::{LeaseStore, MockLeaseStore};
/// use std::time::Duration;
///
/// # async fn example() {
/// let store = MockLeaseStore::new();
/// let ttl = Duration::from_secs(15);
///
/// assert!(store.acquire("lk", "A", ttl).await);
/// assert!(!store.acquire("lk", "B", ttl).await);
/// assert!(store.renew("lk", "A", ttl).await);
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockLeaseStore {
    records: Arc<RwLock<HashMap<String, LeaseRecord>>>,
    /// Extra time added to the clock, for expiring leases without waiting.
    time_offset: Arc<RwLock<Duration>>,
    unavailable: Arc<AtomicBool>,
    acquire_calls: Arc<AtomicU64>,
    renew_calls: Arc<AtomicU64>,
}

impl MockLeaseStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    async fn now(&self) -> Instant {
        Instant::now() + *self.time_offset.read().await
    }

    /// Moves the store's clock forward without sleeping.
    pub async fn advance_time(&self, duration: Duration) {
        let mut offset = self.time_offset.write().await;
        *offset += duration;
    }

    /// Makes every subsequent call fail (`true`) or behave normally (`false`).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the current, unexpired holder of `key`.
    pub async fn holder(&self, key: &str) -> Option<String> {
        let now = self.now().await;
        let records = self.records.read().await;
        records
            .get(key)
            .filter(|record| record.expires_at > now)
            .map(|record| record.token.clone())
    }

    /// Overwrites the record unconditionally, as if another writer took the key.
    pub async fn force_holder(&self, key: &str, token: &str, ttl: Duration) {
        let expires_at = self.now().await + ttl;
        let mut records = self.records.write().await;
        records.insert(
            key.to_string(),
            LeaseRecord {
                token: token.to_string(),
                expires_at,
            },
        );
    }

    /// Removes the record, as if its TTL had run out.
    pub async fn expire(&self, key: &str) {
        let mut records = self.records.write().await;
        records.remove(key);
    }

    /// Number of `acquire` calls received so far.
    pub fn acquire_calls(&self) -> u64 {
        self.acquire_calls.load(Ordering::SeqCst)
    }

    /// Number of `renew` calls received so far.
    pub fn renew_calls(&self) -> u64 {
        self.renew_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LeaseStore for MockLeaseStore {
    async fn acquire(&self, key: &str, token: &str, ttl: Duration) -> bool {
        self.acquire_calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            debug!(key = %key, "Mock store unavailable, acquire fails");
            return false;
        }

        let now = self.now().await;
        let mut records = self.records.write().await;

        if let Some(record) = records.get(key) {
            if record.expires_at > now {
                return false;
            }
        }

        records.insert(
            key.to_string(),
            LeaseRecord {
                token: token.to_string(),
                expires_at: now + ttl,
            },
        );
        true
    }

    async fn renew(&self, key: &str, token: &str, ttl: Duration) -> bool {
        self.renew_calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            debug!(key = %key, "Mock store unavailable, renew fails");
            return false;
        }

        let now = self.now().await;
        let mut records = self.records.write().await;

        let expired = match records.get(key) {
            Some(record) => record.expires_at <= now,
            None => return false,
        };
        if expired {
            records.remove(key);
            return false;
        }

        match records.get_mut(key) {
            Some(record) if record.token == token => {
                record.expires_at = now + ttl;
                true
            }
            _ => false,
        }
    }
}

/// A call received by [`RecordingDuty`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DutyEvent {
    /// `start()` was called.
    Started,
    /// `stop()` was called.
    Stopped,
}

/// A [`DutyController`] that records calls instead of doing work.
#[derive(Debug, Clone, Default)]
pub struct RecordingDuty {
    events: Arc<Mutex<Vec<DutyEvent>>>,
    running: Arc<AtomicBool>,
    starts: Arc<AtomicU64>,
    stops: Arc<AtomicU64>,
}

impl RecordingDuty {
    /// Creates a duty with no recorded calls.
    pub fn new() -> Self {
        Self::default()
    }

    /// All calls in the order they were received.
    pub async fn events(&self) -> Vec<DutyEvent> {
        self.events.lock().await.clone()
    }

    /// Whether the last call was `start()`.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of `start()` calls.
    pub fn starts(&self) -> u64 {
        self.starts.load(Ordering::SeqCst)
    }

    /// Number of `stop()` calls.
    pub fn stops(&self) -> u64 {
        self.stops.load(Ordering::SeqCst)
    }

    /// Forgets all recorded calls and returns to the stopped state.
    pub async fn clear(&self) {
        self.events.lock().await.clear();
        self.running.store(false, Ordering::SeqCst);
        self.starts.store(0, Ordering::SeqCst);
        self.stops.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl DutyController for RecordingDuty {
    async fn start(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        self.events.lock().await.push(DutyEvent::Started);
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        self.events.lock().await.push(DutyEvent::Stopped);
    }
}
