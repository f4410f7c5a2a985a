//! Injected sources of identifiers and wall-clock time.
//!
//! The dispatcher draws exactly one id and one timestamp per syscall and hands
//! them to every reducer, so replaying a journal with [`SequentialIds`] and a
//! [`FixedClock`] reproduces states byte for byte.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

/// Generator of unique identifiers.
pub trait IdSource: Send + Sync + fmt::Debug {
    /// Returns a fresh identifier starting with `prefix`.
    fn next_id(&self, prefix: &str) -> String;
}

/// Random v4 UUID identifiers.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIds;

impl IdSource for UuidIds {
    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", Uuid::new_v4().simple())
    }
}

/// Deterministic counter-based identifiers (`d-1`, `d-2`, ...).
#[derive(Debug, Default)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    /// Creates a generator whose first id ends in `1`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdSource for SequentialIds {
    fn next_id(&self, prefix: &str) -> String {
        let value = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{prefix}-{value}")
    }
}

/// Source of timestamps for log entries and snapshots.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    instant: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    /// Creates a clock frozen at `instant`.
    #[must_use]
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self {
            instant: Mutex::new(instant),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut instant = self.instant.lock();
        *instant += by;
    }
}

impl Default for FixedClock {
    fn default() -> Self {
        Self::at(Utc.timestamp_opt(1_700_000_000, 0).single().unwrap_or_default())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.instant.lock()
    }
}
