//! Monotonic clock source
//!
//! Provides a wall-clock timestamp that never goes backward. Lifecycle
//! decisions (index age, retention cutoffs) and the force-merge completion
//! stamp all read the same clock so that repeated runs observe consistent
//! time.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// A clock source that guarantees monotonically increasing timestamps.
pub struct BoundedClock {
    /// High-water mark: the largest timestamp we've ever returned (millis)
    high_water_ms: AtomicI64,
}

impl BoundedClock {
    pub fn new() -> Self {
        Self {
            high_water_ms: AtomicI64::new(0),
        }
    }

    /// Returns a monotonically increasing millisecond timestamp.
    ///
    /// If the wall clock has gone backward (e.g. NTP adjustment), returns
    /// the previous high-water mark instead.
    pub fn now_millis(&self) -> i64 {
        let wall = Utc::now().timestamp_millis();
        loop {
            let prev = self.high_water_ms.load(Ordering::Acquire);
            let ts = wall.max(prev);
            match self.high_water_ms.compare_exchange_weak(
                prev,
                ts,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return ts,
                Err(_) => continue, // CAS failed, retry
            }
        }
    }

    /// Returns `chrono::DateTime<Utc>` from the monotonic clock.
    pub fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.now_millis()).unwrap_or_else(Utc::now)
    }
}

impl Default for BoundedClock {
    fn default() -> Self {
        Self::new()
    }
}
