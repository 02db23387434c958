use chrono::{DateTime, Duration};
use std::sync::{Arc, RwLock};
use tripwire_core::Timestamp;
use tripwire_ports::Clock;

/// Clock that only advances when explicitly moved
///
/// Used to replay recorded metric streams at their original timestamps and
/// to make scheduler tests deterministic.
pub struct ManualClock {
    current: RwLock<Timestamp>,
}

impl ManualClock {
    /// Create a clock frozen at `initial_time`
    pub fn new(initial_time: Timestamp) -> Arc<Self> {
        Arc::new(Self {
            current: RwLock::new(initial_time),
        })
    }

    /// Create a clock frozen at a unix timestamp (seconds)
    pub fn at_unix(seconds: i64) -> Arc<Self> {
        Self::new(DateTime::from_timestamp(seconds, 0).unwrap_or_default())
    }

    /// Advance the clock by a specified duration
    pub fn advance(&self, duration: Duration) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current += duration;
    }

    /// Explicitly set the clock. Moving backwards is allowed; samples are
    /// looked up point-in-time so evaluation stays consistent.
    pub fn set_time(&self, time: Timestamp) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = time;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.current.read().unwrap_or_else(|e| e.into_inner())
    }

    fn name(&self) -> &str {
        "ManualClock"
    }
}
