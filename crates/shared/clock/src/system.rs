use chrono::{Duration, Utc};
use tripwire_core::Timestamp;
use tripwire_ports::Clock;

/// Wall clock, optionally running behind real time.
///
/// A lag makes each tick evaluate at `now - lag`, so samples that are
/// still in transit from the market-data layer land before they are read.
pub struct SystemClock {
    lag: Duration,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            lag: Duration::zero(),
        }
    }

    /// Builder: Evaluate `lag` behind wall-clock time
    pub fn with_lag(mut self, lag: Duration) -> Self {
        self.lag = lag.max(Duration::zero());
        self
    }

    pub fn lag(&self) -> Duration {
        self.lag
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now() - self.lag
    }

    fn name(&self) -> &str {
        "SystemClock"
    }
}
