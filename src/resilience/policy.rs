use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounded polling of a single request: `attempts` polls, `interval_ms` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    pub attempts: u32,
    pub interval_ms: u64,
}

impl PollPolicy {
    /// Table and column listings
    pub const LOOKUP: Self = Self {
        attempts: 11,
        interval_ms: 10,
    };

    /// Coefficient table reads
    pub const HYDRATION: Self = Self {
        attempts: 50,
        interval_ms: 10,
    };

    /// Look once, never sleep
    pub const ONCE: Self = Self {
        attempts: 1,
        interval_ms: 0,
    };

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Upper bound on time spent sleeping between attempts
    pub fn budget(&self) -> Duration {
        self.interval() * self.attempts.saturating_sub(1)
    }
}

/// Waiting on the subsystem's "requests outstanding" flag.
///
/// This is backpressure, not a delivery guarantee: callers still poll for
/// their own results afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainPolicy {
    pub interval_ms: u64,
    pub max_wait_ms: u64,
}

impl DrainPolicy {
    /// Between schema statements during preparation
    pub const SETTLE: Self = Self {
        interval_ms: 100,
        max_wait_ms: 60_000,
    };

    /// Before teardown; in-flight writes are abandoned after an hour
    pub const SHUTDOWN: Self = Self {
        interval_ms: 1_000,
        max_wait_ms: 3_600_000,
    };

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert_eq!(PollPolicy::LOOKUP.attempts, 11);
        assert_eq!(PollPolicy::HYDRATION.attempts, 50);
        assert_eq!(PollPolicy::LOOKUP.budget(), Duration::from_millis(100));
        assert_eq!(PollPolicy::ONCE.budget(), Duration::ZERO);
        assert_eq!(DrainPolicy::SHUTDOWN.max_wait(), Duration::from_secs(3600));
    }
}
