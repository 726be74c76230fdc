use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockMode {
    /// Every tick reads the current Unix time
    WallClock,
    /// Every tick adds one second to the last timestamp
    Logical,
}

/// Timestamp source for output rows, in Unix seconds
#[derive(Debug, Clone)]
pub struct Clock {
    mode: ClockMode,
    timestamp: i64,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            mode: ClockMode::WallClock,
            timestamp: now(),
        }
    }

    pub fn logical(start: i64) -> Self {
        Self {
            mode: ClockMode::Logical,
            timestamp: start,
        }
    }

    /// Set the timestamp and switch to logical mode for good
    pub fn set_timestamp(&mut self, seconds: i64) {
        self.timestamp = seconds;
        self.mode = ClockMode::Logical;
    }

    pub fn advance(&mut self) -> i64 {
        self.timestamp = match self.mode {
            ClockMode::Logical => self.timestamp + 1,
            ClockMode::WallClock => now(),
        };
        self.timestamp
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn mode(&self) -> ClockMode {
        self.mode
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_clock_steps_one_second() {
        let mut clock = Clock::new();
        clock.set_timestamp(1000);
        assert_eq!(clock.mode(), ClockMode::Logical);
        assert_eq!(clock.advance(), 1001);
        assert_eq!(clock.advance(), 1002);
    }

    #[test]
    fn test_wall_clock_follows_system_time() {
        let mut clock = Clock::new();
        let before = chrono::Utc::now().timestamp();
        let stamp = clock.advance();
        assert!(stamp >= before);
        assert_eq!(clock.mode(), ClockMode::WallClock);
    }
}
