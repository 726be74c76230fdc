//! Calculation modules compiled into the server.

pub mod limit_alarm;
pub mod scale;
pub mod sum;

pub use limit_alarm::LimitAlarm;
pub use scale::Scale;
pub use sum::Sum;
