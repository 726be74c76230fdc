pub mod metrics;

pub use metrics::{MetricsSnapshot, TickMetrics};
