pub mod clock;
pub mod server;
pub mod stepper;

pub use clock::{Clock, ClockMode};
pub use server::CalcServer;
pub use stepper::{is_numbered_tag, RefreshSummary, Stepper};
