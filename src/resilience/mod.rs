pub mod policy;
pub mod poll;

pub use policy::{DrainPolicy, PollPolicy};
pub use poll::{poll_bounded, wait_until_idle, PollOutcome};
