//! Orchestration core of a calculation server.
//!
//! Block configuration documents are turned into registry entries and
//! calculation blocks; every tick refreshes inputs from a value file, runs the
//! blocks in order and writes one row per output table through an
//! asynchronous database subsystem.

pub mod config;
pub mod core;
pub mod db;
pub mod engine;
pub mod error;
pub mod modules;
pub mod observability;
pub mod output;
pub mod plugin;
pub mod registry;
pub mod resilience;
pub mod telemetry;

pub use calcserver_macros::CalcModule;
pub use engine::CalcServer;
pub use error::{CalcError, Result};
