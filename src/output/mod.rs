pub mod writer;

pub use writer::{OutputRow, OutputWriter, WriteSummary};
