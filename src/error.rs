//! Error types for the calculation server.
//!
//! Configuration-time errors are isolated per document or module, startup
//! database errors are fatal, and per-tick errors fail only that tick.

use std::path::PathBuf;

use crate::db::{RequestId, SubmitStatus};

/// Result type using CalcError
pub type Result<T> = std::result::Result<T, CalcError>;

#[derive(Debug, thiserror::Error)]
pub enum CalcError {
    /// A configuration document is missing a required field or holds an invalid value.
    #[error("configuration error: {0}")]
    Config(String),

    /// A native module could not be loaded.
    #[error("cannot load module {}: {reason}", path.display())]
    PluginLoad { path: PathBuf, reason: String },

    /// Connection settings are missing or incomplete.
    #[error("connection '{connection}': {reason}")]
    ConnectionConfig { connection: String, reason: String },

    /// The database subsystem refused to open a connection.
    #[error("connection '{connection}' could not be established: {reason}")]
    Connection { connection: String, reason: String },

    /// The database subsystem did not accept a request.
    #[error("request for table '{table}' was not accepted: {status:?}")]
    Submission { table: String, status: SubmitStatus },

    /// A bounded poll ran out of attempts.
    #[error("request {request} for '{table}' was not delivered after {attempts} polls")]
    Timeout {
        request: RequestId,
        table: String,
        attempts: u32,
    },

    /// The input value file could not be read or parsed.
    #[error("input file {}: {reason}", path.display())]
    InputFile { path: PathBuf, reason: String },

    /// A block failed during `process`.
    #[error("block #{index} ({type_tag}) failed: {reason}")]
    BlockFault {
        index: usize,
        type_tag: String,
        reason: String,
    },

    /// Preparation was requested with nothing to calculate.
    #[error("no calculation blocks were created")]
    NoBlocks,

    /// A coefficient table is absent on the coefficient connection.
    #[error("coefficient table '{0}' does not exist")]
    MissingCoefficientTable(String),

    /// The database reported a failed CREATE/ALTER.
    #[error("schema migration failed for '{table}': {query}")]
    SchemaMigration { table: String, query: String },
}

impl CalcError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether the failure should be reported as critical.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::ConnectionConfig { .. }
                | Self::Connection { .. }
                | Self::Submission { .. }
                | Self::NoBlocks
                | Self::MissingCoefficientTable(_)
                | Self::SchemaMigration { .. }
                | Self::InputFile { .. }
        )
    }
}
