use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::resilience::{DrainPolicy, PollPolicy};
use crate::telemetry::LogSettings;

/// Server-wide settings, read from a JSON file; every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Connection file (`ConfigDB.json`)
    pub connection_file: PathBuf,
    /// External input value file, re-read every tick
    pub input_file: PathBuf,
    pub output_connection: String,
    pub coefficient_connection: String,
    /// Result lookups during preparation and writes
    pub lookup_poll: PollPolicy,
    /// Coefficient hydration at startup
    pub hydration_poll: PollPolicy,
    /// Wait for the database subsystem to settle after a batch of requests
    pub settle: DrainPolicy,
    /// Final drain on shutdown
    pub shutdown_drain: DrainPolicy,
    /// Start in logical-clock mode from this Unix time
    pub start_timestamp: Option<i64>,
    pub log: LogSettings,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            connection_file: PathBuf::from("ConfigDB.json"),
            input_file: PathBuf::from("ValueInputSignals.json"),
            output_connection: "output".to_string(),
            coefficient_connection: "coefficient".to_string(),
            lookup_poll: PollPolicy::LOOKUP,
            hydration_poll: PollPolicy::HYDRATION,
            settle: DrainPolicy::SETTLE,
            shutdown_drain: DrainPolicy::SHUTDOWN,
            start_timestamp: None,
            log: LogSettings::default(),
        }
    }
}

impl ServerSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .context(format!("Failed to read settings from {:?}", path))?;
        let settings = serde_json::from_str(&json).context("Failed to deserialize server settings")?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings: ServerSettings =
            serde_json::from_str(r#"{"input_file": "values.json", "start_timestamp": 1000}"#).unwrap();
        assert_eq!(settings.input_file, PathBuf::from("values.json"));
        assert_eq!(settings.start_timestamp, Some(1000));
        assert_eq!(settings.connection_file, PathBuf::from("ConfigDB.json"));
        assert_eq!(settings.hydration_poll, PollPolicy::HYDRATION);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        std::fs::write(&path, r#"{"output_connection": "archive"}"#).unwrap();

        let settings = ServerSettings::load(&path).unwrap();
        assert_eq!(settings.output_connection, "archive");
        assert!(ServerSettings::load(&dir.path().join("absent.json")).is_err());
    }
}
