//! Logging setup and the per-component logging context.
//!
//! `Telemetry::init` opens the sink once at startup; components never reach for
//! a global logger, they receive a `LogContext` and run their work inside its span.
//! `Telemetry::shutdown` flushes buffered file output.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::Span;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Write to this file instead of stderr
    pub file: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Owns the installed subscriber's writer. Dropping it flushes pending lines.
pub struct Telemetry {
    guard: Option<WorkerGuard>,
}

impl Telemetry {
    pub fn init(settings: &LogSettings) -> Result<Self> {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&settings.level));
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true);

        let guard = match &settings.file {
            Some(path) => {
                let directory = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or(Path::new("."));
                std::fs::create_dir_all(directory)
                    .with_context(|| format!("Failed to create log directory {:?}", directory))?;
                let file_name = path
                    .file_name()
                    .ok_or_else(|| anyhow!("Invalid log file name: {}", path.display()))?;

                let appender = tracing_appender::rolling::never(directory, file_name);
                let (writer, guard) = tracing_appender::non_blocking(appender);

                builder
                    .with_writer(writer)
                    .with_ansi(false)
                    .try_init()
                    .map_err(|e| anyhow!("Failed to install log subscriber: {}", e))?;
                Some(guard)
            }
            None => {
                builder
                    .try_init()
                    .map_err(|e| anyhow!("Failed to install log subscriber: {}", e))?;
                None
            }
        };

        Ok(Self { guard })
    }

    pub fn context(&self, component: &'static str) -> LogContext {
        LogContext::new(component)
    }

    pub fn shutdown(self) {
        drop(self.guard);
    }
}

/// Named span handed to a component at construction.
#[derive(Debug, Clone)]
pub struct LogContext {
    component: &'static str,
    span: Span,
}

impl LogContext {
    pub fn new(component: &'static str) -> Self {
        Self {
            component,
            span: tracing::info_span!("calcserver", component),
        }
    }

    /// Context for a sub-component, nested under this one
    pub fn child(&self, component: &'static str) -> Self {
        Self {
            component,
            span: tracing::info_span!(parent: &self.span, "calcserver", component),
        }
    }

    pub fn component(&self) -> &'static str {
        self.component
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn in_scope<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.span.in_scope(f)
    }
}
