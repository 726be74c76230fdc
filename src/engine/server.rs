//! The calculation server: owns the registry, the module registry, the block
//! sequence and the database client, and drives preparation and ticks.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, warn};

use super::clock::Clock;
use super::stepper::Stepper;
use crate::config::{ConfigLoader, ConnectionSettings, LoadSummary, ServerSettings};
use crate::db::{CoefficientHydrator, DbClient, RequestQueue, SchemaReconciler};
use crate::error::{CalcError, Result};
use crate::observability::TickMetrics;
use crate::output::{OutputWriter, WriteSummary};
use crate::plugin::{ModuleDescriptor, PluginRegistry};
use crate::registry::SignalRegistry;
use crate::telemetry::LogContext;

pub struct CalcServer {
    settings: ServerSettings,
    client: DbClient,
    registry: SignalRegistry,
    plugins: PluginRegistry,
    stepper: Stepper,
    writer: OutputWriter,
    hydrator: CoefficientHydrator,
    metrics: Arc<TickMetrics>,
    log: LogContext,
}

impl CalcServer {
    /// Read the connection file named in `settings` and open both connections.
    pub async fn connect(settings: ServerSettings, queue: Arc<dyn RequestQueue>, log: LogContext) -> Result<Self> {
        let connections = ConnectionSettings::load(&settings.connection_file).map_err(|e| {
            log.in_scope(|| error!(critical = true, error = %e, "Connection settings unavailable"));
            e
        })?;
        Self::connect_with(settings, &connections, queue, log).await
    }

    pub async fn connect_with(
        settings: ServerSettings,
        connections: &ConnectionSettings,
        queue: Arc<dyn RequestQueue>,
        log: LogContext,
    ) -> Result<Self> {
        let client = DbClient::new(queue, log.child("db"));

        for name in [&settings.output_connection, &settings.coefficient_connection] {
            let info = connections.get(name).map_err(|e| {
                log.in_scope(|| error!(critical = true, error = %e, "Connection settings incomplete"));
                e
            })?;
            client.connect(&info).await?;
        }

        let clock = match settings.start_timestamp {
            Some(start) => Clock::logical(start),
            None => Clock::new(),
        };

        let server = Self {
            client,
            registry: SignalRegistry::new(),
            plugins: PluginRegistry::new(log.child("plugins")),
            stepper: Stepper::new(settings.input_file.clone(), clock, log.child("stepper")),
            writer: OutputWriter::new(settings.output_connection.clone(), log.child("output")),
            hydrator: CoefficientHydrator::new(settings.coefficient_connection.clone(), log.child("coefficients")),
            metrics: Arc::new(TickMetrics::new()),
            log,
            settings,
        };
        server.log.in_scope(|| {
            info!(
                output = %server.settings.output_connection,
                coefficient = %server.settings.coefficient_connection,
                "Connections created"
            )
        });
        Ok(server)
    }

    pub fn register_builtin_modules(&mut self) -> usize {
        self.plugins.load_builtin()
    }

    pub fn register_module(&mut self, descriptor: ModuleDescriptor) -> bool {
        self.plugins.register(descriptor)
    }

    pub fn load_modules(&mut self, dir: &Path) -> usize {
        self.plugins.load_dir(dir)
    }

    pub fn create_blocks_from_dir(&mut self, dir: &Path) -> LoadSummary {
        let mut loader = ConfigLoader::new(&mut self.registry, &self.plugins, self.log.child("loader"));
        loader.load_dir(dir, self.stepper.blocks_mut())
    }

    pub fn create_blocks_from_json(&mut self, document: &Value) -> Result<usize> {
        let mut loader = ConfigLoader::new(&mut self.registry, &self.plugins, self.log.child("loader"));
        loader.load_document(document, self.stepper.blocks_mut()).map_err(|e| {
            self.log.in_scope(|| error!(error = %e, "Configuration document rejected"));
            e
        })
    }

    /// Reconcile the schema, prepare writes and reads, then hydrate the
    /// coefficients once, waiting for every table.
    pub async fn prepare(&mut self) -> Result<()> {
        if self.stepper.is_empty() {
            self.log
                .in_scope(|| error!(critical = true, "No calculation blocks were created"));
            return Err(CalcError::NoBlocks);
        }

        let reconciler = SchemaReconciler::new(
            &self.client,
            self.settings.lookup_poll,
            self.settings.settle,
            self.log.child("schema"),
        );
        reconciler
            .require_tables(
                &self.settings.coefficient_connection,
                self.registry.coefficient_table_names(),
            )
            .await?;
        reconciler
            .reconcile_outputs(&self.settings.output_connection, &self.registry)
            .await?;

        let tables = self.writer.prepare(&self.registry);
        let reads = self.hydrator.prepare(&self.registry);
        self.log.in_scope(|| {
            info!(
                blocks = self.stepper.len(),
                output_tables = tables,
                coefficient_tables = reads,
                "Server prepared"
            )
        });

        self.update_coefficients(true).await
    }

    /// Request fresh coefficient values and collect what has arrived.
    pub async fn update_coefficients(&mut self, wait: bool) -> Result<()> {
        self.hydrator.request(&self.client).await?;
        self.check_update_value(wait).await;
        Ok(())
    }

    /// Apply delivered coefficient reads. Returns the number of tables applied.
    pub async fn check_update_value(&mut self, wait_all: bool) -> usize {
        self.hydrator
            .collect(
                &self.client,
                &mut self.registry,
                wait_all,
                self.settings.hydration_poll,
                self.settings.settle,
            )
            .await
    }

    /// One tick: refresh inputs, run the blocks, advance the clock and write
    /// the output rows.
    pub async fn calc_one_step(&mut self, time: f64, step: f64) -> Result<WriteSummary> {
        let start = self.metrics.start_tick();
        let result = self.step(time, step).await;

        match &result {
            Ok(summary) => {
                self.metrics.record_rows(summary.submitted, summary.suppressed);
                self.metrics.finish_tick(start);
            }
            Err(_) => self.metrics.record_failed_tick(),
        }
        result
    }

    async fn step(&mut self, time: f64, step: f64) -> Result<WriteSummary> {
        self.stepper.refresh_inputs(&mut self.registry).await?;
        self.stepper.run_blocks(&mut self.registry, time, step)?;
        let timestamp = self.stepper.advance_clock();
        self.writer.write(&self.client, &self.registry, timestamp).await
    }

    pub fn set_input_file(&mut self, path: impl Into<std::path::PathBuf>) {
        self.stepper.set_input_file(path);
    }

    pub fn input_file(&self) -> &Path {
        self.stepper.input_file()
    }

    /// Switch to the logical clock, starting at `seconds`
    pub fn set_timestamp(&mut self, seconds: i64) {
        self.stepper.clock_mut().set_timestamp(seconds);
    }

    pub fn timestamp(&self) -> i64 {
        self.stepper.clock().timestamp()
    }

    pub fn debug_snapshot(&self, time: f64, step: f64) -> Value {
        self.stepper.debug_snapshot(&self.registry, time, step)
    }

    pub fn metrics(&self) -> Arc<TickMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn registry(&self) -> &SignalRegistry {
        &self.registry
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    pub fn block_count(&self) -> usize {
        self.stepper.len()
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// Wait, within the shutdown drain, for in-flight requests to finish.
    /// Returns `false` if requests were still outstanding at the cap.
    pub async fn shutdown(self) -> bool {
        let drained = self.client.wait_idle(self.settings.shutdown_drain).await;
        if drained {
            self.log.in_scope(|| info!("Database requests drained"));
        } else {
            self.log.in_scope(|| {
                warn!(
                    max_wait_ms = self.settings.shutdown_drain.max_wait_ms,
                    "Requests still outstanding at shutdown"
                )
            });
        }
        drained
    }
}
