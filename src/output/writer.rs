use indexmap::IndexMap;
use tracing::{debug, error};

use crate::db::schema::{self, TIMESTAMP_COLUMN};
use crate::db::{DbClient, RequestKind};
use crate::error::{CalcError, Result};
use crate::registry::SignalRegistry;
use crate::telemetry::LogContext;

/// One row bound for an output table; the timestamp is the last cell.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRow {
    pub table: String,
    pub cells: Vec<String>,
}

impl OutputRow {
    /// A row is worth writing if any signal cell carries something
    pub fn is_active(&self) -> bool {
        let signal_cells = &self.cells[..self.cells.len().saturating_sub(1)];
        signal_cells.iter().any(|cell| !is_quiescent(cell))
    }
}

/// Cell of an output at severity 0 with a zero value and no problem id
pub fn is_quiescent(cell: &str) -> bool {
    cell == "0 " || cell == "0  "
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub submitted: usize,
    pub suppressed: usize,
}

/// Writes one row per output table per tick.
pub struct OutputWriter {
    connection: String,
    /// table -> prepared insert
    statements: IndexMap<String, String>,
    log: LogContext,
}

impl OutputWriter {
    pub fn new(connection: impl Into<String>, log: LogContext) -> Self {
        Self {
            connection: connection.into(),
            statements: IndexMap::new(),
            log,
        }
    }

    /// Build the insert statement of every output table
    pub fn prepare(&mut self, registry: &SignalRegistry) -> usize {
        for (table, outputs) in registry.output_tables() {
            let columns: Vec<&str> = outputs
                .filter(|o| o.code != TIMESTAMP_COLUMN)
                .map(|o| o.column.as_str())
                .collect();
            let sql = schema::insert_sql(table, &columns);
            self.log.in_scope(|| debug!(table, query = %sql, "Insert prepared"));
            self.statements.insert(table.to_string(), sql);
        }
        self.statements.len()
    }

    pub fn statement(&self, table: &str) -> Option<&str> {
        self.statements.get(table).map(String::as_str)
    }

    /// Current rows of every output table, in registry order
    pub fn assemble(registry: &SignalRegistry, timestamp: i64) -> Vec<OutputRow> {
        registry
            .output_tables()
            .map(|(table, outputs)| {
                let mut cells: Vec<String> = outputs
                    .filter(|o| o.code != TIMESTAMP_COLUMN)
                    .map(|o| o.render_cell())
                    .collect();
                cells.push(timestamp.to_string());
                OutputRow {
                    table: table.to_string(),
                    cells,
                }
            })
            .collect()
    }

    /// Submit the active rows. The first refused submission aborts the write.
    pub async fn write(&self, client: &DbClient, registry: &SignalRegistry, timestamp: i64) -> Result<WriteSummary> {
        let mut summary = WriteSummary::default();

        for row in Self::assemble(registry, timestamp) {
            if !row.is_active() {
                summary.suppressed += 1;
                continue;
            }

            let Some(sql) = self.statements.get(&row.table) else {
                self.log.in_scope(|| {
                    error!(critical = true, table = %row.table, "No insert prepared for output table")
                });
                return Err(CalcError::config(format!(
                    "output table {} was not prepared",
                    row.table
                )));
            };

            client
                .submit(&self.connection, sql, row.cells, RequestKind::Insert, &row.table)
                .await?;
            summary.submitted += 1;
        }

        self.log.in_scope(|| {
            debug!(
                timestamp,
                submitted = summary.submitted,
                suppressed = summary.suppressed,
                "Output rows written"
            )
        });
        Ok(summary)
    }
}
