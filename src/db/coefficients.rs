use indexmap::IndexMap;
use tracing::{debug, info, warn};

use super::client::DbClient;
use super::protocol::{RequestId, RequestKind, RequestPayload, SelectRows};
use super::schema;
use crate::core::SignalValue;
use crate::error::{CalcError, Result};
use crate::registry::SignalRegistry;
use crate::resilience::{DrainPolicy, PollPolicy};
use crate::telemetry::LogContext;

/// Refreshes coefficient values from their tables.
///
/// At most one read per table is outstanding; a table whose previous read is
/// still pending is not requested again.
pub struct CoefficientHydrator {
    connection: String,
    /// table -> SELECT statement
    statements: IndexMap<String, String>,
    /// outstanding reads
    waiting: IndexMap<RequestId, String>,
    log: LogContext,
}

impl CoefficientHydrator {
    pub fn new(connection: impl Into<String>, log: LogContext) -> Self {
        Self {
            connection: connection.into(),
            statements: IndexMap::new(),
            waiting: IndexMap::new(),
            log,
        }
    }

    /// Build one read per coefficient table of `registry`
    pub fn prepare(&mut self, registry: &SignalRegistry) -> usize {
        for table in registry.coefficient_table_names() {
            self.statements
                .entry(table.to_string())
                .or_insert_with(|| schema::select_all_sql(table));
        }
        self.statements.len()
    }

    pub fn outstanding(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_waiting_for(&self, table: &str) -> bool {
        self.waiting.values().any(|t| t == table)
    }

    /// Submit a read for every table without one outstanding.
    /// Returns the number submitted.
    pub async fn request(&mut self, client: &DbClient) -> Result<usize> {
        let mut submitted = 0;
        for (table, sql) in &self.statements {
            if self.waiting.values().any(|t| t == table) {
                self.log
                    .in_scope(|| debug!(table = %table, "Previous read still outstanding"));
                continue;
            }
            let id = client
                .submit(&self.connection, sql, Vec::new(), RequestKind::Select, table)
                .await?;
            self.waiting.insert(id, table.clone());
            submitted += 1;
        }
        Ok(submitted)
    }

    /// Apply every delivered read to `registry`. Returns the number of
    /// tables applied.
    ///
    /// Blocking: settle first, then poll each read under `hydration` and
    /// abandon the ones that run out. Non-blocking: one poll each; leftovers
    /// stay outstanding unless the subsystem has no selects in flight, in
    /// which case they get a final poll and are abandoned.
    pub async fn collect(
        &mut self,
        client: &DbClient,
        registry: &mut SignalRegistry,
        blocking: bool,
        hydration: PollPolicy,
        settle: DrainPolicy,
    ) -> usize {
        if blocking && !self.waiting.is_empty() {
            client.wait_idle(settle).await;
        }
        let policy = if blocking { hydration } else { PollPolicy::ONCE };

        let mut applied = 0;
        let pending: Vec<(RequestId, String)> =
            self.waiting.iter().map(|(id, table)| (*id, table.clone())).collect();
        for (id, table) in pending {
            match client.wait_for(id, &table, policy).await {
                Ok(payload) => {
                    self.waiting.shift_remove(&id);
                    if self.accept(registry, &table, payload) {
                        applied += 1;
                    }
                }
                Err(CalcError::Timeout { attempts, .. }) if blocking => {
                    self.log.in_scope(|| {
                        warn!(request = %id, table = %table, attempts, "Coefficient read abandoned")
                    });
                    self.waiting.shift_remove(&id);
                }
                Err(_) => {}
            }
        }

        if !self.waiting.is_empty() && client.outstanding_selects().await == 0 {
            let leftovers: Vec<(RequestId, String)> = self.waiting.drain(..).collect();
            for (id, table) in leftovers {
                match client.poll_once(id).await {
                    Some(payload) => {
                        if self.accept(registry, &table, payload) {
                            applied += 1;
                        }
                    }
                    None => self.log.in_scope(|| {
                        warn!(request = %id, table = %table, "Coefficient read lost, abandoned")
                    }),
                }
            }
        }

        applied
    }

    fn accept(&self, registry: &mut SignalRegistry, table: &str, payload: RequestPayload) -> bool {
        match payload {
            RequestPayload::Rows(rows) => {
                let updated = apply_rows(registry, table, &rows, &self.log);
                self.log
                    .in_scope(|| info!(table, rows = rows.len(), updated, "Coefficients updated"));
                true
            }
            RequestPayload::Insert { .. } => {
                self.log
                    .in_scope(|| warn!(table, "Coefficient read answered without rows"));
                false
            }
        }
    }
}

/// Copy the cells of `rows` into the coefficients of `table`.
/// Returns the number of cells written; missing cells keep their value.
pub fn apply_rows(registry: &mut SignalRegistry, table: &str, rows: &SelectRows, log: &LogContext) -> usize {
    let ids: Vec<_> = registry.coefficients_in(table).collect();
    let mut updated = 0;

    for id in ids {
        let coefficient = registry.coefficient_mut(id);
        let Some(cells) = rows.get(&coefficient.code) else {
            log.in_scope(|| warn!(table, code = %coefficient.code, "No row for coefficient"));
            continue;
        };

        for (row_name, value) in coefficient.rows.iter_mut() {
            match cells.get(row_name) {
                Some(cell) => {
                    *value = Some(SignalValue::from_cell(cell));
                    updated += 1;
                }
                None => log.in_scope(|| {
                    warn!(table, code = %coefficient.code, row = %row_name, "No cell for coefficient row")
                }),
            }
        }
    }

    updated
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(code: &str, cells: &[(&str, &str)]) -> SelectRows {
        let mut rows = SelectRows::new();
        rows.insert(
            code.to_string(),
            cells.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        );
        rows
    }

    #[test]
    fn test_apply_real_and_text_cells() {
        let mut registry = SignalRegistry::new();
        let id = registry.resolve_coefficient("T", "C1", ["r1", "r2"]).unwrap();

        let updated = apply_rows(
            &mut registry,
            "T",
            &rows("C1", &[("code", "C1"), ("r1", "3.14"), ("r2", "N/A")]),
            &LogContext::new("test"),
        );

        assert_eq!(updated, 2);
        let rows = &registry.coefficient(id).rows;
        assert_eq!(rows["r1"], Some(SignalValue::Real(3.14)));
        assert_eq!(rows["r2"], Some(SignalValue::Text("N/A".into())));
    }

    #[test]
    fn test_missing_cell_left_untouched() {
        let mut registry = SignalRegistry::new();
        let id = registry.resolve_coefficient("T", "C1", ["r1", "r2"]).unwrap();
        registry.coefficient_mut(id).rows["r2"] = Some(SignalValue::Real(1.0));

        let updated = apply_rows(
            &mut registry,
            "T",
            &rows("C1", &[("r1", "2")]),
            &LogContext::new("test"),
        );

        assert_eq!(updated, 1);
        assert_eq!(registry.coefficient(id).rows["r2"], Some(SignalValue::Real(1.0)));
    }

    #[test]
    fn test_prepare_builds_one_read_per_table() {
        let mut registry = SignalRegistry::new();
        registry.resolve_coefficient("Limits", "C1", ["r1"]).unwrap();
        registry.resolve_coefficient("Limits", "C2", ["r1"]).unwrap();
        registry.resolve_coefficient("Gains", "K", ["k"]).unwrap();

        let mut hydrator = CoefficientHydrator::new("coefficient", LogContext::new("test"));
        assert_eq!(hydrator.prepare(&registry), 2);
        assert_eq!(hydrator.statements["Limits"], "SELECT * FROM limits");
        assert_eq!(hydrator.outstanding(), 0);
    }
}
