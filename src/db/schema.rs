//! SQL shapes for the output and coefficient tables, and the reconciler that
//! brings output tables in line with the configured signals.
//!
//! Table-name suffixes carry meaning: a name ending in `9` has no timestamp
//! column, a name ending in `6` has an extra `status` column.

use std::collections::HashSet;

use indexmap::IndexSet;
use tracing::{debug, error, info, warn};

use super::client::DbClient;
use super::protocol::{RequestKind, RequestPayload, SelectRows};
use crate::error::{CalcError, Result};
use crate::registry::SignalRegistry;
use crate::resilience::{DrainPolicy, PollPolicy};
use crate::telemetry::LogContext;

pub const ID_COLUMN: &str = "id";
pub const TIMESTAMP_COLUMN: &str = "timestemp";
pub const STATUS_COLUMN: &str = "status";

const TEXT_TYPE: &str = "character varying";
const ID_TYPE: &str = "bigserial";
const STATUS_TYPE: &str = "BOOLEAN NOT NULL DEFAULT false";

pub const LIST_TABLES_SQL: &str = "SELECT table_name FROM information_schema.tables \
     WHERE table_schema = 'public' AND table_type = 'BASE TABLE'";

/// Table tag used for the table listing request
pub const LIST_TABLES_TAG: &str = "All_table";

pub fn has_timestamp(table: &str) -> bool {
    !table.ends_with('9')
}

pub fn has_status(table: &str) -> bool {
    table.ends_with('6')
}

pub fn list_columns_sql(stored_table: &str) -> String {
    format!(
        "SELECT column_name FROM information_schema.columns \
         WHERE table_name = '{}' AND table_schema = 'public'",
        stored_table
    )
}

pub fn select_all_sql(table: &str) -> String {
    format!("SELECT * FROM {}", table.to_lowercase())
}

/// Parameterized insert: the listed columns, then the timestamp.
pub fn insert_sql(table: &str, columns: &[&str]) -> String {
    let mut names: Vec<&str> = columns.to_vec();
    names.push(TIMESTAMP_COLUMN);
    let placeholders: Vec<String> = (1..=names.len()).map(|n| format!("${}", n)).collect();

    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table.to_lowercase(),
        names.join(", "),
        placeholders.join(", ")
    )
}

/// Signal columns with duplicates and reserved names removed
fn signal_columns<'a>(table: &str, columns: impl IntoIterator<Item = &'a str>) -> IndexSet<&'a str> {
    columns
        .into_iter()
        .filter(|c| {
            let c = c.to_lowercase();
            !(c == ID_COLUMN
                || (c == TIMESTAMP_COLUMN && has_timestamp(table))
                || (c == STATUS_COLUMN && has_status(table)))
        })
        .collect()
}

pub fn create_table_sql<'a>(table: &str, columns: impl IntoIterator<Item = &'a str>) -> String {
    let mut definitions = vec![format!("{} {}", ID_COLUMN, ID_TYPE)];
    if has_timestamp(table) {
        definitions.push(format!("{} {}", TIMESTAMP_COLUMN, TEXT_TYPE));
    }
    for column in signal_columns(table, columns) {
        definitions.push(format!("{} {}", column, TEXT_TYPE));
    }
    if has_status(table) {
        definitions.push(format!("{} {}", STATUS_COLUMN, STATUS_TYPE));
    }

    format!("CREATE TABLE {} ({})", table.to_lowercase(), definitions.join(", "))
}

/// `ALTER TABLE` adding whatever `existing` (lower-cased names) lacks, or
/// `None` when the table is complete.
pub fn alter_table_sql<'a>(
    table: &str,
    existing: &HashSet<String>,
    columns: impl IntoIterator<Item = &'a str>,
) -> Option<String> {
    let mut missing = Vec::new();
    for column in signal_columns(table, columns) {
        if !existing.contains(&column.to_lowercase()) {
            missing.push(format!("{} {}", column, TEXT_TYPE));
        }
    }
    if !existing.contains(ID_COLUMN) {
        missing.push(format!("{} {}", ID_COLUMN, ID_TYPE));
    }
    if has_timestamp(table) && !existing.contains(TIMESTAMP_COLUMN) {
        missing.push(format!("{} {}", TIMESTAMP_COLUMN, TEXT_TYPE));
    }
    if has_status(table) && !existing.contains(STATUS_COLUMN) {
        missing.push(format!("{} {}", STATUS_COLUMN, STATUS_TYPE));
    }

    if missing.is_empty() {
        return None;
    }
    let additions: Vec<String> = missing.iter().map(|d| format!("ADD COLUMN {}", d)).collect();
    Some(format!("ALTER TABLE {} {}", table, additions.join(", ")))
}

/// Table names present on a connection, as the store reported them
#[derive(Debug, Clone, Default)]
pub struct KnownTables {
    names: HashSet<String>,
}

impl KnownTables {
    pub fn from_rows(rows: &SelectRows) -> Self {
        Self {
            names: rows.keys().cloned().collect(),
        }
    }

    /// Stored name of `table`: the name itself, or its lower-cased form
    pub fn stored_name<'a>(&'a self, table: &'a str) -> Option<&'a str> {
        if self.names.contains(table) {
            return Some(table);
        }
        self.names.get(&table.to_lowercase()).map(String::as_str)
    }

    pub fn contains(&self, table: &str) -> bool {
        self.stored_name(table).is_some()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChange {
    Created,
    Altered,
    Unchanged,
}

/// Brings output tables in line with the registry and checks that
/// coefficient tables exist. Any failure here is fatal to preparation.
pub struct SchemaReconciler<'a> {
    client: &'a DbClient,
    lookup: PollPolicy,
    settle: DrainPolicy,
    log: LogContext,
}

impl<'a> SchemaReconciler<'a> {
    pub fn new(client: &'a DbClient, lookup: PollPolicy, settle: DrainPolicy, log: LogContext) -> Self {
        Self {
            client,
            lookup,
            settle,
            log,
        }
    }

    pub async fn known_tables(&self, connection: &str) -> Result<KnownTables> {
        let rows = self
            .client
            .select(connection, LIST_TABLES_SQL, LIST_TABLES_TAG, self.settle, self.lookup)
            .await?;
        let known = KnownTables::from_rows(&rows);
        self.log
            .in_scope(|| debug!(connection, tables = known.len(), "Table list received"));
        Ok(known)
    }

    /// Fail unless every coefficient table exists on `connection`.
    pub async fn require_tables<'t>(
        &self,
        connection: &str,
        tables: impl IntoIterator<Item = &'t str>,
    ) -> Result<()> {
        let known = self.known_tables(connection).await?;
        for table in tables {
            if !known.contains(table) {
                self.log.in_scope(|| {
                    error!(critical = true, connection, table, "Coefficient table does not exist")
                });
                return Err(CalcError::MissingCoefficientTable(table.to_string()));
            }
        }
        Ok(())
    }

    /// Create or extend every output table of `registry` on `connection`.
    pub async fn reconcile_outputs(&self, connection: &str, registry: &SignalRegistry) -> Result<()> {
        let known = self.known_tables(connection).await?;

        let tables: Vec<(String, Vec<String>)> = registry
            .output_tables()
            .map(|(table, outputs)| (table.to_string(), outputs.map(|o| o.column.clone()).collect()))
            .collect();

        for (table, columns) in &tables {
            let change = self.reconcile_table(connection, &known, table, columns).await?;
            self.log
                .in_scope(|| info!(table = %table, change = ?change, "Output table reconciled"));
        }
        Ok(())
    }

    pub async fn reconcile_table(
        &self,
        connection: &str,
        known: &KnownTables,
        table: &str,
        columns: &[String],
    ) -> Result<SchemaChange> {
        let columns = columns.iter().map(String::as_str);

        let Some(stored) = known.stored_name(table) else {
            let sql = create_table_sql(table, columns);
            self.execute_ddl(connection, table, &sql).await?;
            return Ok(SchemaChange::Created);
        };

        let rows = self
            .client
            .select(connection, &list_columns_sql(stored), table, self.settle, self.lookup)
            .await?;
        let existing: HashSet<String> = rows.keys().map(|c| c.to_lowercase()).collect();

        match alter_table_sql(table, &existing, columns) {
            Some(sql) => {
                self.execute_ddl(connection, table, &sql).await?;
                Ok(SchemaChange::Altered)
            }
            None => Ok(SchemaChange::Unchanged),
        }
    }

    async fn execute_ddl(&self, connection: &str, table: &str, sql: &str) -> Result<()> {
        let id = self
            .client
            .submit(connection, sql, Vec::new(), RequestKind::Insert, table)
            .await?;
        self.client.wait_idle(self.settle).await;

        match self.client.wait_for(id, table, self.lookup).await {
            Ok(RequestPayload::Insert { success: false }) => {
                self.log
                    .in_scope(|| error!(critical = true, table, query = sql, "Schema statement failed"));
                Err(CalcError::SchemaMigration {
                    table: table.to_string(),
                    query: sql.to_string(),
                })
            }
            Ok(_) => {
                self.log.in_scope(|| info!(table, query = sql, "Schema statement applied"));
                Ok(())
            }
            Err(CalcError::Timeout { attempts, .. }) => {
                self.log.in_scope(|| {
                    warn!(table, query = sql, attempts, "Schema statement result not delivered")
                });
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_table_plain() {
        assert_eq!(
            create_table_sql("OUT1", ["col1", "col2"]),
            "CREATE TABLE out1 (id bigserial, timestemp character varying, \
             col1 character varying, col2 character varying)"
        );
    }

    #[test]
    fn test_create_table_suffix_rules() {
        assert_eq!(
            create_table_sql("TREND9", ["a"]),
            "CREATE TABLE trend9 (id bigserial, a character varying)"
        );
        assert_eq!(
            create_table_sql("ALARM6", ["a"]),
            "CREATE TABLE alarm6 (id bigserial, timestemp character varying, \
             a character varying, status BOOLEAN NOT NULL DEFAULT false)"
        );
    }

    #[test]
    fn test_alter_adds_only_missing_status() {
        let existing: HashSet<String> = ["id", "timestemp", "a", "b"].iter().map(|s| s.to_string()).collect();
        assert_eq!(
            alter_table_sql("ALARM6", &existing, ["A", "b"]).as_deref(),
            Some("ALTER TABLE ALARM6 ADD COLUMN status BOOLEAN NOT NULL DEFAULT false")
        );
    }

    #[test]
    fn test_alter_nothing_missing() {
        let existing: HashSet<String> = ["id", "a"].iter().map(|s| s.to_string()).collect();
        assert_eq!(alter_table_sql("TREND9", &existing, ["a"]), None);
    }

    #[test]
    fn test_alter_multiple_columns() {
        let existing: HashSet<String> = ["a"].iter().map(|s| s.to_string()).collect();
        assert_eq!(
            alter_table_sql("OUT1", &existing, ["a", "c"]).as_deref(),
            Some(
                "ALTER TABLE OUT1 ADD COLUMN c character varying, ADD COLUMN id bigserial, \
                 ADD COLUMN timestemp character varying"
            )
        );
    }

    #[test]
    fn test_insert_statement() {
        assert_eq!(
            insert_sql("OUT1", &["col1", "col2"]),
            "INSERT INTO out1 (col1, col2, timestemp) VALUES ($1, $2, $3)"
        );
    }

    #[test]
    fn test_known_tables_lowercase_match() {
        let mut rows = SelectRows::new();
        rows.insert("out1".to_string(), Default::default());
        let known = KnownTables::from_rows(&rows);
        assert!(known.contains("OUT1"));
        assert_eq!(known.stored_name("OUT1"), Some("out1"));
        assert!(!known.contains("OUT2"));
    }
}
