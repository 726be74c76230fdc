//! In-memory stand-in for the database subsystem.
//!
//! Requests are executed by a background worker after a configurable
//! latency, against a small catalog that understands exactly the statement
//! shapes the calculation core emits. Used by the integration tests and the
//! demo binary.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, warn};

use super::protocol::{
    PendingRequest, RequestId, RequestKind, RequestPayload, RequestQueue, SelectRows, SubmitReceipt,
    SubmitStatus,
};
use crate::config::ConnectionInfo;

/// A statement as it was submitted
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub connection: String,
    pub query: String,
    pub params: Vec<String>,
    pub kind: RequestKind,
    pub table_tag: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SimTable {
    /// Value of `column` in every row, in insertion order
    pub fn column(&self, column: &str) -> Vec<&str> {
        match self.columns.iter().position(|c| c == column) {
            Some(index) => self.rows.iter().map(|row| row[index].as_str()).collect(),
            None => Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct Catalog {
    tables: IndexMap<String, SimTable>,
}

#[derive(Debug, Default)]
struct SimState {
    connections: HashSet<String>,
    refused_connections: HashSet<String>,
    catalogs: HashMap<String, Catalog>,
    next_id: i64,
    delivered: HashMap<RequestId, PendingRequest>,
    in_flight: usize,
    selects_in_flight: usize,
    journal: Vec<Statement>,
    refuse_submissions: Option<SubmitStatus>,
    failing_patterns: Vec<String>,
}

struct Job {
    id: RequestId,
    statement: Statement,
}

/// Simulated database subsystem. Must be created inside a tokio runtime.
pub struct SimulatedDatabase {
    state: Arc<Mutex<SimState>>,
    jobs: mpsc::UnboundedSender<Job>,
    paused: watch::Sender<bool>,
}

impl SimulatedDatabase {
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    pub fn with_latency(latency: Duration) -> Self {
        let state = Arc::new(Mutex::new(SimState::default()));
        let (jobs, receiver) = mpsc::unbounded_channel();
        let (paused, paused_rx) = watch::channel(false);

        tokio::spawn(run_worker(Arc::clone(&state), receiver, paused_rx, latency));

        Self { state, jobs, paused }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        lock(&self.state)
    }

    /// While paused, accepted requests stay in flight and nothing is delivered.
    pub fn set_paused(&self, paused: bool) {
        self.paused.send_replace(paused);
    }

    /// Answer every submission with `status` instead of accepting it
    pub fn refuse_submissions(&self, status: Option<SubmitStatus>) {
        self.lock().refuse_submissions = status;
    }

    pub fn refuse_connection(&self, connection: &str) {
        self.lock().refused_connections.insert(connection.to_string());
    }

    /// Statements containing `pattern` are executed as failures
    pub fn fail_statements_containing(&self, pattern: &str) {
        self.lock().failing_patterns.push(pattern.to_string());
    }

    pub fn is_connected(&self, connection: &str) -> bool {
        self.lock().connections.contains(connection)
    }

    /// Create (or replace) a table on `connection`. The first column keys
    /// SELECT results.
    pub fn seed_table(&self, connection: &str, name: &str, columns: &[&str], rows: &[&[&str]]) {
        let table = SimTable {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .iter()
                .map(|row| row.iter().map(|cell| cell.to_string()).collect())
                .collect(),
        };
        self.lock()
            .catalogs
            .entry(connection.to_string())
            .or_default()
            .tables
            .insert(name.to_string(), table);
    }

    pub fn table(&self, connection: &str, name: &str) -> Option<SimTable> {
        self.lock()
            .catalogs
            .get(connection)
            .and_then(|catalog| catalog.tables.get(name))
            .cloned()
    }

    pub fn table_names(&self, connection: &str) -> Vec<String> {
        self.lock()
            .catalogs
            .get(connection)
            .map(|catalog| catalog.tables.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Every accepted statement, in submission order
    pub fn journal(&self) -> Vec<Statement> {
        self.lock().journal.clone()
    }
}

impl Default for SimulatedDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RequestQueue for SimulatedDatabase {
    async fn create_connection(&self, info: &ConnectionInfo) -> anyhow::Result<()> {
        let mut state = self.lock();
        if state.refused_connections.contains(&info.id) {
            return Err(anyhow!("server at {}:{} refused the connection", info.host, info.port));
        }
        state.connections.insert(info.id.clone());
        state.catalogs.entry(info.id.clone()).or_default();
        Ok(())
    }

    async fn submit(
        &self,
        connection: &str,
        query: &str,
        params: Vec<String>,
        kind: RequestKind,
        table_tag: &str,
    ) -> SubmitReceipt {
        let statement = Statement {
            connection: connection.to_string(),
            query: query.to_string(),
            params,
            kind,
            table_tag: table_tag.to_string(),
        };

        let id = {
            let mut state = self.lock();
            if let Some(status) = state.refuse_submissions {
                return SubmitReceipt::refused(status);
            }
            if !state.connections.contains(connection) {
                return SubmitReceipt::refused(SubmitStatus::UnknownConnection);
            }

            let id = RequestId(state.next_id);
            state.next_id += 1;
            state.in_flight += 1;
            if kind == RequestKind::Select {
                state.selects_in_flight += 1;
            }
            state.journal.push(statement.clone());
            id
        };

        if self.jobs.send(Job { id, statement }).is_err() {
            return SubmitReceipt::refused(SubmitStatus::Rejected);
        }
        SubmitReceipt::accepted(id)
    }

    async fn poll(&self, request_id: RequestId) -> PendingRequest {
        self.lock()
            .delivered
            .remove(&request_id)
            .unwrap_or_else(PendingRequest::not_found)
    }

    async fn has_outstanding_work(&self) -> bool {
        self.lock().in_flight > 0
    }

    async fn outstanding_select_count(&self) -> usize {
        self.lock().selects_in_flight
    }
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run_worker(
    state: Arc<Mutex<SimState>>,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    mut paused: watch::Receiver<bool>,
    latency: Duration,
) {
    while let Some(job) = jobs.recv().await {
        while *paused.borrow() {
            if paused.changed().await.is_err() {
                return;
            }
        }
        if !latency.is_zero() {
            sleep(latency).await;
        }

        let mut state = lock(&state);
        state.complete(job);
    }
}

impl SimState {
    fn complete(&mut self, job: Job) {
        let Job { id, statement } = job;

        let forced_failure = self
            .failing_patterns
            .iter()
            .any(|pattern| statement.query.contains(pattern.as_str()));
        let result = if forced_failure {
            Err("statement failed".to_string())
        } else {
            self.catalogs
                .entry(statement.connection.clone())
                .or_default()
                .execute(&statement.query, &statement.params)
        };

        let payload = match (result, statement.kind) {
            (Ok(RequestPayload::Rows(rows)), RequestKind::Select) => RequestPayload::Rows(rows),
            (Ok(_), RequestKind::Select) => RequestPayload::Rows(SelectRows::new()),
            (Ok(_), RequestKind::Insert) => RequestPayload::Insert { success: true },
            (Err(reason), kind) => {
                warn!(request = %id, query = %statement.query, reason = %reason, "Simulated statement failed");
                match kind {
                    RequestKind::Select => RequestPayload::Rows(SelectRows::new()),
                    RequestKind::Insert => RequestPayload::Insert { success: false },
                }
            }
        };
        debug!(request = %id, table = %statement.table_tag, "Simulated statement executed");

        self.in_flight = self.in_flight.saturating_sub(1);
        if statement.kind == RequestKind::Select {
            self.selects_in_flight = self.selects_in_flight.saturating_sub(1);
        }
        self.delivered
            .insert(id, PendingRequest::delivered(id, statement.table_tag, payload));
    }
}

impl Catalog {
    fn execute(&mut self, query: &str, params: &[String]) -> Result<RequestPayload, String> {
        let query = query.trim();

        if strip_keyword(query, "SELECT table_name FROM information_schema.tables").is_some() {
            let rows = self
                .tables
                .keys()
                .map(|name| (name.clone(), single_cell("table_name", name)))
                .collect();
            return Ok(RequestPayload::Rows(rows));
        }

        if let Some(rest) = strip_keyword(query, "SELECT column_name FROM information_schema.columns") {
            let name = quoted(rest).ok_or("column listing without table name")?;
            let rows = self
                .tables
                .get(name)
                .map(|table| {
                    table
                        .columns
                        .iter()
                        .map(|c| (c.clone(), single_cell("column_name", c)))
                        .collect()
                })
                .unwrap_or_default();
            return Ok(RequestPayload::Rows(rows));
        }

        if let Some(rest) = strip_keyword(query, "SELECT * FROM ") {
            let table = self.table(rest.trim())?;
            let rows = table
                .rows
                .iter()
                .filter_map(|row| {
                    let key = row.first()?.clone();
                    let cells = table.columns.iter().cloned().zip(row.iter().cloned()).collect();
                    Some((key, cells))
                })
                .collect();
            return Ok(RequestPayload::Rows(rows));
        }

        if let Some(rest) = strip_keyword(query, "CREATE TABLE ") {
            let (name, definitions) = name_and_list(rest)?;
            let name = name.to_lowercase();
            if self.tables.contains_key(&name) {
                return Err(format!("relation \"{}\" already exists", name));
            }
            let columns = definitions.split(',').filter_map(column_name).collect();
            self.tables.insert(name, SimTable { columns, rows: Vec::new() });
            return Ok(RequestPayload::Insert { success: true });
        }

        if let Some(rest) = strip_keyword(query, "ALTER TABLE ") {
            let (name, additions) = rest.trim().split_once(' ').ok_or("ALTER TABLE without clauses")?;
            let mut added = Vec::new();
            for clause in additions.split(',') {
                let definition = strip_keyword(clause.trim(), "ADD COLUMN ")
                    .ok_or_else(|| format!("unsupported clause \"{}\"", clause.trim()))?;
                added.push(column_name(definition).ok_or("ADD COLUMN without name")?);
            }

            let table = self.table_mut(name)?;
            if let Some(duplicate) = added.iter().find(|c| table.columns.contains(*c)) {
                return Err(format!("column \"{}\" already exists", duplicate));
            }
            for row in &mut table.rows {
                row.extend(added.iter().map(|_| String::new()));
            }
            table.columns.extend(added);
            return Ok(RequestPayload::Insert { success: true });
        }

        if let Some(rest) = strip_keyword(query, "INSERT INTO ") {
            let (name, columns) = name_and_list(rest)?;
            let columns: Vec<String> = columns.split(',').filter_map(column_name).collect();
            if columns.len() != params.len() {
                return Err(format!("{} columns but {} values", columns.len(), params.len()));
            }

            let table = self.table_mut(name)?;
            let mut row = vec![String::new(); table.columns.len()];
            for (column, value) in columns.iter().zip(params) {
                let index = table
                    .columns
                    .iter()
                    .position(|c| c == column)
                    .ok_or_else(|| format!("column \"{}\" does not exist", column))?;
                row[index] = value.clone();
            }
            table.rows.push(row);
            return Ok(RequestPayload::Insert { success: true });
        }

        Err(format!("unsupported statement: {}", query))
    }

    fn table(&self, name: &str) -> Result<&SimTable, String> {
        let name = name.to_lowercase();
        self.tables
            .get(&name)
            .ok_or_else(|| format!("relation \"{}\" does not exist", name))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut SimTable, String> {
        let name = name.trim().to_lowercase();
        self.tables
            .get_mut(&name)
            .ok_or_else(|| format!("relation \"{}\" does not exist", name))
    }
}

fn single_cell(column: &str, value: &str) -> IndexMap<String, String> {
    IndexMap::from([(column.to_string(), value.to_string())])
}

fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let head = text.get(..keyword.len())?;
    if head.eq_ignore_ascii_case(keyword) {
        text.get(keyword.len()..)
    } else {
        None
    }
}

fn quoted(text: &str) -> Option<&str> {
    let start = text.find('\'')? + 1;
    let end = text[start..].find('\'')? + start;
    Some(&text[start..end])
}

/// `name (a, b, c)` -> (`name`, `a, b, c`)
fn name_and_list(text: &str) -> Result<(&str, &str), String> {
    let open = text.find('(').ok_or("missing column list")?;
    let close = text[open..].find(')').ok_or("unterminated column list")? + open;
    Ok((text[..open].trim(), &text[open + 1..close]))
}

fn column_name(definition: &str) -> Option<String> {
    definition.split_whitespace().next().map(str::to_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_create_alter_insert() {
        let mut catalog = Catalog::default();
        catalog
            .execute("CREATE TABLE out1 (id bigserial, timestemp character varying, col1 character varying)", &[])
            .unwrap();
        catalog
            .execute("ALTER TABLE OUT1 ADD COLUMN col2 character varying", &[])
            .unwrap();
        catalog
            .execute(
                "INSERT INTO out1 (col1, col2, timestemp) VALUES ($1, $2, $3)",
                &["0 1".to_string(), "0 2".to_string(), "100".to_string()],
            )
            .unwrap();

        let table = &catalog.tables["out1"];
        assert_eq!(table.columns, vec!["id", "timestemp", "col1", "col2"]);
        assert_eq!(table.column("col2"), vec!["0 2"]);
        assert_eq!(table.column("timestemp"), vec!["100"]);
    }

    #[test]
    fn test_catalog_rejects_duplicates() {
        let mut catalog = Catalog::default();
        catalog.execute("CREATE TABLE t (id bigserial)", &[]).unwrap();
        assert!(catalog.execute("CREATE TABLE T (id bigserial)", &[]).is_err());
        assert!(catalog.execute("ALTER TABLE t ADD COLUMN id bigserial", &[]).is_err());
        assert!(catalog.execute("DROP TABLE t", &[]).is_err());
    }

    #[test]
    fn test_select_keyed_by_first_column() {
        let mut catalog = Catalog::default();
        catalog.tables.insert(
            "limits".to_string(),
            SimTable {
                columns: vec!["code".into(), "low".into()],
                rows: vec![vec!["C1".into(), "3.14".into()]],
            },
        );

        let RequestPayload::Rows(rows) = catalog.execute("SELECT * FROM Limits", &[]).unwrap() else {
            panic!("expected rows");
        };
        assert_eq!(rows["C1"]["low"], "3.14");
    }
}
