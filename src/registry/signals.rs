use std::fmt;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::core::{SignalType, SignalValue};
use crate::error::{CalcError, Result};

/// Handle of an input signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InputId(u32);

/// Handle of a coefficient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoefficientId(u32);

/// Handle of an output signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputId(u32);

/// Highlight level attached to an output; 0 is the quiescent level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Severity(pub i32);

impl Severity {
    pub const NORMAL: Self = Self(0);
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalInput {
    pub code: String,
    pub kks: String,
    pub signal_type: SignalType,
    pub value: SignalValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Coefficient {
    pub table: String,
    pub code: String,
    /// row name -> value; `None` until hydrated
    pub rows: IndexMap<String, Option<SignalValue>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalOutput {
    pub table: String,
    pub code: String,
    pub column: String,
    pub value: SignalValue,
    pub severity: Severity,
    pub problem_id: Option<String>,
}

impl SignalOutput {
    /// Cell written to the output table: `"<severity> <value>[ <problem-id>]"`
    pub fn render_cell(&self) -> String {
        let mut cell = format!("{} {}", self.severity, self.value);
        if let Some(problem) = self.problem_id.as_deref().filter(|p| !p.is_empty()) {
            cell.push(' ');
            cell.push_str(problem);
        }
        cell
    }
}

fn kks_for(code: &str, kks: Option<&str>) -> String {
    match kks.filter(|k| !k.is_empty()) {
        Some(k) => k.to_string(),
        None => format!("KKS_{}", code),
    }
}

/// Sole owner of every input, coefficient and output.
///
/// Entries live in arenas and are never removed, so handles stay valid for
/// the registry's lifetime.
#[derive(Debug, Default)]
pub struct SignalRegistry {
    inputs: Vec<SignalInput>,
    input_index: IndexMap<String, InputId>,
    kks_index: IndexMap<String, IndexSet<InputId>>,

    coefficients: Vec<Coefficient>,
    coefficient_tables: IndexMap<String, IndexMap<String, CoefficientId>>,

    outputs: Vec<SignalOutput>,
    output_tables: IndexMap<String, IndexMap<String, OutputId>>,
}

impl SignalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the input for `code`, creating it on first reference.
    ///
    /// `signal_type` is only consulted when the code is new. An existing entry
    /// is returned untouched; it is (re)registered under its stored kks tag.
    pub fn resolve_input(
        &mut self,
        code: &str,
        kks: Option<&str>,
        signal_type: Option<SignalType>,
    ) -> Result<InputId> {
        if code.is_empty() {
            return Err(CalcError::config("input signal without \"code\""));
        }

        let id = match self.input_index.get(code) {
            Some(id) => *id,
            None => {
                let signal_type = signal_type.ok_or_else(|| {
                    CalcError::config(format!("input signal {} has no valid \"type\"", code))
                })?;
                if kks.map_or(true, str::is_empty) {
                    tracing::debug!(code, "No KKS field, assigned \"KKS_\" + code");
                }
                let kks = kks_for(code, kks);

                let id = InputId(self.inputs.len() as u32);
                self.inputs.push(SignalInput {
                    code: code.to_string(),
                    kks,
                    signal_type,
                    value: signal_type.zero(),
                });
                self.input_index.insert(code.to_string(), id);
                id
            }
        };

        let kks = self.inputs[id.0 as usize].kks.clone();
        self.kks_index.entry(kks).or_default().insert(id);

        Ok(id)
    }

    /// Return the coefficient `(table, code)`, creating it on first reference.
    /// Row names not yet known are added empty; existing rows keep their values.
    pub fn resolve_coefficient<I, S>(&mut self, table: &str, code: &str, rows: I) -> Result<CoefficientId>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if code.is_empty() {
            return Err(CalcError::config(format!(
                "coefficient without \"code\" in table {}",
                table
            )));
        }

        let table_entries = self.coefficient_tables.entry(table.to_string()).or_default();
        let id = match table_entries.get(code) {
            Some(id) => *id,
            None => {
                let id = CoefficientId(self.coefficients.len() as u32);
                self.coefficients.push(Coefficient {
                    table: table.to_string(),
                    code: code.to_string(),
                    rows: IndexMap::new(),
                });
                table_entries.insert(code.to_string(), id);
                id
            }
        };

        let coefficient = &mut self.coefficients[id.0 as usize];
        for row in rows {
            coefficient.rows.entry(row.as_ref().to_string()).or_insert(None);
        }

        Ok(id)
    }

    /// Return the output `(table, code)`, creating it bound to `column` on
    /// first reference. An existing output keeps its column.
    pub fn resolve_output(&mut self, table: &str, code: &str, column: &str) -> Result<OutputId> {
        if code.is_empty() || table.is_empty() || column.is_empty() {
            return Err(CalcError::config(format!(
                "output signal needs code, table_col and table_name (got {:?}/{:?}/{:?})",
                code, column, table
            )));
        }

        let table_entries = self.output_tables.entry(table.to_string()).or_default();
        if let Some(id) = table_entries.get(code) {
            return Ok(*id);
        }

        let id = OutputId(self.outputs.len() as u32);
        self.outputs.push(SignalOutput {
            table: table.to_string(),
            code: code.to_string(),
            column: column.to_string(),
            value: SignalValue::default(),
            severity: Severity::NORMAL,
            problem_id: None,
        });
        table_entries.insert(code.to_string(), id);
        Ok(id)
    }

    pub fn find_input(&self, code: &str) -> Option<InputId> {
        self.input_index.get(code).copied()
    }

    /// Unscoped lookups return the first table holding `code`; which table
    /// wins for duplicated codes is unspecified.
    pub fn find_output(&self, code: &str, table: Option<&str>) -> Option<OutputId> {
        search_tables(&self.output_tables, code, table)
    }

    pub fn find_coefficient(&self, code: &str, table: Option<&str>) -> Option<CoefficientId> {
        search_tables(&self.coefficient_tables, code, table)
    }

    pub fn input(&self, id: InputId) -> &SignalInput {
        &self.inputs[id.0 as usize]
    }

    pub fn input_mut(&mut self, id: InputId) -> &mut SignalInput {
        &mut self.inputs[id.0 as usize]
    }

    pub fn coefficient(&self, id: CoefficientId) -> &Coefficient {
        &self.coefficients[id.0 as usize]
    }

    pub fn coefficient_mut(&mut self, id: CoefficientId) -> &mut Coefficient {
        &mut self.coefficients[id.0 as usize]
    }

    pub fn output(&self, id: OutputId) -> &SignalOutput {
        &self.outputs[id.0 as usize]
    }

    pub fn output_mut(&mut self, id: OutputId) -> &mut SignalOutput {
        &mut self.outputs[id.0 as usize]
    }

    /// Push an external value to every input registered under `kks`.
    /// Returns how many inputs were updated.
    pub fn update_kks(&mut self, kks: &str, value: &SignalValue) -> usize {
        let Some(ids) = self.kks_index.get(kks) else {
            return 0;
        };
        for id in ids {
            self.inputs[id.0 as usize].value = value.clone();
        }
        ids.len()
    }

    pub fn inputs_for_kks(&self, kks: &str) -> impl Iterator<Item = InputId> + '_ {
        self.kks_index.get(kks).into_iter().flatten().copied()
    }

    pub fn kks_tags(&self) -> impl Iterator<Item = &str> {
        self.kks_index.keys().map(String::as_str)
    }

    /// Output tables with their outputs, in registration order
    pub fn output_tables(&self) -> impl Iterator<Item = (&str, impl Iterator<Item = &SignalOutput>)> {
        self.output_tables.iter().map(move |(table, entries)| {
            (
                table.as_str(),
                entries.values().map(move |id| &self.outputs[id.0 as usize]),
            )
        })
    }

    pub fn coefficient_table_names(&self) -> impl Iterator<Item = &str> {
        self.coefficient_tables.keys().map(String::as_str)
    }

    pub fn coefficients_in(&self, table: &str) -> impl Iterator<Item = CoefficientId> + '_ {
        self.coefficient_tables
            .get(table)
            .into_iter()
            .flat_map(|entries| entries.values().copied())
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn coefficient_count(&self) -> usize {
        self.coefficients.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }
}

fn search_tables<Id: Copy>(
    tables: &IndexMap<String, IndexMap<String, Id>>,
    code: &str,
    table: Option<&str>,
) -> Option<Id> {
    match table.filter(|t| !t.is_empty()) {
        Some(table) => tables.get(table).and_then(|entries| entries.get(code).copied()),
        None => tables.values().find_map(|entries| entries.get(code).copied()),
    }
}
