use anyhow::{anyhow, Result};
use indexmap::IndexMap;
use serde_json::{Map, Value};

use super::SignalValue;
use crate::registry::{CoefficientId, InputId, OutputId, Severity, SignalOutput, SignalRegistry};

/// A calculation unit executed once per tick.
///
/// Blocks hold handles into the `SignalRegistry`; the registry itself is only
/// reachable through the `BlockIo` view handed to `process`.
pub trait CalcBlock: Send {
    fn process(&mut self, io: &mut BlockIo<'_>, time: f64, step: f64) -> Result<()>;

    /// Append whatever the block wants to expose for debugging to `out`.
    fn debug_dump(
        &self,
        _registry: &SignalRegistry,
        _out: &mut Map<String, Value>,
        _time: f64,
        _step: f64,
    ) {
    }
}

/// Construction of a block from its resolved references.
/// Implemented by `#[derive(CalcModule)]`.
pub trait BuildBlock: Sized {
    fn build(bindings: &BlockBindings) -> Result<Self>;
}

/// A block in the execution sequence, with the type tag it was created from
pub struct CreatedBlock {
    pub type_tag: String,
    pub block: Box<dyn CalcBlock>,
}

impl CreatedBlock {
    pub fn new(type_tag: impl Into<String>, block: Box<dyn CalcBlock>) -> Self {
        Self {
            type_tag: type_tag.into(),
            block,
        }
    }
}

impl std::fmt::Debug for CreatedBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreatedBlock")
            .field("type_tag", &self.type_tag)
            .finish_non_exhaustive()
    }
}

/// The three reference sets a block is built from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockBindings {
    /// code -> input
    pub inputs: IndexMap<String, InputId>,
    /// table -> code -> coefficient
    pub coefficients: IndexMap<String, IndexMap<String, CoefficientId>>,
    /// table -> code -> output
    pub outputs: IndexMap<String, IndexMap<String, OutputId>>,
}

impl BlockBindings {
    pub fn input(&self, code: &str) -> Result<InputId> {
        self.inputs
            .get(code)
            .copied()
            .ok_or_else(|| anyhow!("Block has no input \"{}\"", code))
    }

    /// First coefficient with this code in any bound table
    pub fn coefficient(&self, code: &str) -> Result<CoefficientId> {
        self.coefficients
            .values()
            .find_map(|table| table.get(code).copied())
            .ok_or_else(|| anyhow!("Block has no coefficient \"{}\"", code))
    }

    pub fn coefficient_in(&self, table: &str, code: &str) -> Result<CoefficientId> {
        self.coefficients
            .get(table)
            .and_then(|t| t.get(code).copied())
            .ok_or_else(|| anyhow!("Block has no coefficient \"{}\" in table {}", code, table))
    }

    /// First output with this code in any bound table
    pub fn output(&self, code: &str) -> Result<OutputId> {
        self.outputs
            .values()
            .find_map(|table| table.get(code).copied())
            .ok_or_else(|| anyhow!("Block has no output \"{}\"", code))
    }

    pub fn output_in(&self, table: &str, code: &str) -> Result<OutputId> {
        self.outputs
            .get(table)
            .and_then(|t| t.get(code).copied())
            .ok_or_else(|| anyhow!("Block has no output \"{}\" in table {}", code, table))
    }

    /// The `index`-th input, in configuration order
    pub fn input_at(&self, index: usize) -> Result<InputId> {
        self.input_ids()
            .nth(index)
            .ok_or_else(|| anyhow!("Block needs at least {} input(s)", index + 1))
    }

    /// The `index`-th coefficient across all bound tables
    pub fn coefficient_at(&self, index: usize) -> Result<CoefficientId> {
        self.coefficient_ids()
            .nth(index)
            .ok_or_else(|| anyhow!("Block needs at least {} coefficient(s)", index + 1))
    }

    pub fn output_at(&self, index: usize) -> Result<OutputId> {
        self.output_ids()
            .nth(index)
            .ok_or_else(|| anyhow!("Block needs at least {} output(s)", index + 1))
    }

    pub fn coefficient_ids(&self) -> impl Iterator<Item = CoefficientId> + '_ {
        self.coefficients.values().flat_map(|t| t.values().copied())
    }

    pub fn input_ids(&self) -> impl Iterator<Item = InputId> + '_ {
        self.inputs.values().copied()
    }

    pub fn output_ids(&self) -> impl Iterator<Item = OutputId> + '_ {
        self.outputs.values().flat_map(|t| t.values().copied())
    }
}

/// What a block may touch while processing: read inputs and coefficients,
/// write outputs.
pub struct BlockIo<'a> {
    registry: &'a mut SignalRegistry,
}

impl<'a> BlockIo<'a> {
    pub fn new(registry: &'a mut SignalRegistry) -> Self {
        Self { registry }
    }

    pub fn input(&self, id: InputId) -> &SignalValue {
        &self.registry.input(id).value
    }

    /// `None` until the row has been hydrated from the store
    pub fn coefficient(&self, id: CoefficientId, row: &str) -> Option<&SignalValue> {
        self.registry
            .coefficient(id)
            .rows
            .get(row)
            .and_then(Option::as_ref)
    }

    pub fn output(&self, id: OutputId) -> &SignalOutput {
        self.registry.output(id)
    }

    pub fn set_output(&mut self, id: OutputId, value: impl Into<SignalValue>) {
        self.registry.output_mut(id).value = value.into();
    }

    pub fn set_highlight(&mut self, id: OutputId, severity: Severity, problem_id: Option<String>) {
        let output = self.registry.output_mut(id);
        output.severity = severity;
        output.problem_id = problem_id.filter(|p| !p.is_empty());
    }
}
