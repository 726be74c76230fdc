use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::document::{BlockDescriptor, CoefficientGroup, InputEntry, OutputEntry};
use crate::core::{BlockBindings, CreatedBlock, SignalType};
use crate::error::{CalcError, Result};
use crate::plugin::PluginRegistry;
use crate::registry::SignalRegistry;
use crate::telemetry::LogContext;

/// Counts reported by a directory load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub documents: usize,
    pub blocks: usize,
}

/// Turns block configuration documents into registry entries and blocks.
///
/// A document that fails part way keeps every entry and block created before
/// the failure; the next document is processed normally.
pub struct ConfigLoader<'a> {
    registry: &'a mut SignalRegistry,
    plugins: &'a PluginRegistry,
    log: LogContext,
}

impl<'a> ConfigLoader<'a> {
    pub fn new(registry: &'a mut SignalRegistry, plugins: &'a PluginRegistry, log: LogContext) -> Self {
        Self {
            registry,
            plugins,
            log,
        }
    }

    /// Load every `*.json` document in `dir`, in file-name order.
    pub fn load_dir(&mut self, dir: &Path, blocks: &mut Vec<CreatedBlock>) -> LoadSummary {
        let log = self.log.clone();
        let _span = log.span().enter();

        let paths = match document_paths(dir) {
            Ok(paths) => paths,
            Err(e) => {
                error!(dir = %dir.display(), error = %e, "Cannot read configuration directory");
                return LoadSummary::default();
            }
        };

        let mut summary = LoadSummary::default();
        for path in paths {
            summary.documents += 1;
            let text = match std::fs::read_to_string(&path) {
                Ok(text) => text,
                Err(e) => {
                    error!(file = %path.display(), error = %e, "Cannot read configuration document");
                    continue;
                }
            };

            match self.load_str(&text, blocks) {
                Ok(created) => {
                    debug!(file = %path.display(), created, "Configuration document loaded");
                    summary.blocks += created;
                }
                Err(e) => error!(file = %path.display(), error = %e, "Configuration document rejected"),
            }
        }

        info!(
            documents = summary.documents,
            blocks = summary.blocks,
            "Configuration documents read"
        );
        summary
    }

    pub fn load_str(&mut self, text: &str, blocks: &mut Vec<CreatedBlock>) -> Result<usize> {
        let document: Value = serde_json::from_str(text)
            .map_err(|e| CalcError::config(format!("invalid JSON: {}", e)))?;
        self.load_document(&document, blocks)
    }

    /// Process one document (an array of block descriptors).
    ///
    /// Returns the number of blocks appended to `blocks`. On error, blocks
    /// appended before the failing element stay in place.
    pub fn load_document(&mut self, document: &Value, blocks: &mut Vec<CreatedBlock>) -> Result<usize> {
        let elements = document
            .as_array()
            .ok_or_else(|| CalcError::config("document is not an array of blocks"))?;

        let mut created = 0;
        for (index, element) in elements.iter().enumerate() {
            let descriptor: BlockDescriptor = match serde_json::from_value(element.clone()) {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    self.log
                        .in_scope(|| error!(index, error = %e, "Malformed block descriptor skipped"));
                    continue;
                }
            };

            if let Some(block) = self.create_block(index, descriptor)? {
                blocks.push(block);
                created += 1;
            }
        }

        Ok(created)
    }

    /// `Ok(None)` means the element was skipped; `Err` ends the document.
    fn create_block(&mut self, index: usize, descriptor: BlockDescriptor) -> Result<Option<CreatedBlock>> {
        let type_tag = match descriptor.type_tag.as_deref().filter(|t| !t.is_empty()) {
            Some(tag) if self.plugins.contains(tag) => tag.to_string(),
            Some(tag) => {
                self.log
                    .in_scope(|| error!(index, type_tag = tag, "Unknown block type, element skipped"));
                return Ok(None);
            }
            None => {
                self.log
                    .in_scope(|| error!(index, "Block without \"Type\", element skipped"));
                return Ok(None);
            }
        };

        let (Some(inputs), Some(coefficients), Some(outputs)) =
            (descriptor.inputs, descriptor.coefficients, descriptor.outputs)
        else {
            self.log.in_scope(|| {
                error!(
                    index,
                    type_tag = %type_tag,
                    "Block needs \"Inputs\", \"Coefficients\" and \"Outputs\", element skipped"
                )
            });
            return Ok(None);
        };

        let mut bindings = BlockBindings::default();
        for entry in &inputs {
            self.bind_input(entry, &mut bindings)?;
        }
        for group in &coefficients {
            self.bind_coefficients(group, &mut bindings)?;
        }
        for entry in &outputs {
            self.bind_output(entry, &mut bindings)?;
        }

        let block = self.plugins.create(&type_tag, &bindings).map_err(|e| {
            CalcError::config(format!("block #{} ({}) could not be created: {:#}", index, type_tag, e))
        })?;

        Ok(Some(CreatedBlock::new(type_tag, block)))
    }

    fn bind_input(&mut self, entry: &InputEntry, bindings: &mut BlockBindings) -> Result<()> {
        let code = entry
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| CalcError::config("input signal without \"code\""))?;

        let signal_type = entry
            .signal_type
            .as_deref()
            .map(SignalType::from_token)
            .transpose()?;

        if signal_type.is_some() && self.registry.find_input(code).is_some() {
            self.log
                .in_scope(|| debug!(code, "Input already known, declared type ignored"));
        }

        let id = self
            .registry
            .resolve_input(code, entry.kks.as_deref(), signal_type)?;
        bindings.inputs.insert(code.to_string(), id);
        Ok(())
    }

    fn bind_coefficients(&mut self, group: &CoefficientGroup, bindings: &mut BlockBindings) -> Result<()> {
        let table = group
            .table_name
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CalcError::config("coefficient group without \"table_name\""))?;
        let signals = group.code_signals.as_ref().ok_or_else(|| {
            CalcError::config(format!("coefficient table {} has no \"code_signals\"", table))
        })?;

        let entries = bindings.coefficients.entry(table.to_string()).or_default();
        for signal in signals {
            let code = signal.code.as_deref().unwrap_or_default();
            let rows = signal.row.as_ref().ok_or_else(|| {
                CalcError::config(format!("coefficient {} in table {} has no \"row\"", code, table))
            })?;
            if rows.is_empty() {
                self.log
                    .in_scope(|| warn!(table, code, "Coefficient declares no rows"));
            }

            let id = self.registry.resolve_coefficient(table, code, rows)?;
            entries.insert(code.to_string(), id);
        }
        Ok(())
    }

    fn bind_output(&mut self, entry: &OutputEntry, bindings: &mut BlockBindings) -> Result<()> {
        let id = self.registry.resolve_output(
            entry.table_name.as_deref().unwrap_or_default(),
            entry.code.as_deref().unwrap_or_default(),
            entry.table_col.as_deref().unwrap_or_default(),
        )?;

        // resolve_output rejected empty fields above
        let table = entry.table_name.clone().unwrap_or_default();
        let code = entry.code.clone().unwrap_or_default();
        bindings.outputs.entry(table).or_default().insert(code, id);
        Ok(())
    }
}

fn document_paths(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BlockIo, CalcBlock};
    use crate::plugin::ModuleDescriptor;
    use serde_json::json;

    struct Noop;

    impl CalcBlock for Noop {
        fn process(&mut self, _io: &mut BlockIo<'_>, _time: f64, _step: f64) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn plugins() -> PluginRegistry {
        let mut plugins = PluginRegistry::new(LogContext::new("test"));
        plugins.register(ModuleDescriptor::builtin("X", |_| Ok(Box::new(Noop))));
        plugins
    }

    #[test]
    fn test_unknown_type_is_skipped() {
        let plugins = plugins();
        let mut registry = SignalRegistry::new();
        let mut blocks = Vec::new();
        let mut loader = ConfigLoader::new(&mut registry, &plugins, LogContext::new("test"));

        let document = json!([
            {"Type": "Missing", "Inputs": [], "Coefficients": [], "Outputs": []},
            {"Type": "X", "Inputs": [], "Coefficients": [], "Outputs": []}
        ]);
        assert_eq!(loader.load_document(&document, &mut blocks).unwrap(), 1);
        assert_eq!(blocks[0].type_tag, "X");
    }

    #[test]
    fn test_missing_section_is_skipped() {
        let plugins = plugins();
        let mut registry = SignalRegistry::new();
        let mut blocks = Vec::new();
        let mut loader = ConfigLoader::new(&mut registry, &plugins, LogContext::new("test"));

        let document = json!([{"Type": "X", "Inputs": [], "Outputs": []}]);
        assert_eq!(loader.load_document(&document, &mut blocks).unwrap(), 0);
        assert!(blocks.is_empty());
    }

    #[test]
    fn test_bad_type_token_ends_document() {
        let plugins = plugins();
        let mut registry = SignalRegistry::new();
        let mut blocks = Vec::new();
        let mut loader = ConfigLoader::new(&mut registry, &plugins, LogContext::new("test"));

        let document = json!([
            {"Type": "X", "Inputs": [], "Coefficients": [], "Outputs": []},
            {"Type": "X", "Inputs": [{"code": "A", "type": "complex"}], "Coefficients": [], "Outputs": []},
            {"Type": "X", "Inputs": [], "Coefficients": [], "Outputs": []}
        ]);
        assert!(loader.load_document(&document, &mut blocks).is_err());
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn test_document_must_be_array() {
        let plugins = plugins();
        let mut registry = SignalRegistry::new();
        let mut blocks = Vec::new();
        let mut loader = ConfigLoader::new(&mut registry, &plugins, LogContext::new("test"));

        assert!(loader.load_document(&json!({"Type": "X"}), &mut blocks).is_err());
        assert!(loader.load_str("not json", &mut blocks).is_err());
    }
}
