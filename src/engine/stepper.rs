use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, error};

use super::clock::Clock;
use crate::core::{BlockIo, CreatedBlock, SignalValue};
use crate::error::{CalcError, Result};
use crate::registry::SignalRegistry;
use crate::telemetry::LogContext;

/// What an input refresh did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    /// kks tags found in the value file
    pub updated: usize,
    /// numbered tags absent from the value file
    pub missing: usize,
}

/// The ordered block sequence with its clock and input source.
pub struct Stepper {
    blocks: Vec<CreatedBlock>,
    clock: Clock,
    input_file: PathBuf,
    log: LogContext,
}

impl Stepper {
    pub fn new(input_file: impl Into<PathBuf>, clock: Clock, log: LogContext) -> Self {
        Self {
            blocks: Vec::new(),
            clock,
            input_file: input_file.into(),
            log,
        }
    }

    pub fn blocks(&self) -> &[CreatedBlock] {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut Vec<CreatedBlock> {
        &mut self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn input_file(&self) -> &Path {
        &self.input_file
    }

    pub fn set_input_file(&mut self, path: impl Into<PathBuf>) {
        self.input_file = path.into();
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut Clock {
        &mut self.clock
    }

    /// Read the value file and push every tracked kks tag it holds.
    pub async fn refresh_inputs(&self, registry: &mut SignalRegistry) -> Result<RefreshSummary> {
        let text = tokio::fs::read_to_string(&self.input_file)
            .await
            .map_err(|e| self.input_error(format!("cannot read: {}", e)))?;
        let values: Map<String, Value> = serde_json::from_str(&text)
            .map_err(|e| self.input_error(format!("not a JSON object: {}", e)))?;

        let tags: Vec<String> = registry.kks_tags().map(str::to_string).collect();
        let mut summary = RefreshSummary::default();
        for kks in &tags {
            match values.get(kks) {
                Some(raw) => match SignalValue::from_json(raw) {
                    Some(value) => {
                        registry.update_kks(kks, &value);
                        summary.updated += 1;
                    }
                    None => self
                        .log
                        .in_scope(|| debug!(kks = %kks, "Unsupported value kind ignored")),
                },
                None if is_numbered_tag(kks) => {
                    self.log
                        .in_scope(|| error!(kks = %kks, "It is impossible to find a signal for KKS"));
                    summary.missing += 1;
                }
                None => {}
            }
        }

        Ok(summary)
    }

    fn input_error(&self, reason: String) -> CalcError {
        let err = CalcError::InputFile {
            path: self.input_file.clone(),
            reason,
        };
        self.log
            .in_scope(|| error!(critical = true, error = %err, "Input values unavailable"));
        err
    }

    /// Run every block in order. The first failure ends the pass; outputs
    /// written by earlier blocks keep their new values.
    pub fn run_blocks(&mut self, registry: &mut SignalRegistry, time: f64, step: f64) -> Result<()> {
        for (index, created) in self.blocks.iter_mut().enumerate() {
            let mut io = BlockIo::new(&mut *registry);
            let block = &mut created.block;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| block.process(&mut io, time, step)));

            let reason = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => format!("{:#}", e),
                Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
            };

            self.log.in_scope(|| {
                error!(index, type_tag = %created.type_tag, reason = %reason, "Block failed, tick aborted")
            });
            return Err(CalcError::BlockFault {
                index,
                type_tag: created.type_tag.clone(),
                reason,
            });
        }
        Ok(())
    }

    pub fn advance_clock(&mut self) -> i64 {
        self.clock.advance()
    }

    /// Everything the blocks expose for debugging, merged into one object
    pub fn debug_snapshot(&self, registry: &SignalRegistry, time: f64, step: f64) -> Value {
        let mut out = Map::new();
        for created in &self.blocks {
            created.block.debug_dump(registry, &mut out, time, step);
        }
        Value::Object(out)
    }
}

/// `KKS_` followed by exactly three digits
pub fn is_numbered_tag(kks: &str) -> bool {
    match kks.strip_prefix("KKS_") {
        Some(digits) => digits.len() == 3 && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
