use anyhow::{anyhow, Result};
use calcserver_macros::CalcModule;
use serde_json::{json, Map, Value};

use crate::core::{BlockIo, CalcBlock};
use crate::registry::{CoefficientId, InputId, OutputId, Severity, SignalRegistry};

const LOW: Severity = Severity(1);
const HIGH: Severity = Severity(2);

/// Copies its input to its output and raises the output's severity when the
/// value leaves the `low`..`high` band of its coefficient. A missing limit
/// is not checked.
#[derive(CalcModule, Debug)]
#[calc_module(type_tag = "LimitAlarm")]
pub struct LimitAlarm {
    #[input]
    value: InputId,
    #[coefficient]
    limits: CoefficientId,
    #[output]
    state: OutputId,
    /// ticks spent outside the band in a row
    violations: u64,
}

fn limit(io: &BlockIo<'_>, id: CoefficientId, row: &str) -> Option<f64> {
    io.coefficient(id, row).and_then(|v| v.as_f64())
}

impl CalcBlock for LimitAlarm {
    fn process(&mut self, io: &mut BlockIo<'_>, _time: f64, _step: f64) -> Result<()> {
        let value = io
            .input(self.value)
            .as_f64()
            .ok_or_else(|| anyhow!("LimitAlarm input is not numeric"))?;

        let (severity, problem) = match (limit(io, self.limits, "low"), limit(io, self.limits, "high")) {
            (_, Some(high)) if value > high => (HIGH, Some("HIGH".to_string())),
            (Some(low), _) if value < low => (LOW, Some("LOW".to_string())),
            _ => (Severity::NORMAL, None),
        };

        self.violations = if severity == Severity::NORMAL { 0 } else { self.violations + 1 };
        io.set_output(self.state, value);
        io.set_highlight(self.state, severity, problem);
        Ok(())
    }

    fn debug_dump(&self, registry: &SignalRegistry, out: &mut Map<String, Value>, _time: f64, _step: f64) {
        let output = registry.output(self.state);
        out.insert(
            format!("LimitAlarm/{}", output.code),
            json!({
                "severity": output.severity.0,
                "problem": output.problem_id,
                "violations": self.violations,
            }),
        );
    }
}
