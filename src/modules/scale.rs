use anyhow::{anyhow, Result};
use calcserver_macros::CalcModule;
use serde_json::{json, Map, Value};

use crate::core::{BlockIo, CalcBlock};
use crate::registry::{CoefficientId, InputId, OutputId, SignalRegistry};

/// `output = input * k + b`, with `k` and `b` rows of its coefficient.
/// Rows not yet hydrated count as `k = 1`, `b = 0`.
#[derive(CalcModule, Debug)]
#[calc_module(type_tag = "Scale")]
pub struct Scale {
    #[input]
    source: InputId,
    #[coefficient]
    factors: CoefficientId,
    #[output]
    result: OutputId,
}

impl Scale {
    fn factor(io: &BlockIo<'_>, id: CoefficientId, row: &str, fallback: f64) -> Result<f64> {
        match io.coefficient(id, row) {
            Some(value) => value
                .as_f64()
                .ok_or_else(|| anyhow!("coefficient row \"{}\" is not numeric: {:?}", row, value)),
            None => Ok(fallback),
        }
    }
}

impl CalcBlock for Scale {
    fn process(&mut self, io: &mut BlockIo<'_>, _time: f64, _step: f64) -> Result<()> {
        let x = io
            .input(self.source)
            .as_f64()
            .ok_or_else(|| anyhow!("Scale input is not numeric"))?;
        let k = Self::factor(io, self.factors, "k", 1.0)?;
        let b = Self::factor(io, self.factors, "b", 0.0)?;

        io.set_output(self.result, x * k + b);
        Ok(())
    }

    fn debug_dump(&self, registry: &SignalRegistry, out: &mut Map<String, Value>, time: f64, _step: f64) {
        let output = registry.output(self.result);
        out.insert(
            format!("Scale/{}", output.code),
            json!({
                "time": time,
                "input": registry.input(self.source).value,
                "output": output.value,
            }),
        );
    }
}
