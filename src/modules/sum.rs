use anyhow::{anyhow, Result};

use crate::core::{BlockBindings, BlockIo, BuildBlock, CalcBlock};
use crate::plugin::{BuiltinModule, ModuleDescriptor};
use crate::registry::{InputId, OutputId};

/// Sum of every input into the first output. Integer inputs stay integer
/// until a real one is added.
#[derive(Debug)]
pub struct Sum {
    inputs: Vec<InputId>,
    total: OutputId,
}

impl BuildBlock for Sum {
    fn build(bindings: &BlockBindings) -> Result<Self> {
        Ok(Self {
            inputs: bindings.input_ids().collect(),
            total: bindings.output_at(0)?,
        })
    }
}

impl CalcBlock for Sum {
    fn process(&mut self, io: &mut BlockIo<'_>, _time: f64, _step: f64) -> Result<()> {
        use crate::core::SignalValue;

        let mut total = SignalValue::Integer(0);
        for id in &self.inputs {
            total = match (total, io.input(*id)) {
                (SignalValue::Integer(a), SignalValue::Integer(b)) => a
                    .checked_add(*b)
                    .map(SignalValue::Integer)
                    .ok_or_else(|| anyhow!("Sum overflows i64 ({} + {})", a, b))?,
                (acc, value) => {
                    let a = acc.as_f64().unwrap_or_default();
                    let b = value
                        .as_f64()
                        .ok_or_else(|| anyhow!("Sum input {:?} is not numeric", value))?;
                    SignalValue::Real(a + b)
                }
            };
        }

        io.set_output(self.total, total);
        Ok(())
    }
}

fn describe_sum() -> ModuleDescriptor {
    ModuleDescriptor::builtin("Sum", |bindings| {
        let block = Sum::build(bindings)?;
        Ok(Box::new(block) as Box<dyn CalcBlock>)
    })
}

inventory::submit! {
    BuiltinModule(describe_sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{SignalType, SignalValue};
    use crate::registry::SignalRegistry;

    fn sum_of(values: [i64; 2]) -> (SignalRegistry, Sum) {
        let mut registry = SignalRegistry::new();
        let a = registry.resolve_input("A", None, Some(SignalType::Integer)).unwrap();
        let b = registry.resolve_input("B", None, Some(SignalType::Integer)).unwrap();
        registry.input_mut(a).value = SignalValue::Integer(values[0]);
        registry.input_mut(b).value = SignalValue::Integer(values[1]);
        let total = registry.resolve_output("OUT1", "S", "s").unwrap();
        (registry, Sum { inputs: vec![a, b], total })
    }

    #[test]
    fn test_integer_sum() {
        let (mut registry, mut sum) = sum_of([2, 3]);
        sum.process(&mut BlockIo::new(&mut registry), 0.0, 1.0).unwrap();
        assert_eq!(registry.output(sum.total).value, SignalValue::Integer(5));
    }

    #[test]
    fn test_integer_overflow_is_an_error() {
        let (mut registry, mut sum) = sum_of([i64::MAX, 1]);
        let err = sum
            .process(&mut BlockIo::new(&mut registry), 0.0, 1.0)
            .unwrap_err();
        assert!(err.to_string().contains("overflows"));
        assert_eq!(registry.output(sum.total).value, SignalValue::default());
    }
}
