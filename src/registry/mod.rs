pub mod signals;

pub use signals::{
    Coefficient, CoefficientId, InputId, OutputId, Severity, SignalInput, SignalOutput,
    SignalRegistry,
};
