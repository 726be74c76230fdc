pub mod block;
pub mod value;

pub use block::{BlockBindings, BlockIo, BuildBlock, CalcBlock, CreatedBlock};
pub use value::{SignalType, SignalValue};
