pub mod connection;
pub mod document;
pub mod loader;
pub mod settings;

pub use connection::{ConnectionInfo, ConnectionSettings};
pub use document::{BlockDescriptor, CoefficientGroup, CoefficientSignal, InputEntry, OutputEntry};
pub use loader::{ConfigLoader, LoadSummary};
pub use settings::ServerSettings;
