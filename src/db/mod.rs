pub mod client;
pub mod coefficients;
pub mod protocol;
pub mod schema;
pub mod simulated;

pub use client::DbClient;
pub use coefficients::CoefficientHydrator;
pub use protocol::{
    PendingRequest, RequestId, RequestKind, RequestPayload, RequestQueue, RequestStatus, SelectRows,
    SubmitReceipt, SubmitStatus,
};
pub use schema::{KnownTables, SchemaChange, SchemaReconciler};
pub use simulated::SimulatedDatabase;
