//! Submit/poll protocol of the asynchronous database subsystem.
//!
//! The subsystem runs concurrently with the calculation core. Requests are
//! submitted under a connection name and a table tag; results are fetched
//! later by request id and are delivered exactly once.

use std::fmt;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::ConnectionInfo;

/// Identifier assigned by the subsystem to an accepted request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub i64);

impl RequestId {
    /// Returned by `poll` while a result is not available
    pub const NOT_READY: Self = Self(-1);

    pub fn is_ready(&self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    Select,
    Insert,
}

/// Answer to a submission; anything but `InProcessing` means not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmitStatus {
    InProcessing,
    QueueFull,
    UnknownConnection,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub request_id: RequestId,
    pub status: SubmitStatus,
}

impl SubmitReceipt {
    pub fn accepted(id: RequestId) -> Self {
        Self {
            request_id: id,
            status: SubmitStatus::InProcessing,
        }
    }

    pub fn refused(status: SubmitStatus) -> Self {
        Self {
            request_id: RequestId::NOT_READY,
            status,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == SubmitStatus::InProcessing
    }
}

/// SELECT result: first-column value -> column name -> cell text
pub type SelectRows = IndexMap<String, IndexMap<String, String>>;

#[derive(Debug, Clone, PartialEq)]
pub enum RequestPayload {
    Rows(SelectRows),
    Insert { success: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Delivered,
    NotFound,
}

/// One poll answer
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub request_id: RequestId,
    pub table_tag: String,
    pub status: RequestStatus,
    pub payload: Option<RequestPayload>,
}

impl PendingRequest {
    pub fn delivered(request_id: RequestId, table_tag: impl Into<String>, payload: RequestPayload) -> Self {
        Self {
            request_id,
            table_tag: table_tag.into(),
            status: RequestStatus::Delivered,
            payload: Some(payload),
        }
    }

    pub fn not_found() -> Self {
        Self {
            request_id: RequestId::NOT_READY,
            table_tag: String::new(),
            status: RequestStatus::NotFound,
            payload: None,
        }
    }

    pub fn into_payload(self) -> Option<RequestPayload> {
        match self.status {
            RequestStatus::Delivered => self.payload,
            RequestStatus::NotFound => None,
        }
    }
}

/// The asynchronous database subsystem as seen by the core
#[async_trait]
pub trait RequestQueue: Send + Sync {
    async fn create_connection(&self, info: &ConnectionInfo) -> anyhow::Result<()>;

    async fn submit(
        &self,
        connection: &str,
        query: &str,
        params: Vec<String>,
        kind: RequestKind,
        table_tag: &str,
    ) -> SubmitReceipt;

    /// Take the result of `request_id` if it has been delivered
    async fn poll(&self, request_id: RequestId) -> PendingRequest;

    async fn has_outstanding_work(&self) -> bool;

    async fn outstanding_select_count(&self) -> usize;
}
