use std::sync::Arc;

use tracing::{debug, error, warn};

use super::protocol::{RequestId, RequestKind, RequestPayload, RequestQueue, SelectRows};
use crate::config::ConnectionInfo;
use crate::error::{CalcError, Result};
use crate::resilience::{poll_bounded, wait_until_idle, DrainPolicy, PollOutcome, PollPolicy};
use crate::telemetry::LogContext;

/// Core-side handle on the database subsystem.
///
/// Every wait goes through a poll or drain policy; nothing blocks unbounded.
#[derive(Clone)]
pub struct DbClient {
    queue: Arc<dyn RequestQueue>,
    log: LogContext,
}

impl DbClient {
    pub fn new(queue: Arc<dyn RequestQueue>, log: LogContext) -> Self {
        Self { queue, log }
    }

    pub fn queue(&self) -> &Arc<dyn RequestQueue> {
        &self.queue
    }

    /// Validate `info` and open the connection. Failure is critical.
    pub async fn connect(&self, info: &ConnectionInfo) -> Result<()> {
        if let Err(e) = info.validate() {
            self.log
                .in_scope(|| error!(critical = true, error = %e, "Invalid connection settings"));
            return Err(e);
        }

        self.queue.create_connection(info).await.map_err(|e| {
            self.log.in_scope(|| {
                error!(critical = true, connection = %info.id, error = %e, "Connection refused")
            });
            CalcError::Connection {
                connection: info.id.clone(),
                reason: format!("{:#}", e),
            }
        })?;

        self.log.in_scope(|| {
            debug!(connection = %info.id, host = %info.host, port = info.port, "Connection created")
        });
        Ok(())
    }

    pub async fn submit(
        &self,
        connection: &str,
        query: &str,
        params: Vec<String>,
        kind: RequestKind,
        table: &str,
    ) -> Result<RequestId> {
        let receipt = self.queue.submit(connection, query, params, kind, table).await;
        if !receipt.is_accepted() {
            self.log.in_scope(|| {
                error!(critical = true, table, status = ?receipt.status, query, "Request not accepted")
            });
            return Err(CalcError::Submission {
                table: table.to_string(),
                status: receipt.status,
            });
        }

        self.log
            .in_scope(|| debug!(request = %receipt.request_id, table, "Request accepted"));
        Ok(receipt.request_id)
    }

    /// One look at `request_id`
    pub async fn poll_once(&self, request_id: RequestId) -> Option<RequestPayload> {
        self.queue.poll(request_id).await.into_payload()
    }

    /// Poll `request_id` under `policy`; running out of attempts is a timeout.
    pub async fn wait_for(&self, request_id: RequestId, table: &str, policy: PollPolicy) -> Result<RequestPayload> {
        match poll_bounded(policy, || self.poll_once(request_id)).await {
            PollOutcome::Ready { value, attempts } => {
                self.log
                    .in_scope(|| debug!(request = %request_id, table, attempts, "Result delivered"));
                Ok(value)
            }
            PollOutcome::Exhausted { attempts } => Err(CalcError::Timeout {
                request: request_id,
                table: table.to_string(),
                attempts,
            }),
        }
    }

    /// Submit a SELECT and wait for its rows
    pub async fn select(
        &self,
        connection: &str,
        query: &str,
        table: &str,
        settle: DrainPolicy,
        policy: PollPolicy,
    ) -> Result<SelectRows> {
        let id = self
            .submit(connection, query, Vec::new(), RequestKind::Select, table)
            .await?;
        self.wait_idle(settle).await;

        match self.wait_for(id, table, policy).await {
            Ok(RequestPayload::Rows(rows)) => Ok(rows),
            Ok(RequestPayload::Insert { .. }) => {
                self.log
                    .in_scope(|| warn!(request = %id, table, "SELECT answered without rows"));
                Ok(SelectRows::new())
            }
            Err(e) => {
                self.log
                    .in_scope(|| error!(critical = true, error = %e, query, "SELECT result missing"));
                Err(e)
            }
        }
    }

    /// Wait for the subsystem to report no outstanding work.
    /// Returns `false` if `policy.max_wait` elapsed first.
    pub async fn wait_idle(&self, policy: DrainPolicy) -> bool {
        wait_until_idle(policy, || self.queue.has_outstanding_work()).await
    }

    pub async fn outstanding_selects(&self) -> usize {
        self.queue.outstanding_select_count().await
    }
}
