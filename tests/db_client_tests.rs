use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use calcserver::config::ConnectionInfo;
use calcserver::db::{
    DbClient, PendingRequest, RequestId, RequestKind, RequestPayload, RequestQueue, SubmitReceipt,
};
use calcserver::error::CalcError;
use calcserver::resilience::{DrainPolicy, PollPolicy};
use calcserver::telemetry::LogContext;
use tokio::time::Instant;

/// Accepts everything, delivers after `deliver_after` polls (never if 0)
#[derive(Default)]
struct ScriptedQueue {
    polls: AtomicU32,
    deliver_after: u32,
    busy_checks: AtomicU32,
}

#[async_trait]
impl RequestQueue for ScriptedQueue {
    async fn create_connection(&self, info: &ConnectionInfo) -> anyhow::Result<()> {
        if info.host == "unreachable" {
            anyhow::bail!("no route to host");
        }
        Ok(())
    }

    async fn submit(
        &self,
        _connection: &str,
        _query: &str,
        _params: Vec<String>,
        _kind: RequestKind,
        _table_tag: &str,
    ) -> SubmitReceipt {
        SubmitReceipt::accepted(RequestId(7))
    }

    async fn poll(&self, request_id: RequestId) -> PendingRequest {
        let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.deliver_after > 0 && n >= self.deliver_after {
            PendingRequest::delivered(request_id, "T", RequestPayload::Insert { success: true })
        } else {
            PendingRequest::not_found()
        }
    }

    async fn has_outstanding_work(&self) -> bool {
        self.busy_checks.fetch_add(1, Ordering::SeqCst);
        true
    }

    async fn outstanding_select_count(&self) -> usize {
        0
    }
}

#[tokio::test(start_paused = true)]
async fn test_undelivered_request_polls_exactly_attempts() {
    let queue = Arc::new(ScriptedQueue::default());
    let client = DbClient::new(queue.clone(), LogContext::new("db"));

    let started = Instant::now();
    let result = client.wait_for(RequestId(7), "T", PollPolicy::LOOKUP).await;

    match result {
        Err(CalcError::Timeout { request, attempts, .. }) => {
            assert_eq!(request, RequestId(7));
            assert_eq!(attempts, 11);
        }
        other => panic!("expected a timeout, got {:?}", other),
    }
    assert_eq!(queue.polls.load(Ordering::SeqCst), 11);
    assert!(started.elapsed() >= PollPolicy::LOOKUP.budget());
}

#[tokio::test(start_paused = true)]
async fn test_delivery_stops_polling() {
    let queue = Arc::new(ScriptedQueue {
        deliver_after: 4,
        ..Default::default()
    });
    let client = DbClient::new(queue.clone(), LogContext::new("db"));

    let payload = client
        .wait_for(RequestId(7), "T", PollPolicy::HYDRATION)
        .await
        .unwrap();
    assert_eq!(payload, RequestPayload::Insert { success: true });
    assert_eq!(queue.polls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_drain_is_capped() {
    let queue = Arc::new(ScriptedQueue::default());
    let client = DbClient::new(queue.clone(), LogContext::new("db"));

    let policy = DrainPolicy {
        interval_ms: 100,
        max_wait_ms: 1_000,
    };
    let started = Instant::now();
    assert!(!client.wait_idle(policy).await);
    assert!(started.elapsed() >= policy.max_wait());
    assert!(queue.busy_checks.load(Ordering::SeqCst) >= 10);
}

#[tokio::test]
async fn test_connection_failures() {
    let client = DbClient::new(Arc::new(ScriptedQueue::default()), LogContext::new("db"));

    let mut info = ConnectionInfo {
        id: "output".to_string(),
        database: "calc".to_string(),
        host: "unreachable".to_string(),
        user: "calc".to_string(),
        password: "calc".to_string(),
        port: 5432,
    };
    assert!(matches!(
        client.connect(&info).await,
        Err(CalcError::Connection { .. })
    ));

    info.host = "localhost".to_string();
    info.password.clear();
    assert!(matches!(
        client.connect(&info).await,
        Err(CalcError::ConnectionConfig { .. })
    ));
}
