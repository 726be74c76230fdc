use std::future::Future;

use tokio::time::{sleep, Instant};

use super::{DrainPolicy, PollPolicy};

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    Ready { value: T, attempts: u32 },
    Exhausted { attempts: u32 },
}

impl<T> PollOutcome<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Ready { value, .. } => Some(value),
            Self::Exhausted { .. } => None,
        }
    }
}

/// Call `attempt` until it yields a value or the policy runs out of attempts.
pub async fn poll_bounded<T, F, Fut>(policy: PollPolicy, mut attempt: F) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for n in 1..=policy.attempts {
        if let Some(value) = attempt().await {
            return PollOutcome::Ready { value, attempts: n };
        }
        if n < policy.attempts {
            sleep(policy.interval()).await;
        }
    }

    PollOutcome::Exhausted {
        attempts: policy.attempts,
    }
}

/// Wait while `busy` reports outstanding work, at most `policy.max_wait`.
/// Returns `false` if the cap was hit.
pub async fn wait_until_idle<F, Fut>(policy: DrainPolicy, mut busy: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + policy.max_wait();
    loop {
        if !busy().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(policy.interval()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_third_attempt() {
        let calls = Cell::new(0);
        let outcome = poll_bounded(PollPolicy::LOOKUP, || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move { (n == 3).then_some("done") }
        })
        .await;

        assert_eq!(outcome, PollOutcome::Ready { value: "done", attempts: 3 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_budget() {
        let calls = Cell::new(0u32);
        let start = Instant::now();
        let outcome: PollOutcome<()> = poll_bounded(PollPolicy::LOOKUP, || {
            calls.set(calls.get() + 1);
            async { None }
        })
        .await;

        assert_eq!(outcome, PollOutcome::Exhausted { attempts: 11 });
        assert_eq!(calls.get(), 11);
        assert!(start.elapsed() >= PollPolicy::LOOKUP.budget());
        assert!(start.elapsed() < PollPolicy::LOOKUP.budget() + std::time::Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_idle_gives_up_at_cap() {
        let policy = DrainPolicy {
            interval_ms: 100,
            max_wait_ms: 1_000,
        };
        let start = Instant::now();
        let idle = wait_until_idle(policy, || async { true }).await;

        assert!(!idle);
        assert!(start.elapsed() >= policy.max_wait());
        assert!(start.elapsed() < policy.max_wait() + policy.interval() * 2);
    }
}
