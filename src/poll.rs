use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Result of a bounded poll. Timing out is an expected outcome here, not an
/// error thrown from deep inside the loop, which keeps the fallback policy
/// at the call site straightforward.
#[derive(Debug)]
pub enum PollOutcome<T> {
    Completed(T),
    TimedOut,
    Failed(anyhow::Error),
}

/// Polls `check` every `interval`, at most `max_attempts` times. `check`
/// resolves to `Ok(Some(_))` when the operation is done, `Ok(None)` while it
/// is still running.
pub async fn poll_until<T, F, Fut>(
    interval: Duration,
    max_attempts: usize,
    mut check: F,
) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<Option<T>>>,
{
    for attempt in 1..=max_attempts {
        tokio::time::sleep(interval).await;
        match check().await {
            Ok(Some(value)) => {
                debug!("Poll completed on attempt {attempt}/{max_attempts}");
                return PollOutcome::Completed(value);
            }
            Ok(None) => {
                debug!("Poll attempt {attempt}/{max_attempts}: not done yet");
            }
            Err(err) => return PollOutcome::Failed(err),
        }
    }
    PollOutcome::TimedOut
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn completes_when_the_check_reports_done() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let outcome = poll_until(Duration::ZERO, 10, move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(if n >= 3 { Some("done") } else { None })
        })
        .await;
        assert!(matches!(outcome, PollOutcome::Completed("done")));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn times_out_after_the_attempt_limit() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let outcome = poll_until(Duration::ZERO, 30, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(None::<()>)
        })
        .await;
        assert!(matches!(outcome, PollOutcome::TimedOut));
        assert_eq!(calls.load(Ordering::SeqCst), 30);
    }

    #[tokio::test]
    async fn failures_short_circuit_the_loop() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let outcome = poll_until(Duration::ZERO, 30, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<Option<()>, _>(anyhow::anyhow!("provider exploded"))
        })
        .await;
        assert!(matches!(outcome, PollOutcome::Failed(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
