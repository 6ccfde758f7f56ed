//! Blocking-style waits against a remote page, and the bounded retry around them.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{AutomationError, AutomationResult};

/// How often a condition is re-evaluated while waiting.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Poll `condition` until it yields a value, or fail with a timeout naming `what`.
///
/// The condition is always evaluated at least once, even with a zero timeout.
/// Errors from the condition end the wait immediately. A condition call still pending
/// at the deadline is dropped and the wait times out.
pub async fn wait_until<T, F, Fut>(
    what: &str,
    timeout: Duration,
    poll: Duration,
    mut condition: F,
) -> AutomationResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AutomationResult<Option<T>>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let checked = tokio::time::timeout(remaining, condition())
            .await
            .map_err(|_| AutomationError::timeout(what, timeout.as_secs()))?;
        if let Some(value) = checked? {
            return Ok(value);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(AutomationError::timeout(what, timeout.as_secs()));
        }
        tokio::time::sleep(poll.min(deadline - now)).await;
    }
}

/// Run `op` up to `max_tries` times, retrying only when it times out.
///
/// Retries are immediate: each attempt already spent its full timeout waiting.
/// The error returned after the last attempt records how many attempts were made.
pub async fn wait_and_retry<T, F, Fut>(what: &str, max_tries: usize, mut op: F) -> AutomationResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AutomationResult<T>>,
{
    let max_tries = max_tries.max(1);
    let attempts = AtomicUsize::new(0);
    debug!(what, max_tries, "Waiting and retrying");

    let policy = ConstantBuilder::default()
        .with_delay(Duration::ZERO)
        .with_max_times(max_tries - 1);

    let result = (|| {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(what, attempt, max_tries, "Attempt {} of {}", attempt, max_tries);
        op()
    })
    .retry(policy)
    .when(AutomationError::is_timeout)
    .notify(|err: &AutomationError, _| {
        warn!(what, error = %err, "Wait timed out, retrying");
    })
    .await;

    result.map_err(|err| match err {
        AutomationError::Timeout { what, seconds, .. } => AutomationError::Timeout {
            what,
            seconds,
            attempts: attempts.load(Ordering::SeqCst),
        },
        other => other,
    })
}

/// Like [`wait_and_retry`] around [`wait_until`], but runs `prepare` once at the start of
/// each attempt, e.g. to (re)load the page the condition looks at.
///
/// Errors from `prepare` are returned as they are and only timeouts are retried.
pub async fn prepare_and_wait<T, P, PFut, C, CFut>(
    what: &str,
    max_tries: usize,
    timeout: Duration,
    poll: Duration,
    prepare: P,
    condition: C,
) -> AutomationResult<T>
where
    P: Fn() -> PFut,
    PFut: Future<Output = AutomationResult<()>>,
    C: Fn() -> CFut,
    CFut: Future<Output = AutomationResult<Option<T>>>,
{
    let prepare = &prepare;
    let condition = &condition;
    wait_and_retry(what, max_tries, move || async move {
        prepare().await?;
        wait_until(what, timeout, poll, condition).await
    })
    .await
}
