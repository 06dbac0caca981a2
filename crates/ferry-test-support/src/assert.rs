//! Async waiting helpers with bounded timeouts.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use ferry_events::{EventEnvelope, EventStream};
use ferry_transfer_core::{OneShot, OneShotEvent};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

/// Upper bound for any single wait in tests.
pub const WAIT_LIMIT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Poll `condition` until it holds.
///
/// # Errors
///
/// Returns an error when the condition is still false after [`WAIT_LIMIT`].
pub async fn eventually(mut condition: impl FnMut() -> bool) -> Result<()> {
    timeout(WAIT_LIMIT, async {
        while !condition() {
            sleep(POLL_INTERVAL).await;
        }
    })
    .await
    .context("condition not met in time")
}

/// Await `future` within [`WAIT_LIMIT`].
///
/// # Errors
///
/// Returns an error when the future does not complete in time.
pub async fn within<F: Future>(future: F) -> Result<F::Output> {
    timeout(WAIT_LIMIT, future)
        .await
        .context("operation did not complete in time")
}

/// Next bus event matching `predicate`, skipping the rest.
///
/// # Errors
///
/// Returns an error when the stream closes or nothing matches in time.
pub async fn next_matching(
    stream: &mut EventStream,
    mut predicate: impl FnMut(&EventEnvelope) -> bool,
) -> Result<EventEnvelope> {
    timeout(WAIT_LIMIT, async {
        while let Some(envelope) = stream.next().await {
            if predicate(&envelope) {
                return Some(envelope);
            }
        }
        None
    })
    .await
    .context("no matching event in time")?
    .context("event stream closed")
}

/// Wait for a pending one-off event and return it without consuming it.
///
/// # Errors
///
/// Returns an error when no event becomes pending in time.
pub async fn pending_one_shot(
    receiver: &mut watch::Receiver<OneShot<OneShotEvent>>,
) -> Result<OneShotEvent> {
    let value = timeout(WAIT_LIMIT, receiver.wait_for(OneShot::is_pending))
        .await
        .context("no one-off event in time")?
        .context("one-off channel closed")?;
    value
        .pending()
        .cloned()
        .context("one-off event consumed while waiting")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn eventually_sees_late_updates() -> Result<()> {
        let flag = Arc::new(AtomicBool::new(false));
        let setter = Arc::clone(&flag);
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            setter.store(true, Ordering::SeqCst);
        });
        eventually(|| flag.load(Ordering::SeqCst)).await
    }

    #[tokio::test]
    async fn pending_one_shot_returns_value() -> Result<()> {
        let (tx, mut rx) = watch::channel(OneShot::Consumed);
        tx.send_replace(OneShot::Pending(OneShotEvent::PromptSaveDestination {
            path: "/x".into(),
        }));
        let event = pending_one_shot(&mut rx).await?;
        assert!(matches!(event, OneShotEvent::PromptSaveDestination { .. }));
        Ok(())
    }
}
