use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared cancellation flag observed at every suspension point.
pub type CancelSignal = Arc<AtomicBool>;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Marker error returned when a cancellation flag was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation was cancelled")]
pub struct Cancelled;

#[must_use]
pub fn new_cancel_signal() -> CancelSignal {
    Arc::new(AtomicBool::new(false))
}

#[must_use]
pub fn is_cancelled(cancel: &CancelSignal) -> bool {
    cancel.load(Ordering::Acquire)
}

/// Awaits `future`, checking `cancel` at least every 25ms.
///
/// The future is dropped as soon as cancellation is observed.
pub async fn await_or_cancel<F>(future: F, cancel: &CancelSignal) -> Result<F::Output, Cancelled>
where
    F: Future,
{
    let mut future = Box::pin(future);

    loop {
        if is_cancelled(cancel) {
            return Err(Cancelled);
        }

        if let Ok(output) = tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut future).await {
            if is_cancelled(cancel) {
                return Err(Cancelled);
            }
            return Ok(output);
        }
    }
}
