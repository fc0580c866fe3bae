use std::future::Future;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// A delayed callback that can be cancelled until its delay elapses.
///
/// Once the delay has elapsed the callback runs to completion; cancelling
/// afterwards has no effect on it.
#[derive(Debug)]
pub struct TimerHandle {
    token: CancellationToken,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Starts `callback` on `runtime` after `delay` unless cancelled first.
pub fn arm<F>(runtime: &Handle, delay: Duration, callback: F) -> TimerHandle
where
    F: Future<Output = ()> + Send + 'static,
{
    let token = CancellationToken::new();
    let child = token.clone();
    runtime.spawn(async move {
        tokio::select! {
            _ = child.cancelled() => {
                trace!("timer cancelled before firing");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }
        callback.await;
    });
    TimerHandle { token }
}

/// Cancels `previous` (if any) and arms a fresh timer in its place.
pub fn rearm<F>(slot: &mut Option<TimerHandle>, runtime: &Handle, delay: Duration, callback: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Some(previous) = slot.take() {
        previous.cancel();
    }
    *slot = Some(arm(runtime, delay, callback));
}
