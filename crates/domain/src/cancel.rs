//! Per-session cancellation tokens.
//!
//! `cancel()` signals every holder of a clone; the flag is observable both
//! synchronously (`is_cancelled`) and at await points (`cancelled().await`),
//! so in-flight LLM streams, tool handlers, and retry sleeps all abort
//! promptly via `tokio::select!`.

use tokio_util::sync::CancellationToken;

/// A cancellation token checked and awaited by the runtime loop.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: CancellationToken,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: CancellationToken::new(),
        }
    }

    /// Signal cancellation to every clone.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Resolve when cancellation is requested.
    pub async fn cancelled(&self) {
        self.inner.cancelled().await;
    }
}
