//! Per-session cancellation token registry.
//!
//! Each live session gets one [`CancelToken`]; `cancel()` fires it,
//! aborting in-flight LLM streams, tool handlers, and backoff sleeps at
//! their next suspension point.

use std::collections::HashMap;

use parking_lot::Mutex;

use fm_domain::cancel::CancelToken;

/// Tracks the active cancellation token per session id.
#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a fresh token for a session.
    pub fn register(&self, session_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens
            .lock()
            .insert(session_id.to_owned(), token.clone());
        token
    }

    /// Fire a session's token.  Returns `true` if one was registered.
    pub fn cancel(&self, session_id: &str) -> bool {
        if let Some(token) = self.tokens.lock().get(session_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Remove the token (called when the loop exits).
    pub fn remove(&self, session_id: &str) {
        self.tokens.lock().remove(session_id);
    }

    /// Whether a session currently has a live loop.
    pub fn is_live(&self, session_id: &str) -> bool {
        self.tokens.lock().contains_key(session_id)
    }
}
