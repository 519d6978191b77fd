//! The action journal: append-only records of side-effecting tool calls,
//! with idempotent rollback.
//!
//! Rollback never deletes: it runs the supplied inverse operation,
//! appends a reversal entry, and flips the original entry's `reversed`
//! flag through the persistence port.

use std::future::Future;
use std::sync::Arc;

use uuid::Uuid;

use fm_domain::error::Result;
use fm_domain::journal::{ActionKind, JournalEntry};
use fm_sessions::SessionStore;

/// Outcome of a rollback request.
#[derive(Debug, Clone, PartialEq)]
pub enum RollbackOutcome {
    Reversed,
    /// Second rollback of the same entry is a no-op.
    AlreadyReversed,
    NotFound,
    Irreversible,
    /// The inverse operation failed; the entry stays un-reversed.
    UndoFailed { detail: String },
}

pub struct Journal {
    store: Arc<dyn SessionStore>,
}

impl Journal {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Append an entry.  `reversed` on a fresh entry is rejected unless
    /// the entry is reversible (invariant: no reversing the irreversible).
    pub async fn record(&self, mut entry: JournalEntry) -> Result<()> {
        if entry.reversed && !entry.reversible {
            tracing::warn!(entry_id = %entry.id, "journal entry marked reversed but not reversible; clearing flag");
            entry.reversed = false;
        }
        self.store.write_journal_entry(&entry).await
    }

    /// Roll back a journal entry by running `undo` on it.
    ///
    /// Idempotent: rolling back an already-reversed entry returns
    /// [`RollbackOutcome::AlreadyReversed`] without running the inverse.
    pub async fn rollback<F, Fut>(&self, entry_id: &Uuid, actor: &str, undo: F) -> Result<RollbackOutcome>
    where
        F: FnOnce(JournalEntry) -> Fut,
        Fut: Future<Output = std::result::Result<(), String>>,
    {
        let Some(entry) = self.store.load_journal_entry(entry_id).await? else {
            return Ok(RollbackOutcome::NotFound);
        };
        if !entry.reversible {
            return Ok(RollbackOutcome::Irreversible);
        }
        if entry.reversed {
            return Ok(RollbackOutcome::AlreadyReversed);
        }

        let session_id = entry.session_id.clone();
        let agent_id = entry.agent_id.clone();
        let tool_name = entry.tool_name.clone();
        let before = entry.before.clone();
        let after = entry.after.clone();

        if let Err(detail) = undo(entry).await {
            tracing::warn!(entry_id = %entry_id, detail, "rollback inverse failed");
            return Ok(RollbackOutcome::UndoFailed { detail });
        }

        self.store.mark_reversed(entry_id).await?;

        // The reversal itself is journaled, with the snapshots swapped.
        let reversal = JournalEntry {
            id: Uuid::new_v4(),
            session_id,
            agent_id,
            tool_name,
            action: ActionKind::Rollback,
            before: after,
            after: before,
            reversible: false,
            reversed: false,
            timestamp: chrono::Utc::now(),
            actor: actor.to_owned(),
        };
        self.store.write_journal_entry(&reversal).await?;

        Ok(RollbackOutcome::Reversed)
    }
}
