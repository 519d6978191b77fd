//! File-backed reference store.
//!
//! Layout under the state directory:
//! - `sessions.json` — snapshot map of session records
//! - `messages/<sessionId>.jsonl` — append-only message deltas
//! - `journal.jsonl` — append-only journal (reversals append a marker line)
//!
//! Appends are single buffered `write_all` calls, which is the atomicity
//! grain: a delta is either fully on disk or absent.  Startup loads the
//! journal and budgets into memory; message files are read on demand.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fm_domain::error::{Error, Result};
use fm_domain::journal::JournalEntry;
use fm_domain::session::{BudgetState, Session};

use crate::port::{MessageDelta, SessionStore};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Journal line format
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind")]
enum JournalLine {
    #[serde(rename = "entry")]
    Entry { entry: JournalEntry },
    #[serde(rename = "reversed")]
    Reversed { id: Uuid },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct JsonlStore {
    root: PathBuf,
    sessions: RwLock<HashMap<String, Session>>,
    journal: RwLock<Vec<JournalEntry>>,
    budgets: RwLock<HashMap<String, BudgetState>>,
}

impl JsonlStore {
    /// Open or create a store rooted at `state_path`.
    pub fn open(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path.join("messages")).map_err(Error::Io)?;

        let sessions_path = state_path.join("sessions.json");
        let sessions: HashMap<String, Session> = if sessions_path.exists() {
            let raw = std::fs::read_to_string(&sessions_path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        let journal = load_journal(&state_path.join("journal.jsonl"))?;

        let budgets_path = state_path.join("budgets.json");
        let budgets: HashMap<String, BudgetState> = if budgets_path.exists() {
            let raw = std::fs::read_to_string(&budgets_path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        tracing::info!(
            sessions = sessions.len(),
            journal = journal.len(),
            path = %state_path.display(),
            "jsonl store loaded"
        );

        Ok(Self {
            root: state_path.to_path_buf(),
            sessions: RwLock::new(sessions),
            journal: RwLock::new(journal),
            budgets: RwLock::new(budgets),
        })
    }

    fn message_path(&self, session_id: &str) -> PathBuf {
        self.root.join("messages").join(format!("{session_id}.jsonl"))
    }

    fn persist_sessions(&self) -> Result<()> {
        let snapshot = serde_json::to_string_pretty(&*self.sessions.read())?;
        std::fs::write(self.root.join("sessions.json"), snapshot).map_err(Error::Io)
    }

    fn persist_budgets(&self) -> Result<()> {
        let snapshot = serde_json::to_string_pretty(&*self.budgets.read())?;
        std::fs::write(self.root.join("budgets.json"), snapshot).map_err(Error::Io)
    }

    fn append_journal_line(&self, line: &JournalLine) -> Result<()> {
        let mut buf = serde_json::to_string(line)?;
        buf.push('\n');
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join("journal.jsonl"))
            .map_err(Error::Io)?;
        file.write_all(buf.as_bytes()).map_err(Error::Io)
    }
}

fn load_journal(path: &Path) -> Result<Vec<JournalEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
    let mut entries: Vec<JournalEntry> = Vec::new();
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JournalLine>(line) {
            Ok(JournalLine::Entry { entry }) => entries.push(entry),
            Ok(JournalLine::Reversed { id }) => {
                if let Some(e) = entries.iter_mut().find(|e| e.id == id) {
                    e.reversed = true;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed journal line");
            }
        }
    }
    Ok(entries)
}

#[async_trait::async_trait]
impl SessionStore for JsonlStore {
    async fn load_session(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.read().get(session_id).cloned())
    }

    async fn save_session(&self, session: &Session) -> Result<()> {
        self.sessions
            .write()
            .insert(session.session_id.clone(), session.clone());
        self.persist_sessions()
    }

    async fn append_message(&self, session_id: &str, delta: &MessageDelta) -> Result<()> {
        let mut buf = serde_json::to_string(delta)?;
        buf.push('\n');
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.message_path(session_id))
            .map_err(Error::Io)?;
        file.write_all(buf.as_bytes()).map_err(Error::Io)
    }

    async fn load_messages(&self, session_id: &str, from_step: u32) -> Result<Vec<MessageDelta>> {
        let path = self.message_path(session_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
        let mut deltas = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MessageDelta>(line) {
                Ok(delta) if delta.step >= from_step => deltas.push(delta),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        session_id,
                        error = %e,
                        "skipping malformed message delta"
                    );
                }
            }
        }
        Ok(deltas)
    }

    async fn write_journal_entry(&self, entry: &JournalEntry) -> Result<()> {
        self.append_journal_line(&JournalLine::Entry {
            entry: entry.clone(),
        })?;
        self.journal.write().push(entry.clone());
        Ok(())
    }

    async fn load_journal_entry(&self, entry_id: &Uuid) -> Result<Option<JournalEntry>> {
        Ok(self
            .journal
            .read()
            .iter()
            .find(|e| e.id == *entry_id)
            .cloned())
    }

    async fn mark_reversed(&self, entry_id: &Uuid) -> Result<()> {
        self.append_journal_line(&JournalLine::Reversed { id: *entry_id })?;
        let mut journal = self.journal.write();
        if let Some(entry) = journal.iter_mut().find(|e| e.id == *entry_id) {
            entry.reversed = true;
        }
        Ok(())
    }

    async fn get_budget(&self, agent_id: &str) -> Result<Option<BudgetState>> {
        Ok(self.budgets.read().get(agent_id).cloned())
    }

    async fn put_budget(&self, state: &BudgetState) -> Result<()> {
        self.budgets
            .write()
            .insert(state.agent_id.clone(), state.clone());
        self.persist_budgets()
    }

    async fn enumerate_non_terminal_sessions(&self) -> Result<Vec<Session>> {
        Ok(self
            .sessions
            .read()
            .values()
            .filter(|s| !s.state.is_terminal())
            .cloned()
            .collect())
    }
}
