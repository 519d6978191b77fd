//! The Session Supervisor: lifecycle of agent sessions.
//!
//! Owns the set of live sessions, routes external commands to them
//! (pause / cancel / subscribe), recovers persisted sessions at startup,
//! and sweeps for stale heartbeats.  A panicking loop is contained here:
//! the session is marked `failed` and subscribers get a terminal frame.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use fm_domain::error::{Error, Result};
use fm_domain::message::Message;
use fm_domain::session::{Session, SessionConfig, SessionState};
use fm_domain::stream::{StopReason, StreamEvent, Usage};
use fm_sessions::{MessageDelta, SessionStore};

use crate::cancel::CancelMap;
use crate::events::EventStream;
use crate::session_lock::SessionLockMap;
use crate::step::{drive_session, Runtime};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Supervisor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Supervisor {
    rt: Arc<Runtime>,
    locks: Arc<SessionLockMap>,
    cancels: Arc<CancelMap>,
    pauses: Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>,
}

impl Supervisor {
    pub fn new(rt: Arc<Runtime>) -> Self {
        Self {
            rt,
            locks: Arc::new(SessionLockMap::new()),
            cancels: Arc::new(CancelMap::new()),
            pauses: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create a new session and enqueue its loop.  Returns immediately
    /// with the session id; progress arrives via `subscribe`.
    pub async fn spawn(
        &self,
        agent_id: &str,
        org_id: &str,
        system_prompt: &str,
        initial_input: &str,
        config: SessionConfig,
    ) -> Result<String> {
        let session = Session::new(agent_id, org_id, config);
        let session_id = session.session_id.clone();

        self.rt.store.save_session(&session).await?;
        if !system_prompt.is_empty() {
            self.rt
                .store
                .append_message(
                    &session_id,
                    &MessageDelta {
                        step: 0,
                        message: Message::system(system_prompt),
                    },
                )
                .await?;
        }
        self.rt
            .store
            .append_message(
                &session_id,
                &MessageDelta {
                    step: 0,
                    message: Message::user(initial_input),
                },
            )
            .await?;

        tracing::info!(session_id = %session_id, agent_id, "session spawned");
        self.enqueue(session_id.clone());
        Ok(session_id)
    }

    /// Resume a paused session, or re-enqueue a non-terminal session
    /// found persisted without a live loop (post-restart).
    pub async fn resume(&self, session_id: &str) -> Result<()> {
        let Some(mut session) = self.rt.store.load_session(session_id).await? else {
            return Err(Error::Persistence(format!("session '{session_id}' not found")));
        };

        match session.state {
            SessionState::Paused => {
                session.state = SessionState::Running;
                session.status_detail = None;
                session.heartbeat();
                self.rt.store.save_session(&session).await?;
            }
            state if state.is_terminal() => {
                return Err(Error::Other(format!(
                    "session '{session_id}' is terminal ({state:?})"
                )));
            }
            _ => {
                if self.cancels.is_live(session_id) {
                    return Err(Error::Other(format!(
                        "session '{session_id}' already has a live loop"
                    )));
                }
                session.heartbeat();
                self.rt.store.save_session(&session).await?;
            }
        }

        tracing::info!(session_id, "session resuming");
        self.enqueue(session_id.to_owned());
        Ok(())
    }

    /// Request cooperative suspension.  The loop observes the flag at its
    /// next suspension point and transitions to `paused`.
    pub fn pause(&self, session_id: &str) {
        if let Some(flag) = self.pauses.lock().get(session_id) {
            flag.store(true, Ordering::Release);
            tracing::info!(session_id, "pause requested");
        }
    }

    /// Hard-cancel: abort any in-flight LLM stream or tool call via the
    /// session's cancellation signal.  A session without a live loop
    /// (paused, pending) is cancelled directly in the store.
    pub async fn cancel(&self, session_id: &str, reason: &str) -> Result<()> {
        if self.cancels.cancel(session_id) {
            tracing::info!(session_id, reason, "cancellation signalled");
            return Ok(());
        }

        // No live loop: persist the terminal state here.
        let Some(mut session) = self.rt.store.load_session(session_id).await? else {
            return Err(Error::Persistence(format!("session '{session_id}' not found")));
        };
        if session.state.is_terminal() {
            return Ok(());
        }
        session.finish(SessionState::Cancelled, Some(reason.to_owned()));
        self.rt.store.save_session(&session).await?;
        self.emit_terminal(&session, StopReason::Cancelled, Some(reason.to_owned()));
        Ok(())
    }

    /// Subscribe to a session's event stream.
    pub fn subscribe(&self, session_id: &str) -> EventStream {
        self.rt.hub.subscribe(session_id)
    }

    /// Read-only snapshot of one session.
    pub async fn status(&self, session_id: &str) -> Result<Option<Session>> {
        self.rt.store.load_session(session_id).await
    }

    /// Snapshots of all live (non-terminal) sessions.
    pub async fn list_live(&self) -> Result<Vec<Session>> {
        self.rt.store.enumerate_non_terminal_sessions().await
    }

    // ── Startup recovery + reaping ─────────────────────────────────

    /// Enumerate persisted non-terminal sessions and adopt the stale
    /// ones: resume or fail per configuration.  Returns how many were
    /// adopted.
    pub async fn recover(&self) -> Result<usize> {
        let stale_after =
            chrono::Duration::seconds(self.rt.config.sessions.stale_threshold_secs as i64);
        let now = chrono::Utc::now();
        let mut adopted = 0;

        for session in self.rt.store.enumerate_non_terminal_sessions().await? {
            if self.cancels.is_live(&session.session_id) {
                continue;
            }
            let stale = now - session.last_heartbeat > stale_after;
            // Paused sessions stay paused; pending ones were never
            // started and are adopted regardless of heartbeat age.
            let adopt = match session.state {
                SessionState::Pending => true,
                SessionState::Paused => false,
                _ => stale,
            };
            if !adopt {
                continue;
            }

            adopted += 1;
            match self.rt.config.sessions.on_stale {
                fm_domain::config::StaleAction::Resume => {
                    tracing::info!(
                        session_id = %session.session_id,
                        state = ?session.state,
                        "adopting stale session"
                    );
                    self.enqueue(session.session_id.clone());
                }
                fm_domain::config::StaleAction::Fail => {
                    let mut session = session;
                    session.finish(SessionState::Failed, Some("stale heartbeat".into()));
                    self.rt.store.save_session(&session).await?;
                    self.emit_terminal(&session, StopReason::Error, Some("stale heartbeat".into()));
                }
            }
        }
        Ok(adopted)
    }

    /// Start the periodic stale-session sweep.  Runs until aborted.
    pub fn start_reaper(self: Arc<Self>) -> JoinHandle<()> {
        let supervisor = self;
        let interval = Duration::from_secs(supervisor.rt.config.sessions.sweep_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = supervisor.recover().await {
                    tracing::warn!(error = %e, "stale-session sweep failed");
                }
                supervisor.locks.prune_idle();
            }
        })
    }

    // ── Internal ───────────────────────────────────────────────────

    /// Enqueue the Reasoning Loop for a session: take the per-session
    /// run lock, drive, and contain any failure or panic.
    fn enqueue(&self, session_id: String) {
        let rt = self.rt.clone();
        let locks = self.locks.clone();
        let cancels = self.cancels.clone();
        let pauses = self.pauses.clone();

        let cancel = cancels.register(&session_id);
        let pause = Arc::new(AtomicBool::new(false));
        pauses.lock().insert(session_id.clone(), pause.clone());

        tokio::spawn(async move {
            // One loop per session, ever.
            let _permit = locks.acquire(&session_id).await;

            let inner = tokio::spawn(drive_session(
                rt.clone(),
                session_id.clone(),
                cancel,
                pause,
            ));

            let failure: Option<String> = match inner.await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(join_err) => Some(format!("loop panicked: {join_err}")),
            };

            if let Some(detail) = failure {
                tracing::error!(session_id = %session_id, detail = %detail, "reasoning loop failed");
                mark_failed(&rt, &session_id, &detail).await;
            }

            cancels.remove(&session_id);
            pauses.lock().remove(&session_id);
        });
    }

    fn emit_terminal(&self, session: &Session, stop_reason: StopReason, error: Option<String>) {
        self.rt.hub.publish(
            &session.session_id,
            &StreamEvent::StepEnd {
                stop_reason,
                usage: Usage {
                    input_tokens: session.input_tokens.min(u32::MAX as u64) as u32,
                    output_tokens: session.output_tokens.min(u32::MAX as u64) as u32,
                },
                error,
            },
        );
        self.rt.hub.close(&session.session_id);
    }
}

/// Containment path: persist `failed` and close out subscribers.
async fn mark_failed(rt: &Arc<Runtime>, session_id: &str, detail: &str) {
    match rt.store.load_session(session_id).await {
        Ok(Some(mut session)) if !session.state.is_terminal() => {
            session.finish(SessionState::Failed, Some(detail.to_owned()));
            if let Err(e) = rt.store.save_session(&session).await {
                tracing::error!(session_id, error = %e, "failed to persist failure state");
            }
            rt.hub.publish(
                session_id,
                &StreamEvent::StepEnd {
                    stop_reason: StopReason::Error,
                    usage: Usage {
                        input_tokens: session.input_tokens.min(u32::MAX as u64) as u32,
                        output_tokens: session.output_tokens.min(u32::MAX as u64) as u32,
                    },
                    error: Some(detail.to_owned()),
                },
            );
            rt.hub.close(session_id);
        }
        Ok(_) => {}
        Err(e) => {
            tracing::error!(session_id, error = %e, "failed to load session for failure marking");
        }
    }
}
