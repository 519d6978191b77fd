//! Approval broker — gates high-risk tool calls behind human review.
//!
//! A submitted request suspends the calling session until an approver
//! resolves it.  Policies: `any` (first response decides), `all` (every
//! approver must approve), `chain` (approvers decide in order).  Deadline
//! passage either auto-rejects or escalates once to the configured
//! `escalate_to` set with a fresh deadline.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::oneshot;
use uuid::Uuid;

use fm_domain::config::{ApprovalPolicy, ApprovalsConfig, TimeoutAction};
use fm_domain::message::ToolCall;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The decision delivered back to the suspended session.
#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalDecision {
    Approved,
    Rejected { reason: Option<String> },
}

/// Serializable snapshot of a pending request (dashboards, notifications).
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalInfo {
    pub request_id: Uuid,
    pub session_id: String,
    pub tool_call: ToolCall,
    pub approvers: Vec<String>,
    pub policy: ApprovalPolicy,
    pub created_at: DateTime<Utc>,
}

struct Pending {
    info: ApprovalInfo,
    /// Approvers who have approved so far (`all` policy).
    approved_by: Vec<String>,
    /// Position in the chain (`chain` policy).
    chain_pos: usize,
    escalated: bool,
    respond: Option<oneshot::Sender<ApprovalDecision>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Broker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub type ApprovalNotifyFn = dyn Fn(&ApprovalInfo) + Send + Sync;

pub struct ApprovalBroker {
    config: ApprovalsConfig,
    pending: RwLock<HashMap<Uuid, Pending>>,
    notify: Option<Box<ApprovalNotifyFn>>,
}

impl ApprovalBroker {
    pub fn new(config: ApprovalsConfig) -> Self {
        Self {
            config,
            pending: RwLock::new(HashMap::new()),
            notify: None,
        }
    }

    /// Install a callback fired whenever a request needs approver
    /// attention (submission and escalation).
    pub fn with_notify_fn(mut self, f: impl Fn(&ApprovalInfo) + Send + Sync + 'static) -> Self {
        self.notify = Some(Box::new(f));
        self
    }

    /// Submit a tool call for approval.  Returns the request id and the
    /// receiver the caller awaits (through [`Self::await_decision`]).
    pub fn submit(
        &self,
        session_id: &str,
        tool_call: ToolCall,
    ) -> (Uuid, oneshot::Receiver<ApprovalDecision>) {
        let (tx, rx) = oneshot::channel();
        let info = ApprovalInfo {
            request_id: Uuid::new_v4(),
            session_id: session_id.to_owned(),
            tool_call,
            approvers: self.config.approvers.clone(),
            policy: self.config.policy,
            created_at: Utc::now(),
        };
        let request_id = info.request_id;

        if let Some(notify) = &self.notify {
            notify(&info);
        }
        tracing::info!(
            %request_id,
            session_id,
            tool = %info.tool_call.tool_name,
            "approval requested"
        );

        self.pending.write().insert(
            request_id,
            Pending {
                info,
                approved_by: Vec::new(),
                chain_pos: 0,
                escalated: false,
                respond: Some(tx),
            },
        );
        (request_id, rx)
    }

    /// Record one approver's response.  Returns `false` when the request
    /// is unknown, already decided, or the approver is not (yet) eligible.
    pub fn resolve(
        &self,
        request_id: &Uuid,
        approver: &str,
        approve: bool,
        comment: Option<String>,
    ) -> bool {
        let mut pending = self.pending.write();
        let Some(entry) = pending.get_mut(request_id) else {
            return false;
        };

        let decision = match entry.info.policy {
            ApprovalPolicy::Any => {
                if !entry.info.approvers.iter().any(|a| a == approver) {
                    return false;
                }
                Some(if approve {
                    ApprovalDecision::Approved
                } else {
                    ApprovalDecision::Rejected { reason: comment }
                })
            }
            ApprovalPolicy::All => {
                if !entry.info.approvers.iter().any(|a| a == approver) {
                    return false;
                }
                if !approve {
                    Some(ApprovalDecision::Rejected { reason: comment })
                } else {
                    if !entry.approved_by.iter().any(|a| a == approver) {
                        entry.approved_by.push(approver.to_owned());
                    }
                    if entry.approved_by.len() == entry.info.approvers.len() {
                        Some(ApprovalDecision::Approved)
                    } else {
                        None
                    }
                }
            }
            ApprovalPolicy::Chain => {
                // Only the approver at the current chain position may act.
                let is_current = entry
                    .info
                    .approvers
                    .get(entry.chain_pos)
                    .is_some_and(|current| current == approver);
                if !is_current {
                    return false;
                }
                if !approve {
                    Some(ApprovalDecision::Rejected { reason: comment })
                } else {
                    entry.chain_pos += 1;
                    if entry.chain_pos == entry.info.approvers.len() {
                        Some(ApprovalDecision::Approved)
                    } else {
                        None
                    }
                }
            }
        };

        if let Some(decision) = decision {
            if let Some(mut entry) = pending.remove(request_id) {
                if let Some(tx) = entry.respond.take() {
                    let _ = tx.send(decision);
                }
            }
        }
        true
    }

    /// Pending requests, for dashboard introspection.
    pub fn list_pending(&self) -> Vec<ApprovalInfo> {
        self.pending
            .read()
            .values()
            .map(|p| p.info.clone())
            .collect()
    }

    /// Await the decision with the configured deadline.  Timeout applies
    /// the configured action exactly once: escalate (re-target approvers,
    /// fresh deadline) or auto-reject.
    pub async fn await_decision(
        &self,
        request_id: &Uuid,
        mut rx: oneshot::Receiver<ApprovalDecision>,
    ) -> ApprovalDecision {
        let deadline = Duration::from_secs(self.config.deadline_secs);

        loop {
            tokio::select! {
                decision = &mut rx => {
                    return decision.unwrap_or(ApprovalDecision::Rejected {
                        reason: Some("approval channel closed".into()),
                    });
                }
                _ = tokio::time::sleep(deadline) => {
                    if self.escalate_or_expire(request_id) {
                        continue; // escalated: wait one more deadline
                    }
                    return ApprovalDecision::Rejected {
                        reason: Some("approval deadline expired".into()),
                    };
                }
            }
        }
    }

    /// Returns `true` when the request was escalated and waiting should
    /// continue; `false` when it was expired and removed.
    fn escalate_or_expire(&self, request_id: &Uuid) -> bool {
        let mut pending = self.pending.write();
        let Some(entry) = pending.get_mut(request_id) else {
            // Decided concurrently; the receiver will observe it.
            return true;
        };

        let escalate = self.config.on_timeout == TimeoutAction::Escalate
            && !entry.escalated
            && !self.config.escalate_to.is_empty();

        if escalate {
            entry.escalated = true;
            entry.info.approvers = self.config.escalate_to.clone();
            entry.approved_by.clear();
            entry.chain_pos = 0;
            tracing::warn!(
                %request_id,
                approvers = ?entry.info.approvers,
                "approval deadline passed; escalating"
            );
            if let Some(notify) = &self.notify {
                notify(&entry.info);
            }
            true
        } else {
            tracing::warn!(%request_id, "approval deadline passed; auto-rejecting");
            pending.remove(request_id);
            false
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn call() -> ToolCall {
        ToolCall {
            call_id: "c1".into(),
            tool_name: "file_write".into(),
            arguments: serde_json::json!({"path": "x"}),
        }
    }

    fn broker(policy: ApprovalPolicy, approvers: &[&str]) -> ApprovalBroker {
        ApprovalBroker::new(ApprovalsConfig {
            approvers: approvers.iter().map(|s| s.to_string()).collect(),
            policy,
            deadline_secs: 300,
            on_timeout: TimeoutAction::Reject,
            escalate_to: Vec::new(),
        })
    }

    #[tokio::test]
    async fn any_policy_first_response_wins() {
        let b = broker(ApprovalPolicy::Any, &["alice", "bob"]);
        let (id, rx) = b.submit("s1", call());

        assert!(b.resolve(&id, "bob", true, None));
        assert_eq!(rx.await.unwrap(), ApprovalDecision::Approved);
        assert!(b.list_pending().is_empty());
        // Late responses are rejected.
        assert!(!b.resolve(&id, "alice", false, None));
    }

    #[tokio::test]
    async fn all_policy_requires_everyone() {
        let b = broker(ApprovalPolicy::All, &["alice", "bob"]);
        let (id, mut rx) = b.submit("s1", call());

        assert!(b.resolve(&id, "alice", true, None));
        assert!(rx.try_recv().is_err()); // still pending
        assert!(b.resolve(&id, "bob", true, None));
        assert_eq!(rx.await.unwrap(), ApprovalDecision::Approved);
    }

    #[tokio::test]
    async fn all_policy_single_rejection_rejects() {
        let b = broker(ApprovalPolicy::All, &["alice", "bob"]);
        let (id, rx) = b.submit("s1", call());

        assert!(b.resolve(&id, "alice", true, None));
        assert!(b.resolve(&id, "bob", false, Some("too risky".into())));
        match rx.await.unwrap() {
            ApprovalDecision::Rejected { reason } => {
                assert_eq!(reason.as_deref(), Some("too risky"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn chain_policy_advances_in_order() {
        let b = broker(ApprovalPolicy::Chain, &["alice", "bob"]);
        let (id, mut rx) = b.submit("s1", call());

        // Bob is not first in the chain.
        assert!(!b.resolve(&id, "bob", true, None));
        assert!(b.resolve(&id, "alice", true, None));
        assert!(rx.try_recv().is_err());
        assert!(b.resolve(&id, "bob", true, None));
        assert_eq!(rx.await.unwrap(), ApprovalDecision::Approved);
    }

    #[tokio::test]
    async fn unknown_approver_ignored() {
        let b = broker(ApprovalPolicy::Any, &["alice"]);
        let (id, mut rx) = b.submit("s1", call());
        assert!(!b.resolve(&id, "mallory", true, None));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_auto_rejects_once() {
        let b = broker(ApprovalPolicy::Any, &["alice"]);
        let (id, rx) = b.submit("s1", call());

        let decision = b.await_decision(&id, rx).await;
        assert!(matches!(decision, ApprovalDecision::Rejected { .. }));
        assert!(b.list_pending().is_empty());
        // Responses after expiry find nothing.
        assert!(!b.resolve(&id, "alice", true, None));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_escalates_then_approves() {
        let b = ApprovalBroker::new(ApprovalsConfig {
            approvers: vec!["alice".into()],
            policy: ApprovalPolicy::Any,
            deadline_secs: 60,
            on_timeout: TimeoutAction::Escalate,
            escalate_to: vec!["ops".into()],
        });
        let (id, rx) = b.submit("s1", call());

        let broker_ref = &b;
        let waiter = async move { broker_ref.await_decision(&id, rx).await };
        let resolver = async {
            // Past the first deadline: request escalates to "ops".
            tokio::time::sleep(Duration::from_secs(70)).await;
            // Original approver no longer eligible; ops is.
            assert!(!broker_ref.resolve(&id, "alice", true, None));
            assert!(broker_ref.resolve(&id, "ops", true, None));
        };

        let (decision, ()) = tokio::join!(waiter, resolver);
        assert_eq!(decision, ApprovalDecision::Approved);
    }

    #[tokio::test(start_paused = true)]
    async fn escalation_happens_only_once() {
        let b = ApprovalBroker::new(ApprovalsConfig {
            approvers: vec!["alice".into()],
            policy: ApprovalPolicy::Any,
            deadline_secs: 60,
            on_timeout: TimeoutAction::Escalate,
            escalate_to: vec!["ops".into()],
        });
        let (id, rx) = b.submit("s1", call());

        // Two deadlines pass with no response: escalate once, then reject.
        let decision = b.await_decision(&id, rx).await;
        assert!(matches!(decision, ApprovalDecision::Rejected { .. }));
    }

    #[tokio::test]
    async fn notify_fires_on_submit() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;
        let count = Arc::new(AtomicU32::new(0));
        let count2 = count.clone();
        let b = broker(ApprovalPolicy::Any, &["alice"])
            .with_notify_fn(move |_| {
                count2.fetch_add(1, Ordering::SeqCst);
            });
        let (_id, _rx) = b.submit("s1", call());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
