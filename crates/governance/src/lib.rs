//! Governance for agent sessions: budgets, rate limits, circuit breakers,
//! guardrails, the action journal with rollback, and the approval broker.
//!
//! Everything here is consulted at step boundaries or around tool calls;
//! nothing in this crate talks to an LLM or executes a tool itself.

pub mod approvals;
pub mod breaker;
pub mod budget;
pub mod guardrails;
pub mod journal;
pub mod rate_limit;

pub use approvals::{ApprovalBroker, ApprovalDecision, ApprovalInfo};
pub use breaker::{BreakerMap, CircuitOpen};
pub use budget::{BudgetLedger, BudgetVerdict};
pub use guardrails::{GuardrailEngine, StepSnapshot, Triggered};
pub use journal::{Journal, RollbackOutcome};
pub use rate_limit::{RateLimited, RateLimiter};
