//! Per-agent budget enforcement.
//!
//! [`BudgetLedger`] reads and writes [`BudgetState`] through the
//! persistence port, always under a per-agent async lock so concurrent
//! sessions of one agent never race an update.  Preflight rejects a step
//! whose worst-case cost would cross the cap; recording spend emits
//! threshold notifications at 50/80/100 %.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use fm_domain::config::BudgetConfig;
use fm_domain::error::Result;
use fm_domain::session::BudgetState;
use fm_sessions::SessionStore;

const ALERT_THRESHOLDS: [u8; 3] = [50, 80, 100];

/// Result of a budget preflight check.
#[derive(Debug, Clone, PartialEq)]
pub enum BudgetVerdict {
    Ok,
    Exhausted { spent_usd: f64, cap_usd: f64 },
}

/// Fired when spend crosses an alert threshold.
pub type BudgetAlertFn = dyn Fn(&str, u8) + Send + Sync;

pub struct BudgetLedger {
    store: Arc<dyn SessionStore>,
    config: BudgetConfig,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    on_alert: Option<Box<BudgetAlertFn>>,
}

impl BudgetLedger {
    pub fn new(store: Arc<dyn SessionStore>, config: BudgetConfig) -> Self {
        Self {
            store,
            config,
            locks: Mutex::new(HashMap::new()),
            on_alert: None,
        }
    }

    /// Install a threshold-notification callback `(agent_id, percent)`.
    pub fn with_alert_fn(mut self, f: impl Fn(&str, u8) + Send + Sync + 'static) -> Self {
        self.on_alert = Some(Box::new(f));
        self
    }

    fn lock_for(&self, agent_id: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .entry(agent_id.to_owned())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    async fn load_state(&self, agent_id: &str) -> Result<BudgetState> {
        let cap = self.config.cap_for(agent_id);
        match self.store.get_budget(agent_id).await? {
            Some(mut state) => {
                // Config is authoritative for the cap; spend is persisted.
                state.cap_usd = cap;
                Ok(state)
            }
            None => Ok(BudgetState::new(agent_id, cap)),
        }
    }

    /// Check whether a step with the given worst-case cost fits the cap.
    pub async fn preflight(&self, agent_id: &str, worst_case_usd: f64) -> Result<BudgetVerdict> {
        let lock = self.lock_for(agent_id);
        let _guard = lock.lock().await;

        let state = self.load_state(agent_id).await?;
        if let Some(cap) = state.cap_usd {
            if state.spent_usd + worst_case_usd > cap {
                return Ok(BudgetVerdict::Exhausted {
                    spent_usd: state.spent_usd,
                    cap_usd: cap,
                });
            }
        }
        Ok(BudgetVerdict::Ok)
    }

    /// Record the actual cost of a completed step.  Returns the updated
    /// state.  Spend is monotonically non-decreasing.
    pub async fn record(&self, agent_id: &str, cost_usd: f64) -> Result<BudgetState> {
        let lock = self.lock_for(agent_id);
        let _guard = lock.lock().await;

        let mut state = self.load_state(agent_id).await?;
        state.spent_usd += cost_usd.max(0.0);

        if let Some(cap) = state.cap_usd {
            let pct = if cap > 0.0 {
                ((state.spent_usd / cap) * 100.0) as u8
            } else {
                100
            };
            for threshold in ALERT_THRESHOLDS {
                if pct >= threshold && state.last_threshold_pct < threshold {
                    state.last_threshold_pct = threshold;
                    tracing::warn!(
                        agent_id,
                        threshold,
                        spent_usd = state.spent_usd,
                        cap_usd = cap,
                        "budget threshold crossed"
                    );
                    if let Some(alert) = &self.on_alert {
                        alert(agent_id, threshold);
                    }
                }
            }
        }

        self.store.put_budget(&state).await?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fm_sessions::MemoryStore;
    use parking_lot::Mutex as PlMutex;

    fn ledger(cap: Option<f64>) -> BudgetLedger {
        let config = BudgetConfig {
            default_cap_usd: cap,
            ..Default::default()
        };
        BudgetLedger::new(Arc::new(MemoryStore::new()), config)
    }

    #[tokio::test]
    async fn preflight_blocks_over_cap() {
        let ledger = ledger(Some(0.01));
        // Worst case 0.02 > cap 0.01: blocked before any spend.
        match ledger.preflight("a1", 0.02).await.unwrap() {
            BudgetVerdict::Exhausted { spent_usd, cap_usd } => {
                assert_eq!(spent_usd, 0.0);
                assert_eq!(cap_usd, 0.01);
            }
            BudgetVerdict::Ok => panic!("expected exhaustion"),
        }
    }

    #[tokio::test]
    async fn uncapped_always_passes() {
        let ledger = ledger(None);
        assert_eq!(
            ledger.preflight("a1", 999.0).await.unwrap(),
            BudgetVerdict::Ok
        );
    }

    #[tokio::test]
    async fn spend_accumulates_and_blocks() {
        let ledger = ledger(Some(1.0));
        ledger.record("a1", 0.6).await.unwrap();
        assert_eq!(
            ledger.preflight("a1", 0.3).await.unwrap(),
            BudgetVerdict::Ok
        );
        ledger.record("a1", 0.3).await.unwrap();
        assert!(matches!(
            ledger.preflight("a1", 0.2).await.unwrap(),
            BudgetVerdict::Exhausted { .. }
        ));
    }

    #[tokio::test]
    async fn thresholds_fire_once_each() {
        let alerts: Arc<PlMutex<Vec<u8>>> = Arc::new(PlMutex::new(Vec::new()));
        let sink = alerts.clone();
        let ledger = ledger(Some(1.0)).with_alert_fn(move |_, pct| sink.lock().push(pct));

        ledger.record("a1", 0.55).await.unwrap(); // crosses 50
        ledger.record("a1", 0.05).await.unwrap(); // still past 50, no repeat
        ledger.record("a1", 0.25).await.unwrap(); // crosses 80
        ledger.record("a1", 0.20).await.unwrap(); // crosses 100

        assert_eq!(*alerts.lock(), vec![50, 80, 100]);
    }

    #[tokio::test]
    async fn cost_never_decreases() {
        let ledger = ledger(Some(10.0));
        ledger.record("a1", 0.5).await.unwrap();
        let state = ledger.record("a1", -3.0).await.unwrap();
        assert_eq!(state.spent_usd, 0.5);
    }

    #[tokio::test]
    async fn per_agent_override_applies() {
        let mut config = BudgetConfig {
            default_cap_usd: Some(100.0),
            ..Default::default()
        };
        config.per_agent_cap_usd.insert("tiny".into(), 0.05);
        let ledger = BudgetLedger::new(Arc::new(MemoryStore::new()), config);

        assert!(matches!(
            ledger.preflight("tiny", 0.06).await.unwrap(),
            BudgetVerdict::Exhausted { .. }
        ));
        assert_eq!(
            ledger.preflight("roomy", 0.06).await.unwrap(),
            BudgetVerdict::Ok
        );
    }
}
