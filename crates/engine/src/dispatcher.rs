//! Trigger Dispatcher
//!
//! Edge-triggered de-duplication per (rule, symbol):
//!
//! ```text
//!            satisfied / log event
//!   Inactive ─────────────────────► Active
//!      ▲                              │
//!      └──────────────────────────────┘
//!            unsatisfied / silent
//! ```
//!
//! The state transition runs under the DashMap entry lock for its key, so
//! two concurrent dispatches for the same pair are serialized and at most
//! one of them sees the rising edge. Logging is fire-and-forget: the event
//! goes to a bounded queue drained by [`TriggerWriter`] and to a broadcast
//! channel for live subscribers.

use chrono::Duration;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, mpsc, watch};
use tripwire_core::{ActiveTriggerState, RuleKey, Symbol, Timestamp, Transition, TriggerEvent};
use tripwire_ports::TriggerLog;

use crate::evaluator::EvalResult;

pub struct TriggerDispatcher {
    states: DashMap<(RuleKey, Symbol), ActiveTriggerState>,
    cooldown: Duration,
    writer: mpsc::Sender<TriggerEvent>,
    notifications: broadcast::Sender<TriggerEvent>,
    fired: AtomicU64,
    suppressed: AtomicU64,
    dropped: AtomicU64,
}

impl TriggerDispatcher {
    pub fn new(
        cooldown: Duration,
        writer: mpsc::Sender<TriggerEvent>,
        notification_capacity: usize,
    ) -> Self {
        let (notifications, _) = broadcast::channel(notification_capacity.max(1));
        Self {
            states: DashMap::new(),
            cooldown,
            writer,
            notifications,
            fired: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Feed one evaluation result for `rule` on `symbol` evaluated at `at`.
    /// Returns the event when this call observed the rising edge.
    pub fn dispatch(
        &self,
        rule: RuleKey,
        symbol: &str,
        result: &EvalResult,
        at: Timestamp,
    ) -> Option<TriggerEvent> {
        let transition = {
            let mut state = self
                .states
                .entry((rule, symbol.to_string()))
                .or_insert_with(|| ActiveTriggerState::new(at));

            // An evaluation older than one already applied is stale
            if at < state.last_evaluated_at {
                log::debug!("Ignoring stale evaluation of {} on {}", rule, symbol);
                return None;
            }
            state.apply(
                result.satisfied,
                result.contributing_values.clone(),
                at,
                self.cooldown,
            )
        };

        match transition {
            Transition::Activated => {
                let event =
                    TriggerEvent::new(rule, symbol, result.contributing_values.clone(), at);
                log::info!(
                    "Trigger fired: {} on {} at {} values={:?}",
                    rule,
                    symbol,
                    at,
                    event.values
                );
                self.fired.fetch_add(1, Ordering::Relaxed);
                self.emit(&event);
                Some(event)
            }
            Transition::Suppressed => {
                log::debug!("Trigger {} on {} suppressed by cooldown", rule, symbol);
                self.suppressed.fetch_add(1, Ordering::Relaxed);
                None
            }
            Transition::Deactivated => {
                log::debug!("Trigger {} on {} cleared", rule, symbol);
                None
            }
            Transition::None => None,
        }
    }

    fn emit(&self, event: &TriggerEvent) {
        if let Err(e) = self.writer.try_send(event.clone()) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            match e {
                mpsc::error::TrySendError::Full(_) => log::warn!(
                    "Trigger log queue full, dropping event {} for {}",
                    event.id,
                    event.symbol
                ),
                mpsc::error::TrySendError::Closed(_) => log::warn!(
                    "Trigger log writer stopped, dropping event {} for {}",
                    event.id,
                    event.symbol
                ),
            }
        }
        // No subscribers is fine
        let _ = self.notifications.send(event.clone());
    }

    /// Live feed of every logged trigger event
    pub fn subscribe(&self) -> broadcast::Receiver<TriggerEvent> {
        self.notifications.subscribe()
    }

    pub fn state(&self, rule: RuleKey, symbol: &str) -> Option<ActiveTriggerState> {
        self.states
            .get(&(rule, symbol.to_string()))
            .map(|s| s.value().clone())
    }

    /// Copy of every tracked state, sorted by key
    pub fn states(&self) -> Vec<((RuleKey, Symbol), ActiveTriggerState)> {
        let mut states: Vec<_> = self
            .states
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    /// Pairs currently Active
    pub fn active_count(&self) -> usize {
        self.states.iter().filter(|s| s.is_active()).count()
    }

    /// Clear tracked states. Either filter may be omitted; omitting both
    /// clears everything. Returns the number of states removed.
    pub fn reset(&self, rule: Option<RuleKey>, symbol: Option<&str>) -> usize {
        let before = self.states.len();
        self.states.retain(|(r, s), _| {
            let rule_matches = rule.is_none_or(|wanted| *r == wanted);
            let symbol_matches = symbol.is_none_or(|wanted| s == wanted);
            !(rule_matches && symbol_matches)
        });
        let removed = before.saturating_sub(self.states.len());
        if removed > 0 {
            log::info!("Reset {} trigger state(s)", removed);
        }
        removed
    }

    /// Drop state for rules that are no longer enabled
    pub fn retain_rules(&self, live: &HashSet<RuleKey>) {
        self.states.retain(|(rule, _), _| live.contains(rule));
    }

    pub fn fired_count(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }

    pub fn suppressed_count(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Drains the trigger queue into the [`TriggerLog`] with bounded retries
pub struct TriggerWriter {
    rx: mpsc::Receiver<TriggerEvent>,
    log: Arc<dyn TriggerLog>,
    max_retries: u32,
    backoff: std::time::Duration,
}

impl TriggerWriter {
    pub fn new(
        rx: mpsc::Receiver<TriggerEvent>,
        log: Arc<dyn TriggerLog>,
        max_retries: u32,
        backoff: std::time::Duration,
    ) -> Self {
        Self {
            rx,
            log,
            max_retries,
            backoff,
        }
    }

    /// Run until every sender is gone or shutdown is signalled. Events
    /// already queued at shutdown are still written.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                event = self.rx.recv() => match event {
                    Some(event) => {
                        self.write(&event).await;
                    }
                    None => break,
                },
                _ = shutdown.changed() => {
                    while let Ok(event) = self.rx.try_recv() {
                        self.write(&event).await;
                    }
                    break;
                }
            }
        }
        log::debug!("Trigger writer stopped");
    }

    /// Append one event, retrying with exponential backoff. Returns false if
    /// the event was dropped.
    pub async fn write(&self, event: &TriggerEvent) -> bool {
        let mut attempt = 0;
        loop {
            match self.log.append_trigger_event(event).await {
                Ok(()) => return true,
                Err(e) if attempt < self.max_retries => {
                    let delay = self.backoff * 2u32.saturating_pow(attempt);
                    log::warn!(
                        "Trigger log append failed (attempt {}/{}), retrying in {:?}: {}",
                        attempt + 1,
                        self.max_retries + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    log::error!(
                        "Dropping trigger event {} for {} after {} attempts: {}",
                        event.id,
                        event.symbol,
                        attempt + 1,
                        e
                    );
                    return false;
                }
            }
        }
    }
}
