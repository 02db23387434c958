use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::{PoolId, SignalId};
use crate::values::{Symbol, Timestamp};

/// Unique identifier for a trigger event
pub type TriggerEventId = Uuid;

/// The unit a trigger is tracked for: a single signal or a whole pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RuleKey {
    Signal(SignalId),
    Pool(PoolId),
}

impl std::fmt::Display for RuleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleKey::Signal(id) => write!(f, "signal:{}", id),
            RuleKey::Pool(id) => write!(f, "pool:{}", id),
        }
    }
}

/// Append-only record of a rule becoming satisfied for a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub id: TriggerEventId,
    /// Set for signal-level triggers
    pub signal_id: Option<SignalId>,
    /// Set for pool-level triggers
    pub pool_id: Option<PoolId>,
    pub symbol: Symbol,
    /// Leaf values that drove the evaluation, keyed by `metric@window`
    pub values: BTreeMap<String, f64>,
    pub triggered_at: Timestamp,
}

impl TriggerEvent {
    pub fn new(
        rule: RuleKey,
        symbol: impl Into<Symbol>,
        values: BTreeMap<String, f64>,
        triggered_at: Timestamp,
    ) -> Self {
        let (signal_id, pool_id) = match rule {
            RuleKey::Signal(id) => (Some(id), None),
            RuleKey::Pool(id) => (None, Some(id)),
        };
        Self {
            id: Uuid::new_v4(),
            signal_id,
            pool_id,
            symbol: symbol.into(),
            values,
            triggered_at,
        }
    }

    /// The rule this event was recorded for
    pub fn rule(&self) -> Option<RuleKey> {
        match (self.signal_id, self.pool_id) {
            (Some(id), _) => Some(RuleKey::Signal(id)),
            (None, Some(id)) => Some(RuleKey::Pool(id)),
            (None, None) => None,
        }
    }
}

/// Edge-detection state of one (rule, symbol) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TriggerState {
    #[default]
    Inactive,
    Active,
}

/// Outcome of feeding one evaluation into the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// No state change
    None,
    /// Inactive -> Active, should be logged
    Activated,
    /// Inactive -> Active inside the cooldown of the previous trigger; not logged
    Suppressed,
    /// Active -> Inactive
    Deactivated,
}

/// Per (rule, symbol) trigger state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveTriggerState {
    pub state: TriggerState,
    /// When the state last went Inactive -> Active
    pub activated_at: Option<Timestamp>,
    /// When a trigger was last logged for this pair
    pub last_triggered_at: Option<Timestamp>,
    pub last_evaluated_at: Timestamp,
    pub last_values: BTreeMap<String, f64>,
}

impl ActiveTriggerState {
    pub fn new(at: Timestamp) -> Self {
        Self {
            state: TriggerState::Inactive,
            activated_at: None,
            last_triggered_at: None,
            last_evaluated_at: at,
            last_values: BTreeMap::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == TriggerState::Active
    }

    /// Feed one evaluation result.
    ///
    /// A rising edge is logged unless a trigger was already logged within
    /// `cooldown`; either way the pair becomes Active.
    pub fn apply(
        &mut self,
        satisfied: bool,
        values: BTreeMap<String, f64>,
        at: Timestamp,
        cooldown: Duration,
    ) -> Transition {
        self.last_evaluated_at = at;
        self.last_values = values;

        match (self.state, satisfied) {
            (TriggerState::Inactive, true) => {
                self.state = TriggerState::Active;
                self.activated_at = Some(at);
                let cooling = self
                    .last_triggered_at
                    .is_some_and(|last| at - last < cooldown);
                if cooling {
                    Transition::Suppressed
                } else {
                    self.last_triggered_at = Some(at);
                    Transition::Activated
                }
            }
            (TriggerState::Active, false) => {
                self.state = TriggerState::Inactive;
                Transition::Deactivated
            }
            _ => Transition::None,
        }
    }
}
