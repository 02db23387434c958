use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::conditions::TriggerCondition;
use crate::values::Timestamp;

/// Opaque identifier of a signal definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalId(pub i64);

impl std::fmt::Display for SignalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn default_enabled() -> bool {
    true
}

/// A named trigger rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDefinition {
    pub id: SignalId,
    #[serde(alias = "signal_name")]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub trigger_condition: TriggerCondition,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "Utc::now")]
    pub created_at: Timestamp,
    #[serde(default = "Utc::now")]
    pub updated_at: Timestamp,
}

impl SignalDefinition {
    /// Create an enabled signal
    pub fn new(id: i64, name: impl Into<String>, trigger_condition: TriggerCondition) -> Self {
        let now = Utc::now();
        Self {
            id: SignalId(id),
            name: name.into(),
            description: None,
            trigger_condition,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder: Set description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Builder: Mark as disabled
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}
