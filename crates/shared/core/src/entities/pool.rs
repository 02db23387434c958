use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::SignalId;
use crate::values::{Symbol, canonical_symbol};

/// Opaque identifier of a signal pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoolId(pub i64);

impl std::fmt::Display for PoolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a pool combines its member signals into a pool-level trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolLogic {
    /// No pool-level trigger; each member signal fires on its own
    #[default]
    #[serde(alias = "none")]
    Independent,
    /// Pool fires when every resolvable member signal is satisfied
    And,
    /// Pool fires when any member signal is satisfied
    Or,
}

fn default_enabled() -> bool {
    true
}

fn canonical_symbols<'de, D>(deserializer: D) -> Result<BTreeSet<Symbol>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Vec::<String>::deserialize(deserializer)?;
    Ok(raw
        .iter()
        .map(|s| canonical_symbol(s))
        .filter(|s| !s.is_empty())
        .collect())
}

/// A set of signals watched over a set of symbols
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalPool {
    pub id: PoolId,
    #[serde(alias = "pool_name")]
    pub name: String,
    #[serde(default)]
    pub signal_ids: BTreeSet<SignalId>,
    #[serde(default, deserialize_with = "canonical_symbols")]
    pub symbols: BTreeSet<Symbol>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub logic: PoolLogic,
}

impl SignalPool {
    /// Create an enabled pool with no members
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id: PoolId(id),
            name: name.into(),
            signal_ids: BTreeSet::new(),
            symbols: BTreeSet::new(),
            enabled: true,
            logic: PoolLogic::Independent,
        }
    }

    /// Builder: Add member signals
    pub fn with_signals(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.signal_ids.extend(ids.into_iter().map(SignalId));
        self
    }

    /// Builder: Add watched symbols (canonicalised)
    pub fn with_symbols<S: AsRef<str>>(mut self, symbols: impl IntoIterator<Item = S>) -> Self {
        self.symbols
            .extend(symbols.into_iter().map(|s| canonical_symbol(s.as_ref())));
        self
    }

    /// Builder: Set pool-level logic
    pub fn with_logic(mut self, logic: PoolLogic) -> Self {
        self.logic = logic;
        self
    }

    /// Builder: Mark as disabled
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Whether `symbol` (already canonical) is in scope
    pub fn watches(&self, symbol: &str) -> bool {
        self.symbols.contains(symbol)
    }
}
