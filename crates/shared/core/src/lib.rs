//! Tripwire Core Domain
//!
//! Pure domain types for the Tripwire trigger evaluation engine.
//! This crate contains no async, no I/O, and is 100% unit testable.

pub mod conditions;
pub mod entities;
pub mod values;

// Re-export commonly used types at crate root
pub use conditions::{
    EQUALITY_TOLERANCE, LeafCondition, Logic, MalformedRule, Metric, MetricClass, Operator,
    TimeWindow, TriggerCondition,
};
pub use entities::{
    ActiveTriggerState, MetricSample, PoolId, PoolLogic, RuleKey, SignalDefinition, SignalId,
    SignalPool, Transition, TriggerEvent, TriggerEventId, TriggerState,
};
pub use values::{Symbol, Timestamp, canonical_symbol};
