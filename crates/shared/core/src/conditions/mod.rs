//! Trigger condition language
//!
//! A signal's rule is a tree of [`TriggerCondition`] nodes. Leaves compare a
//! windowed metric value against a threshold; composites combine children
//! with AND / OR. Nodes that cannot be understood are kept as
//! [`TriggerCondition::Malformed`] so one bad rule never poisons a reload.

mod condition;
mod metric;
mod operator;
mod window;

pub use condition::{LeafCondition, Logic, MalformedRule, TriggerCondition};
pub use metric::{Metric, MetricClass};
pub use operator::{EQUALITY_TOLERANCE, Operator};
pub use window::TimeWindow;
