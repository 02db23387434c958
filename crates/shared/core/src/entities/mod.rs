mod pool;
mod sample;
mod signal;
mod trigger;

pub use pool::{PoolId, PoolLogic, SignalPool};
pub use sample::MetricSample;
pub use signal::{SignalDefinition, SignalId};
pub use trigger::{
    ActiveTriggerState, RuleKey, Transition, TriggerEvent, TriggerEventId, TriggerState,
};
