//! Tripwire Ports
//!
//! Port definitions (traits) for the Tripwire evaluation engine.
//! These define the boundaries between evaluation logic and the
//! collaborators around it: time, persistence and metric lookup.

mod clock;
mod error;
mod metrics;
mod persistence;

pub use clock::Clock;
pub use error::{PortError, PortResult};
pub use metrics::MetricSource;
pub use persistence::{DefinitionSource, TriggerLog};
