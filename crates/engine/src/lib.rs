//! Tripwire Engine - Trigger Condition Evaluation
//!
//! Continuously evaluates user-defined trigger conditions over rolling
//! windows of per-symbol market metrics and records a trigger event each
//! time a rule goes from unsatisfied to satisfied.
//!
//! - **Feed**: normalizes upstream records into metric samples
//! - **Window**: per (symbol, metric) history and windowed lookups
//! - **Evaluator**: walks condition trees against the window state
//! - **Registry**: atomically swapped snapshot of enabled signals and pools
//! - **Dispatcher**: edge-triggered de-duplication and trigger logging
//! - **Scheduler**: periodic evaluation of every (rule, symbol) pair
//!
//! ## Architecture
//!
//! ```text
//!   upstream records            DefinitionSource
//!          │                           │ reload (poll / request)
//!          ▼                           ▼
//!   ┌──────────────┐           ┌──────────────┐
//!   │ Feed Adapter │           │   Registry   │ ArcSwap<Snapshot>
//!   └──────┬───────┘           └──────┬───────┘
//!          │ samples                  │ targets, interest
//!          ▼                          ▼
//!   ┌──────────────┐  value()  ┌──────────────┐
//!   │    Window    │◄──────────│  Scheduler   │ tick: JoinSet + Semaphore
//!   │  Aggregator  │           │  Evaluator   │
//!   └──────────────┘           └──────┬───────┘
//!                                     │ EvalResult
//!                                     ▼
//!                              ┌──────────────┐
//!                              │  Dispatcher  │ DashMap<(rule, symbol), state>
//!                              └──────┬───────┘
//!                        rising edge  │
//!                    ┌────────────────┴───────────────┐
//!                    ▼                                ▼
//!             TriggerWriter ──► TriggerLog     broadcast subscribers
//! ```

pub mod adapters;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod feed;
pub mod registry;
pub mod scheduler;
pub mod window;

pub use adapters::{DefinitionsFile, InMemoryStore, JsonFileStore};
pub use config::{ConfigError, EngineConfig};
pub use dispatcher::{TriggerDispatcher, TriggerWriter};
pub use engine::{EngineHandle, TriggerEngine};
pub use error::{EngineError, Result};
pub use evaluator::{ConditionEvaluator, EvalResult};
pub use feed::{FeedSender, MetricFeedAdapter, UpstreamRecord, ingest_channel, run_feed};
pub use registry::{EvaluationTarget, RegistrySnapshot, SignalRegistry};
pub use scheduler::{EvaluationScheduler, TickReport};
pub use window::{Interest, WindowAggregator};
