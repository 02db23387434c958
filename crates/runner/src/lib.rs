//! Tripwire Runner
//!
//! Process wiring for the `tripwire` binary:
//!
//! - **Args**: hand-parsed command line
//! - **Record Feed**: JSON-lines upstream records into the engine's queue
//!
//! ```text
//!   stdin (JSON lines) ──► record_feed ──► TriggerEngine ──► triggers.jsonl
//!                                              ▲
//!                           definitions.json ──┘ (reloaded)
//! ```

pub mod args;
pub mod record_feed;

pub use args::{ArgsError, CliArgs, Command, HELP};
pub use record_feed::{FeedStats, parse_record, pump_records};
