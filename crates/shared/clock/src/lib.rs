//! Tripwire Clock Infrastructure
//!
//! Provides time sources for the evaluation engine:
//!
//! - [`SystemClock`]: wall-clock time for live operation
//! - [`ManualClock`]: time that only moves when told to, for replaying
//!   recorded metric streams and for deterministic tests
//!
//! ## Usage
//!
//! ```ignore
//! use tripwire_clock::{Clock, ManualClock};
//! use chrono::Duration;
//!
//! let clock = ManualClock::new(start);
//! clock.advance(Duration::minutes(5));
//! assert_eq!(clock.now(), start + Duration::minutes(5));
//! ```

mod manual;
mod system;

pub use manual::ManualClock;
pub use system::SystemClock;

// Re-export the Clock trait for convenience
pub use tripwire_ports::Clock;
