use tripwire_core::{Metric, TimeWindow, Timestamp};

/// Port for point-in-time windowed metric lookup
///
/// The condition evaluator only ever reads through this trait, so it can be
/// driven by the live aggregator or by a fixed table in tests.
pub trait MetricSource: Send + Sync {
    /// Windowed value of `metric` for `symbol` as of `at`.
    ///
    /// Returns None when there is not enough history to answer.
    fn value(&self, symbol: &str, metric: Metric, window: TimeWindow, at: Timestamp)
    -> Option<f64>;
}
