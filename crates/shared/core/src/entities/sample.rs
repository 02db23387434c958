use serde::{Deserialize, Serialize};

use crate::conditions::Metric;
use crate::values::{Symbol, Timestamp, canonical_symbol};

/// One canonical metric observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub symbol: Symbol,
    pub metric: Metric,
    pub value: f64,
    pub timestamp: Timestamp,
}

impl MetricSample {
    pub fn new(symbol: &str, metric: Metric, value: f64, timestamp: Timestamp) -> Self {
        Self {
            symbol: canonical_symbol(symbol),
            metric,
            value,
            timestamp,
        }
    }
}
