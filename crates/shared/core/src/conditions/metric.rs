use serde::{Deserialize, Serialize};

/// How a metric's windowed value is derived from its sample history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricClass {
    /// Latest sample at or before the evaluation time; window is ignored
    Absolute,
    /// value(t) - value(t - window)
    Delta,
}

/// Market observables a signal may reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Open interest
    Oi,
    /// Perpetual funding rate
    FundingRate,
    /// Open interest change in percent, supplied upstream as a percent
    /// reading and windowed as a delta
    OiDeltaPercent,
    /// Cumulative volume delta (taker buy notional minus taker sell notional)
    Cvd,
    /// Bid depth divided by ask depth
    DepthRatio,
    /// (bid depth - ask depth) / (bid depth + ask depth)
    OrderImbalance,
    /// Taker buy volume over total taker volume
    TakerBuyRatio,
}

impl Metric {
    pub const ALL: [Metric; 7] = [
        Metric::Oi,
        Metric::FundingRate,
        Metric::OiDeltaPercent,
        Metric::Cvd,
        Metric::DepthRatio,
        Metric::OrderImbalance,
        Metric::TakerBuyRatio,
    ];

    /// Wire name of the metric
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Oi => "oi",
            Metric::FundingRate => "funding_rate",
            Metric::OiDeltaPercent => "oi_delta_percent",
            Metric::Cvd => "cvd",
            Metric::DepthRatio => "depth_ratio",
            Metric::OrderImbalance => "order_imbalance",
            Metric::TakerBuyRatio => "taker_buy_ratio",
        }
    }

    /// Parse a wire name (case-insensitive). Returns None for unknown metrics.
    pub fn parse(raw: &str) -> Option<Self> {
        let name = raw.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|m| m.as_str() == name)
    }

    pub fn class(&self) -> MetricClass {
        match self {
            Metric::OiDeltaPercent | Metric::Cvd => MetricClass::Delta,
            Metric::Oi
            | Metric::FundingRate
            | Metric::DepthRatio
            | Metric::OrderImbalance
            | Metric::TakerBuyRatio => MetricClass::Absolute,
        }
    }

    /// Whether the window length affects the value
    pub fn is_windowed(&self) -> bool {
        self.class() != MetricClass::Absolute
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
