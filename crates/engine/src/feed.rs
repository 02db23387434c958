//! Metric Feed Adapter
//!
//! Turns raw upstream market records into canonical [`MetricSample`]s and
//! feeds them to the [`WindowAggregator`].
//!
//! ```text
//! producer ──push──► FeedSender ══ bounded broadcast (drop oldest) ══► run_feed
//!                                                                       │
//!                                       MetricFeedAdapter::normalize ◄──┘
//!                                                                       │
//!                                            WindowAggregator::observe ◄┘
//! ```
//!
//! Producers never block: when the consumer falls behind, the oldest
//! records are overwritten and the consumer logs how many it lost.

use chrono::DateTime;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, watch};
use tripwire_core::{Metric, MetricSample, Symbol, TimeWindow, Timestamp, canonical_symbol};

use crate::error::{EngineError, Result};
use crate::window::WindowAggregator;

/// Raw record as delivered by the market-data layer.
///
/// Timestamps are unix milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpstreamRecord {
    /// Already-derived metric value
    Sample {
        symbol: String,
        metric: String,
        value: f64,
        timestamp_ms: i64,
    },
    /// Perpetual asset context snapshot
    AssetContext {
        symbol: String,
        #[serde(default, alias = "openInterest")]
        open_interest: Option<f64>,
        #[serde(default, alias = "funding")]
        funding_rate: Option<f64>,
        timestamp_ms: i64,
    },
    /// Taker flow aggregated over one bucket
    Trades {
        symbol: String,
        taker_buy_volume: f64,
        taker_sell_volume: f64,
        taker_buy_notional: f64,
        taker_sell_notional: f64,
        timestamp_ms: i64,
    },
    /// Top-of-book depth snapshot
    OrderBook {
        symbol: String,
        bid_depth: f64,
        ask_depth: f64,
        timestamp_ms: i64,
    },
}

impl UpstreamRecord {
    pub fn symbol(&self) -> &str {
        match self {
            UpstreamRecord::Sample { symbol, .. }
            | UpstreamRecord::AssetContext { symbol, .. }
            | UpstreamRecord::Trades { symbol, .. }
            | UpstreamRecord::OrderBook { symbol, .. } => symbol,
        }
    }

    pub fn timestamp_ms(&self) -> i64 {
        match self {
            UpstreamRecord::Sample { timestamp_ms, .. }
            | UpstreamRecord::AssetContext { timestamp_ms, .. }
            | UpstreamRecord::Trades { timestamp_ms, .. }
            | UpstreamRecord::OrderBook { timestamp_ms, .. } => *timestamp_ms,
        }
    }
}

/// Per-symbol CVD: the running total at each trade bucket.
///
/// A late bucket is slotted in at its own timestamp and every later total
/// is restated, so the stored series stays a true cumulative sum. Buckets
/// older than the longest window behind the newest one are folded into
/// `settled` and can no longer be amended.
#[derive(Debug, Default)]
struct CvdLedger {
    buckets: BTreeMap<Timestamp, f64>,
    settled: f64,
    settled_through: Option<Timestamp>,
}

impl CvdLedger {
    /// Add `flow` at `at`. Returns every (timestamp, running total) that
    /// changed, oldest first.
    fn record(&mut self, at: Timestamp, flow: f64) -> Result<Vec<(Timestamp, f64)>> {
        if self.settled_through.is_some_and(|settled| at <= settled) {
            return Err(EngineError::MalformedRecord(format!(
                "trade bucket at {} is older than the {} reorder horizon",
                at,
                TimeWindow::FourHours
            )));
        }

        let before = self
            .buckets
            .range(..at)
            .next_back()
            .map(|(_, total)| *total)
            .unwrap_or(self.settled);
        let total = self.buckets.entry(at).or_insert(before);
        *total += flow;

        let mut changed = vec![(at, *total)];
        for (ts, later) in self.buckets.range_mut(at..).skip(1) {
            *later += flow;
            changed.push((*ts, *later));
        }

        self.settle();
        Ok(changed)
    }

    fn settle(&mut self) {
        let Some((&newest, _)) = self.buckets.last_key_value() else {
            return;
        };
        let horizon = newest - TimeWindow::FourHours.duration();
        while let Some(entry) = self.buckets.first_entry() {
            if *entry.key() >= horizon {
                break;
            }
            let (ts, total) = entry.remove_entry();
            self.settled = total;
            self.settled_through = Some(ts);
        }
    }

    fn total(&self) -> f64 {
        self.buckets
            .last_key_value()
            .map(|(_, total)| *total)
            .unwrap_or(self.settled)
    }
}

/// Normalizes upstream records into metric samples.
///
/// CVD is accumulated per symbol from the taker notional of each trade
/// bucket. A bucket arriving out of order restates the CVD samples after
/// it, which the aggregator applies as same-timestamp replacements.
#[derive(Default)]
pub struct MetricFeedAdapter {
    cvd: DashMap<Symbol, CvdLedger>,
    normalized: AtomicU64,
    rejected: AtomicU64,
}

impl MetricFeedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn normalize(&self, record: &UpstreamRecord) -> Result<Vec<MetricSample>> {
        let samples = self.normalize_inner(record);
        match &samples {
            Ok(s) => {
                self.normalized.fetch_add(s.len() as u64, Ordering::Relaxed);
            }
            Err(e) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                log::debug!("Rejected upstream record for '{}': {}", record.symbol(), e);
            }
        }
        samples
    }

    fn normalize_inner(&self, record: &UpstreamRecord) -> Result<Vec<MetricSample>> {
        let symbol = canonical_symbol(record.symbol());
        if symbol.is_empty() {
            return Err(EngineError::MalformedRecord("empty symbol".into()));
        }
        let at = to_timestamp(record.timestamp_ms())?;
        let sample = |metric: Metric, value: f64| MetricSample::new(&symbol, metric, value, at);

        let samples = match record {
            UpstreamRecord::Sample { metric, value, .. } => {
                let metric = Metric::parse(metric)
                    .ok_or_else(|| EngineError::UnknownMetric(metric.clone()))?;
                vec![sample(metric, finite(metric.as_str(), *value)?)]
            }
            UpstreamRecord::AssetContext {
                open_interest,
                funding_rate,
                ..
            } => {
                let mut out = Vec::with_capacity(2);
                if let Some(oi) = open_interest {
                    out.push(sample(Metric::Oi, finite("open_interest", *oi)?));
                }
                if let Some(rate) = funding_rate {
                    out.push(sample(Metric::FundingRate, finite("funding_rate", *rate)?));
                }
                out
            }
            UpstreamRecord::Trades {
                taker_buy_volume,
                taker_sell_volume,
                taker_buy_notional,
                taker_sell_notional,
                ..
            } => {
                let buy_volume = non_negative("taker_buy_volume", *taker_buy_volume)?;
                let sell_volume = non_negative("taker_sell_volume", *taker_sell_volume)?;
                let buy_notional = finite("taker_buy_notional", *taker_buy_notional)?;
                let sell_notional = finite("taker_sell_notional", *taker_sell_notional)?;

                let restated = self
                    .cvd
                    .entry(symbol.clone())
                    .or_default()
                    .record(at, buy_notional - sell_notional)?;

                let mut out: Vec<MetricSample> = restated
                    .into_iter()
                    .map(|(ts, total)| MetricSample::new(&symbol, Metric::Cvd, total, ts))
                    .collect();

                let total_volume = buy_volume + sell_volume;
                if total_volume > 0.0 {
                    out.push(sample(Metric::TakerBuyRatio, buy_volume / total_volume));
                }
                out
            }
            UpstreamRecord::OrderBook {
                bid_depth,
                ask_depth,
                ..
            } => {
                let bid = non_negative("bid_depth", *bid_depth)?;
                let ask = non_negative("ask_depth", *ask_depth)?;

                let mut out = Vec::with_capacity(2);
                if ask > 0.0 {
                    out.push(sample(Metric::DepthRatio, bid / ask));
                }
                if bid + ask > 0.0 {
                    out.push(sample(Metric::OrderImbalance, (bid - ask) / (bid + ask)));
                }
                out
            }
        };

        Ok(samples)
    }

    /// Running CVD total for `symbol`
    pub fn cvd(&self, symbol: &str) -> Option<f64> {
        self.cvd.get(&canonical_symbol(symbol)).map(|ledger| ledger.total())
    }

    pub fn normalized_count(&self) -> u64 {
        self.normalized.load(Ordering::Relaxed)
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

fn to_timestamp(ms: i64) -> Result<Timestamp> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| EngineError::MalformedRecord(format!("timestamp {} out of range", ms)))
}

fn finite(field: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EngineError::MalformedRecord(format!(
            "{} is not finite: {}",
            field, value
        )))
    }
}

fn non_negative(field: &str, value: f64) -> Result<f64> {
    let value = finite(field, value)?;
    if value < 0.0 {
        return Err(EngineError::MalformedRecord(format!(
            "{} is negative: {}",
            field, value
        )));
    }
    Ok(value)
}

/// Producer half of the ingestion queue
#[derive(Clone)]
pub struct FeedSender {
    tx: broadcast::Sender<UpstreamRecord>,
}

impl FeedSender {
    /// Enqueue a record. Never blocks; overwrites the oldest record when full.
    pub fn push(&self, record: UpstreamRecord) {
        if self.tx.send(record).is_err() {
            log::debug!("Ingestion consumer not running, record discarded");
        }
    }
}

/// Bounded ingestion queue with drop-oldest overflow
pub fn ingest_channel(capacity: usize) -> (FeedSender, broadcast::Receiver<UpstreamRecord>) {
    let (tx, rx) = broadcast::channel(capacity.max(1));
    (FeedSender { tx }, rx)
}

/// Drain the ingestion queue into the aggregator until shutdown or until
/// every producer is gone.
pub async fn run_feed(
    adapter: Arc<MetricFeedAdapter>,
    aggregator: Arc<WindowAggregator>,
    mut rx: broadcast::Receiver<UpstreamRecord>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut lost: u64 = 0;
    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(record) => {
                    if let Ok(samples) = adapter.normalize(&record) {
                        for sample in &samples {
                            aggregator.observe(sample);
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    lost += skipped;
                    log::warn!(
                        "Ingestion queue overflowed, dropped {} oldest record(s) ({} total)",
                        skipped,
                        lost
                    );
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.changed() => break,
        }
    }
    log::debug!("Metric feed stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_000_000;

    #[test]
    fn test_direct_sample() {
        let adapter = MetricFeedAdapter::new();
        let samples = adapter
            .normalize(&UpstreamRecord::Sample {
                symbol: " btc ".into(),
                metric: "FUNDING_RATE".into(),
                value: 0.0001,
                timestamp_ms: T0,
            })
            .unwrap();

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].symbol, "BTC");
        assert_eq!(samples[0].metric, Metric::FundingRate);
        assert_eq!(samples[0].timestamp.timestamp_millis(), T0);
    }

    #[test]
    fn test_asset_context_emits_oi_and_funding() {
        let adapter = MetricFeedAdapter::new();
        let record: UpstreamRecord = serde_json::from_str(
            r#"{"type":"asset_context","symbol":"ETH","openInterest":1500.5,"funding":0.0002,"timestamp_ms":1700000000000}"#,
        )
        .unwrap();

        let metrics: Vec<Metric> = adapter
            .normalize(&record)
            .unwrap()
            .iter()
            .map(|s| s.metric)
            .collect();
        assert_eq!(metrics, vec![Metric::Oi, Metric::FundingRate]);
    }

    #[test]
    fn test_trades_accumulate_cvd() {
        let adapter = MetricFeedAdapter::new();
        let trades = |buy: f64, sell: f64, ts: i64| UpstreamRecord::Trades {
            symbol: "BTC".into(),
            taker_buy_volume: buy,
            taker_sell_volume: sell,
            taker_buy_notional: buy * 100.0,
            taker_sell_notional: sell * 100.0,
            timestamp_ms: ts,
        };

        adapter.normalize(&trades(3.0, 1.0, T0)).unwrap();
        let samples = adapter.normalize(&trades(1.0, 3.0, T0 + 60_000)).unwrap();

        assert_eq!(samples[0].metric, Metric::Cvd);
        assert_eq!(samples[0].value, 0.0);
        assert_eq!(samples[1].metric, Metric::TakerBuyRatio);
        assert_eq!(samples[1].value, 0.25);
        assert_eq!(adapter.cvd("btc"), Some(0.0));
    }

    fn flow(net: f64, offset_secs: i64) -> UpstreamRecord {
        UpstreamRecord::Trades {
            symbol: "BTC".into(),
            taker_buy_volume: 1.0,
            taker_sell_volume: 1.0,
            taker_buy_notional: net,
            taker_sell_notional: 0.0,
            timestamp_ms: T0 + offset_secs * 1_000,
        }
    }

    fn cvd_points(samples: &[MetricSample]) -> Vec<(i64, f64)> {
        samples
            .iter()
            .filter(|s| s.metric == Metric::Cvd)
            .map(|s| ((s.timestamp.timestamp_millis() - T0) / 1_000, s.value))
            .collect()
    }

    #[test]
    fn test_late_trade_bucket_restates_later_totals() {
        let adapter = MetricFeedAdapter::new();
        assert_eq!(cvd_points(&adapter.normalize(&flow(100.0, 0)).unwrap()), vec![(0, 100.0)]);
        assert_eq!(cvd_points(&adapter.normalize(&flow(100.0, 120)).unwrap()), vec![(120, 200.0)]);

        let late = adapter.normalize(&flow(100.0, 60)).unwrap();
        assert_eq!(cvd_points(&late), vec![(60, 200.0), (120, 300.0)]);
        assert_eq!(adapter.cvd("BTC"), Some(300.0));
    }

    #[test]
    fn test_late_trade_bucket_keeps_window_deltas_right() {
        use tripwire_clock::ManualClock;

        let adapter = MetricFeedAdapter::new();
        // Clock still at t=0, so nothing the lookups below need is evicted
        let aggregator = WindowAggregator::new(ManualClock::at_unix(T0 / 1_000), 1_000);
        let mut interest = crate::window::Interest::new();
        interest
            .entry("BTC".to_string())
            .or_default()
            .insert(Metric::Cvd, TimeWindow::OneMinute);
        aggregator.set_interest(interest);

        for record in [flow(100.0, 0), flow(100.0, 120), flow(100.0, 60)] {
            for sample in adapter.normalize(&record).unwrap() {
                aggregator.observe(&sample);
            }
        }

        let at = |secs: i64| DateTime::from_timestamp_millis(T0 + secs * 1_000).unwrap();
        assert_eq!(
            aggregator.value("BTC", Metric::Cvd, TimeWindow::OneMinute, at(120)),
            Some(100.0)
        );
        assert_eq!(
            aggregator.value("BTC", Metric::Cvd, TimeWindow::OneMinute, at(60)),
            Some(100.0)
        );
    }

    #[test]
    fn test_trade_bucket_past_reorder_horizon_is_rejected() {
        let adapter = MetricFeedAdapter::new();
        adapter.normalize(&flow(10.0, 0)).unwrap();
        adapter.normalize(&flow(10.0, 60)).unwrap();
        // Pushes t=0 and t=60 out of the four-hour horizon
        adapter.normalize(&flow(10.0, 5 * 3_600)).unwrap();

        assert!(matches!(
            adapter.normalize(&flow(10.0, 30)),
            Err(EngineError::MalformedRecord(_))
        ));
        assert_eq!(adapter.cvd("BTC"), Some(30.0));

        // Newer than the settled buckets but older than the newest: accepted
        let late = adapter.normalize(&flow(5.0, 4 * 3_600)).unwrap();
        assert_eq!(cvd_points(&late), vec![(14_400, 25.0), (18_000, 35.0)]);
    }

    #[test]
    fn test_order_book_ratios() {
        let adapter = MetricFeedAdapter::new();
        let samples = adapter
            .normalize(&UpstreamRecord::OrderBook {
                symbol: "SOL".into(),
                bid_depth: 300.0,
                ask_depth: 100.0,
                timestamp_ms: T0,
            })
            .unwrap();

        assert_eq!(samples[0].metric, Metric::DepthRatio);
        assert_eq!(samples[0].value, 3.0);
        assert_eq!(samples[1].metric, Metric::OrderImbalance);
        assert_eq!(samples[1].value, 0.5);

        // Empty ask side: no ratio, imbalance still defined
        let samples = adapter
            .normalize(&UpstreamRecord::OrderBook {
                symbol: "SOL".into(),
                bid_depth: 10.0,
                ask_depth: 0.0,
                timestamp_ms: T0,
            })
            .unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, 1.0);
    }

    #[test]
    fn test_rejects_bad_records() {
        let adapter = MetricFeedAdapter::new();

        let unknown = adapter.normalize(&UpstreamRecord::Sample {
            symbol: "BTC".into(),
            metric: "hype".into(),
            value: 1.0,
            timestamp_ms: T0,
        });
        assert!(matches!(unknown, Err(EngineError::UnknownMetric(_))));

        let nan = adapter.normalize(&UpstreamRecord::Sample {
            symbol: "BTC".into(),
            metric: "cvd".into(),
            value: f64::NAN,
            timestamp_ms: T0,
        });
        assert!(matches!(nan, Err(EngineError::MalformedRecord(_))));

        let blank = adapter.normalize(&UpstreamRecord::OrderBook {
            symbol: "  ".into(),
            bid_depth: 1.0,
            ask_depth: 1.0,
            timestamp_ms: T0,
        });
        assert!(blank.is_err());

        assert_eq!(adapter.rejected_count(), 3);
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest() {
        let (sender, mut rx) = ingest_channel(2);
        for i in 0..5 {
            sender.push(UpstreamRecord::Sample {
                symbol: "BTC".into(),
                metric: "oi".into(),
                value: i as f64,
                timestamp_ms: T0 + i,
            });
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        let newest: Vec<i64> = vec![
            rx.recv().await.unwrap().timestamp_ms(),
            rx.recv().await.unwrap().timestamp_ms(),
        ];
        assert_eq!(newest, vec![T0 + 3, T0 + 4]);
    }
}
