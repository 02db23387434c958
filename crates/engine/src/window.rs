//! Window Aggregator
//!
//! Keeps a time-ordered sample history per (symbol, metric) and answers
//! point-in-time windowed lookups:
//!
//! ```text
//! observe(sample) ──► DashMap<(symbol, metric), SeriesHistory>
//!                              │  (entry lock per key, never global)
//! value(s, m, w, t) ──► at_or_before(t) [- at_or_before(t - w)]
//! ```
//!
//! History is trimmed against the earlier of the newest sample and the
//! clock, so evaluation running behind the feed (an evaluation lag, or
//! upstream timestamps ahead of local time) still finds its window base.
//!
//! Only (symbol, metric) pairs referenced by an enabled signal are tracked.
//! The set of referenced pairs, with the longest window each one needs, is
//! pushed in by the engine after every registry reload.

use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tripwire_core::{Metric, MetricClass, MetricSample, Symbol, TimeWindow, Timestamp};
use tripwire_ports::{Clock, MetricSource};

/// Referenced (symbol, metric) pairs and the longest window each needs
pub type Interest = HashMap<Symbol, HashMap<Metric, TimeWindow>>;

/// Sorted sample history for one (symbol, metric)
#[derive(Debug, Clone, Default)]
struct SeriesHistory {
    samples: VecDeque<(Timestamp, f64)>,
    /// Set once the sample cap has cut into this series
    capped: bool,
}

impl SeriesHistory {
    /// Insert keeping timestamp order. In-order samples are O(1); a sample
    /// with an already-seen timestamp replaces the stored value.
    fn insert(&mut self, timestamp: Timestamp, value: f64) {
        match self.samples.back_mut() {
            None => self.samples.push_back((timestamp, value)),
            Some(last) if timestamp > last.0 => self.samples.push_back((timestamp, value)),
            Some(last) if timestamp == last.0 => last.1 = value,
            Some(_) => {
                let idx = self.samples.partition_point(|(t, _)| *t < timestamp);
                match self.samples.get_mut(idx) {
                    Some(existing) if existing.0 == timestamp => existing.1 = value,
                    _ => self.samples.insert(idx, (timestamp, value)),
                }
            }
        }
    }

    /// Value of the latest sample at or before `at`
    fn at_or_before(&self, at: Timestamp) -> Option<f64> {
        let idx = self.samples.partition_point(|(t, _)| *t <= at);
        if idx == 0 {
            None
        } else {
            self.samples.get(idx - 1).map(|(_, v)| *v)
        }
    }

    /// Drop samples older than `cutoff`, keeping one anchor at or before it
    /// so a lookup at exactly `latest - window` still resolves.
    fn evict_before(&mut self, cutoff: Timestamp) {
        while self.samples.len() >= 2 && self.samples[1].0 <= cutoff {
            self.samples.pop_front();
        }
    }

    /// Drop the oldest samples beyond `cap`, returning how many went
    fn truncate_front(&mut self, cap: usize) -> usize {
        let excess = self.samples.len().saturating_sub(cap);
        self.samples.drain(..excess);
        excess
    }

    fn latest(&self) -> Option<Timestamp> {
        self.samples.back().map(|(t, _)| *t)
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Rolling windowed view over all referenced metric series
pub struct WindowAggregator {
    series: DashMap<(Symbol, Metric), SeriesHistory>,
    interest: ArcSwap<Interest>,
    clock: Arc<dyn Clock>,
    max_samples_per_series: usize,
    observed: AtomicU64,
    ignored: AtomicU64,
    truncated: AtomicU64,
}

impl WindowAggregator {
    /// `clock` must be the clock evaluation runs on
    pub fn new(clock: Arc<dyn Clock>, max_samples_per_series: usize) -> Self {
        Self {
            series: DashMap::new(),
            interest: ArcSwap::from_pointee(Interest::new()),
            clock,
            max_samples_per_series: max_samples_per_series.max(2),
            observed: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
            truncated: AtomicU64::new(0),
        }
    }

    /// Replace the referenced set. Series no longer referenced are dropped.
    pub fn set_interest(&self, interest: Interest) {
        self.series.retain(|(symbol, metric), _| {
            interest
                .get(symbol)
                .is_some_and(|metrics| metrics.contains_key(metric))
        });
        self.interest.store(Arc::new(interest));
    }

    /// Longest window referenced for (symbol, metric), if referenced at all
    pub fn retention(&self, symbol: &str, metric: Metric) -> Option<TimeWindow> {
        self.interest
            .load()
            .get(symbol)
            .and_then(|metrics| metrics.get(&metric))
            .copied()
    }

    /// Ingest one sample. Returns false when no enabled signal references the
    /// sample's (symbol, metric) and it was discarded.
    ///
    /// A series denser than `max_samples_per_series` per window loses its
    /// oldest samples; delta lookups whose base fell off report unavailable
    /// rather than resolving against a later sample.
    pub fn observe(&self, sample: &MetricSample) -> bool {
        let Some(window) = self.retention(&sample.symbol, sample.metric) else {
            self.ignored.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        let mut history = self
            .series
            .entry((sample.symbol.clone(), sample.metric))
            .or_default();
        history.insert(sample.timestamp, sample.value);

        if let Some(latest) = history.latest() {
            let horizon = latest.min(self.clock.now());
            history.evict_before(horizon - window.duration());
        }
        let dropped = history.truncate_front(self.max_samples_per_series);
        if dropped > 0 {
            self.truncated.fetch_add(dropped as u64, Ordering::Relaxed);
            if !history.capped {
                history.capped = true;
                log::warn!(
                    "{} {} exceeds {} samples per window, dropping oldest; long windows may be unavailable",
                    sample.symbol,
                    sample.metric,
                    self.max_samples_per_series
                );
            }
        }

        self.observed.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Windowed value of `metric` for `symbol` as of `at`
    pub fn value(
        &self,
        symbol: &str,
        metric: Metric,
        window: TimeWindow,
        at: Timestamp,
    ) -> Option<f64> {
        let history = self.series.get(&(symbol.to_string(), metric))?;
        let current = history.at_or_before(at)?;

        match metric.class() {
            MetricClass::Absolute => Some(current),
            MetricClass::Delta => {
                let base = history.at_or_before(at - window.duration())?;
                Some(current - base)
            }
        }
    }

    /// Number of tracked (symbol, metric) series
    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    /// Number of samples retained for one series
    pub fn sample_count(&self, symbol: &str, metric: Metric) -> usize {
        self.series
            .get(&(symbol.to_string(), metric))
            .map(|h| h.len())
            .unwrap_or(0)
    }

    pub fn observed_count(&self) -> u64 {
        self.observed.load(Ordering::Relaxed)
    }

    pub fn ignored_count(&self) -> u64 {
        self.ignored.load(Ordering::Relaxed)
    }

    /// Samples dropped by the per-series cap
    pub fn truncated_count(&self) -> u64 {
        self.truncated.load(Ordering::Relaxed)
    }
}

impl MetricSource for WindowAggregator {
    fn value(
        &self,
        symbol: &str,
        metric: Metric,
        window: TimeWindow,
        at: Timestamp,
    ) -> Option<f64> {
        WindowAggregator::value(self, symbol, metric, window, at)
    }
}
