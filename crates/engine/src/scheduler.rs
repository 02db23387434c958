//! Evaluation Scheduler
//!
//! On every tick, loads the current registry snapshot once, fixes the
//! evaluation instant from the clock, and evaluates each (rule, symbol)
//! target as its own task. A semaphore bounds concurrency; each pair gets a
//! timeout so one slow evaluation cannot hold up the tick.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tripwire_core::Timestamp;
use tripwire_ports::Clock;

use crate::dispatcher::TriggerDispatcher;
use crate::evaluator::ConditionEvaluator;
use crate::registry::{EvaluationTarget, SignalRegistry};

/// Per-tick counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub targets: usize,
    pub evaluated: usize,
    pub satisfied: usize,
    pub fired: usize,
    pub timed_out: usize,
    pub failed: usize,
}

enum PairOutcome {
    Evaluated { satisfied: bool, fired: bool },
    TimedOut,
    Failed,
}

pub struct EvaluationScheduler {
    registry: Arc<SignalRegistry>,
    evaluator: Arc<ConditionEvaluator>,
    dispatcher: Arc<TriggerDispatcher>,
    clock: Arc<dyn Clock>,
    permits: Arc<Semaphore>,
    pair_timeout: Duration,
}

impl EvaluationScheduler {
    pub fn new(
        registry: Arc<SignalRegistry>,
        evaluator: Arc<ConditionEvaluator>,
        dispatcher: Arc<TriggerDispatcher>,
        clock: Arc<dyn Clock>,
        max_concurrency: usize,
        pair_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            evaluator,
            dispatcher,
            clock,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            pair_timeout,
        }
    }

    /// Run one tick at the clock's current time
    pub async fn tick(&self) -> TickReport {
        let at = self.clock.now();
        self.tick_at(at).await
    }

    /// Run one tick with an explicit evaluation instant
    pub async fn tick_at(&self, at: Timestamp) -> TickReport {
        let snapshot = self.registry.snapshot();
        let mut report = TickReport {
            targets: snapshot.targets().len(),
            ..TickReport::default()
        };

        let mut tasks = JoinSet::new();
        for target in snapshot.targets() {
            let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                break;
            };
            let target = target.clone();
            let evaluator = Arc::clone(&self.evaluator);
            let dispatcher = Arc::clone(&self.dispatcher);
            let pair_timeout = self.pair_timeout;

            tasks.spawn(async move {
                let _permit = permit;
                evaluate_pair(target, evaluator, dispatcher, at, pair_timeout).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(PairOutcome::Evaluated { satisfied, fired }) => {
                    report.evaluated += 1;
                    report.satisfied += usize::from(satisfied);
                    report.fired += usize::from(fired);
                }
                Ok(PairOutcome::TimedOut) => report.timed_out += 1,
                Ok(PairOutcome::Failed) => report.failed += 1,
                Err(e) => {
                    log::error!("Evaluation task failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        log::debug!(
            "Tick at {} (snapshot v{}): {:?}",
            at,
            snapshot.version(),
            report
        );
        report
    }

    /// Tick on a fixed interval until shutdown. Late ticks are skipped, not
    /// bunched up.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        log::info!("Evaluation scheduler started (tick every {:?})", interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    if report.timed_out > 0 || report.failed > 0 {
                        log::warn!(
                            "Tick finished with {} timed out and {} failed evaluation(s)",
                            report.timed_out,
                            report.failed
                        );
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        log::info!("Evaluation scheduler stopped");
    }
}

async fn evaluate_pair(
    target: EvaluationTarget,
    evaluator: Arc<ConditionEvaluator>,
    dispatcher: Arc<TriggerDispatcher>,
    at: Timestamp,
    pair_timeout: Duration,
) -> PairOutcome {
    let rule = target.rule;
    let symbol = target.symbol.clone();

    let work = tokio::task::spawn_blocking(move || {
        evaluator.evaluate(&target.condition, &target.symbol, at)
    });

    match tokio::time::timeout(pair_timeout, work).await {
        Ok(Ok(result)) => {
            for diagnostic in &result.diagnostics {
                log::debug!("{} on {}: {}", rule, symbol, diagnostic);
            }
            let fired = dispatcher.dispatch(rule, &symbol, &result, at).is_some();
            PairOutcome::Evaluated {
                satisfied: result.satisfied,
                fired,
            }
        }
        Ok(Err(e)) => {
            log::error!("Evaluation of {} on {} panicked: {}", rule, symbol, e);
            PairOutcome::Failed
        }
        Err(_) => {
            log::warn!(
                "Evaluation of {} on {} exceeded {:?}, skipped this tick",
                rule,
                symbol,
                pair_timeout
            );
            PairOutcome::TimedOut
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tokio::sync::mpsc;
    use tripwire_clock::{ManualClock, SystemClock};
    use tripwire_core::{
        Metric, MetricSample, Operator, RuleKey, SignalDefinition, SignalId, SignalPool,
        TimeWindow, TriggerCondition,
    };
    use tripwire_ports::MetricSource;

    use crate::window::WindowAggregator;

    struct SlowSource;

    impl MetricSource for SlowSource {
        fn value(&self, _: &str, _: Metric, _: TimeWindow, _: Timestamp) -> Option<f64> {
            std::thread::sleep(Duration::from_millis(200));
            Some(1.0)
        }
    }

    fn funding_signal(id: i64) -> SignalDefinition {
        SignalDefinition::new(
            id,
            "funding spike",
            TriggerCondition::leaf(
                Metric::FundingRate,
                Operator::GreaterThan,
                0.0005,
                TimeWindow::OneMinute,
            ),
        )
    }

    fn scheduler_with(
        source: Arc<dyn MetricSource>,
        registry: Arc<SignalRegistry>,
        pair_timeout: Duration,
    ) -> (EvaluationScheduler, Arc<TriggerDispatcher>) {
        let (tx, _rx) = mpsc::channel(64);
        let dispatcher = Arc::new(TriggerDispatcher::new(chrono::Duration::zero(), tx, 16));
        let scheduler = EvaluationScheduler::new(
            registry,
            Arc::new(ConditionEvaluator::new(source)),
            Arc::clone(&dispatcher),
            ManualClock::at_unix(1_700_000_000),
            4,
            pair_timeout,
        );
        (scheduler, dispatcher)
    }

    #[tokio::test]
    async fn test_tick_evaluates_every_target() {
        let registry = Arc::new(SignalRegistry::new(Vec::new()));
        let snapshot = registry.reload(
            vec![funding_signal(1)],
            vec![SignalPool::new(1, "majors").with_signals([1]).with_symbols(["BTC", "ETH"])],
        );

        let aggregator = Arc::new(WindowAggregator::new(Arc::new(SystemClock::new()), 1_000));
        aggregator.set_interest(snapshot.interest().clone());
        let at = Utc::now();
        aggregator.observe(&MetricSample::new("BTC", Metric::FundingRate, 0.001, at));
        aggregator.observe(&MetricSample::new("ETH", Metric::FundingRate, 0.0001, at));

        let (scheduler, dispatcher) =
            scheduler_with(aggregator, registry, Duration::from_secs(1));
        let report = scheduler.tick_at(at).await;

        assert_eq!(report.targets, 2);
        assert_eq!(report.evaluated, 2);
        assert_eq!(report.satisfied, 1);
        assert_eq!(report.fired, 1);
        assert!(
            dispatcher
                .state(RuleKey::Signal(SignalId(1)), "BTC")
                .unwrap()
                .is_active()
        );

        // Still satisfied: no new event
        let report = scheduler.tick_at(at).await;
        assert_eq!(report.fired, 0);
    }

    #[tokio::test]
    async fn test_slow_pair_times_out_without_firing() {
        let registry = Arc::new(SignalRegistry::new(Vec::new()));
        registry.reload(
            vec![funding_signal(1)],
            vec![SignalPool::new(1, "majors").with_signals([1]).with_symbols(["BTC"])],
        );

        let (scheduler, dispatcher) =
            scheduler_with(Arc::new(SlowSource), registry, Duration::from_millis(20));
        let report = scheduler.tick().await;

        assert_eq!(report.timed_out, 1);
        assert_eq!(report.evaluated, 0);
        assert!(dispatcher.states().is_empty());
    }

    #[tokio::test]
    async fn test_empty_registry_tick_is_noop() {
        let registry = Arc::new(SignalRegistry::new(Vec::new()));
        let (scheduler, _) = scheduler_with(
            Arc::new(WindowAggregator::new(Arc::new(SystemClock::new()), 1_000)),
            registry,
            Duration::from_secs(1),
        );
        assert_eq!(scheduler.tick().await, TickReport::default());
    }
}
