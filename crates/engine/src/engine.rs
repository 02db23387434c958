//! Engine wiring
//!
//! [`TriggerEngine`] assembles the components from an [`EngineConfig`] and
//! the persistence ports; [`TriggerEngine::start`] spawns the background
//! loops and returns an [`EngineHandle`] for feeding data, forcing ticks and
//! reloads, inspecting state, and shutting down.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tripwire_core::{ActiveTriggerState, MetricSample, RuleKey, Symbol, Timestamp, TriggerEvent};
use tripwire_ports::{Clock, DefinitionSource, TriggerLog};

use crate::config::EngineConfig;
use crate::dispatcher::{TriggerDispatcher, TriggerWriter};
use crate::error::Result;
use crate::evaluator::ConditionEvaluator;
use crate::feed::{FeedSender, MetricFeedAdapter, UpstreamRecord, ingest_channel, run_feed};
use crate::registry::{RegistrySnapshot, SignalRegistry};
use crate::scheduler::{EvaluationScheduler, TickReport};
use crate::window::WindowAggregator;

/// Components shared between the handle and the background loops
struct Shared {
    registry: Arc<SignalRegistry>,
    aggregator: Arc<WindowAggregator>,
    feed: Arc<MetricFeedAdapter>,
    dispatcher: Arc<TriggerDispatcher>,
    scheduler: Arc<EvaluationScheduler>,
    definitions: Arc<dyn DefinitionSource>,
    /// Version of the snapshot last pushed into the aggregator and dispatcher
    applied_version: Mutex<u64>,
}

impl Shared {
    /// Reload definitions and bring the aggregator and dispatcher in line
    /// with the new snapshot
    async fn reload(&self) -> Result<Arc<RegistrySnapshot>> {
        let snapshot = self.registry.reload_from(self.definitions.as_ref()).await?;
        self.apply(&snapshot);
        Ok(snapshot)
    }

    /// Overlapping reloads may finish out of order; only a newer snapshot
    /// than the one already applied is pushed through.
    fn apply(&self, snapshot: &RegistrySnapshot) {
        let mut applied = self
            .applied_version
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if snapshot.version() <= *applied {
            return;
        }
        self.aggregator.set_interest(snapshot.interest().clone());
        self.dispatcher.retain_rules(&snapshot.rule_keys());
        *applied = snapshot.version();
    }
}

pub struct TriggerEngine {
    config: EngineConfig,
    shared: Arc<Shared>,
    writer: TriggerWriter,
}

impl TriggerEngine {
    pub fn new(
        config: EngineConfig,
        definitions: Arc<dyn DefinitionSource>,
        trigger_log: Arc<dyn TriggerLog>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        log::info!("Evaluation time source: {}", clock.name());

        let registry = Arc::new(SignalRegistry::new(config.standalone_symbols.clone()));
        let aggregator = Arc::new(WindowAggregator::new(
            Arc::clone(&clock),
            config.max_samples_per_series,
        ));
        let evaluator = Arc::new(ConditionEvaluator::new(aggregator.clone()));

        let (writer_tx, writer_rx) = mpsc::channel(config.trigger_queue_capacity);
        let dispatcher = Arc::new(TriggerDispatcher::new(
            config.cooldown(),
            writer_tx,
            config.notification_capacity,
        ));
        let writer = TriggerWriter::new(
            writer_rx,
            trigger_log,
            config.write_max_retries,
            config.write_retry_backoff(),
        );

        let scheduler = Arc::new(EvaluationScheduler::new(
            Arc::clone(&registry),
            evaluator,
            Arc::clone(&dispatcher),
            clock,
            config.max_concurrent_evaluations,
            config.pair_timeout(),
        ));

        Ok(Self {
            shared: Arc::new(Shared {
                registry,
                aggregator,
                feed: Arc::new(MetricFeedAdapter::new()),
                dispatcher,
                scheduler,
                definitions,
                applied_version: Mutex::new(0),
            }),
            config,
            writer,
        })
    }

    /// Load definitions and spawn the background loops. A failed initial
    /// load is logged; the reload loop keeps retrying.
    pub async fn start(self) -> EngineHandle {
        let TriggerEngine {
            config,
            shared,
            writer,
        } = self;

        if let Err(e) = shared.reload().await {
            log::warn!("Initial definition load failed, starting empty: {}", e);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (writer_shutdown_tx, writer_shutdown_rx) = watch::channel(false);
        let (feed_tx, feed_rx) = ingest_channel(config.ingest_queue_capacity);

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(run_feed(
            Arc::clone(&shared.feed),
            Arc::clone(&shared.aggregator),
            feed_rx,
            shutdown_rx.clone(),
        )));
        tasks.push(tokio::spawn(run_reloader(
            Arc::clone(&shared),
            config.reload_interval(),
            shutdown_rx.clone(),
        )));
        match config.tick_interval() {
            Some(interval) => tasks.push(tokio::spawn(
                Arc::clone(&shared.scheduler).run(interval, shutdown_rx.clone()),
            )),
            None => log::info!("Periodic evaluation disabled, ticks run on demand"),
        }

        let writer_task = tokio::spawn(writer.run(writer_shutdown_rx));

        log::info!(
            "Trigger engine started: {} evaluation targets",
            shared.registry.snapshot().targets().len()
        );

        EngineHandle {
            shared,
            feed_tx,
            shutdown_tx,
            writer_shutdown_tx,
            tasks,
            writer_task,
        }
    }
}

async fn run_reloader(
    shared: Arc<Shared>,
    interval: Option<Duration>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let periodic = async {
            match interval {
                Some(interval) => tokio::time::sleep(interval).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = periodic => {}
            _ = shared.registry.reload_requested() => {}
            _ = shutdown.changed() => break,
        }

        // Failures are logged by the registry; the old snapshot stays live
        let _ = shared.reload().await;
    }
    log::debug!("Definition reloader stopped");
}

/// Control surface of a running engine
pub struct EngineHandle {
    shared: Arc<Shared>,
    feed_tx: FeedSender,
    shutdown_tx: watch::Sender<bool>,
    writer_shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    writer_task: JoinHandle<()>,
}

impl EngineHandle {
    /// Queue an upstream record for ingestion (never blocks)
    pub fn push(&self, record: UpstreamRecord) {
        self.feed_tx.push(record);
    }

    /// A producer handle that can be moved to another task
    pub fn feed_sender(&self) -> FeedSender {
        self.feed_tx.clone()
    }

    /// Normalize and observe a record immediately, bypassing the queue.
    /// Returns how many samples were retained.
    pub fn ingest(&self, record: &UpstreamRecord) -> Result<usize> {
        let samples = self.shared.feed.normalize(record)?;
        Ok(samples
            .iter()
            .filter(|s| self.shared.aggregator.observe(s))
            .count())
    }

    /// Observe an already-normalized sample
    pub fn observe(&self, sample: &MetricSample) -> bool {
        self.shared.aggregator.observe(sample)
    }

    pub async fn tick(&self) -> TickReport {
        self.shared.scheduler.tick().await
    }

    pub async fn tick_at(&self, at: Timestamp) -> TickReport {
        self.shared.scheduler.tick_at(at).await
    }

    /// Reload definitions now and wait for the result
    pub async fn reload(&self) -> Result<Arc<RegistrySnapshot>> {
        self.shared.reload().await
    }

    /// Ask the background reloader to refresh soon
    pub fn request_reload(&self) {
        self.shared.registry.request_reload();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TriggerEvent> {
        self.shared.dispatcher.subscribe()
    }

    pub fn states(&self) -> Vec<((RuleKey, Symbol), ActiveTriggerState)> {
        self.shared.dispatcher.states()
    }

    pub fn reset(&self, rule: Option<RuleKey>, symbol: Option<&str>) -> usize {
        self.shared.dispatcher.reset(rule, symbol)
    }

    pub fn registry(&self) -> &Arc<SignalRegistry> {
        &self.shared.registry
    }

    pub fn aggregator(&self) -> &Arc<WindowAggregator> {
        &self.shared.aggregator
    }

    pub fn dispatcher(&self) -> &Arc<TriggerDispatcher> {
        &self.shared.dispatcher
    }

    pub fn feed(&self) -> &Arc<MetricFeedAdapter> {
        &self.shared.feed
    }

    /// Stop the loops, then let the writer flush queued trigger events
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                log::error!("Engine task ended abnormally: {}", e);
            }
        }

        let _ = self.writer_shutdown_tx.send(true);
        if let Err(e) = self.writer_task.await {
            log::error!("Trigger writer ended abnormally: {}", e);
        }
        log::info!("Trigger engine stopped");
    }
}
