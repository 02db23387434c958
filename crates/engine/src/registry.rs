//! Signal/Pool Registry
//!
//! Holds the current set of enabled signals and pools as an immutable
//! snapshot behind an [`ArcSwap`]. A reload builds a complete new snapshot
//! and swaps the pointer; an evaluation that loaded the old snapshot keeps
//! a consistent view of it until it drops its `Arc`.
//!
//! The snapshot also precomputes what each tick needs: the deduplicated
//! (rule, symbol) evaluation targets and the (symbol, metric) pairs the
//! aggregator has to retain.

use arc_swap::ArcSwap;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;
use tripwire_core::{
    Logic, PoolId, PoolLogic, RuleKey, SignalDefinition, SignalId, SignalPool, Symbol,
    Timestamp, TriggerCondition, canonical_symbol,
};
use tripwire_ports::DefinitionSource;

use crate::error::Result;
use crate::window::Interest;

/// One (rule, symbol) pair to evaluate on a tick
#[derive(Debug, Clone)]
pub struct EvaluationTarget {
    pub rule: RuleKey,
    pub symbol: Symbol,
    pub condition: Arc<TriggerCondition>,
}

/// Immutable view of the enabled definitions
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    version: u64,
    loaded_at: Option<Timestamp>,
    signals: HashMap<SignalId, Arc<SignalDefinition>>,
    pools: BTreeMap<PoolId, Arc<SignalPool>>,
    /// Enabled signals that belong to no pool at all
    standalone: BTreeSet<SignalId>,
    standalone_symbols: BTreeSet<Symbol>,
    targets: Vec<EvaluationTarget>,
    interest: Interest,
}

impl RegistrySnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from every persisted definition, enabled or not
    pub fn build(
        signals: Vec<SignalDefinition>,
        pools: Vec<SignalPool>,
        standalone_symbols: &[String],
        version: u64,
    ) -> Self {
        let pooled: HashSet<SignalId> = pools
            .iter()
            .flat_map(|p| p.signal_ids.iter().copied())
            .collect();

        let mut enabled_signals = HashMap::new();
        for signal in signals.into_iter().filter(|s| s.enabled) {
            let reasons = signal.trigger_condition.malformed_reasons();
            if !reasons.is_empty() {
                log::warn!(
                    "Signal {} ('{}') has malformed conditions: {}",
                    signal.id,
                    signal.name,
                    reasons.join("; ")
                );
            }
            enabled_signals.insert(signal.id, Arc::new(signal));
        }

        let enabled_pools: BTreeMap<PoolId, Arc<SignalPool>> = pools
            .into_iter()
            .filter(|p| p.enabled)
            .map(|p| (p.id, Arc::new(p)))
            .collect();

        let standalone: BTreeSet<SignalId> = enabled_signals
            .keys()
            .filter(|id| !pooled.contains(id))
            .copied()
            .collect();

        let standalone_symbols: BTreeSet<Symbol> = standalone_symbols
            .iter()
            .map(|s| canonical_symbol(s))
            .filter(|s| !s.is_empty())
            .collect();

        let mut snapshot = Self {
            version,
            loaded_at: Some(Utc::now()),
            signals: enabled_signals,
            pools: enabled_pools,
            standalone,
            standalone_symbols,
            targets: Vec::new(),
            interest: Interest::new(),
        };
        snapshot.targets = snapshot.compute_targets();
        snapshot.interest = snapshot.compute_interest();
        snapshot
    }

    fn compute_targets(&self) -> Vec<EvaluationTarget> {
        let mut signal_pairs: BTreeSet<(SignalId, Symbol)> = BTreeSet::new();
        let mut targets = Vec::new();

        for pool in self.pools.values() {
            let members = self.resolve_members(pool);

            for symbol in &pool.symbols {
                for signal in &members {
                    signal_pairs.insert((signal.id, symbol.clone()));
                }
            }

            let logic = match pool.logic {
                PoolLogic::Independent => continue,
                PoolLogic::And => Logic::And,
                PoolLogic::Or => Logic::Or,
            };
            let children = members
                .iter()
                .map(|s| s.trigger_condition.clone())
                .collect::<Vec<_>>();
            let condition = Arc::new(match logic {
                Logic::And => TriggerCondition::all(children),
                Logic::Or => TriggerCondition::any(children),
            });
            for symbol in &pool.symbols {
                targets.push(EvaluationTarget {
                    rule: RuleKey::Pool(pool.id),
                    symbol: symbol.clone(),
                    condition: Arc::clone(&condition),
                });
            }
        }

        for id in &self.standalone {
            for symbol in &self.standalone_symbols {
                signal_pairs.insert((*id, symbol.clone()));
            }
        }

        // Conditions are shared per signal, not cloned per symbol
        let mut conditions: HashMap<SignalId, Arc<TriggerCondition>> = HashMap::new();
        for (id, symbol) in signal_pairs {
            let Some(signal) = self.signals.get(&id) else {
                continue;
            };
            let condition = conditions
                .entry(id)
                .or_insert_with(|| Arc::new(signal.trigger_condition.clone()));
            targets.push(EvaluationTarget {
                rule: RuleKey::Signal(id),
                symbol,
                condition: Arc::clone(condition),
            });
        }

        targets
    }

    fn compute_interest(&self) -> Interest {
        let mut interest = Interest::new();
        for target in &self.targets {
            let metrics = interest.entry(target.symbol.clone()).or_default();
            for leaf in target.condition.leaves() {
                let window = metrics.entry(leaf.metric).or_insert(leaf.time_window);
                if leaf.time_window > *window {
                    *window = leaf.time_window;
                }
            }
        }
        interest
    }

    /// Enabled member signals of `pool`, skipping dangling or disabled ids
    fn resolve_members(&self, pool: &SignalPool) -> Vec<Arc<SignalDefinition>> {
        pool.signal_ids
            .iter()
            .filter_map(|id| {
                let signal = self.signals.get(id);
                if signal.is_none() {
                    log::debug!("Pool {} references unavailable signal {}", pool.id, id);
                }
                signal.cloned()
            })
            .collect()
    }

    /// Enabled signals of enabled pools watching `symbol`, plus enabled
    /// standalone signals when `symbol` is in the standalone scope
    pub fn active_signals_for_symbol(&self, symbol: &str) -> Vec<Arc<SignalDefinition>> {
        let symbol = canonical_symbol(symbol);
        let mut ids: BTreeSet<SignalId> = BTreeSet::new();

        for pool in self.pools.values().filter(|p| p.watches(&symbol)) {
            ids.extend(
                pool.signal_ids
                    .iter()
                    .filter(|id| self.signals.contains_key(id)),
            );
        }
        if self.standalone_symbols.contains(&symbol) {
            ids.extend(self.standalone.iter().copied());
        }

        ids.iter()
            .filter_map(|id| self.signals.get(id).cloned())
            .collect()
    }

    pub fn signal(&self, id: SignalId) -> Option<&Arc<SignalDefinition>> {
        self.signals.get(&id)
    }

    pub fn pool(&self, id: PoolId) -> Option<&Arc<SignalPool>> {
        self.pools.get(&id)
    }

    pub fn targets(&self) -> &[EvaluationTarget] {
        &self.targets
    }

    pub fn interest(&self) -> &Interest {
        &self.interest
    }

    /// Rule keys that currently have at least one evaluation target
    pub fn rule_keys(&self) -> HashSet<RuleKey> {
        self.targets.iter().map(|t| t.rule).collect()
    }

    pub fn signal_count(&self) -> usize {
        self.signals.len()
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn loaded_at(&self) -> Option<Timestamp> {
        self.loaded_at
    }
}

/// Owner of the current [`RegistrySnapshot`]
pub struct SignalRegistry {
    current: ArcSwap<RegistrySnapshot>,
    standalone_symbols: Vec<String>,
    next_version: AtomicU64,
    reload_requested: Notify,
}

impl SignalRegistry {
    pub fn new(standalone_symbols: Vec<String>) -> Self {
        Self {
            current: ArcSwap::from_pointee(RegistrySnapshot::empty()),
            standalone_symbols,
            next_version: AtomicU64::new(1),
            reload_requested: Notify::new(),
        }
    }

    /// The snapshot currently serving. Holders keep it alive across reloads.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.load_full()
    }

    /// Build and publish a new snapshot from the given definitions
    pub fn reload(
        &self,
        signals: Vec<SignalDefinition>,
        pools: Vec<SignalPool>,
    ) -> Arc<RegistrySnapshot> {
        let version = self.next_version.fetch_add(1, Ordering::Relaxed);
        self.publish(signals, pools, version)
    }

    /// Load definitions from `source` and publish them. On failure the
    /// previous snapshot keeps serving.
    ///
    /// The version is taken before loading starts, so when two reloads
    /// overlap the one that started last wins and a slower, older load
    /// is discarded.
    pub async fn reload_from(&self, source: &dyn DefinitionSource) -> Result<Arc<RegistrySnapshot>> {
        let version = self.next_version.fetch_add(1, Ordering::Relaxed);
        let loaded = async {
            let signals = source.load_signals().await?;
            let pools = source.load_pools().await?;
            Ok::<_, tripwire_ports::PortError>((signals, pools))
        }
        .await;

        match loaded {
            Ok((signals, pools)) => Ok(self.publish(signals, pools, version)),
            Err(e) => {
                log::warn!(
                    "Definition reload failed, keeping snapshot v{}: {}",
                    self.current.load().version(),
                    e
                );
                Err(e.into())
            }
        }
    }

    /// Swap in a snapshot built at `version` unless a newer one is already
    /// serving. Returns the snapshot serving afterwards.
    fn publish(
        &self,
        signals: Vec<SignalDefinition>,
        pools: Vec<SignalPool>,
        version: u64,
    ) -> Arc<RegistrySnapshot> {
        let snapshot = Arc::new(RegistrySnapshot::build(
            signals,
            pools,
            &self.standalone_symbols,
            version,
        ));

        let previous = self.current.rcu(|current| {
            if current.version() > version {
                Arc::clone(current)
            } else {
                Arc::clone(&snapshot)
            }
        });
        if previous.version() > version {
            log::info!(
                "Discarding definitions v{}, newer snapshot v{} already serving",
                version,
                previous.version()
            );
            return previous;
        }

        log::info!(
            "Registry reloaded (v{}): {} enabled signals, {} enabled pools, {} evaluation targets",
            snapshot.version(),
            snapshot.signal_count(),
            snapshot.pool_count(),
            snapshot.targets().len()
        );
        snapshot
    }

    pub fn active_signals_for_symbol(&self, symbol: &str) -> Vec<Arc<SignalDefinition>> {
        self.current.load().active_signals_for_symbol(symbol)
    }

    /// Ask the reload loop to refresh as soon as possible
    pub fn request_reload(&self) {
        self.reload_requested.notify_one();
    }

    /// Resolves once [`request_reload`](Self::request_reload) has been called
    pub async fn reload_requested(&self) {
        self.reload_requested.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tripwire_core::{Metric, Operator, TimeWindow};

    fn signal(id: i64, metric: Metric, window: TimeWindow) -> SignalDefinition {
        SignalDefinition::new(
            id,
            format!("signal-{}", id),
            TriggerCondition::leaf(metric, Operator::GreaterThan, 1.0, window),
        )
    }

    #[test]
    fn test_active_signals_for_symbol() {
        let registry = SignalRegistry::new(vec!["SOL".to_string()]);
        registry.reload(
            vec![
                signal(1, Metric::Cvd, TimeWindow::FiveMinutes),
                signal(2, Metric::Oi, TimeWindow::OneMinute),
                signal(3, Metric::FundingRate, TimeWindow::OneMinute).disabled(),
                signal(4, Metric::DepthRatio, TimeWindow::OneMinute),
            ],
            vec![
                SignalPool::new(10, "majors")
                    .with_signals([1, 2, 3])
                    .with_symbols(["BTC", "ETH"]),
                SignalPool::new(11, "paused")
                    .with_signals([2])
                    .with_symbols(["DOGE"])
                    .disabled(),
            ],
        );

        let ids = |symbol: &str| -> Vec<i64> {
            registry
                .active_signals_for_symbol(symbol)
                .iter()
                .map(|s| s.id.0)
                .collect()
        };
        assert_eq!(ids("btc"), vec![1, 2]);
        assert_eq!(ids("DOGE"), Vec::<i64>::new());
        // Signal 4 is in no pool and SOL is in the standalone scope
        assert_eq!(ids("SOL"), vec![4]);
    }

    #[test]
    fn test_targets_are_deduplicated_across_pools() {
        let registry = SignalRegistry::new(Vec::new());
        let snapshot = registry.reload(
            vec![signal(1, Metric::Cvd, TimeWindow::FiveMinutes)],
            vec![
                SignalPool::new(1, "a").with_signals([1]).with_symbols(["BTC"]),
                SignalPool::new(2, "b").with_signals([1]).with_symbols(["BTC", "ETH"]),
            ],
        );

        let pairs: Vec<(RuleKey, &str)> = snapshot
            .targets()
            .iter()
            .map(|t| (t.rule, t.symbol.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (RuleKey::Signal(SignalId(1)), "BTC"),
                (RuleKey::Signal(SignalId(1)), "ETH"),
            ]
        );
    }

    #[test]
    fn test_dangling_pool_members_are_skipped() {
        let registry = SignalRegistry::new(Vec::new());
        let snapshot = registry.reload(
            vec![signal(1, Metric::Cvd, TimeWindow::OneMinute)],
            vec![SignalPool::new(1, "a").with_signals([1, 99]).with_symbols(["BTC"])],
        );
        assert_eq!(snapshot.targets().len(), 1);
    }

    #[test]
    fn test_pool_level_rules() {
        let registry = SignalRegistry::new(Vec::new());
        let snapshot = registry.reload(
            vec![
                signal(1, Metric::Cvd, TimeWindow::OneMinute),
                signal(2, Metric::Oi, TimeWindow::OneMinute),
            ],
            vec![
                SignalPool::new(7, "confluence")
                    .with_signals([1, 2])
                    .with_symbols(["BTC"])
                    .with_logic(PoolLogic::And),
                SignalPool::new(8, "empty")
                    .with_symbols(["BTC"])
                    .with_logic(PoolLogic::Or),
            ],
        );

        let pool_target = snapshot
            .targets()
            .iter()
            .find(|t| t.rule == RuleKey::Pool(PoolId(7)))
            .unwrap();
        assert!(matches!(
            pool_target.condition.as_ref(),
            TriggerCondition::Composite { logic: Logic::And, conditions } if conditions.len() == 2
        ));

        // A pool with no resolvable signals never fires
        let empty = snapshot
            .targets()
            .iter()
            .find(|t| t.rule == RuleKey::Pool(PoolId(8)))
            .unwrap();
        assert!(!empty.condition.is_well_formed());

        assert!(snapshot.rule_keys().contains(&RuleKey::Pool(PoolId(7))));
        assert_eq!(snapshot.targets().len(), 4);
    }

    #[test]
    fn test_interest_keeps_longest_window() {
        let registry = SignalRegistry::new(Vec::new());
        let snapshot = registry.reload(
            vec![
                signal(1, Metric::Cvd, TimeWindow::FiveMinutes),
                signal(2, Metric::Cvd, TimeWindow::OneHour),
                signal(3, Metric::Oi, TimeWindow::OneMinute),
            ],
            vec![
                SignalPool::new(1, "a").with_signals([1, 2]).with_symbols(["BTC"]),
                SignalPool::new(2, "b").with_signals([3]).with_symbols(["ETH"]),
            ],
        );

        let interest = snapshot.interest();
        assert_eq!(interest["BTC"][&Metric::Cvd], TimeWindow::OneHour);
        assert!(!interest["BTC"].contains_key(&Metric::Oi));
        assert_eq!(interest["ETH"][&Metric::Oi], TimeWindow::OneMinute);
    }

    #[test]
    fn test_old_snapshot_survives_reload() {
        let registry = SignalRegistry::new(Vec::new());
        registry.reload(
            vec![signal(1, Metric::Cvd, TimeWindow::OneMinute)],
            vec![SignalPool::new(1, "a").with_signals([1]).with_symbols(["BTC"])],
        );

        let held = registry.snapshot();
        registry.reload(Vec::new(), Vec::new());

        assert_eq!(held.targets().len(), 1);
        assert!(held.signal(SignalId(1)).is_some());
        assert_eq!(registry.snapshot().targets().len(), 0);
        assert!(registry.snapshot().version() > held.version());
    }

    /// Hands out its signals only once released
    struct GatedSource {
        signals: Vec<SignalDefinition>,
        entered: Notify,
        release: Notify,
    }

    #[async_trait::async_trait]
    impl DefinitionSource for GatedSource {
        async fn load_signals(&self) -> tripwire_ports::PortResult<Vec<SignalDefinition>> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(self.signals.clone())
        }

        async fn load_pools(&self) -> tripwire_ports::PortResult<Vec<SignalPool>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_slow_older_reload_does_not_overwrite_newer() {
        let registry = Arc::new(SignalRegistry::new(vec!["BTC".to_string()]));
        let slow = Arc::new(GatedSource {
            signals: vec![signal(1, Metric::Cvd, TimeWindow::OneMinute)],
            entered: Notify::new(),
            release: Notify::new(),
        });
        let fast = Arc::new(GatedSource {
            signals: vec![signal(2, Metric::Oi, TimeWindow::OneMinute)],
            entered: Notify::new(),
            release: Notify::new(),
        });

        let stale = {
            let registry = Arc::clone(&registry);
            let slow = Arc::clone(&slow);
            tokio::spawn(async move { registry.reload_from(slow.as_ref()).await })
        };
        slow.entered.notified().await;

        fast.release.notify_one();
        let newer = registry.reload_from(fast.as_ref()).await.unwrap();

        slow.release.notify_one();
        let returned = stale.await.unwrap().unwrap();

        assert_eq!(returned.version(), newer.version());
        let serving = registry.snapshot();
        assert_eq!(serving.version(), newer.version());
        assert!(serving.signal(SignalId(2)).is_some());
        assert!(serving.signal(SignalId(1)).is_none());
    }
}
