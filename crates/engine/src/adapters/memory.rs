use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::RwLock;
use tripwire_core::{SignalDefinition, SignalId, SignalPool, TriggerEvent};
use tripwire_ports::{DefinitionSource, PortError, PortResult, TriggerLog};

/// In-process store for definitions and the trigger history.
///
/// Failure switches simulate an unavailable backend.
#[derive(Default)]
pub struct InMemoryStore {
    signals: RwLock<Vec<SignalDefinition>>,
    pools: RwLock<Vec<SignalPool>>,
    events: RwLock<Vec<TriggerEvent>>,
    fail_loads: AtomicBool,
    failing_appends: AtomicU32,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_definitions(signals: Vec<SignalDefinition>, pools: Vec<SignalPool>) -> Self {
        Self {
            signals: RwLock::new(signals),
            pools: RwLock::new(pools),
            ..Self::default()
        }
    }

    pub async fn set_signals(&self, signals: Vec<SignalDefinition>) {
        *self.signals.write().await = signals;
    }

    pub async fn set_pools(&self, pools: Vec<SignalPool>) {
        *self.pools.write().await = pools;
    }

    /// Insert or replace a signal by id
    pub async fn upsert_signal(&self, signal: SignalDefinition) {
        let mut signals = self.signals.write().await;
        match signals.iter_mut().find(|s| s.id == signal.id) {
            Some(existing) => *existing = signal,
            None => signals.push(signal),
        }
    }

    pub async fn remove_signal(&self, id: SignalId) -> bool {
        let mut signals = self.signals.write().await;
        let before = signals.len();
        signals.retain(|s| s.id != id);
        signals.len() != before
    }

    /// Every trigger event appended so far, in append order
    pub async fn events(&self) -> Vec<TriggerEvent> {
        self.events.read().await.clone()
    }

    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// Reject the next `count` appends
    pub fn fail_next_appends(&self, count: u32) {
        self.failing_appends.store(count, Ordering::SeqCst);
    }

    fn check_loads(&self) -> PortResult<()> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(PortError::PersistenceUnavailable(
                "in-memory store offline".into(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl DefinitionSource for InMemoryStore {
    async fn load_signals(&self) -> PortResult<Vec<SignalDefinition>> {
        self.check_loads()?;
        Ok(self.signals.read().await.clone())
    }

    async fn load_pools(&self) -> PortResult<Vec<SignalPool>> {
        self.check_loads()?;
        Ok(self.pools.read().await.clone())
    }
}

#[async_trait]
impl TriggerLog for InMemoryStore {
    async fn append_trigger_event(&self, event: &TriggerEvent) -> PortResult<()> {
        let failing = self
            .failing_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(PortError::PersistenceUnavailable(
                "in-memory store rejected append".into(),
            ));
        }
        self.events.write().await.push(event.clone());
        Ok(())
    }
}
