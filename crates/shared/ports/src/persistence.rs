use async_trait::async_trait;
use tripwire_core::{SignalDefinition, SignalPool, TriggerEvent};

use crate::error::PortResult;

/// Read side of the persistence collaborator: the definitions the
/// management layer owns
#[async_trait]
pub trait DefinitionSource: Send + Sync {
    /// Load every signal definition, enabled or not
    async fn load_signals(&self) -> PortResult<Vec<SignalDefinition>>;

    /// Load every signal pool, enabled or not
    async fn load_pools(&self) -> PortResult<Vec<SignalPool>>;
}

/// Write side of the persistence collaborator: the trigger history
#[async_trait]
pub trait TriggerLog: Send + Sync {
    /// Append one trigger event. Ordering across calls is not guaranteed.
    async fn append_trigger_event(&self, event: &TriggerEvent) -> PortResult<()>;
}
