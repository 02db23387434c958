//! File-backed store
//!
//! Definitions come from one JSON document that the management layer
//! rewrites; it is re-read on every load so edits show up on the next
//! reload. Trigger events are appended to a JSON-lines file.
//!
//! ```json
//! {
//!   "signals": [{"id": 1, "name": "oi flush", "trigger_condition": {...}}],
//!   "pools":   [{"id": 1, "name": "majors", "signal_ids": [1], "symbols": ["BTC"]}]
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tripwire_core::{SignalDefinition, SignalPool, TriggerEvent};
use tripwire_ports::{DefinitionSource, PortError, PortResult, TriggerLog};

/// On-disk shape of the definitions file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefinitionsFile {
    #[serde(default)]
    pub signals: Vec<SignalDefinition>,
    #[serde(default)]
    pub pools: Vec<SignalPool>,
}

pub struct JsonFileStore {
    definitions_path: PathBuf,
    trigger_log_path: PathBuf,
    // Serializes appends so lines never interleave
    append_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(definitions_path: impl Into<PathBuf>, trigger_log_path: impl Into<PathBuf>) -> Self {
        Self {
            definitions_path: definitions_path.into(),
            trigger_log_path: trigger_log_path.into(),
            append_lock: Mutex::new(()),
        }
    }

    pub fn definitions_path(&self) -> &Path {
        &self.definitions_path
    }

    pub fn trigger_log_path(&self) -> &Path {
        &self.trigger_log_path
    }

    async fn read_definitions(&self) -> PortResult<DefinitionsFile> {
        let content = tokio::fs::read_to_string(&self.definitions_path)
            .await
            .map_err(|e| {
                PortError::PersistenceUnavailable(format!(
                    "{}: {}",
                    self.definitions_path.display(),
                    e
                ))
            })?;

        serde_json::from_str(&content).map_err(|e| {
            PortError::CorruptData(format!("{}: {}", self.definitions_path.display(), e))
        })
    }

    /// Replace the definitions file
    pub async fn write_definitions(&self, definitions: &DefinitionsFile) -> PortResult<()> {
        let json = serde_json::to_string_pretty(definitions)
            .map_err(|e| PortError::WriteRejected(e.to_string()))?;
        tokio::fs::write(&self.definitions_path, json)
            .await
            .map_err(|e| {
                PortError::PersistenceUnavailable(format!(
                    "{}: {}",
                    self.definitions_path.display(),
                    e
                ))
            })
    }

    /// Every event in the trigger log. Unparseable lines are skipped.
    pub async fn read_trigger_log(&self) -> PortResult<Vec<TriggerEvent>> {
        let content = match tokio::fs::read_to_string(&self.trigger_log_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PortError::PersistenceUnavailable(e.to_string())),
        };

        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(event) => Some(event),
                Err(e) => {
                    log::warn!("Skipping unreadable trigger log line: {}", e);
                    None
                }
            })
            .collect())
    }
}

#[async_trait]
impl DefinitionSource for JsonFileStore {
    async fn load_signals(&self) -> PortResult<Vec<SignalDefinition>> {
        Ok(self.read_definitions().await?.signals)
    }

    async fn load_pools(&self) -> PortResult<Vec<SignalPool>> {
        Ok(self.read_definitions().await?.pools)
    }
}

#[async_trait]
impl TriggerLog for JsonFileStore {
    async fn append_trigger_event(&self, event: &TriggerEvent) -> PortResult<()> {
        let mut line =
            serde_json::to_string(event).map_err(|e| PortError::WriteRejected(e.to_string()))?;
        line.push('\n');

        let _guard = self.append_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.trigger_log_path)
            .await
            .map_err(|e| {
                PortError::PersistenceUnavailable(format!(
                    "{}: {}",
                    self.trigger_log_path.display(),
                    e
                ))
            })?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| PortError::PersistenceUnavailable(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| PortError::PersistenceUnavailable(e.to_string()))
    }
}
