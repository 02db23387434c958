use thiserror::Error;
use tripwire_ports::PortError;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Malformed upstream record: {0}")]
    MalformedRecord(String),

    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PortError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
