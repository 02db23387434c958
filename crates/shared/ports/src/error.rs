use thiserror::Error;

/// Errors raised by collaborators behind the ports
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PortError {
    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    #[error("Corrupt definition data: {0}")]
    CorruptData(String),

    #[error("Write rejected: {0}")]
    WriteRejected(String),
}

pub type PortResult<T> = std::result::Result<T, PortError>;
