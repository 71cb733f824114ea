//! Error types for gpudra

use thiserror::Error;

/// Main error type for gpudra
#[derive(Error, Debug)]
pub enum DraError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Durable record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Durable record already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Node allocation state has not finished initializing
    #[error("Node '{node}' is not ready: NodeAllocationStateStatus: {status}")]
    NotReady { node: String, status: String },

    /// Malformed claim parameters
    #[error("Validation error: {0}")]
    Validation(String),

    /// Parameter object could not be resolved
    #[error("Parameters error: {0}")]
    Parameters(String),

    /// Not enough free devices on a node
    #[error(
        "Allocation shortfall on node '{node}': claim '{claim}' requested {requested}, got {assigned}"
    )]
    AllocationShortfall {
        node: String,
        claim: String,
        requested: usize,
        assigned: usize,
    },

    /// Failure reported by the durable store
    #[error("Store error: {0}")]
    Store(String),

    /// Staging or durable state is not what the operation requires
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// Requested mode of operation is not supported
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for gpudra operations
pub type DraResult<T> = Result<T, DraError>;

impl DraError {
    /// Whether this error means the record is missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, DraError::NotFound(_))
    }

    /// Prefix the message with context, keeping the variant
    pub fn context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            DraError::Config(m) => DraError::Config(format!("{ctx}: {m}")),
            DraError::NotFound(m) => DraError::NotFound(format!("{ctx}: {m}")),
            DraError::AlreadyExists(m) => DraError::AlreadyExists(format!("{ctx}: {m}")),
            DraError::Validation(m) => DraError::Validation(format!("{ctx}: {m}")),
            DraError::Parameters(m) => DraError::Parameters(format!("{ctx}: {m}")),
            DraError::Store(m) => DraError::Store(format!("{ctx}: {m}")),
            DraError::Consistency(m) => DraError::Consistency(format!("{ctx}: {m}")),
            DraError::Unsupported(m) => DraError::Unsupported(format!("{ctx}: {m}")),
            DraError::Serialization(m) => DraError::Serialization(format!("{ctx}: {m}")),
            other => other,
        }
    }
}

impl From<serde_json::Error> for DraError {
    fn from(err: serde_json::Error) -> Self {
        DraError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for DraError {
    fn from(err: toml::de::Error) -> Self {
        DraError::Config(err.to_string())
    }
}
