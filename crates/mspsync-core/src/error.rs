use mspsync_warehouse::WarehouseError;
use thiserror::Error;

use crate::provider::ProviderError;
use crate::secrets::EncryptionError;

/// Validation and contract errors exposed by `mspsync-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unknown provider type '{value}'")]
    UnknownProviderType { value: String },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },

    #[error("connection name must not be empty")]
    EmptyConnectionName,

    #[error("sync interval must be at least one minute")]
    InvalidSyncInterval,

    #[error("page size must be between 1 and {max}")]
    InvalidPageSize { max: usize },

    #[error("invalid value for {name}: '{value}'")]
    InvalidSetting { name: &'static str, value: String },

    #[error("entity '{entity}' is not supported by provider '{provider}'")]
    EntityNotSupported { provider: String, entity: String },
}

/// Error type at the orchestration boundary.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("connection {0} not found")]
    ConnectionNotFound(i64),

    #[error("invalid sync phase transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("sync lease for connection {0} was taken over by another run")]
    LeaseLost(i64),

    #[error("stored credentials are not a JSON object: {0}")]
    CorruptCredentials(String),
}

impl SyncError {
    /// Error message safe to persist on the connection row and show operators.
    pub fn summary(&self) -> String {
        match self {
            Self::Provider(error) => error.to_string(),
            other => other.to_string(),
        }
    }
}
