use mspsync_core::{EncryptionError, SyncError, ValidationError, WarehouseError};
use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error("command error: {0}")]
    Command(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) | Self::Command(_) => 2,
            Self::Sync(SyncError::Validation(_)) => 2,
            Self::Sync(SyncError::Encryption(_)) | Self::Encryption(_) => 5,
            Self::Sync(SyncError::Warehouse(_)) | Self::Warehouse(_) => 6,
            Self::Sync(_) => 3,
            Self::Serialization(_) => 4,
            Self::Io(_) => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_sync_errors_keep_their_category() {
        let validation = CliError::from(SyncError::from(ValidationError::EmptyConnectionName));
        assert_eq!(validation.exit_code(), 2);

        let key = CliError::from(SyncError::from(EncryptionError::MissingMasterKey));
        assert_eq!(key.exit_code(), 5);
        assert_eq!(CliError::Encryption(EncryptionError::MissingMasterKey).exit_code(), 5);

        assert_eq!(CliError::from(SyncError::ConnectionNotFound(9)).exit_code(), 3);
        assert_eq!(CliError::Command(String::from("bad")).exit_code(), 2);
    }
}
