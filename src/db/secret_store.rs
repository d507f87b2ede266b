use async_trait::async_trait;
use thiserror::Error;

use crate::utils::encryption::EncryptionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    Plain,
    /// Sealed at rest; returned decrypted.
    Secure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterWriteOutcome {
    Created,
    Updated,
}

#[derive(Error, Debug)]
pub enum SecretStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("encryption error: {0}")]
    Encryption(#[from] EncryptionError),
    #[error("parameter serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("parameter store call timed out")]
    Timeout,
    #[error("parameter store unavailable: {0}")]
    Unavailable(String),
}

/// Durable named-parameter store holding app credentials and per-user
/// token records. A missing parameter is `Ok(None)`, never an error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_parameter(&self, name: &str) -> Result<Option<String>, SecretStoreError>;

    async fn put_parameter(
        &self,
        name: &str,
        value: &str,
        kind: ParameterKind,
    ) -> Result<ParameterWriteOutcome, SecretStoreError>;

    /// Returns whether a parameter was removed.
    async fn delete_parameter(&self, name: &str) -> Result<bool, SecretStoreError>;
}
