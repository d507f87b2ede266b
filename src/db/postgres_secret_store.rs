use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::db::secret_store::{
    ParameterKind, ParameterWriteOutcome, SecretStore, SecretStoreError,
};
use crate::utils::encryption::ParameterCipher;

/// Parameter store backed by the `parameters` table. Secure values are
/// sealed with AES-256-GCM before they reach the database.
pub struct PostgresSecretStore {
    pub pool: PgPool,
    cipher: ParameterCipher,
    call_timeout: Duration,
}

impl PostgresSecretStore {
    pub fn new(pool: PgPool, cipher: ParameterCipher, call_timeout: Duration) -> Self {
        Self {
            pool,
            cipher,
            call_timeout,
        }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, SecretStoreError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| SecretStoreError::Timeout)?
            .map_err(SecretStoreError::from)
    }

    fn encode_value(&self, value: &str, kind: ParameterKind) -> Result<String, SecretStoreError> {
        match kind {
            ParameterKind::Plain => Ok(value.to_string()),
            ParameterKind::Secure => Ok(self.cipher.seal(value)?),
        }
    }

    fn decode_value(&self, stored: String, secure: bool) -> Result<String, SecretStoreError> {
        if secure {
            Ok(self.cipher.open(&stored)?)
        } else {
            Ok(stored)
        }
    }
}

#[async_trait]
impl SecretStore for PostgresSecretStore {
    async fn get_parameter(&self, name: &str) -> Result<Option<String>, SecretStoreError> {
        let row = self
            .bounded(
                sqlx::query("SELECT value, secure FROM parameters WHERE name = $1")
                    .bind(name)
                    .fetch_optional(&self.pool),
            )
            .await?;

        let Some(row) = row else {
            debug!(parameter = name, "parameter not found");
            return Ok(None);
        };

        let value: String = row.try_get("value")?;
        let secure: bool = row.try_get("secure")?;
        self.decode_value(value, secure).map(Some)
    }

    async fn put_parameter(
        &self,
        name: &str,
        value: &str,
        kind: ParameterKind,
    ) -> Result<ParameterWriteOutcome, SecretStoreError> {
        let stored = self.encode_value(value, kind)?;
        let row = self
            .bounded(
                sqlx::query(
                    r#"
                    INSERT INTO parameters (name, value, secure, updated_at)
                    VALUES ($1, $2, $3, now())
                    ON CONFLICT (name)
                    DO UPDATE SET
                        value = EXCLUDED.value,
                        secure = EXCLUDED.secure,
                        updated_at = now()
                    RETURNING (xmax = 0) AS inserted
                    "#,
                )
                .bind(name)
                .bind(stored)
                .bind(matches!(kind, ParameterKind::Secure))
                .fetch_one(&self.pool),
            )
            .await?;

        let inserted: bool = row.try_get("inserted")?;
        Ok(if inserted {
            ParameterWriteOutcome::Created
        } else {
            ParameterWriteOutcome::Updated
        })
    }

    async fn delete_parameter(&self, name: &str) -> Result<bool, SecretStoreError> {
        let result = self
            .bounded(
                sqlx::query("DELETE FROM parameters WHERE name = $1")
                    .bind(name)
                    .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    fn store() -> PostgresSecretStore {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/brokerlink_test")
            .expect("lazy pool should build without connecting");
        PostgresSecretStore::new(
            pool,
            ParameterCipher::new(&[7u8; 32]).unwrap(),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn secure_values_are_sealed_before_storage() {
        let store = store();
        let sealed = store
            .encode_value("refresh-token", ParameterKind::Secure)
            .unwrap();
        assert_ne!(sealed, "refresh-token");
        assert_eq!(store.decode_value(sealed, true).unwrap(), "refresh-token");
    }

    #[tokio::test]
    async fn plain_values_pass_through() {
        let store = store();
        let stored = store.encode_value("client-id", ParameterKind::Plain).unwrap();
        assert_eq!(stored, "client-id");
        assert_eq!(store.decode_value(stored, false).unwrap(), "client-id");
    }

    #[tokio::test]
    async fn tampered_secure_value_is_an_error() {
        let store = store();
        let err = store.decode_value("bm90LXNlYWxlZC1hdC1hbGwtYXQtYWxs".into(), true);
        assert!(matches!(err, Err(SecretStoreError::Encryption(_))));
    }
}
