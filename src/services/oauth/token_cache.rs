use std::sync::Arc;

use tracing::{debug, warn};

use crate::db::secret_store::{ParameterKind, SecretStore, SecretStoreError};
use crate::models::oauth_token::{SubjectId, TokenRecord};

/// Per-user token records for one provider, stored as secure parameters
/// named `{prefix}/{subject}`. The key is always derived here from a
/// verified subject; no caller can address another user's record.
#[derive(Clone)]
pub struct TokenCache {
    store: Arc<dyn SecretStore>,
    prefix: String,
}

impl TokenCache {
    pub fn new(store: Arc<dyn SecretStore>, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_end_matches('/').to_string();
        Self { store, prefix }
    }

    fn key_for(&self, subject: &SubjectId) -> String {
        format!("{}/{}", self.prefix, subject.as_str())
    }

    pub async fn get(&self, subject: &SubjectId) -> Result<Option<TokenRecord>, SecretStoreError> {
        let Some(raw) = self.store.get_parameter(&self.key_for(subject)).await? else {
            debug!(%subject, "no token record stored");
            return Ok(None);
        };

        match serde_json::from_str::<TokenRecord>(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                warn!(%subject, %err, "stored token record is unreadable; treating as absent");
                Ok(None)
            }
        }
    }

    pub async fn save(
        &self,
        subject: &SubjectId,
        record: &TokenRecord,
    ) -> Result<(), SecretStoreError> {
        let serialized = serde_json::to_string(record)?;
        self.store
            .put_parameter(&self.key_for(subject), &serialized, ParameterKind::Secure)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, subject: &SubjectId) -> Result<bool, SecretStoreError> {
        self.store.delete_parameter(&self.key_for(subject)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_secret_store::InMemorySecretStore;
    use crate::db::secret_store::MockSecretStore;
    use time::{Duration, OffsetDateTime};

    fn subject(raw: &str) -> SubjectId {
        SubjectId::parse(raw).unwrap()
    }

    fn record(access: &str) -> TokenRecord {
        TokenRecord {
            access_token: access.into(),
            refresh_token: format!("{access}-refresh"),
            expires_at: OffsetDateTime::now_utc() + Duration::minutes(30),
        }
    }

    #[tokio::test]
    async fn save_then_get_scoped_by_subject() {
        let store = Arc::new(InMemorySecretStore::new());
        let cache = TokenCache::new(store.clone(), "/brokerlink/schwab/tokens/");

        cache.save(&subject("alice"), &record("a")).await.unwrap();
        cache.save(&subject("bob"), &record("b")).await.unwrap();

        assert_eq!(
            cache.get(&subject("alice")).await.unwrap().unwrap().access_token,
            "a"
        );
        assert_eq!(
            cache.get(&subject("bob")).await.unwrap().unwrap().access_token,
            "b"
        );
        assert!(cache.get(&subject("carol")).await.unwrap().is_none());
        assert_eq!(
            store.names(),
            vec![
                "/brokerlink/schwab/tokens/alice".to_string(),
                "/brokerlink/schwab/tokens/bob".to_string()
            ]
        );
        assert_eq!(
            store.kind_of("/brokerlink/schwab/tokens/alice"),
            Some(ParameterKind::Secure)
        );
    }

    #[tokio::test]
    async fn save_is_idempotent_overwrite() {
        let store = Arc::new(InMemorySecretStore::new());
        let cache = TokenCache::new(store.clone(), "/p");
        let user = subject("alice");

        cache.save(&user, &record("first")).await.unwrap();
        cache.save(&user, &record("second")).await.unwrap();
        cache.save(&user, &record("second")).await.unwrap();

        assert_eq!(cache.get(&user).await.unwrap().unwrap().access_token, "second");
        assert_eq!(store.names().len(), 1);
    }

    #[tokio::test]
    async fn unreadable_record_is_absent() {
        let store = Arc::new(InMemorySecretStore::new());
        store.insert("/p/alice", "{not json", ParameterKind::Secure);
        let cache = TokenCache::new(store, "/p");
        assert!(cache.get(&subject("alice")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_only_own_record() {
        let store = Arc::new(InMemorySecretStore::new());
        let cache = TokenCache::new(store.clone(), "/p");
        cache.save(&subject("alice"), &record("a")).await.unwrap();
        cache.save(&subject("bob"), &record("b")).await.unwrap();

        assert!(cache.delete(&subject("alice")).await.unwrap());
        assert!(!cache.delete(&subject("alice")).await.unwrap());
        assert!(cache.get(&subject("bob")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn store_failures_propagate() {
        let mut store = MockSecretStore::new();
        store
            .expect_get_parameter()
            .returning(|_| Err(SecretStoreError::Timeout));
        let cache = TokenCache::new(Arc::new(store), "/p");

        let err = cache.get(&subject("alice")).await.unwrap_err();
        assert!(matches!(err, SecretStoreError::Timeout));
    }
}
