use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::db::secret_store::{
    ParameterKind, ParameterWriteOutcome, SecretStore, SecretStoreError,
};

#[derive(Debug, Clone)]
struct StoredParameter {
    value: String,
    kind: ParameterKind,
}

/// Process-local parameter store for development runs and tests.
#[derive(Debug, Default)]
pub struct InMemorySecretStore {
    parameters: Mutex<HashMap<String, StoredParameter>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn parameters(&self) -> MutexGuard<'_, HashMap<String, StoredParameter>> {
        self.parameters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, name: &str, value: &str, kind: ParameterKind) {
        self.parameters().insert(
            name.to_string(),
            StoredParameter {
                value: value.to_string(),
                kind,
            },
        );
    }

    #[cfg(test)]
    pub(crate) fn kind_of(&self, name: &str) -> Option<ParameterKind> {
        self.parameters().get(name).map(|param| param.kind)
    }

    #[cfg(test)]
    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.parameters().keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get_parameter(&self, name: &str) -> Result<Option<String>, SecretStoreError> {
        Ok(self.parameters().get(name).map(|param| param.value.clone()))
    }

    async fn put_parameter(
        &self,
        name: &str,
        value: &str,
        kind: ParameterKind,
    ) -> Result<ParameterWriteOutcome, SecretStoreError> {
        let previous = self.parameters().insert(
            name.to_string(),
            StoredParameter {
                value: value.to_string(),
                kind,
            },
        );
        Ok(match previous {
            Some(_) => ParameterWriteOutcome::Updated,
            None => ParameterWriteOutcome::Created,
        })
    }

    async fn delete_parameter(&self, name: &str) -> Result<bool, SecretStoreError> {
        Ok(self.parameters().remove(name).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_reports_create_then_update() {
        let store = InMemorySecretStore::new();
        let first = store
            .put_parameter("/app/one", "v1", ParameterKind::Secure)
            .await
            .unwrap();
        let second = store
            .put_parameter("/app/one", "v2", ParameterKind::Secure)
            .await
            .unwrap();

        assert_eq!(first, ParameterWriteOutcome::Created);
        assert_eq!(second, ParameterWriteOutcome::Updated);
        assert_eq!(
            store.get_parameter("/app/one").await.unwrap().as_deref(),
            Some("v2")
        );
        assert_eq!(store.names(), vec!["/app/one"]);
    }

    #[tokio::test]
    async fn missing_parameter_is_none() {
        let store = InMemorySecretStore::new();
        assert!(store.get_parameter("/absent").await.unwrap().is_none());
        assert!(!store.delete_parameter("/absent").await.unwrap());
    }
}
