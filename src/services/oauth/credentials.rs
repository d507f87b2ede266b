use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::db::secret_store::SecretStore;
use crate::models::oauth_token::{BrokerProvider, ProviderCredentials};
use crate::services::oauth::errors::OAuthError;

/// Process-wide app credentials for one provider.
///
/// Built once at startup and shared by `Arc`. The first successful load is
/// cached for the life of the process; failed loads are retried on the next
/// call so a late-provisioned parameter is picked up without a restart.
pub struct CredentialSource {
    provider: BrokerProvider,
    parameter: String,
    store: Arc<dyn SecretStore>,
    cached: OnceCell<Arc<ProviderCredentials>>,
}

impl CredentialSource {
    pub fn new(
        provider: BrokerProvider,
        parameter: impl Into<String>,
        store: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            provider,
            parameter: parameter.into(),
            store,
            cached: OnceCell::new(),
        }
    }

    pub async fn load(&self) -> Result<Arc<ProviderCredentials>, OAuthError> {
        self.cached
            .get_or_try_init(|| self.fetch())
            .await
            .map(Arc::clone)
    }

    /// Startup warm-up. A failure is logged, not fatal: status calls report
    /// `missing_credentials` until the parameter exists.
    pub async fn preload(&self) {
        match self.load().await {
            Ok(creds) => info!(
                provider = %self.provider,
                client_id = %creds.client_id,
                "provider credentials loaded"
            ),
            Err(err) => warn!(
                provider = %self.provider,
                parameter = %self.parameter,
                %err,
                "provider credentials unavailable at startup"
            ),
        }
    }

    async fn fetch(&self) -> Result<Arc<ProviderCredentials>, OAuthError> {
        let missing = || OAuthError::CredentialConfigurationMissing {
            parameter: self.parameter.clone(),
        };

        let raw = self
            .store
            .get_parameter(&self.parameter)
            .await?
            .ok_or_else(missing)?;

        let creds: ProviderCredentials = serde_json::from_str(&raw).map_err(|err| {
            warn!(
                provider = %self.provider,
                parameter = %self.parameter,
                %err,
                "provider credential parameter is not valid JSON"
            );
            missing()
        })?;

        if !creds.is_complete() {
            return Err(missing());
        }

        Ok(Arc::new(creds))
    }
}
