use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use reqwest::Url;
use serde::Serialize;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::models::oauth_token::{BrokerProvider, ProviderCredentials, SubjectId, TokenRecord};
use crate::services::oauth::client::OAuthTokenService;
use crate::services::oauth::credentials::CredentialSource;
use crate::services::oauth::errors::{OAuthError, StatusReason};
use crate::services::oauth::token_cache::TokenCache;
use crate::utils::state_signer::StateSigner;

/// A token expiring within this window is refreshed before use.
pub const EXPIRY_BUFFER: Duration = Duration::seconds(60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<StatusReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ConnectionStatus {
    fn connected() -> Self {
        Self {
            connected: true,
            reason: None,
            detail: None,
        }
    }

    fn from_error(err: &OAuthError) -> Self {
        Self {
            connected: false,
            reason: Some(err.status_reason()),
            detail: Some(err.public_detail()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackOutcome {
    pub subject: SubjectId,
    pub return_to: Option<String>,
}

/// Callback failure plus whatever return target could be recovered from a
/// verified state, so the browser can still be sent back to where it began.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct CallbackError {
    pub error: OAuthError,
    pub return_to: Option<String>,
}

impl CallbackError {
    fn new(error: impl Into<OAuthError>, return_to: Option<String>) -> Self {
        Self {
            error: error.into(),
            return_to,
        }
    }
}

/// Outcome of a call made on the user's behalf against the broker API.
#[derive(Debug, Error)]
pub enum DownstreamError {
    #[error("downstream rejected the access token")]
    Unauthorized,
    #[error("downstream call failed: {0}")]
    Failed(String),
    #[error(transparent)]
    OAuth(#[from] OAuthError),
}

/// Per-provider connection lifecycle: authorize, callback, lazy refresh,
/// status and disconnect. One instance per provider, shared across requests.
pub struct ConnectionGate {
    provider: BrokerProvider,
    credentials: Arc<CredentialSource>,
    tokens: TokenCache,
    oauth: Arc<dyn OAuthTokenService>,
    redirect_uri: String,
    state_max_age: Duration,
    refresh_guards: Mutex<HashMap<SubjectId, Arc<AsyncMutex<()>>>>,
}

impl ConnectionGate {
    pub fn new(
        credentials: Arc<CredentialSource>,
        tokens: TokenCache,
        oauth: Arc<dyn OAuthTokenService>,
        redirect_uri: impl Into<String>,
        state_max_age: Duration,
    ) -> Self {
        Self {
            provider: oauth.provider(),
            credentials,
            tokens,
            oauth,
            redirect_uri: redirect_uri.into(),
            state_max_age,
            refresh_guards: Mutex::new(HashMap::new()),
        }
    }

    pub fn provider(&self) -> BrokerProvider {
        self.provider
    }

    fn signer(&self, creds: &ProviderCredentials) -> Result<StateSigner, OAuthError> {
        Ok(StateSigner::new(
            creds.session_secret.as_bytes(),
            self.state_max_age,
        )?)
    }

    /// Builds the provider consent URL with a freshly signed `state`.
    pub async fn start_authorization(
        &self,
        subject: Option<&SubjectId>,
        return_to: Option<&str>,
    ) -> Result<Url, OAuthError> {
        let creds = self.credentials.load().await?;
        let state = self
            .signer(&creds)?
            .sign(subject.map(SubjectId::as_str).unwrap_or_default(), return_to)?;
        let url = self
            .oauth
            .build_authorization_url(&creds, &self.redirect_uri, &state)?;
        debug!(provider = %self.provider, subject = ?subject.map(SubjectId::as_str), "authorization started");
        Ok(url)
    }

    /// Completes the authorization-code flow. The state is verified before
    /// anything else; a forged or stale state never reaches the provider.
    pub async fn handle_callback(
        &self,
        code: Option<&str>,
        state: Option<&str>,
        session_subject: Option<&SubjectId>,
    ) -> Result<CallbackOutcome, CallbackError> {
        let creds = self
            .credentials
            .load()
            .await
            .map_err(|err| CallbackError::new(err, None))?;
        let signer = self
            .signer(&creds)
            .map_err(|err| CallbackError::new(err, None))?;

        let verified = state
            .and_then(|state| signer.verify(state))
            .ok_or_else(|| {
                warn!(provider = %self.provider, "callback state failed verification");
                CallbackError::new(OAuthError::SignatureInvalid, None)
            })?;
        let return_to = verified.return_to.clone();

        let subject = if verified.subject.is_empty() {
            session_subject
                .cloned()
                .ok_or_else(|| CallbackError::new(OAuthError::MissingSubject, return_to.clone()))?
        } else {
            let bound = SubjectId::parse(&verified.subject).ok_or_else(|| {
                CallbackError::new(OAuthError::SignatureInvalid, return_to.clone())
            })?;
            if session_subject.is_some_and(|session| session != &bound) {
                warn!(provider = %self.provider, "callback session does not match state subject");
                return Err(CallbackError::new(
                    OAuthError::SignatureInvalid,
                    return_to,
                ));
            }
            bound
        };

        let code = code
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .ok_or_else(|| {
                CallbackError::new(OAuthError::MissingAuthorizationCode, return_to.clone())
            })?;

        let record = self
            .oauth
            .exchange_authorization_code(&creds, code, &self.redirect_uri)
            .await
            .map_err(|err| CallbackError::new(err, return_to.clone()))?;

        self.tokens
            .save(&subject, &record)
            .await
            .map_err(|err| CallbackError::new(err, return_to.clone()))?;

        info!(provider = %self.provider, %subject, "broker connected");
        Ok(CallbackOutcome { subject, return_to })
    }

    /// Returns a usable record, refreshing it first when it is inside the
    /// expiry buffer. `None` means the user has to authorize.
    pub async fn get_valid_token(
        &self,
        subject: &SubjectId,
    ) -> Result<Option<TokenRecord>, OAuthError> {
        let Some(record) = self.tokens.get(subject).await? else {
            return Ok(None);
        };
        if !record.has_refresh_token() {
            debug!(provider = %self.provider, %subject, "stored record has no refresh token");
            return Ok(None);
        }
        if record.is_fresh_at(OffsetDateTime::now_utc(), EXPIRY_BUFFER) {
            return Ok(Some(record));
        }

        self.refresh_single_flight(subject, None).await
    }

    pub async fn get_valid_access_token(
        &self,
        subject: &SubjectId,
    ) -> Result<Option<String>, OAuthError> {
        Ok(self
            .get_valid_token(subject)
            .await?
            .map(|record| record.access_token))
    }

    /// Refreshes even a token that still looks fresh, unless another caller
    /// already replaced `rejected_token` in the meantime.
    pub async fn force_refresh(
        &self,
        subject: &SubjectId,
        rejected_token: &str,
    ) -> Result<String, OAuthError> {
        self.refresh_single_flight(subject, Some(rejected_token))
            .await?
            .map(|record| record.access_token)
            .ok_or(OAuthError::NotConnected {
                provider: self.provider,
            })
    }

    /// Runs `call` with a valid access token. A single `Unauthorized` from
    /// the downstream triggers one forced refresh and one retry.
    pub async fn call_with_token<T, F, Fut>(
        &self,
        subject: &SubjectId,
        call: F,
    ) -> Result<T, DownstreamError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, DownstreamError>>,
    {
        let token = self
            .get_valid_access_token(subject)
            .await?
            .ok_or(OAuthError::NotConnected {
                provider: self.provider,
            })?;

        match call(token.clone()).await {
            Err(DownstreamError::Unauthorized) => {
                info!(provider = %self.provider, %subject, "downstream rejected token; refreshing once");
                let refreshed = self.force_refresh(subject, &token).await?;
                call(refreshed).await
            }
            other => other,
        }
    }

    pub async fn get_status(&self, subject: &SubjectId) -> ConnectionStatus {
        if let Err(err) = self.credentials.load().await {
            return ConnectionStatus::from_error(&err);
        }

        match self.get_valid_token(subject).await {
            Ok(Some(_)) => ConnectionStatus::connected(),
            Ok(None) => ConnectionStatus::from_error(&OAuthError::NotConnected {
                provider: self.provider,
            }),
            Err(err) => {
                if matches!(err.status_reason(), StatusReason::UnexpectedError) {
                    warn!(provider = %self.provider, %subject, error = %err, "status check failed");
                }
                ConnectionStatus::from_error(&err)
            }
        }
    }

    /// Drops the stored record. Returns whether one existed.
    pub async fn disconnect(&self, subject: &SubjectId) -> Result<bool, OAuthError> {
        let removed = self.tokens.delete(subject).await?;
        info!(provider = %self.provider, %subject, removed, "broker disconnected");
        Ok(removed)
    }

    async fn refresh_single_flight(
        &self,
        subject: &SubjectId,
        rejected_token: Option<&str>,
    ) -> Result<Option<TokenRecord>, OAuthError> {
        let guard = self.guard_for(subject);
        let result = {
            let _held = guard.lock().await;
            self.refresh_locked(subject, rejected_token).await
        };
        self.release_guard(subject, &guard);
        result
    }

    async fn refresh_locked(
        &self,
        subject: &SubjectId,
        rejected_token: Option<&str>,
    ) -> Result<Option<TokenRecord>, OAuthError> {
        // Re-read: a previous holder may already have refreshed.
        let Some(current) = self.tokens.get(subject).await? else {
            return Ok(None);
        };
        if !current.has_refresh_token() {
            return Ok(None);
        }

        let fresh = current.is_fresh_at(OffsetDateTime::now_utc(), EXPIRY_BUFFER);
        let already_replaced = match rejected_token {
            Some(rejected) => current.access_token != rejected,
            None => true,
        };
        if fresh && already_replaced {
            return Ok(Some(current));
        }

        let creds = self.credentials.load().await?;
        match self.oauth.refresh_access_token(&creds, &current).await {
            Ok(refreshed) => {
                self.tokens.save(subject, &refreshed).await?;
                info!(provider = %self.provider, %subject, "access token refreshed");
                Ok(Some(refreshed))
            }
            Err(err @ OAuthError::RefreshTokenRevoked { .. }) => {
                warn!(provider = %self.provider, %subject, "refresh token revoked; clearing stored record");
                self.tokens.delete(subject).await?;
                Err(err)
            }
            Err(err) => {
                warn!(provider = %self.provider, %subject, error = %err, "token refresh failed");
                Err(err)
            }
        }
    }

    fn guard_for(&self, subject: &SubjectId) -> Arc<AsyncMutex<()>> {
        let mut guards = self
            .refresh_guards
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        guards
            .entry(subject.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn release_guard(&self, subject: &SubjectId, guard: &Arc<AsyncMutex<()>>) {
        let mut guards = self
            .refresh_guards
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Map entry plus ours: nobody else is waiting.
        if Arc::strong_count(guard) == 2 {
            guards.remove(subject);
        }
    }
}
