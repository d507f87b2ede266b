use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use reqwest::Url;
use time::{Duration, OffsetDateTime};

use crate::models::oauth_token::{BrokerProvider, ProviderCredentials, TokenRecord};
use crate::services::oauth::client::OAuthTokenService;
use crate::services::oauth::errors::OAuthError;

type ExchangeFn = dyn Fn(&str) -> Result<TokenRecord, OAuthError> + Send + Sync;
type RefreshFn = dyn Fn(usize, &TokenRecord) -> Result<TokenRecord, OAuthError> + Send + Sync;

pub const MOCK_AUTHORIZE_URL: &str = "https://broker.test/oauth/authorize";

/// Scripted provider. Counts calls so tests can assert how often the
/// token endpoint would have been hit.
pub struct MockOAuthClient {
    provider: BrokerProvider,
    pub exchange_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    exchange_fn: Box<ExchangeFn>,
    refresh_fn: Box<RefreshFn>,
    refresh_delay: StdDuration,
}

pub fn record_expiring_in(access: &str, refresh: &str, expires_in: Duration) -> TokenRecord {
    TokenRecord {
        access_token: access.into(),
        refresh_token: refresh.into(),
        expires_at: OffsetDateTime::now_utc() + expires_in,
    }
}

impl MockOAuthClient {
    pub fn new(provider: BrokerProvider) -> Self {
        Self {
            provider,
            exchange_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            exchange_fn: Box::new(|code| {
                Ok(record_expiring_in(
                    &format!("access-{code}"),
                    &format!("refresh-{code}"),
                    Duration::minutes(30),
                ))
            }),
            refresh_fn: Box::new(|n, existing| {
                Ok(record_expiring_in(
                    &format!("refreshed-{n}"),
                    &existing.refresh_token,
                    Duration::minutes(30),
                ))
            }),
            refresh_delay: StdDuration::ZERO,
        }
    }

    pub fn with_exchange<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> Result<TokenRecord, OAuthError> + Send + Sync + 'static,
    {
        self.exchange_fn = Box::new(f);
        self
    }

    pub fn with_refresh<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, &TokenRecord) -> Result<TokenRecord, OAuthError> + Send + Sync + 'static,
    {
        self.refresh_fn = Box::new(f);
        self
    }

    pub fn with_refresh_delay(mut self, delay: StdDuration) -> Self {
        self.refresh_delay = delay;
        self
    }

    pub fn exchanges(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OAuthTokenService for MockOAuthClient {
    fn provider(&self) -> BrokerProvider {
        self.provider
    }

    fn build_authorization_url(
        &self,
        creds: &ProviderCredentials,
        redirect_uri: &str,
        state: &str,
    ) -> Result<Url, OAuthError> {
        let mut url = Url::parse(MOCK_AUTHORIZE_URL)
            .map_err(|err| OAuthError::TokenExchangeFailed(err.to_string()))?;
        url.query_pairs_mut()
            .append_pair("client_id", &creds.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("state", state);
        Ok(url)
    }

    async fn exchange_authorization_code(
        &self,
        _creds: &ProviderCredentials,
        code: &str,
        _redirect_uri: &str,
    ) -> Result<TokenRecord, OAuthError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        (self.exchange_fn)(code)
    }

    async fn refresh_access_token(
        &self,
        _creds: &ProviderCredentials,
        existing: &TokenRecord,
    ) -> Result<TokenRecord, OAuthError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.refresh_delay.is_zero() {
            tokio::time::sleep(self.refresh_delay).await;
        }
        (self.refresh_fn)(n, existing)
    }
}
