use std::time::Duration as StdDuration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};

use crate::config::{ClientAuthMethod, OAuthProviderConfig};
use crate::models::oauth_token::{BrokerProvider, ProviderCredentials, TokenRecord};
use crate::services::oauth::errors::OAuthError;

/// Longest slice of a provider error body carried into an error message.
const MAX_ERROR_BODY: usize = 200;
/// Longest access-token lifetime accepted from a token endpoint.
const MAX_EXPIRES_IN_SECS: i64 = 366 * 24 * 60 * 60;

/// Provider-facing half of the authorization-code flow.
#[async_trait]
pub trait OAuthTokenService: Send + Sync {
    fn provider(&self) -> BrokerProvider;

    fn build_authorization_url(
        &self,
        creds: &ProviderCredentials,
        redirect_uri: &str,
        state: &str,
    ) -> Result<Url, OAuthError>;

    async fn exchange_authorization_code(
        &self,
        creds: &ProviderCredentials,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenRecord, OAuthError>;

    /// Fails with [`OAuthError::RefreshTokenRevoked`] when the provider no
    /// longer honours the stored refresh token.
    async fn refresh_access_token(
        &self,
        creds: &ProviderCredentials,
        existing: &TokenRecord,
    ) -> Result<TokenRecord, OAuthError>;
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExpiresIn {
    Seconds(i64),
    Fractional(f64),
    Text(String),
}

impl ExpiresIn {
    fn seconds(&self) -> Option<i64> {
        match self {
            ExpiresIn::Seconds(value) => Some(*value),
            ExpiresIn::Fractional(value) if value.is_finite() => Some(value.trunc() as i64),
            ExpiresIn::Fractional(_) => None,
            ExpiresIn::Text(raw) => raw.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<ExpiresIn>,
}

/// reqwest-backed client for one broker's authorize and token endpoints.
#[derive(Clone)]
pub struct OAuthClient {
    provider: BrokerProvider,
    client: Client,
    authorize_url: String,
    token_url: String,
    scope: String,
    auth_method: ClientAuthMethod,
    timeout: StdDuration,
}

impl OAuthClient {
    pub fn new(
        provider: BrokerProvider,
        client: Client,
        config: &OAuthProviderConfig,
        timeout: StdDuration,
    ) -> Self {
        Self {
            provider,
            client,
            authorize_url: config.authorize_url.clone(),
            token_url: config.token_url.clone(),
            scope: config.scope.clone(),
            auth_method: config.auth_method,
            timeout,
        }
    }

    fn token_request(
        &self,
        creds: &ProviderCredentials,
        mut form: Vec<(&'static str, String)>,
    ) -> RequestBuilder {
        let request = self.client.post(&self.token_url).timeout(self.timeout);
        match self.auth_method {
            ClientAuthMethod::Basic => request
                .basic_auth(&creds.client_id, Some(&creds.client_secret))
                .form(&form),
            ClientAuthMethod::Post => {
                form.push(("client_id", creds.client_id.clone()));
                form.push(("client_secret", creds.client_secret.clone()));
                request.form(&form)
            }
        }
    }

    async fn send_token_request(
        &self,
        request: RequestBuilder,
        grant: &'static str,
    ) -> Result<Result<TokenResponse, (StatusCode, String)>, OAuthError> {
        let response = request.send().await.map_err(|err| {
            warn!(provider = %self.provider, grant, error = %err, "token endpoint unreachable");
            OAuthError::TokenExchangeFailed(err.without_url().to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Ok(Err((status, body)));
        }

        let parsed = response.json::<TokenResponse>().await.map_err(|err| {
            OAuthError::TokenExchangeFailed(format!(
                "unreadable token response: {}",
                err.without_url()
            ))
        })?;
        Ok(Ok(parsed))
    }

    fn record_from_response(
        &self,
        response: TokenResponse,
        fallback_refresh: Option<&str>,
    ) -> Result<TokenRecord, OAuthError> {
        let access_token = response
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                OAuthError::TokenExchangeFailed("token response missing access_token".into())
            })?;

        let expires_in = response
            .expires_in
            .as_ref()
            .and_then(ExpiresIn::seconds)
            .ok_or_else(|| {
                OAuthError::TokenExchangeFailed("token response missing expires_in".into())
            })?;
        if expires_in <= 0 || expires_in > MAX_EXPIRES_IN_SECS {
            return Err(OAuthError::TokenExchangeFailed(format!(
                "token response has out-of-range expires_in: {expires_in}"
            )));
        }
        let expires_at = OffsetDateTime::now_utc()
            .checked_add(Duration::seconds(expires_in))
            .ok_or_else(|| {
                OAuthError::TokenExchangeFailed("token expiry overflows the clock".into())
            })?;

        let refresh_token = match response.refresh_token.filter(|token| !token.is_empty()) {
            Some(token) => token,
            None => match fallback_refresh {
                Some(existing) => existing.to_string(),
                None => return Err(OAuthError::MissingRefreshToken),
            },
        };

        Ok(TokenRecord {
            access_token,
            refresh_token,
            expires_at,
        })
    }
}

#[async_trait]
impl OAuthTokenService for OAuthClient {
    fn provider(&self) -> BrokerProvider {
        self.provider
    }

    fn build_authorization_url(
        &self,
        creds: &ProviderCredentials,
        redirect_uri: &str,
        state: &str,
    ) -> Result<Url, OAuthError> {
        let mut url = Url::parse(&self.authorize_url).map_err(|err| {
            OAuthError::TokenExchangeFailed(format!("invalid authorize url: {err}"))
        })?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("response_type", "code")
                .append_pair("client_id", &creds.client_id)
                .append_pair("redirect_uri", redirect_uri);
            if !self.scope.is_empty() {
                pairs.append_pair("scope", &self.scope);
            }
            pairs.append_pair("state", state);
        }
        Ok(url)
    }

    async fn exchange_authorization_code(
        &self,
        creds: &ProviderCredentials,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenRecord, OAuthError> {
        let request = self.token_request(
            creds,
            vec![
                ("grant_type", "authorization_code".to_string()),
                ("code", code.to_string()),
                ("redirect_uri", redirect_uri.to_string()),
            ],
        );

        match self.send_token_request(request, "authorization_code").await? {
            Ok(response) => {
                debug!(provider = %self.provider, "authorization code exchanged");
                self.record_from_response(response, None)
            }
            Err((status, body)) => {
                warn!(provider = %self.provider, %status, "authorization code exchange rejected");
                Err(OAuthError::TokenExchangeFailed(format!(
                    "{status}: {}",
                    describe_error_body(&body)
                )))
            }
        }
    }

    async fn refresh_access_token(
        &self,
        creds: &ProviderCredentials,
        existing: &TokenRecord,
    ) -> Result<TokenRecord, OAuthError> {
        if !existing.has_refresh_token() {
            return Err(OAuthError::MissingRefreshToken);
        }

        let request = self.token_request(
            creds,
            vec![
                ("grant_type", "refresh_token".to_string()),
                ("refresh_token", existing.refresh_token.clone()),
            ],
        );

        match self.send_token_request(request, "refresh_token").await? {
            Ok(response) => self.record_from_response(response, Some(&existing.refresh_token)),
            Err((status, body)) => {
                if is_revocation_signal(status, &body) {
                    warn!(
                        provider = %self.provider,
                        %status,
                        "refresh token rejected by provider"
                    );
                    return Err(OAuthError::RefreshTokenRevoked {
                        provider: self.provider,
                    });
                }
                Err(OAuthError::TokenExchangeFailed(format!(
                    "{status}: {}",
                    describe_error_body(&body)
                )))
            }
        }
    }
}

/// 401, or a 400 whose body names `invalid_grant`, means the refresh token
/// is dead and the user has to authorize again.
pub(crate) fn is_revocation_signal(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::UNAUTHORIZED {
        return true;
    }
    status == StatusCode::BAD_REQUEST && body.to_ascii_lowercase().contains("invalid_grant")
}

/// Pulls a readable message out of an OAuth error body, falling back to a
/// truncated copy of the raw text.
pub(crate) fn describe_error_body(body: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        let field = |key: &str| {
            map.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
        };
        match (field("error"), field("error_description")) {
            (Some(code), Some(description)) => return format!("{code}: {description}"),
            (Some(code), None) => return code.to_string(),
            (None, Some(description)) => return description.to_string(),
            (None, None) => {}
        }
        if let Some(message) = field("message") {
            return message.to_string();
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    trimmed.chars().take(MAX_ERROR_BODY).collect()
}
