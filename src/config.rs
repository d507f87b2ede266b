use std::{env, fmt, net::SocketAddr, time::Duration as StdDuration};

use thiserror::Error;
use time::Duration;

use crate::models::oauth_token::BrokerProvider;
use crate::utils::encryption::decode_key;
use crate::utils::state_signer::DEFAULT_STATE_MAX_AGE;

pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_PARAMETER_NAMESPACE: &str = "/brokerlink";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";

const SCHWAB_AUTHORIZE_URL: &str = "https://api.schwabapi.com/v1/oauth/authorize";
const SCHWAB_TOKEN_URL: &str = "https://api.schwabapi.com/v1/oauth/token";
const TASTYTRADE_AUTHORIZE_URL: &str = "https://my.tastytrade.com/auth.html";
const TASTYTRADE_TOKEN_URL: &str = "https://api.tastyworks.com/oauth/token";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(String),
    #[error("{name} is invalid: {reason}")]
    Invalid { name: String, reason: String },
}

/// How client credentials reach the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuthMethod {
    /// `Authorization: Basic base64(client_id:client_secret)`
    Basic,
    /// `client_id` / `client_secret` in the form body
    Post,
}

#[derive(Debug, Clone)]
pub struct OAuthProviderConfig {
    pub authorize_url: String,
    pub token_url: String,
    pub redirect_uri: String,
    pub scope: String,
    pub auth_method: ClientAuthMethod,
    pub credentials_parameter: String,
    pub token_parameter_prefix: String,
}

#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub schwab: OAuthProviderConfig,
    pub tastytrade: OAuthProviderConfig,
}

impl OAuthSettings {
    pub fn provider(&self, provider: BrokerProvider) -> &OAuthProviderConfig {
        match provider {
            BrokerProvider::Schwab => &self.schwab,
            BrokerProvider::TastyTrade => &self.tastytrade,
        }
    }
}

#[derive(Clone)]
pub enum SecretStoreBackend {
    Postgres {
        database_url: String,
        encryption_key: Vec<u8>,
    },
    /// Process-local store; everything is lost on restart.
    Memory,
}

impl fmt::Debug for SecretStoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretStoreBackend::Postgres { .. } => f.write_str("Postgres"),
            SecretStoreBackend::Memory => f.write_str("Memory"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub frontend_origin: String,
    pub bind_addr: SocketAddr,
    pub oauth: OAuthSettings,
    pub secret_store: SecretStoreBackend,
    pub state_max_age: Duration,
    pub http_timeout: StdDuration,
    pub jwt_issuer: String,
    pub jwt_audience: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok(); // Load .env file
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let require = |key: &str| get(key).ok_or_else(|| ConfigError::Missing(key.to_string()));

        let frontend_origin = require("FRONTEND_ORIGIN")?
            .trim_end_matches('/')
            .to_string();

        let bind_addr = get("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|err| ConfigError::Invalid {
                name: "BIND_ADDR".into(),
                reason: err.to_string(),
            })?;

        let namespace = get("PARAMETER_NAMESPACE")
            .unwrap_or_else(|| DEFAULT_PARAMETER_NAMESPACE.to_string())
            .trim_end_matches('/')
            .to_string();

        let provider_config = |provider: BrokerProvider,
                               authorize_url: &str,
                               token_url: &str,
                               scope: &str,
                               auth_method: ClientAuthMethod|
         -> Result<OAuthProviderConfig, ConfigError> {
            let env_prefix = provider.as_str().to_ascii_uppercase();
            let key = |suffix: &str| format!("{env_prefix}_{suffix}");
            Ok(OAuthProviderConfig {
                authorize_url: get(&key("AUTHORIZE_URL"))
                    .unwrap_or_else(|| authorize_url.to_string()),
                token_url: get(&key("TOKEN_URL")).unwrap_or_else(|| token_url.to_string()),
                redirect_uri: require(&key("REDIRECT_URI"))?,
                scope: get(&key("SCOPE")).unwrap_or_else(|| scope.to_string()),
                auth_method,
                credentials_parameter: get(&key("CREDENTIALS_PARAMETER"))
                    .unwrap_or_else(|| format!("{namespace}/{provider}/credentials")),
                token_parameter_prefix: get(&key("TOKEN_PARAMETER_PREFIX"))
                    .unwrap_or_else(|| format!("{namespace}/{provider}/tokens")),
            })
        };

        let oauth = OAuthSettings {
            schwab: provider_config(
                BrokerProvider::Schwab,
                SCHWAB_AUTHORIZE_URL,
                SCHWAB_TOKEN_URL,
                "readonly",
                ClientAuthMethod::Basic,
            )?,
            tastytrade: provider_config(
                BrokerProvider::TastyTrade,
                TASTYTRADE_AUTHORIZE_URL,
                TASTYTRADE_TOKEN_URL,
                "read",
                ClientAuthMethod::Post,
            )?,
        };

        let secret_store = match get("SECRET_STORE_BACKEND")
            .unwrap_or_else(|| "postgres".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "postgres" => {
                let database_url = require("DATABASE_URL")?;
                let encryption_key = decode_key(&require("PARAMETER_ENCRYPTION_KEY")?)
                    .map_err(|err| ConfigError::Invalid {
                        name: "PARAMETER_ENCRYPTION_KEY".into(),
                        reason: err.to_string(),
                    })?;
                SecretStoreBackend::Postgres {
                    database_url,
                    encryption_key,
                }
            }
            "memory" => SecretStoreBackend::Memory,
            other => {
                return Err(ConfigError::Invalid {
                    name: "SECRET_STORE_BACKEND".into(),
                    reason: format!("unknown backend `{other}`"),
                })
            }
        };

        let state_max_age = match get("STATE_MAX_AGE_SECONDS") {
            Some(raw) => Duration::seconds(parse_positive("STATE_MAX_AGE_SECONDS", &raw)? as i64),
            None => DEFAULT_STATE_MAX_AGE,
        };

        let http_timeout = StdDuration::from_secs(match get("HTTP_TIMEOUT_SECONDS") {
            Some(raw) => parse_positive("HTTP_TIMEOUT_SECONDS", &raw)?,
            None => DEFAULT_HTTP_TIMEOUT_SECS,
        });

        Ok(Config {
            frontend_origin,
            bind_addr,
            oauth,
            secret_store,
            state_max_age,
            http_timeout,
            jwt_issuer: require("IDENTITY_JWT_ISSUER")?,
            jwt_audience: require("IDENTITY_JWT_AUDIENCE")?,
        })
    }
}

fn parse_positive(name: &str, raw: &str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::Invalid {
            name: name.to_string(),
            reason: format!("expected a positive integer, got `{raw}`"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, String> {
        HashMap::from([
            ("FRONTEND_ORIGIN", "https://app.example.com/".to_string()),
            ("SCHWAB_REDIRECT_URI", "https://api.example.com/api/schwab/callback".to_string()),
            (
                "TASTYTRADE_REDIRECT_URI",
                "https://api.example.com/api/tastytrade/callback".to_string(),
            ),
            ("SECRET_STORE_BACKEND", "memory".to_string()),
            ("IDENTITY_JWT_ISSUER", "issuer".to_string()),
            ("IDENTITY_JWT_AUDIENCE", "audience".to_string()),
        ])
    }

    fn load(env: &HashMap<&'static str, String>) -> Result<Config, ConfigError> {
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_fill_in_provider_settings() {
        let config = load(&base_env()).unwrap();

        assert_eq!(config.frontend_origin, "https://app.example.com");
        assert_eq!(config.oauth.schwab.token_url, SCHWAB_TOKEN_URL);
        assert_eq!(config.oauth.schwab.auth_method, ClientAuthMethod::Basic);
        assert_eq!(config.oauth.tastytrade.auth_method, ClientAuthMethod::Post);
        assert_eq!(
            config.oauth.schwab.credentials_parameter,
            "/brokerlink/schwab/credentials"
        );
        assert_eq!(
            config.oauth.tastytrade.token_parameter_prefix,
            "/brokerlink/tastytrade/tokens"
        );
        assert_eq!(config.state_max_age, DEFAULT_STATE_MAX_AGE);
        assert_eq!(config.http_timeout, StdDuration::from_secs(10));
        assert!(matches!(config.secret_store, SecretStoreBackend::Memory));
    }

    #[test]
    fn overrides_are_honoured() {
        let mut env = base_env();
        env.insert("PARAMETER_NAMESPACE", "/prod/dash/".into());
        env.insert("SCHWAB_TOKEN_URL", "http://localhost:9000/token".into());
        env.insert("STATE_MAX_AGE_SECONDS", "300".into());

        let config = load(&env).unwrap();
        assert_eq!(config.oauth.schwab.token_url, "http://localhost:9000/token");
        assert_eq!(
            config.oauth.schwab.token_parameter_prefix,
            "/prod/dash/schwab/tokens"
        );
        assert_eq!(config.state_max_age, Duration::seconds(300));
    }

    #[test]
    fn missing_required_values_are_reported() {
        let mut env = base_env();
        env.remove("SCHWAB_REDIRECT_URI");
        assert_eq!(
            load(&env).unwrap_err(),
            ConfigError::Missing("SCHWAB_REDIRECT_URI".into())
        );
    }

    #[test]
    fn postgres_backend_requires_valid_key() {
        let mut env = base_env();
        env.insert("SECRET_STORE_BACKEND", "postgres".into());
        env.insert("DATABASE_URL", "postgres://localhost/brokerlink".into());
        env.insert("PARAMETER_ENCRYPTION_KEY", STANDARD.encode([1u8; 16]));
        assert!(matches!(
            load(&env),
            Err(ConfigError::Invalid { ref name, .. }) if name == "PARAMETER_ENCRYPTION_KEY"
        ));

        env.insert("PARAMETER_ENCRYPTION_KEY", STANDARD.encode([1u8; 32]));
        assert!(matches!(
            load(&env).unwrap().secret_store,
            SecretStoreBackend::Postgres { .. }
        ));
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let mut env = base_env();
        env.insert("HTTP_TIMEOUT_SECONDS", "0".into());
        assert!(matches!(load(&env), Err(ConfigError::Invalid { .. })));
    }
}
