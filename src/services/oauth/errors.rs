use serde::Serialize;
use thiserror::Error;

use crate::db::secret_store::SecretStoreError;
use crate::models::oauth_token::BrokerProvider;
use crate::utils::state_signer::StateSignerError;

#[derive(Error, Debug)]
pub enum OAuthError {
    /// Tampered, malformed, stale or foreign `state`. Carries no detail.
    #[error("authorization state is invalid")]
    SignatureInvalid,
    #[error("authorization code missing from callback")]
    MissingAuthorizationCode,
    #[error("no user identity bound to the authorization request")]
    MissingSubject,
    #[error("token exchange failed: {0}")]
    TokenExchangeFailed(String),
    #[error("refresh token missing in response")]
    MissingRefreshToken,
    #[error("{provider} is not connected")]
    NotConnected { provider: BrokerProvider },
    #[error("credential parameter {parameter} is missing or incomplete")]
    CredentialConfigurationMissing { parameter: String },
    #[error("refresh token revoked for {provider}")]
    RefreshTokenRevoked { provider: BrokerProvider },
    #[error("secret store error: {0}")]
    SecretStore(#[from] SecretStoreError),
    #[error("failed to sign authorization state: {0}")]
    StateSigning(#[from] StateSignerError),
}

/// Stable reason codes surfaced by the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusReason {
    MissingCredentials,
    NotConnected,
    ReauthorizationRequired,
    UnexpectedError,
}

impl OAuthError {
    pub fn status_reason(&self) -> StatusReason {
        match self {
            OAuthError::CredentialConfigurationMissing { .. } => StatusReason::MissingCredentials,
            OAuthError::NotConnected { .. } => StatusReason::NotConnected,
            OAuthError::RefreshTokenRevoked { .. } | OAuthError::MissingRefreshToken => {
                StatusReason::ReauthorizationRequired
            }
            OAuthError::SignatureInvalid
            | OAuthError::MissingAuthorizationCode
            | OAuthError::MissingSubject
            | OAuthError::TokenExchangeFailed(_)
            | OAuthError::SecretStore(_)
            | OAuthError::StateSigning(_) => StatusReason::UnexpectedError,
        }
    }

    /// Text safe to hand to the browser. Storage internals stay in the logs.
    pub fn public_detail(&self) -> String {
        match self {
            OAuthError::SecretStore(_) => "Credential storage is unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_are_derived_from_error_kind() {
        assert_eq!(
            OAuthError::CredentialConfigurationMissing {
                parameter: "/brokerlink/schwab/credentials".into()
            }
            .status_reason(),
            StatusReason::MissingCredentials
        );
        assert_eq!(
            OAuthError::RefreshTokenRevoked {
                provider: BrokerProvider::Schwab
            }
            .status_reason(),
            StatusReason::ReauthorizationRequired
        );
        assert_eq!(
            OAuthError::TokenExchangeFailed("502 Bad Gateway".into()).status_reason(),
            StatusReason::UnexpectedError
        );
    }

    #[test]
    fn storage_errors_do_not_leak_detail() {
        let err = OAuthError::SecretStore(SecretStoreError::Unavailable(
            "connection refused to 10.0.0.5".into(),
        ));
        assert!(!err.public_detail().contains("10.0.0.5"));
    }

    #[test]
    fn reason_codes_serialize_in_snake_case() {
        let value = serde_json::to_value(StatusReason::ReauthorizationRequired).unwrap();
        assert_eq!(value, "reauthorization_required");
    }
}
