use std::fmt;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// Longest subject identifier accepted from the identity provider.
const MAX_SUBJECT_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerProvider {
    Schwab,
    TastyTrade,
}

impl BrokerProvider {
    pub const ALL: [BrokerProvider; 2] = [BrokerProvider::Schwab, BrokerProvider::TastyTrade];

    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerProvider::Schwab => "schwab",
            BrokerProvider::TastyTrade => "tastytrade",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "schwab" => Some(BrokerProvider::Schwab),
            "tastytrade" => Some(BrokerProvider::TastyTrade),
            _ => None,
        }
    }
}

impl fmt::Display for BrokerProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verified identity of the caller, used to scope every per-user parameter.
///
/// Only constructed through [`SubjectId::parse`], which rejects values that
/// could escape the per-user parameter namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.len() > MAX_SUBJECT_LEN {
            return None;
        }
        if trimmed
            .chars()
            .any(|c| c == '/' || c.is_control() || c.is_whitespace())
        {
            return None;
        }
        if trimmed == "." || trimmed == ".." {
            return None;
        }
        Some(SubjectId(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl TokenRecord {
    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.trim().is_empty()
    }

    /// True while the access token stays valid beyond `buffer` from `now`.
    pub fn is_fresh_at(&self, now: OffsetDateTime, buffer: Duration) -> bool {
        self.expires_at > now + buffer
    }
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"<redacted>")
            .field("refresh_token_set", &self.has_refresh_token())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub session_secret: String,
}

impl ProviderCredentials {
    pub fn is_complete(&self) -> bool {
        !self.client_id.trim().is_empty()
            && !self.client_secret.trim().is_empty()
            && !self.session_secret.trim().is_empty()
    }
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}
