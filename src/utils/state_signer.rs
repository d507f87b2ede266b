use base64::{prelude::BASE64_URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use time::{Duration, OffsetDateTime};

type HmacSha256 = Hmac<Sha256>;

/// Default lifetime of an authorization `state` token.
pub const DEFAULT_STATE_MAX_AGE: Duration = Duration::minutes(10);
/// Tolerated clock skew for states issued "in the future".
const MAX_CLOCK_SKEW: Duration = Duration::seconds(60);
const NONCE_BYTES: usize = 24;

#[derive(Debug, Error)]
pub enum StateSignerError {
    #[error("session signing secret must not be empty")]
    EmptySecret,
    #[error("session signing secret is not usable as an HMAC key")]
    InvalidKey,
    #[error("failed to encode state payload: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct StatePayload {
    nonce: String,
    #[serde(default)]
    subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    return_to: Option<String>,
    issued_at: i64,
}

/// Decoded contents of a verified authorization `state`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedState {
    pub nonce: String,
    /// Empty for anonymous popup flows.
    pub subject: String,
    pub issued_at: OffsetDateTime,
    pub return_to: Option<String>,
}

/// Signs and verifies OAuth `state` values of the form
/// `base64url(json payload) + "." + hex(hmac_sha256(encoded payload))`.
///
/// Verification never explains a failure: tampered, malformed and stale
/// states all come back as `None`.
#[derive(Clone)]
pub struct StateSigner {
    mac: HmacSha256,
    max_age: Duration,
}

impl std::fmt::Debug for StateSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateSigner")
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

impl StateSigner {
    pub fn new(secret: &[u8], max_age: Duration) -> Result<Self, StateSignerError> {
        if secret.is_empty() {
            return Err(StateSignerError::EmptySecret);
        }
        let mac = HmacSha256::new_from_slice(secret).map_err(|_| StateSignerError::InvalidKey)?;
        Ok(Self { mac, max_age })
    }

    pub fn sign(&self, subject: &str, return_to: Option<&str>) -> Result<String, StateSignerError> {
        self.sign_at(subject, return_to, OffsetDateTime::now_utc())
    }

    pub fn sign_at(
        &self,
        subject: &str,
        return_to: Option<&str>,
        now: OffsetDateTime,
    ) -> Result<String, StateSignerError> {
        let payload = StatePayload {
            nonce: generate_nonce(),
            subject: subject.to_string(),
            return_to: return_to.map(str::to_string),
            issued_at: now.unix_timestamp(),
        };
        let encoded = BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload)?);
        let signature = self.signature_hex(encoded.as_bytes());
        Ok(format!("{encoded}.{signature}"))
    }

    pub fn verify(&self, token: &str) -> Option<SignedState> {
        self.verify_at(token, OffsetDateTime::now_utc())
    }

    pub fn verify_at(&self, token: &str, now: OffsetDateTime) -> Option<SignedState> {
        let (encoded, provided) = token.rsplit_once('.')?;
        if encoded.is_empty() {
            return None;
        }

        let expected = self.signature_hex(encoded.as_bytes());
        if expected.len() != provided.len() {
            return None;
        }
        if !bool::from(expected.as_bytes().ct_eq(provided.as_bytes())) {
            return None;
        }

        let raw = BASE64_URL_SAFE_NO_PAD.decode(encoded).ok()?;
        let payload: StatePayload = serde_json::from_slice(&raw).ok()?;
        if payload.nonce.trim().is_empty() {
            return None;
        }

        let issued_at = OffsetDateTime::from_unix_timestamp(payload.issued_at).ok()?;
        if now - issued_at > self.max_age || issued_at - now > MAX_CLOCK_SKEW {
            return None;
        }

        Some(SignedState {
            nonce: payload.nonce,
            subject: payload.subject,
            issued_at,
            return_to: payload.return_to,
        })
    }

    fn signature_hex(&self, message: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(message);
        hex::encode(mac.finalize().into_bytes())
    }
}

pub fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}
