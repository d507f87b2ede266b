//! Verification of identity tokens minted by the upstream identity provider.
//! This service never issues identity tokens of its own.

use std::collections::HashSet;
use std::env;

use jsonwebtoken::{decode, errors::Error as JwtError, Algorithm, DecodingKey, Validation};
use thiserror::Error;

use crate::routes::auth::claims::Claims;

/// Shortest shared secret accepted for HS256 verification.
pub const MIN_IDENTITY_SECRET_LEN: usize = 32;
const MIN_DISTINCT_SECRET_BYTES: usize = 8;
const CLOCK_LEEWAY_SECS: u64 = 30;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityKeyError {
    #[error("IDENTITY_JWT_SECRET must be set")]
    Missing,
    #[error(
        "IDENTITY_JWT_SECRET is {actual} bytes; at least {min} are required",
        min = MIN_IDENTITY_SECRET_LEN
    )]
    TooShort { actual: usize },
    #[error("IDENTITY_JWT_SECRET uses only {distinct} distinct bytes")]
    Repetitive { distinct: usize },
}

/// Checks identity tokens against the shared secret, issuer and audience
/// configured for this deployment.
#[derive(Clone)]
pub struct IdentityVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for IdentityVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityVerifier")
            .field("iss", &self.validation.iss)
            .field("aud", &self.validation.aud)
            .finish_non_exhaustive()
    }
}

impl IdentityVerifier {
    pub fn from_env(issuer: &str, audience: &str) -> Result<Self, IdentityKeyError> {
        let secret = env::var("IDENTITY_JWT_SECRET").map_err(|_| IdentityKeyError::Missing)?;
        Self::new(secret.as_bytes(), issuer, audience)
    }

    pub fn new(secret: &[u8], issuer: &str, audience: &str) -> Result<Self, IdentityKeyError> {
        if secret.len() < MIN_IDENTITY_SECRET_LEN {
            return Err(IdentityKeyError::TooShort {
                actual: secret.len(),
            });
        }
        let distinct = secret.iter().collect::<HashSet<_>>().len();
        if distinct < MIN_DISTINCT_SECRET_BYTES {
            return Err(IdentityKeyError::Repetitive { distinct });
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);
        validation.leeway = CLOCK_LEEWAY_SECS;

        Ok(Self {
            key: DecodingKey::from_secret(secret),
            validation,
        })
    }

    pub fn verify(&self, token: &str) -> Result<Claims, JwtError> {
        decode::<Claims>(token, &self.key, &self.validation).map(|data| data.claims)
    }
}

/// Implemented by router state so the session extractor can verify tokens.
pub trait IdentityVerifierProvider {
    fn identity_verifier(&self) -> &IdentityVerifier;
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn short_secret_is_rejected() {
        let err = IdentityVerifier::new(b"too-short", TEST_ISSUER, TEST_AUDIENCE).unwrap_err();
        assert_eq!(err, IdentityKeyError::TooShort { actual: 9 });
    }

    #[test]
    fn repetitive_secret_is_rejected() {
        let secret = "ab".repeat(MIN_IDENTITY_SECRET_LEN);
        let err = IdentityVerifier::new(secret.as_bytes(), TEST_ISSUER, TEST_AUDIENCE).unwrap_err();
        assert_eq!(err, IdentityKeyError::Repetitive { distinct: 2 });
    }

    #[test]
    fn provider_token_is_accepted() {
        let token = issue_token(TEST_IDENTITY_SECRET, TEST_AUDIENCE, "user-123", 60);
        let claims = test_verifier().verify(&token).unwrap();
        assert_eq!(claims.sub, "user-123");
        assert_eq!(claims.iss, TEST_ISSUER);
    }

    #[test]
    fn foreign_audience_and_foreign_secret_are_rejected() {
        let verifier = test_verifier();

        let token = issue_token(TEST_IDENTITY_SECRET, "another-service", "user-123", 60);
        assert!(verifier.verify(&token).is_err());

        let token = issue_token(
            "fedcba9876543210fedcba9876543210",
            TEST_AUDIENCE,
            "user-123",
            60,
        );
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn expired_token_is_rejected_past_leeway() {
        let token = issue_token(TEST_IDENTITY_SECRET, TEST_AUDIENCE, "user-123", -600);
        assert!(test_verifier().verify(&token).is_err());
    }
}
