use std::convert::Infallible;

use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::debug;

use crate::models::oauth_token::SubjectId;
use crate::routes::auth::claims::Claims;
use crate::utils::jwt::IdentityVerifierProvider;

pub const AUTH_COOKIE: &str = "auth_token";

/// Verified caller identity. The subject scopes every per-user parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthSession {
    pub claims: Claims,
    pub subject: SubjectId,
}

fn identity_token(parts: &Parts) -> Option<String> {
    if let Some(value) = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        let value = value.trim();
        if let Some(token) = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))
        {
            return Some(token.trim().to_string());
        }
    }

    let jar = CookieJar::from_headers(&parts.headers);
    jar.get(AUTH_COOKIE).map(|cookie| cookie.value().to_string())
}

fn authenticate<S: IdentityVerifierProvider>(
    parts: &Parts,
    state: &S,
) -> Result<AuthSession, StatusCode> {
    let token = identity_token(parts).ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = state.identity_verifier().verify(&token).map_err(|err| {
        debug!(?err, "identity token rejected");
        StatusCode::UNAUTHORIZED
    })?;

    let subject = SubjectId::parse(&claims.sub).ok_or(StatusCode::UNAUTHORIZED)?;
    Ok(AuthSession { claims, subject })
}

impl<S> FromRequestParts<S> for AuthSession
where
    S: IdentityVerifierProvider + Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        authenticate(parts, state)
    }
}

/// Routes reachable without a session (the provider callback) still pick
/// one up when present; an invalid token there counts as no session.
impl<S> OptionalFromRequestParts<S> for AuthSession
where
    S: IdentityVerifierProvider + Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(authenticate(parts, state).ok())
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        extract::{FromRequestParts, OptionalFromRequestParts},
        http::{header, Method, Request, StatusCode},
    };
    use axum_extra::extract::cookie::Cookie;

    use super::{AuthSession, AUTH_COOKIE};
    use crate::utils::jwt::test_support::{
        issue_token, test_verifier, TEST_AUDIENCE, TEST_IDENTITY_SECRET,
    };
    use crate::utils::jwt::{IdentityVerifier, IdentityVerifierProvider};

    struct TestKeys(IdentityVerifier);

    impl IdentityVerifierProvider for TestKeys {
        fn identity_verifier(&self) -> &IdentityVerifier {
            &self.0
        }
    }

    fn keys() -> TestKeys {
        TestKeys(test_verifier())
    }

    fn make_jwt(sub: &str) -> String {
        issue_token(TEST_IDENTITY_SECRET, TEST_AUDIENCE, sub, 3600)
    }

    #[tokio::test]
    async fn bearer_token_is_accepted() {
        let keys = keys();
        let jwt = make_jwt("user-123");
        let request = Request::builder()
            .method(Method::GET)
            .uri("/")
            .header(header::AUTHORIZATION, format!("Bearer {jwt}"))
            .body(())
            .unwrap();

        let mut parts = request.into_parts().0;
        let session = <AuthSession as FromRequestParts<TestKeys>>::from_request_parts(
            &mut parts, &keys,
        )
        .await
        .expect("valid bearer token");
        assert_eq!(session.subject.as_str(), "user-123");
    }

    #[tokio::test]
    async fn cookie_token_is_accepted() {
        let keys = keys();
        let cookie = Cookie::new(AUTH_COOKIE, make_jwt("user-456"));
        let request = Request::builder()
            .uri("/")
            .header(header::COOKIE, cookie.to_string())
            .body(())
            .unwrap();

        let mut parts = request.into_parts().0;
        let session = <AuthSession as FromRequestParts<TestKeys>>::from_request_parts(
            &mut parts, &keys,
        )
        .await
        .unwrap();
        assert_eq!(session.subject.as_str(), "user-456");
    }

    #[tokio::test]
    async fn missing_or_invalid_token_is_unauthorized() {
        let keys = keys();
        let request = Request::builder().uri("/").body(()).unwrap();
        let mut parts = request.into_parts().0;
        let result =
            <AuthSession as FromRequestParts<TestKeys>>::from_request_parts(&mut parts, &keys)
                .await;
        assert_eq!(result, Err(StatusCode::UNAUTHORIZED));

        let request = Request::builder()
            .uri("/")
            .header(header::AUTHORIZATION, "Bearer invalid.token.here")
            .body(())
            .unwrap();
        let mut parts = request.into_parts().0;
        let result =
            <AuthSession as FromRequestParts<TestKeys>>::from_request_parts(&mut parts, &keys)
                .await;
        assert_eq!(result, Err(StatusCode::UNAUTHORIZED));
    }

    #[tokio::test]
    async fn subject_that_escapes_namespace_is_unauthorized() {
        let keys = keys();
        let jwt = make_jwt("../other-user");
        let request = Request::builder()
            .uri("/")
            .header(header::AUTHORIZATION, format!("Bearer {jwt}"))
            .body(())
            .unwrap();
        let mut parts = request.into_parts().0;
        let result =
            <AuthSession as FromRequestParts<TestKeys>>::from_request_parts(&mut parts, &keys)
                .await;
        assert_eq!(result, Err(StatusCode::UNAUTHORIZED));
    }

    #[tokio::test]
    async fn optional_session_swallows_bad_tokens() {
        let keys = keys();
        let request = Request::builder()
            .uri("/")
            .header(header::AUTHORIZATION, "Bearer nope")
            .body(())
            .unwrap();
        let mut parts = request.into_parts().0;
        let session =
            <AuthSession as OptionalFromRequestParts<TestKeys>>::from_request_parts(
                &mut parts, &keys,
            )
            .await
            .unwrap();
        assert!(session.is_none());
    }
}
