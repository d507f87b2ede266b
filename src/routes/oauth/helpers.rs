use super::prelude::*;

const DEFAULT_RETURN_PATH: &str = "/dashboard";

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AuthorizeQuery {
    #[serde(default, alias = "returnTo")]
    pub(crate) return_to: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CallbackQuery {
    pub(crate) code: Option<String>,
    pub(crate) state: Option<String>,
    pub(crate) error: Option<String>,
    pub(crate) error_description: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct AuthorizeUrlResponse {
    pub(crate) success: bool,
    pub(crate) url: String,
}

pub(crate) fn parse_provider(raw: &str) -> Result<BrokerProvider, Response> {
    BrokerProvider::parse(raw)
        .ok_or_else(|| JsonResponse::bad_request("Unknown provider").into_response())
}

/// Normalizes a caller-supplied return target to an absolute URL on the
/// frontend origin. Relative paths are anchored to the origin; anything
/// pointing elsewhere is refused.
pub(crate) fn resolve_return_to(config: &Config, requested: Option<&str>) -> Result<Option<String>, Response> {
    let Some(raw) = requested.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(None);
    };

    let refused = || JsonResponse::bad_request("return_to must point at the application").into_response();

    let origin = Url::parse(&config.frontend_origin).map_err(|err| {
        error!(%err, "frontend origin is not a valid URL");
        JsonResponse::server_error("Frontend origin is misconfigured").into_response()
    })?;

    let candidate = if raw.starts_with('/') && !raw.starts_with("//") && !raw.starts_with("/\\") {
        origin.join(raw).map_err(|_| refused())?
    } else {
        Url::parse(raw).map_err(|_| refused())?
    };

    if candidate.origin() != origin.origin() {
        warn!(return_to = %raw, "refusing off-origin return target");
        return Err(refused());
    }
    Ok(Some(candidate.to_string()))
}

/// Where the browser lands after the callback. A signed target is used only
/// when it is still on the frontend origin.
fn landing_url(config: &Config, return_to: Option<&str>) -> Option<Url> {
    let origin = Url::parse(&config.frontend_origin).ok()?;
    if let Some(target) = return_to.and_then(|raw| Url::parse(raw).ok()) {
        if target.origin() == origin.origin() {
            return Some(target);
        }
    }
    origin.join(DEFAULT_RETURN_PATH).ok()
}

fn redirect_with(config: &Config, return_to: Option<&str>, pairs: &[(&str, &str)]) -> Response {
    let Some(mut url) = landing_url(config, return_to) else {
        error!("frontend origin is not a valid URL; cannot redirect");
        return JsonResponse::server_error("Frontend origin is misconfigured").into_response();
    };
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in pairs {
            query.append_pair(key, value);
        }
    }
    Redirect::to(url.as_str()).into_response()
}

pub(crate) fn redirect_success(
    config: &Config,
    provider: BrokerProvider,
    return_to: Option<&str>,
) -> Response {
    redirect_with(
        config,
        return_to,
        &[("oauth", "success"), ("provider", provider.as_str())],
    )
}

pub(crate) fn redirect_with_error(
    config: &Config,
    provider: BrokerProvider,
    return_to: Option<&str>,
    message: &str,
) -> Response {
    redirect_with(
        config,
        return_to,
        &[
            ("oauth", "error"),
            ("provider", provider.as_str()),
            ("message", message),
        ],
    )
}

pub fn map_oauth_error(err: OAuthError) -> Response {
    match err {
        OAuthError::SignatureInvalid
        | OAuthError::MissingAuthorizationCode
        | OAuthError::MissingSubject => JsonResponse::bad_request(&err.to_string()).into_response(),
        OAuthError::NotConnected { provider } => JsonResponse::with_code(
            StatusCode::UNAUTHORIZED,
            &format!("{provider} is not connected"),
            "not_connected",
        )
        .into_response(),
        OAuthError::RefreshTokenRevoked { .. } | OAuthError::MissingRefreshToken => {
            JsonResponse::with_code(
                StatusCode::UNAUTHORIZED,
                "The brokerage connection has expired. Please reconnect.",
                "reauthorization_required",
            )
            .into_response()
        }
        OAuthError::CredentialConfigurationMissing { ref parameter } => {
            error!(%parameter, "provider credentials are not configured");
            JsonResponse::with_code(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Brokerage integration is not configured",
                "missing_credentials",
            )
            .into_response()
        }
        OAuthError::TokenExchangeFailed(ref detail) => {
            error!(%detail, "provider token request failed");
            JsonResponse::bad_gateway("The brokerage did not accept the token request")
                .into_response()
        }
        OAuthError::SecretStore(ref e) => {
            error!(error = %e, "secret store failure");
            JsonResponse::bad_gateway(&err.public_detail()).into_response()
        }
        OAuthError::StateSigning(ref e) => {
            error!(error = %e, "state signing failed");
            JsonResponse::server_error("Could not start authorization").into_response()
        }
    }
}

pub(crate) fn error_message_for_redirect(err: &OAuthError) -> String {
    match err {
        OAuthError::SignatureInvalid => {
            "The authorization request expired or was tampered with. Please try again.".to_string()
        }
        OAuthError::MissingAuthorizationCode => {
            "The brokerage did not return an authorization code.".to_string()
        }
        OAuthError::MissingSubject => "Sign in before connecting a brokerage account.".to_string(),
        OAuthError::TokenExchangeFailed(_) => {
            "The brokerage rejected the authorization. Please try again.".to_string()
        }
        OAuthError::MissingRefreshToken => {
            "The brokerage did not return a refresh token.".to_string()
        }
        OAuthError::NotConnected { .. } | OAuthError::RefreshTokenRevoked { .. } => {
            "The brokerage connection is no longer valid. Please reconnect.".to_string()
        }
        OAuthError::CredentialConfigurationMissing { .. } => {
            "Brokerage integration is not configured.".to_string()
        }
        OAuthError::SecretStore(_) => "Could not save brokerage tokens. Please try again.".to_string(),
        OAuthError::StateSigning(_) => "Could not start authorization.".to_string(),
    }
}
