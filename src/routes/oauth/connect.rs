use super::{
    helpers::{
        error_message_for_redirect, map_oauth_error, parse_provider, redirect_success,
        redirect_with_error, resolve_return_to, AuthorizeQuery, AuthorizeUrlResponse,
        CallbackQuery,
    },
    prelude::*,
};

async fn authorization_url(
    app_state: &AppState,
    session: &AuthSession,
    provider: &str,
    query: &AuthorizeQuery,
) -> Result<Url, Response> {
    let provider = parse_provider(provider)?;
    let return_to = resolve_return_to(&app_state.config, query.return_to.as_deref())?;

    app_state
        .gate(provider)
        .start_authorization(Some(&session.subject), return_to.as_deref())
        .await
        .map_err(map_oauth_error)
}

/// `GET /api/{provider}/authorize`: sends the browser to the broker.
pub async fn authorize(
    State(app_state): State<AppState>,
    session: AuthSession,
    Path(provider): Path<String>,
    Query(query): Query<AuthorizeQuery>,
) -> Response {
    match authorization_url(&app_state, &session, &provider, &query).await {
        Ok(url) => Redirect::to(url.as_str()).into_response(),
        Err(response) => response,
    }
}

/// `GET /api/{provider}/authorize-url`: same URL as JSON, for popup flows.
pub async fn authorize_url(
    State(app_state): State<AppState>,
    session: AuthSession,
    Path(provider): Path<String>,
    Query(query): Query<AuthorizeQuery>,
) -> Response {
    match authorization_url(&app_state, &session, &provider, &query).await {
        Ok(url) => Json(AuthorizeUrlResponse {
            success: true,
            url: url.to_string(),
        })
        .into_response(),
        Err(response) => response,
    }
}

/// `GET /api/{provider}/callback`. Reached by a top-level browser redirect
/// from the broker, so the session is optional; the signed state carries
/// the subject.
pub async fn callback(
    State(app_state): State<AppState>,
    session: Option<AuthSession>,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let provider = match parse_provider(&provider) {
        Ok(provider) => provider,
        Err(response) => return response,
    };
    let config = &app_state.config;

    if let Some(error) = query.error.as_deref() {
        let message = query.error_description.as_deref().unwrap_or(error);
        warn!(%provider, %error, "broker returned an authorization error");
        return redirect_with_error(config, provider, None, message);
    }

    match app_state
        .gate(provider)
        .handle_callback(
            query.code.as_deref(),
            query.state.as_deref(),
            session.as_ref().map(|session| &session.subject),
        )
        .await
    {
        Ok(outcome) => redirect_success(config, provider, outcome.return_to.as_deref()),
        Err(failure) => {
            error!(%provider, error = %failure.error, "broker callback failed");
            redirect_with_error(
                config,
                provider,
                failure.return_to.as_deref(),
                &error_message_for_redirect(&failure.error),
            )
        }
    }
}
