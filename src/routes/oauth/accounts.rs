use super::{
    helpers::{map_oauth_error, parse_provider},
    prelude::*,
};

pub async fn connection_status(
    State(app_state): State<AppState>,
    session: AuthSession,
    Path(provider): Path<String>,
) -> Response {
    let provider = match parse_provider(&provider) {
        Ok(provider) => provider,
        Err(response) => return response,
    };

    let status = app_state.gate(provider).get_status(&session.subject).await;
    Json(status).into_response()
}

pub async fn disconnect_connection(
    State(app_state): State<AppState>,
    session: AuthSession,
    Path(provider): Path<String>,
) -> Response {
    let provider = match parse_provider(&provider) {
        Ok(provider) => provider,
        Err(response) => return response,
    };

    match app_state.gate(provider).disconnect(&session.subject).await {
        Ok(true) => JsonResponse::success("Disconnected").into_response(),
        Ok(false) => JsonResponse::success("No connection to remove").into_response(),
        Err(err) => map_oauth_error(err),
    }
}
