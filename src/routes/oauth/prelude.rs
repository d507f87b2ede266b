pub(crate) use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Json,
};
pub(crate) use reqwest::Url;
pub(crate) use serde::{Deserialize, Serialize};
pub(crate) use tracing::{error, warn};

pub(crate) use crate::{
    config::Config,
    models::oauth_token::BrokerProvider,
    responses::JsonResponse,
    routes::auth::session::AuthSession,
    services::oauth::errors::OAuthError,
    state::AppState,
};
