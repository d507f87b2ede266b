use axum::{
    routing::{delete, get},
    Router,
};

use crate::state::AppState;

pub mod accounts;
pub mod connect;
pub(crate) mod helpers;
pub(crate) mod prelude;

pub use accounts::{connection_status, disconnect_connection};
pub use connect::{authorize, authorize_url, callback};

/// Broker connection routes, mounted under `/api`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{provider}/authorize", get(authorize))
        .route("/{provider}/authorize-url", get(authorize_url))
        .route("/{provider}/callback", get(callback))
        .route("/{provider}/status", get(connection_status))
        .route("/{provider}/connection", delete(disconnect_connection))
}
