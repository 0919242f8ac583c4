//! HTTP host for Sign in with Apple.
//!
//! Serves the redirect and callback endpoints on top of
//! [`siwa_auth::AppleStrategy`] and keeps signed-in users in an in-memory
//! [`UserDirectory`](users::UserDirectory).

pub mod config;
pub mod routes;
pub mod users;

use axum::{Router, routing::get};
use siwa_auth::AppleStrategy;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::CookieConfig;
use crate::users::UserDirectory;

/// Shared application state.
pub struct AppState {
    pub strategy: AppleStrategy<UserDirectory>,
    pub users: UserDirectory,
    pub cookies: CookieConfig,
    /// Origin used to resolve a relative callback URL.
    pub public_url: Option<String>,
}

/// Builds the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route(routes::LOGIN_PATH, get(routes::login))
        .route(
            "/auth/apple/callback",
            get(routes::callback_query).post(routes::callback_form),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
