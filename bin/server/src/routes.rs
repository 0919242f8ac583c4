//! Sign in with Apple routes.
//!
//! - `GET /auth/apple` starts the flow and redirects to Apple
//! - `GET|POST /auth/apple/callback` completes it (`POST` when Apple uses
//!   `response_mode=form_post`)
//! - `GET /health`

use axum::{
    Form, Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use oauth2::CsrfToken;
use rootcause::prelude::Report;
use serde_json::json;
use siwa_auth::{AuthError, AuthOutcome, AuthenticateOptions, CallbackRequest};
use std::sync::Arc;
use time::Duration as TimeDuration;
use tracing::{error, info};

use crate::AppState;

/// Cookie holding `state:nonce` between redirect and callback.
pub const AUTH_STATE_COOKIE: &str = "apple_auth_state";

/// Path of the route that starts sign-in.
pub const LOGIN_PATH: &str = "/auth/apple";

pub async fn health() -> &'static str {
    "ok"
}

/// Starts sign-in by redirecting to Apple.
pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<impl IntoResponse, RouteError> {
    let csrf = CsrfToken::new_random();
    let nonce = CsrfToken::new_random();

    let options = state
        .options()
        .with_state(csrf.secret().clone())
        .with_nonce(nonce.secret().clone());
    let url = state
        .strategy
        .authorization_url(&options)
        .map_err(RouteError::SignIn)?;

    let cookie = Cookie::build((
        AUTH_STATE_COOKIE,
        format!("{}:{}", csrf.secret(), nonce.secret()),
    ))
    .path("/")
    .http_only(true)
    .secure(state.cookies.secure)
    .same_site(state.same_site())
    .max_age(TimeDuration::minutes(10));

    Ok((jar.add(cookie), Redirect::to(&url)))
}

/// Callback with parameters in the query string.
pub async fn callback_query(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(request): Query<CallbackRequest>,
) -> Response {
    complete(&state, jar, request).await
}

/// Callback with parameters in a form body.
pub async fn callback_form(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(request): Form<CallbackRequest>,
) -> Response {
    complete(&state, jar, request).await
}

async fn complete(state: &AppState, jar: CookieJar, request: CallbackRequest) -> Response {
    let outcome = match expected_state(&jar, &request) {
        Ok(nonce) => {
            let options = state.options().with_nonce(nonce);
            sign_in_response(state.strategy.authenticate(&request, &options).await)
        }
        Err(e) => e.into_response(),
    };

    let remove = Cookie::build((AUTH_STATE_COOKIE, ""))
        .path("/")
        .max_age(TimeDuration::ZERO);

    (jar.add(remove), outcome).into_response()
}

/// Checks the callback `state` against the cookie and returns the nonce.
fn expected_state(jar: &CookieJar, request: &CallbackRequest) -> Result<String, RouteError> {
    let cookie = jar
        .get(AUTH_STATE_COOKIE)
        .ok_or(RouteError::MissingAuthState)?;
    let (csrf, nonce) = cookie
        .value()
        .split_once(':')
        .ok_or(RouteError::InvalidAuthState)?;

    if request.state.as_deref() != Some(csrf) {
        return Err(RouteError::StateMismatch);
    }
    Ok(nonce.to_string())
}

fn sign_in_response(outcome: AuthOutcome<crate::users::User>) -> Response {
    match outcome {
        AuthOutcome::Success { user, info } => {
            info!(user_id = %user.id(), "signed in");
            (StatusCode::OK, Json(json!({ "user": user, "state": info.state }))).into_response()
        }
        AuthOutcome::Fail(info) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "access_denied", "message": info.message })),
        )
            .into_response(),
        AuthOutcome::Error(report) => RouteError::SignIn(report).into_response(),
        // A callback with neither code nor error restarts sign-in through
        // `login`, which issues a fresh state, nonce and cookie.
        AuthOutcome::Redirect(_) => Redirect::to(LOGIN_PATH).into_response(),
    }
}

/// Route errors.
#[derive(Debug)]
pub enum RouteError {
    MissingAuthState,
    InvalidAuthState,
    StateMismatch,
    SignIn(Report<AuthError>),
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match &self {
            Self::MissingAuthState => (
                StatusCode::BAD_REQUEST,
                "missing_auth_state",
                "Missing auth state".to_string(),
            ),
            Self::InvalidAuthState => (
                StatusCode::BAD_REQUEST,
                "invalid_auth_state",
                "Invalid auth state".to_string(),
            ),
            Self::StateMismatch => (
                StatusCode::BAD_REQUEST,
                "state_mismatch",
                "State mismatch".to_string(),
            ),
            Self::SignIn(report) => {
                let err = report.current_context();
                error!(kind = err.kind(), error = %report, "sign-in failed");
                let (status, message) = match err {
                    AuthError::Authorization { .. } => (StatusCode::BAD_GATEWAY, err.to_string()),
                    AuthError::Configuration { .. } | AuthError::Verify => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal server error".to_string(),
                    ),
                    AuthError::TokenExchange { .. }
                    | AuthError::MissingIdentityToken
                    | AuthError::InvalidIdentityToken { .. } => {
                        (StatusCode::BAD_GATEWAY, "Authentication failed".to_string())
                    }
                };
                (status, err.kind(), message)
            }
        };

        (status, Json(json!({ "error": kind, "message": message }))).into_response()
    }
}

impl AppState {
    fn options(&self) -> AuthenticateOptions {
        AuthenticateOptions {
            origin: self.public_url.clone(),
            ..AuthenticateOptions::default()
        }
    }

    /// Apple's `form_post` callback is a cross-site POST, which only carries
    /// `SameSite=None` cookies. Browsers accept those only when Secure.
    fn same_site(&self) -> SameSite {
        if self.cookies.secure {
            SameSite::None
        } else {
            SameSite::Lax
        }
    }
}
