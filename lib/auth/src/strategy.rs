//! The sign-in state machine.
//!
//! [`AppleStrategy::authenticate`] looks at one inbound request and drives it
//! to exactly one [`AuthOutcome`]:
//!
//! 1. `error=access_denied` (or Apple's `user_cancelled_authorize`): `Fail`
//! 2. any other `error`: `Error` with the provider's code, description, URI
//! 3. a `code`: exchange, verify the identity token, run the verify
//!    callback, then `Success`, `Fail` or `Error`
//! 4. neither: `Redirect` to Apple's authorization endpoint
//!
//! The steps of one request run strictly in order. Nothing is retried.
//! Dropping the returned future abandons the request; the verify callback
//! never runs after that point.

use crate::authorize::{AuthorizationRequest, resolve_callback_url};
use crate::config::ProviderConfig;
use crate::error::AuthError;
use crate::http::build_http_client;
use crate::id_token::{DEFAULT_LEEWAY, IdTokenVerifier};
use crate::jwks::{JwksCache, KeySource};
use crate::profile::{FirstAuthorizationUser, Profile};
use crate::token::{TokenClient, TokenExchange};
use async_trait::async_trait;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use siwa_core::{Clock, SystemClock};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Name of the strategy and value of [`Profile::provider`].
pub const PROVIDER_NAME: &str = "apple";

/// Error codes that mean the user declined rather than something broke.
const DENIAL_CODES: &[&str] = &["access_denied", "user_cancelled_authorize"];

/// Parameters of an inbound request, from the query string or a
/// `form_post` body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CallbackRequest {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub error_uri: Option<String>,
    /// JSON user payload, sent on first authorization only.
    #[serde(default)]
    pub user: Option<String>,
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| !v.is_empty())
}

/// Per-call overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthenticateOptions {
    /// Replaces the configured callback URL.
    pub callback_url: Option<String>,
    /// Replaces the configured scopes, even when empty.
    pub scope: Option<Vec<String>>,
    /// Opaque value echoed back by Apple on the callback.
    pub state: Option<String>,
    /// Sent on redirect; required to match the identity token on callback.
    pub nonce: Option<String>,
    /// Scheme and host used to resolve a relative callback URL.
    pub origin: Option<String>,
}

impl AuthenticateOptions {
    #[must_use]
    pub fn with_callback_url(mut self, callback_url: impl Into<String>) -> Self {
        self.callback_url = Some(callback_url.into());
        self
    }

    #[must_use]
    pub fn with_scope<I, S>(mut self, scope: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope = Some(scope.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    #[must_use]
    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

/// Extra information attached to a `Success` or `Fail` outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// The `state` parameter of the callback request, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// What the verify callback decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict<U> {
    /// `None` rejects the sign-in.
    pub user: Option<U>,
    pub info: AuthInfo,
}

impl<U> Verdict<U> {
    /// Accepts the sign-in as `user`.
    #[must_use]
    pub fn accept(user: U) -> Self {
        Self {
            user: Some(user),
            info: AuthInfo::default(),
        }
    }

    /// Rejects the sign-in with a message for the user.
    #[must_use]
    pub fn reject(message: impl Into<String>) -> Self {
        Self {
            user: None,
            info: AuthInfo {
                message: Some(message.into()),
                state: None,
            },
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.info.message = Some(message.into());
        self
    }
}

/// Maps a verified Apple identity to an application user.
///
/// Called at most once per request, after the identity token has been
/// verified.
#[async_trait]
pub trait Verify: Send + Sync {
    type User: Send;

    /// # Errors
    ///
    /// Any error becomes an `Error` outcome wrapped in
    /// [`AuthError::Verify`].
    async fn verify(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        profile: Profile,
    ) -> Result<Verdict<Self::User>, Report>;
}

/// The single terminal result of one `authenticate` call.
#[derive(Debug)]
pub enum AuthOutcome<U> {
    /// Send the user agent to this URL.
    Redirect(String),
    Success { user: U, info: AuthInfo },
    /// The user declined, or the verify callback rejected them.
    Fail(AuthInfo),
    Error(Report<AuthError>),
}

impl<U> AuthOutcome<U> {
    /// Returns the error kind of an `Error` outcome.
    #[must_use]
    pub fn error(&self) -> Option<&AuthError> {
        match self {
            Self::Error(report) => Some(report.current_context()),
            _ => None,
        }
    }
}

enum Step<'a> {
    Denied {
        code: &'a str,
        description: Option<&'a str>,
    },
    ProviderError {
        code: &'a str,
        description: Option<&'a str>,
        uri: Option<&'a str>,
    },
    Exchange {
        code: &'a str,
    },
    Redirect,
}

impl<'a> Step<'a> {
    fn classify(request: &'a CallbackRequest) -> Self {
        if let Some(code) = non_empty(request.error.as_ref()) {
            let description = non_empty(request.error_description.as_ref());
            if DENIAL_CODES.contains(&code) {
                return Self::Denied { code, description };
            }
            return Self::ProviderError {
                code,
                description,
                uri: non_empty(request.error_uri.as_ref()),
            };
        }
        match non_empty(request.code.as_ref()) {
            Some(code) => Self::Exchange { code },
            None => Self::Redirect,
        }
    }
}

/// Sign in with Apple.
pub struct AppleStrategy<V> {
    config: ProviderConfig,
    verify: V,
    token_exchange: Arc<dyn TokenExchange>,
    verifier: IdTokenVerifier,
}

impl<V> std::fmt::Debug for AppleStrategy<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppleStrategy")
            .field("config", &self.config)
            .field("verifier", &self.verifier)
            .finish_non_exhaustive()
    }
}

impl<V: Verify> AppleStrategy<V> {
    pub const NAME: &'static str = PROVIDER_NAME;

    /// Creates a strategy talking to Apple over HTTP.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(config: ProviderConfig, verify: V) -> Result<Self, Report<AuthError>> {
        Self::builder().config(config).verify(verify).build()
    }

    #[must_use]
    pub fn builder() -> AppleStrategyBuilder<V> {
        AppleStrategyBuilder::default()
    }

    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Builds the authorization redirect for `options`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the client id, endpoint or callback
    /// URL is unusable.
    pub fn authorization_url(&self, options: &AuthenticateOptions) -> Result<String, Report<AuthError>> {
        let redirect_uri = resolve_callback_url(
            &self.config,
            options.callback_url.as_deref(),
            options.origin.as_deref(),
        )?;
        AuthorizationRequest::new(
            &self.config,
            redirect_uri,
            options.scope.as_deref(),
            options.state.clone(),
            options.nonce.clone(),
        )?
        .to_url()
    }

    /// Processes one inbound request.
    #[instrument(skip_all, fields(strategy = PROVIDER_NAME))]
    pub async fn authenticate(
        &self,
        request: &CallbackRequest,
        options: &AuthenticateOptions,
    ) -> AuthOutcome<V::User> {
        match Step::classify(request) {
            Step::Denied { code, description } => {
                info!(code, "user denied authorization");
                AuthOutcome::Fail(AuthInfo {
                    message: Some(description.unwrap_or(code).to_string()),
                    state: request.state.clone(),
                })
            }
            Step::ProviderError {
                code,
                description,
                uri,
            } => {
                warn!(code, description, "provider returned an error");
                AuthOutcome::Error(
                    AuthError::Authorization {
                        code: code.to_string(),
                        description: description.map(str::to_string),
                        uri: uri.map(str::to_string),
                    }
                    .into(),
                )
            }
            Step::Exchange { code } => match self.complete(code, request, options).await {
                Ok(outcome) => outcome,
                Err(report) => {
                    warn!(kind = report.current_context().kind(), error = %report, "sign-in failed");
                    AuthOutcome::Error(report)
                }
            },
            Step::Redirect => match self.authorization_url(options) {
                Ok(url) => {
                    debug!("redirecting to authorization endpoint");
                    AuthOutcome::Redirect(url)
                }
                Err(report) => {
                    warn!(kind = report.current_context().kind(), error = %report, "sign-in failed");
                    AuthOutcome::Error(report)
                }
            },
        }
    }

    async fn complete(
        &self,
        code: &str,
        request: &CallbackRequest,
        options: &AuthenticateOptions,
    ) -> Result<AuthOutcome<V::User>, Report<AuthError>> {
        let redirect_uri = resolve_callback_url(
            &self.config,
            options.callback_url.as_deref(),
            options.origin.as_deref(),
        )?;

        let tokens = self
            .token_exchange
            .exchange(&self.config, code, redirect_uri.as_deref())
            .await?;

        let claims = self
            .verifier
            .verify(&tokens.id_token, self.config.client_id(), options.nonce.as_deref())
            .await?;

        let first = non_empty(request.user.as_ref()).and_then(FirstAuthorizationUser::parse);
        let profile = Profile::from_claims(claims, first);

        debug!(subject = %profile.id, "running verify callback");
        let verdict = self
            .verify
            .verify(&tokens.access_token, tokens.refresh_token.as_deref(), profile)
            .await
            .map_err(|report| report.context(AuthError::Verify))?;

        let mut info = verdict.info;
        if let Some(state) = &request.state {
            info.state = Some(state.clone());
        }

        Ok(match verdict.user {
            Some(user) => AuthOutcome::Success { user, info },
            None => {
                info!("verify callback rejected the user");
                AuthOutcome::Fail(info)
            }
        })
    }
}

/// Builder for `AppleStrategy`.
pub struct AppleStrategyBuilder<V> {
    config: Option<ProviderConfig>,
    verify: Option<V>,
    token_exchange: Option<Arc<dyn TokenExchange>>,
    key_source: Option<Arc<dyn KeySource>>,
    clock: Option<Arc<dyn Clock>>,
    leeway: Duration,
}

impl<V> Default for AppleStrategyBuilder<V> {
    fn default() -> Self {
        Self {
            config: None,
            verify: None,
            token_exchange: None,
            key_source: None,
            clock: None,
            leeway: DEFAULT_LEEWAY,
        }
    }
}

impl<V: Verify> AppleStrategyBuilder<V> {
    #[must_use]
    pub fn config(mut self, config: ProviderConfig) -> Self {
        self.config = Some(config);
        self
    }

    #[must_use]
    pub fn verify(mut self, verify: V) -> Self {
        self.verify = Some(verify);
        self
    }

    /// Replaces the HTTP token exchange.
    #[must_use]
    pub fn token_exchange(mut self, exchange: Arc<dyn TokenExchange>) -> Self {
        self.token_exchange = Some(exchange);
        self
    }

    /// Replaces the cached JWKS key source.
    #[must_use]
    pub fn key_source(mut self, keys: Arc<dyn KeySource>) -> Self {
        self.key_source = Some(keys);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Clock skew tolerated on identity token `exp` and `iat`.
    #[must_use]
    pub fn leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Builds the strategy.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no config or verify callback was
    /// supplied, the configured private key file cannot be read, or the
    /// HTTP client cannot be built.
    pub fn build(self) -> Result<AppleStrategy<V>, Report<AuthError>> {
        let config = self
            .config
            .ok_or_else(|| AuthError::configuration("provider configuration is required"))?
            .with_loaded_private_key()?;
        let verify = self
            .verify
            .ok_or_else(|| AuthError::configuration("verify callback is required"))?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let http = if self.token_exchange.is_none() || self.key_source.is_none() {
            Some(build_http_client()?)
        } else {
            None
        };

        let token_exchange: Arc<dyn TokenExchange> = match (self.token_exchange, &http) {
            (Some(exchange), _) => exchange,
            (None, Some(http)) => Arc::new(TokenClient::with_http(http.clone(), Arc::clone(&clock))),
            (None, None) => Arc::new(TokenClient::new(Arc::clone(&clock))?),
        };
        let key_source: Arc<dyn KeySource> = match (self.key_source, http) {
            (Some(keys), _) => keys,
            (None, Some(http)) => Arc::new(JwksCache::new(config.jwks_url(), http)),
            (None, None) => Arc::new(JwksCache::new(config.jwks_url(), build_http_client()?)),
        };

        let verifier =
            IdTokenVerifier::new(key_source, config.issuer(), clock).with_leeway(self.leeway);

        Ok(AppleStrategy {
            config,
            verify,
            token_exchange,
            verifier,
        })
    }
}
