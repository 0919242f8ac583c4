//! Authorization redirect construction.

use crate::config::{ProviderConfig, ResponseMode};
use crate::error::AuthError;
use oauth2::AuthUrl;
use oauth2::url::{ParseError, Url};
use siwa_core::Result;

/// Resolves the redirect URI for one request.
///
/// A per-call override wins over the configured callback URL. Relative
/// URLs are joined onto `origin` (scheme and host of the incoming request).
/// Returns `None` when neither source provides a URL.
///
/// # Errors
///
/// Returns a configuration error if the URL is malformed, or relative with
/// no origin to resolve it against.
pub fn resolve_callback_url(
    config: &ProviderConfig,
    override_url: Option<&str>,
    origin: Option<&str>,
) -> Result<Option<String>, AuthError> {
    let Some(candidate) = override_url.or(config.callback_url()) else {
        return Ok(None);
    };

    // Absolute URLs are sent as configured; Apple matches them exactly.
    match Url::parse(candidate) {
        Ok(_) => Ok(Some(candidate.to_string())),
        Err(ParseError::RelativeUrlWithoutBase) => {
            let origin = origin.ok_or_else(|| {
                AuthError::configuration(format!(
                    "callback URL '{candidate}' is relative and no request origin is known"
                ))
            })?;
            let base = Url::parse(origin).map_err(|e| {
                AuthError::configuration(format!("invalid request origin '{origin}': {e}"))
            })?;
            let url = base.join(candidate).map_err(|e| {
                AuthError::configuration(format!("invalid callback URL '{candidate}': {e}"))
            })?;
            Ok(Some(url.into()))
        }
        Err(e) => Err(AuthError::configuration(format!(
            "invalid callback URL '{candidate}': {e}"
        ))
        .into()),
    }
}

/// One authorization redirect, built fresh per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub authorization_endpoint: String,
    pub client_id: String,
    pub redirect_uri: Option<String>,
    /// Effective scopes, already resolved against the configured defaults.
    pub scope: Vec<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub response_mode: Option<ResponseMode>,
}

impl AuthorizationRequest {
    /// Builds a request from configuration and per-call values.
    ///
    /// `scope_override` replaces the configured scopes when given, even if
    /// empty. `redirect_uri` should come from [`resolve_callback_url`].
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the client id or authorization
    /// endpoint is missing.
    pub fn new(
        config: &ProviderConfig,
        redirect_uri: Option<String>,
        scope_override: Option<&[String]>,
        state: Option<String>,
        nonce: Option<String>,
    ) -> Result<Self, AuthError> {
        if config.client_id().trim().is_empty() {
            return Err(AuthError::configuration("client_id is required").into());
        }
        if config.authorization_url().trim().is_empty() {
            return Err(AuthError::configuration("authorization_url is required").into());
        }

        let scope: Vec<String> = scope_override
            .unwrap_or(config.scope())
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let response_mode = match config.response_mode() {
            Some(mode) => Some(mode),
            None if !scope.is_empty() => Some(ResponseMode::FormPost),
            None => None,
        };

        Ok(Self {
            authorization_endpoint: config.authorization_url().to_string(),
            client_id: config.client_id().to_string(),
            redirect_uri,
            scope,
            state,
            nonce,
            response_mode,
        })
    }

    /// Renders the redirect URL with every parameter percent-encoded.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the endpoint is not an absolute URL.
    pub fn to_url(&self) -> Result<String, AuthError> {
        let endpoint = AuthUrl::new(self.authorization_endpoint.clone()).map_err(|e| {
            AuthError::configuration(format!(
                "invalid authorization_url '{}': {e}",
                self.authorization_endpoint
            ))
        })?;

        let mut url = endpoint.url().clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("response_type", "code");
            query.append_pair("client_id", &self.client_id);
            if let Some(redirect_uri) = &self.redirect_uri {
                query.append_pair("redirect_uri", redirect_uri);
            }
            if !self.scope.is_empty() {
                query.append_pair("scope", &self.scope.join(" "));
            }
            if let Some(state) = &self.state {
                query.append_pair("state", state);
            }
            if let Some(nonce) = &self.nonce {
                query.append_pair("nonce", nonce);
            }
            if let Some(mode) = self.response_mode {
                query.append_pair("response_mode", mode.as_str());
            }
        }

        Ok(url.into())
    }
}
