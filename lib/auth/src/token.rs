//! Authorization code exchange against Apple's token endpoint.

use crate::assertion::ClientAssertion;
use crate::config::ProviderConfig;
use crate::error::AuthError;
use crate::http::build_http_client;
use async_trait::async_trait;
use oauth2::basic::{
    BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
    BasicTokenType,
};
use oauth2::{
    AuthType, AuthorizationCode, ClientId, ClientSecret, ExtraTokenFields, RedirectUrl,
    RequestTokenError, StandardRevocableToken, StandardTokenResponse, TokenResponse as _, TokenUrl,
};
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use siwa_core::Clock;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Fields Apple adds to the standard token response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppleTokenFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id_token: Option<String>,
}

impl ExtraTokenFields for AppleTokenFields {}

type AppleTokenResponse = StandardTokenResponse<AppleTokenFields, BasicTokenType>;

/// Tokens returned by a successful exchange.
#[derive(Clone)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// The signed identity token. Always present; a response without one
    /// is rejected.
    pub id_token: String,
    pub token_type: String,
    pub expires_in: Option<Duration>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("id_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

impl TokenResponse {
    fn from_oauth(response: AppleTokenResponse) -> Result<Self, Report<AuthError>> {
        let id_token = response
            .extra_fields()
            .id_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingIdentityToken)?
            .to_string();

        let token_type = match response.token_type() {
            BasicTokenType::Bearer => "bearer".to_string(),
            BasicTokenType::Extension(other) => other.clone(),
            _ => "mac".to_string(),
        };

        Ok(Self {
            access_token: response.access_token().secret().clone(),
            refresh_token: response.refresh_token().map(|t| t.secret().clone()),
            id_token,
            token_type,
            expires_in: response.expires_in(),
        })
    }
}

/// Exchanges an authorization code for tokens.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    /// Performs one exchange. No retries.
    ///
    /// `redirect_uri` must match the one sent in the authorization redirect.
    async fn exchange(
        &self,
        config: &ProviderConfig,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> Result<TokenResponse, Report<AuthError>>;
}

/// Token exchange over HTTP, signing a fresh client assertion per call.
#[derive(Debug, Clone)]
pub struct TokenClient {
    http: reqwest::Client,
    clock: Arc<dyn Clock>,
}

impl TokenClient {
    /// Creates a client with its own HTTP connection pool.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(clock: Arc<dyn Clock>) -> Result<Self, Report<AuthError>> {
        Ok(Self::with_http(build_http_client()?, clock))
    }

    /// Creates a client sharing an existing HTTP client.
    #[must_use]
    pub fn with_http(http: reqwest::Client, clock: Arc<dyn Clock>) -> Self {
        Self { http, clock }
    }
}

#[async_trait]
impl TokenExchange for TokenClient {
    #[instrument(skip(self, config, code), fields(client_id = %config.client_id()))]
    async fn exchange(
        &self,
        config: &ProviderConfig,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> Result<TokenResponse, Report<AuthError>> {
        let assertion = ClientAssertion::build(config, self.clock.as_ref())?;

        let token_url = TokenUrl::new(config.token_url().to_string()).map_err(|e| {
            AuthError::configuration(format!("invalid token_url '{}': {e}", config.token_url()))
        })?;

        let client = oauth2::Client::<
            BasicErrorResponse,
            AppleTokenResponse,
            BasicTokenIntrospectionResponse,
            StandardRevocableToken,
            BasicRevocationErrorResponse,
        >::new(ClientId::new(config.client_id().to_string()))
        .set_client_secret(ClientSecret::new(assertion.as_str().to_string()))
        .set_auth_type(AuthType::RequestBody)
        .set_token_uri(token_url);

        let client = match redirect_uri {
            Some(uri) => {
                let uri = RedirectUrl::new(uri.to_string()).map_err(|e| {
                    AuthError::configuration(format!("invalid redirect_uri '{uri}': {e}"))
                })?;
                client.set_redirect_uri(uri)
            }
            None => client,
        };

        let response = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| {
                let reason = match e {
                    RequestTokenError::ServerResponse(body) => match body.error_description() {
                        Some(description) => format!("{}: {description}", body.error()),
                        None => body.error().to_string(),
                    },
                    RequestTokenError::Request(e) => format!("request failed: {e}"),
                    RequestTokenError::Parse(e, _) => format!("unreadable token response: {e}"),
                    RequestTokenError::Other(e) => e,
                };
                warn!(%reason, "token exchange failed");
                AuthError::token_exchange(reason)
            })?;

        let tokens = TokenResponse::from_oauth(response)?;
        debug!(
            has_refresh_token = tokens.refresh_token.is_some(),
            "exchanged authorization code"
        );
        Ok(tokens)
    }
}
