//! Error types for the auth crate.
//!
//! Every failure in the sign-in flow is reported as a `rootcause::Report`
//! whose typed context is an [`AuthError`]. The variant tells the host what
//! went wrong at which stage; lower-level causes (HTTP, JWT, callback
//! errors) hang off the report as children or are folded into `reason`.

use std::fmt;

/// Errors from the sign-in flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Credentials or endpoints are missing or malformed.
    Configuration { reason: String },
    /// Apple reported an error on the callback.
    Authorization {
        code: String,
        description: Option<String>,
        uri: Option<String>,
    },
    /// The code exchange failed at the network or provider level.
    TokenExchange { reason: String },
    /// The token endpoint succeeded but returned no identity token.
    MissingIdentityToken,
    /// The identity token failed signature, issuer, audience, nonce, or
    /// lifetime checks.
    InvalidIdentityToken { reason: String },
    /// The application's verify callback returned an error.
    Verify,
}

impl AuthError {
    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Creates a token exchange error.
    #[must_use]
    pub fn token_exchange(reason: impl Into<String>) -> Self {
        Self::TokenExchange {
            reason: reason.into(),
        }
    }

    /// Creates an invalid identity token error.
    #[must_use]
    pub fn invalid_identity_token(reason: impl Into<String>) -> Self {
        Self::InvalidIdentityToken {
            reason: reason.into(),
        }
    }

    /// Returns a stable identifier for the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::Authorization { .. } => "authorization_error",
            Self::TokenExchange { .. } => "token_exchange_error",
            Self::MissingIdentityToken => "missing_identity_token_error",
            Self::InvalidIdentityToken { .. } => "invalid_identity_token_error",
            Self::Verify => "verify_error",
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration { reason } => {
                write!(f, "invalid sign-in configuration: {reason}")
            }
            Self::Authorization {
                code, description, ..
            } => match description {
                Some(description) => write!(f, "provider error '{code}': {description}"),
                None => write!(f, "provider error '{code}'"),
            },
            Self::TokenExchange { reason } => {
                write!(f, "failed to obtain access token: {reason}")
            }
            Self::MissingIdentityToken => {
                write!(f, "token response did not include an identity token")
            }
            Self::InvalidIdentityToken { reason } => {
                write!(f, "identity token not verified: {reason}")
            }
            Self::Verify => write!(f, "verify callback failed"),
        }
    }
}

impl std::error::Error for AuthError {}
