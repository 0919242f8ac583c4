//! The ES256 client secret Apple requires at the token endpoint.
//!
//! Apple does not issue static client secrets. Each token request instead
//! carries a JWT signed with the private key registered for the Services ID.
//! A new assertion is built for every exchange and dropped afterwards.

use crate::config::{MAX_ASSERTION_TTL_SECS, ProviderConfig};
use crate::error::AuthError;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use siwa_core::{Clock, Result};
use std::fmt;
use tracing::{debug, instrument};

/// Claims of a client assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
    /// The team id.
    pub iss: String,
    /// The Services ID.
    pub sub: String,
    /// The provider issuer.
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

/// A signed client assertion.
#[derive(Clone)]
pub struct ClientAssertion {
    token: String,
    expires_at: DateTime<Utc>,
}

impl fmt::Debug for ClientAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientAssertion")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

fn require<'a>(value: &'a str, name: &str) -> Result<&'a str, AuthError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AuthError::configuration(format!("{name} is required")).into());
    }
    Ok(value)
}

impl ClientAssertion {
    /// Signs a new assertion valid from `clock.now()` for the configured TTL.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the client id, team id, key id or
    /// private key is missing, the key is not an EC P-256 PEM, or the TTL
    /// is outside what Apple accepts.
    #[instrument(skip(config, clock), fields(client_id = %config.client_id(), key_id = %config.key_id()))]
    pub fn build(config: &ProviderConfig, clock: &dyn Clock) -> Result<Self, AuthError> {
        let client_id = require(config.client_id(), "client_id")?;
        let team_id = require(config.team_id(), "team_id")?;
        let key_id = require(config.key_id(), "key_id")?;
        let private_key = require(config.private_key(), "private_key")?;

        let ttl = config.assertion_ttl().as_secs();
        if ttl == 0 || ttl > MAX_ASSERTION_TTL_SECS {
            return Err(AuthError::configuration(format!(
                "assertion_ttl_secs must be between 1 and {MAX_ASSERTION_TTL_SECS}, got {ttl}"
            ))
            .into());
        }

        let key = EncodingKey::from_ec_pem(private_key.as_bytes()).map_err(|e| {
            AuthError::configuration(format!("private key is not a valid EC PEM: {e}"))
        })?;

        let now = clock.now();
        let issued_at = now.timestamp();
        let expires_at = issued_at.saturating_add_unsigned(ttl);

        let claims = AssertionClaims {
            iss: team_id.to_string(),
            sub: client_id.to_string(),
            aud: config.issuer().to_string(),
            iat: issued_at,
            exp: expires_at,
        };

        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(key_id.to_string());

        let token = jsonwebtoken::encode(&header, &claims, &key)
            .map_err(|e| AuthError::configuration(format!("failed to sign client assertion: {e}")))?;

        debug!(expires_at, "signed client assertion");

        Ok(Self {
            token,
            expires_at: DateTime::from_timestamp(expires_at, 0).unwrap_or(now),
        })
    }

    /// Returns the compact JWT.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.token
    }

    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}
