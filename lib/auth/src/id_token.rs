//! Identity token verification.
//!
//! An identity token is accepted only if its signature checks out against
//! one of Apple's published keys and its issuer, audience, lifetime and
//! nonce match what this client expects. Anything else is an
//! [`AuthError::InvalidIdentityToken`].

use crate::error::AuthError;
use crate::jwks::KeySource;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use rootcause::prelude::Report;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use siwa_core::Clock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Default tolerance for clock skew on `exp` and `iat`.
pub const DEFAULT_LEEWAY: Duration = Duration::from_secs(60);

/// The `aud` claim: a single client id or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Multiple(Vec<String>),
}

impl Audience {
    #[must_use]
    pub fn contains(&self, client_id: &str) -> bool {
        match self {
            Self::Single(aud) => aud == client_id,
            Self::Multiple(auds) => auds.iter().any(|aud| aud == client_id),
        }
    }
}

/// Verified identity token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    #[serde(rename = "iss")]
    pub issuer: String,
    /// Stable, team-scoped user identifier.
    #[serde(rename = "sub")]
    pub subject: String,
    #[serde(rename = "aud")]
    pub audience: Audience,
    #[serde(rename = "iat")]
    pub issued_at: i64,
    #[serde(rename = "exp")]
    pub expires_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(
        default,
        deserialize_with = "flexible_bool",
        skip_serializing_if = "Option::is_none"
    )]
    pub email_verified: Option<bool>,
    /// Whether `email` is a private relay address.
    #[serde(
        default,
        deserialize_with = "flexible_bool",
        skip_serializing_if = "Option::is_none"
    )]
    pub is_private_email: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub real_user_status: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,
    #[serde(
        default,
        deserialize_with = "flexible_bool",
        skip_serializing_if = "Option::is_none"
    )]
    pub nonce_supported: Option<bool>,
}

/// Apple sends some flags as JSON booleans and others as `"true"`/`"false"`.
fn flexible_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Option::<Flag>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Flag::Bool(value)) => Ok(Some(value)),
        Some(Flag::Text(text)) => match text.as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            other => Err(D::Error::custom(format!("expected boolean, got '{other}'"))),
        },
    }
}

fn invalid(reason: impl Into<String>) -> AuthError {
    AuthError::invalid_identity_token(reason)
}

fn describe_jwt_error(e: &jsonwebtoken::errors::Error) -> String {
    match e.kind() {
        ErrorKind::InvalidSignature => "signature mismatch".to_string(),
        ErrorKind::InvalidIssuer => "unexpected issuer".to_string(),
        ErrorKind::InvalidAudience => "unexpected audience".to_string(),
        ErrorKind::InvalidAlgorithm => "algorithm does not match signing key".to_string(),
        ErrorKind::MissingRequiredClaim(claim) => format!("missing claim '{claim}'"),
        ErrorKind::Json(e) => format!("malformed claims: {e}"),
        _ => e.to_string(),
    }
}

/// Verifies identity tokens for one issuer.
#[derive(Clone)]
pub struct IdTokenVerifier {
    keys: Arc<dyn KeySource>,
    issuer: String,
    leeway: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for IdTokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdTokenVerifier")
            .field("issuer", &self.issuer)
            .field("leeway", &self.leeway)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl IdTokenVerifier {
    #[must_use]
    pub fn new(keys: Arc<dyn KeySource>, issuer: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
            leeway: DEFAULT_LEEWAY,
            clock,
        }
    }

    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Verifies `id_token` for the client `audience`.
    ///
    /// When `expected_nonce` is given, the token must carry the same nonce.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an empty audience and an invalid
    /// identity token error for every verification failure.
    #[instrument(skip(self, id_token, expected_nonce), fields(issuer = %self.issuer))]
    pub async fn verify(
        &self,
        id_token: &str,
        audience: &str,
        expected_nonce: Option<&str>,
    ) -> Result<IdentityClaims, Report<AuthError>> {
        if audience.trim().is_empty() {
            return Err(
                AuthError::configuration("client_id is required to verify identity tokens").into(),
            );
        }

        let header = jsonwebtoken::decode_header(id_token)
            .map_err(|e| invalid(format!("malformed token: {e}")))?;

        if !matches!(header.alg, Algorithm::RS256 | Algorithm::ES256) {
            return Err(invalid(format!("unsupported algorithm {:?}", header.alg)).into());
        }

        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| invalid("token header has no kid"))?;

        let jwk = self.keys.key(kid).await?;
        let key = DecodingKey::from_jwk(&jwk)
            .map_err(|e| invalid(format!("unusable signing key '{kid}': {e}")))?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        // Lifetime is checked below against the injected clock.
        validation.validate_exp = false;
        validation.validate_nbf = false;

        let claims = jsonwebtoken::decode::<IdentityClaims>(id_token, &key, &validation)
            .map_err(|e| {
                let reason = describe_jwt_error(&e);
                warn!(%reason, "identity token rejected");
                invalid(reason)
            })?
            .claims;

        let now = self.clock.unix_timestamp();
        let leeway = i64::try_from(self.leeway.as_secs()).unwrap_or(i64::MAX);

        if now >= claims.expires_at.saturating_add(leeway) {
            return Err(invalid("token expired").into());
        }
        if claims.issued_at.saturating_sub(leeway) > now {
            return Err(invalid("token issued in the future").into());
        }

        if expected_nonce.is_some_and(|expected| claims.nonce.as_deref() != Some(expected)) {
            return Err(invalid("nonce mismatch").into());
        }

        debug!(subject = %claims.subject, "identity token verified");
        Ok(claims)
    }
}
