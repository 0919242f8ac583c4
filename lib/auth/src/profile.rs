//! Normalized identity handed to the verify callback.

use crate::id_token::IdentityClaims;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// The user's name as entered on the Apple consent sheet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Name {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

/// The `user` form field Apple posts on a user's first authorization only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FirstAuthorizationUser {
    #[serde(default)]
    pub name: Option<Name>,
    #[serde(default)]
    pub email: Option<String>,
}

impl FirstAuthorizationUser {
    /// Parses the raw JSON field. Malformed input is logged and dropped.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match serde_json::from_str(raw) {
            Ok(user) => Some(user),
            Err(e) => {
                warn!(error = %e, "ignoring malformed user payload");
                None
            }
        }
    }
}

/// A verified Apple identity.
#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    /// Always `"apple"`.
    pub provider: String,
    /// The stable user identifier (`sub`).
    pub id: String,
    pub email: Option<String>,
    pub email_verified: Option<bool>,
    pub is_private_email: Option<bool>,
    /// Only available on first authorization.
    pub name: Option<Name>,
    /// 0 unsupported, 1 unknown, 2 likely real.
    pub real_user_status: Option<u8>,
    /// The full verified claim set.
    pub claims: IdentityClaims,
}

impl Profile {
    /// Builds a profile from verified claims and the optional first
    /// authorization payload. The token's email wins over the payload's.
    #[must_use]
    pub fn from_claims(claims: IdentityClaims, first: Option<FirstAuthorizationUser>) -> Self {
        let (name, first_email) = match first {
            Some(user) => (user.name, user.email),
            None => (None, None),
        };

        Self {
            provider: crate::strategy::PROVIDER_NAME.to_string(),
            id: claims.subject.clone(),
            email: claims.email.clone().or(first_email),
            email_verified: claims.email_verified,
            is_private_email: claims.is_private_email,
            name,
            real_user_status: claims.real_user_status,
            claims,
        }
    }
}
