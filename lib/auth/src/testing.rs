//! Shared fixtures for unit tests.

use crate::config::{APPLE_ISSUER, ProviderConfig};
use jsonwebtoken::{Algorithm, EncodingKey, Header};

/// 2026-01-01T00:00:00Z.
pub const NOW: i64 = 1_767_225_600;

pub const CLIENT_ID: &str = "com.example.web";
pub const TEAM_ID: &str = "TEAM123456";
pub const ASSERTION_KEY_ID: &str = "TESTKEY01";
pub const PROVIDER_KEY_ID: &str = "test-key-a";
/// JWKS entry holding the public half of the assertion key.
pub const EC_PROVIDER_KEY_ID: &str = "test-key-ec";

pub const ASSERTION_PRIVATE_KEY: &str = include_str!("../testdata/AuthKey_TESTKEY01.p8");
pub const ASSERTION_PUBLIC_KEY: &str = include_str!("../testdata/AuthKey_TESTKEY01.pub.pem");
pub const PROVIDER_SIGNING_KEY: &str = include_str!("../testdata/provider_signing_key.pem");
pub const ROGUE_SIGNING_KEY: &str = include_str!("../testdata/rogue_signing_key.pem");
pub const JWKS: &str = include_str!("../testdata/jwks.json");

/// A complete config with every endpoint under `base_url`.
pub fn provider_config(base_url: &str) -> ProviderConfig {
    ProviderConfig::builder()
        .client_id(CLIENT_ID)
        .callback_url("https://example.com/auth/apple/callback")
        .team_id(TEAM_ID)
        .key_id(ASSERTION_KEY_ID)
        .private_key(ASSERTION_PRIVATE_KEY)
        .authorization_url(format!("{base_url}/auth/authorize"))
        .token_url(format!("{base_url}/auth/token"))
        .jwks_url(format!("{base_url}/auth/keys"))
        .issuer(APPLE_ISSUER)
        .build()
}

/// Identity token claims for subject `001`, valid at [`NOW`].
pub fn claims() -> serde_json::Value {
    serde_json::json!({
        "iss": APPLE_ISSUER,
        "aud": CLIENT_ID,
        "sub": "001",
        "iat": NOW,
        "exp": NOW + 600,
        "email": "jane@privaterelay.appleid.com",
        "email_verified": "true",
        "is_private_email": true,
        "real_user_status": 2,
        "auth_time": NOW,
        "nonce_supported": true
    })
}

/// Signs `claims` with the RSA key published in the fixture JWKS.
pub fn id_token(claims: &serde_json::Value) -> String {
    sign_rs256(claims, PROVIDER_SIGNING_KEY, PROVIDER_KEY_ID)
}

pub fn sign_rs256(claims: &serde_json::Value, pem: &str, kid: &str) -> String {
    let key = EncodingKey::from_rsa_pem(pem.as_bytes()).expect("RSA fixture key");
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    jsonwebtoken::encode(&header, claims, &key).expect("sign fixture token")
}

pub fn sign_es256(claims: &serde_json::Value, kid: &str) -> String {
    let key = EncodingKey::from_ec_pem(ASSERTION_PRIVATE_KEY.as_bytes()).expect("EC fixture key");
    let mut header = Header::new(Algorithm::ES256);
    header.kid = Some(kid.to_string());
    jsonwebtoken::encode(&header, claims, &key).expect("sign fixture token")
}
