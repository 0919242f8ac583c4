//! End-to-end sign-in against a mocked Apple.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rootcause::prelude::Report;
use siwa_auth::{
    AppleStrategy, AuthOutcome, AuthenticateOptions, CallbackRequest, Profile, ProviderConfig,
    Verdict, Verify,
};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CLIENT_ID: &str = "com.example.web";
const ASSERTION_KEY: &str = include_str!("../testdata/AuthKey_TESTKEY01.p8");
const PROVIDER_KEY: &str = include_str!("../testdata/provider_signing_key.pem");
const JWKS: &str = include_str!("../testdata/jwks.json");

struct Subjects;

#[async_trait]
impl Verify for Subjects {
    type User = String;

    async fn verify(
        &self,
        _access_token: &str,
        _refresh_token: Option<&str>,
        profile: Profile,
    ) -> Result<Verdict<String>, Report> {
        Ok(Verdict::accept(profile.id))
    }
}

fn identity_token(subject: &str, nonce: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = serde_json::json!({
        "iss": "https://appleid.apple.com",
        "aud": CLIENT_ID,
        "sub": subject,
        "iat": now,
        "exp": now + 600,
        "nonce": nonce,
        "email": "user@privaterelay.appleid.com",
        "email_verified": true,
    });
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some("test-key-a".to_string());
    let key = EncodingKey::from_rsa_pem(PROVIDER_KEY.as_bytes()).expect("provider key");
    jsonwebtoken::encode(&header, &claims, &key).expect("sign")
}

fn config(server: &MockServer) -> ProviderConfig {
    ProviderConfig::builder()
        .client_id(CLIENT_ID)
        .callback_url("/auth/apple/callback")
        .team_id("TEAM123456")
        .key_id("TESTKEY01")
        .private_key(ASSERTION_KEY)
        .scope(["name", "email"])
        .token_url(format!("{}/auth/token", server.uri()))
        .jwks_url(format!("{}/auth/keys", server.uri()))
        .build()
}

async fn mock_token_endpoint(server: &MockServer, code: &str, id_token: String) {
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .and(body_string_contains(format!("code={code}")))
        .and(body_string_contains("client_secret=eyJ"))
        .and(body_string_contains(
            "redirect_uri=https%3A%2F%2Fexample.com%2Fauth%2Fapple%2Fcallback",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": format!("access-{code}"),
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": format!("refresh-{code}"),
            "id_token": id_token,
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn redirect_then_callback_signs_in() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/keys"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::from_str::<serde_json::Value>(JWKS).expect("jwks")),
        )
        .expect(1)
        .mount(&server)
        .await;
    mock_token_endpoint(&server, "code-1", identity_token("001", "nonce-1")).await;
    mock_token_endpoint(&server, "code-2", identity_token("002", "nonce-2")).await;

    let strategy = AppleStrategy::new(config(&server), Subjects).expect("strategy");
    let options = AuthenticateOptions::default()
        .with_origin("https://example.com")
        .with_state("state-1")
        .with_nonce("nonce-1");

    let redirect = strategy
        .authenticate(&CallbackRequest::default(), &options)
        .await;
    let AuthOutcome::Redirect(url) = redirect else {
        panic!("expected Redirect, got {redirect:?}");
    };
    assert!(url.starts_with("https://appleid.apple.com/auth/authorize?"));
    assert!(url.contains("redirect_uri=https%3A%2F%2Fexample.com%2Fauth%2Fapple%2Fcallback"));
    assert!(url.contains("scope=name+email"));
    assert!(url.contains("response_mode=form_post"));

    let callback = CallbackRequest {
        code: Some("code-1".to_string()),
        state: Some("state-1".to_string()),
        ..CallbackRequest::default()
    };
    match strategy.authenticate(&callback, &options).await {
        AuthOutcome::Success { user, info } => {
            assert_eq!(user, "001");
            assert_eq!(info.state.as_deref(), Some("state-1"));
        }
        other => panic!("expected Success, got {other:?}"),
    }

    // Second sign-in reuses the cached key set.
    let callback = CallbackRequest {
        code: Some("code-2".to_string()),
        ..CallbackRequest::default()
    };
    let options = options.with_nonce("nonce-2");
    match strategy.authenticate(&callback, &options).await {
        AuthOutcome::Success { user, .. } => assert_eq!(user, "002"),
        other => panic!("expected Success, got {other:?}"),
    }
}

#[tokio::test]
async fn token_endpoint_rejection_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_client"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth/keys"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let strategy = AppleStrategy::new(config(&server), Subjects).expect("strategy");
    let callback = CallbackRequest {
        code: Some("code-1".to_string()),
        ..CallbackRequest::default()
    };

    let outcome = strategy
        .authenticate(
            &callback,
            &AuthenticateOptions::default().with_origin("https://example.com"),
        )
        .await;

    let error = outcome.error().expect("error outcome");
    assert_eq!(error.kind(), "token_exchange_error");
    assert_eq!(error.to_string(), "failed to obtain access token: invalid_client");
}
