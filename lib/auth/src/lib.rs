//! Sign in with Apple for server-side applications.
//!
//! This crate drives the OAuth 2.0 authorization code flow against Apple's
//! identity service and turns the returned identity token into a verified,
//! normalized profile:
//!
//! - [`AuthorizationRequest`]: builds the redirect to Apple's authorize endpoint
//! - [`ClientAssertion`]: signs the short-lived ES256 client secret Apple requires
//! - [`TokenClient`]: exchanges the authorization code for tokens
//! - [`IdTokenVerifier`]: checks the identity token against Apple's published keys
//! - [`AppleStrategy`]: ties the steps together and yields one [`AuthOutcome`]
//!   per callback request
//!
//! # Example
//!
//! ```no_run
//! use async_trait::async_trait;
//! use rootcause::prelude::Report;
//! use siwa_auth::{
//!     AppleStrategy, AuthOutcome, AuthenticateOptions, CallbackRequest, Profile,
//!     ProviderConfig, Verdict, Verify,
//! };
//!
//! struct Accounts;
//!
//! #[async_trait]
//! impl Verify for Accounts {
//!     type User = String;
//!
//!     async fn verify(
//!         &self,
//!         _access_token: &str,
//!         _refresh_token: Option<&str>,
//!         profile: Profile,
//!     ) -> Result<Verdict<String>, Report> {
//!         Ok(Verdict::accept(profile.id))
//!     }
//! }
//!
//! # async fn run() -> Result<(), Report<siwa_auth::AuthError>> {
//! let config = ProviderConfig::builder()
//!     .client_id("com.example.web")
//!     .callback_url("https://example.com/auth/apple/callback")
//!     .team_id("ABCDE12345")
//!     .key_id("KEY1234567")
//!     .private_key_path("AuthKey_KEY1234567.p8")?
//!     .build();
//!
//! let strategy = AppleStrategy::new(config, Accounts)?;
//! let outcome = strategy
//!     .authenticate(&CallbackRequest::default(), &AuthenticateOptions::default())
//!     .await;
//!
//! assert!(matches!(outcome, AuthOutcome::Redirect(_)));
//! # Ok(())
//! # }
//! ```

pub mod assertion;
pub mod authorize;
pub mod config;
pub mod error;
mod http;
pub mod id_token;
pub mod jwks;
pub mod profile;
pub mod strategy;
pub mod token;

#[cfg(test)]
mod testing;

pub use assertion::{AssertionClaims, ClientAssertion};
pub use authorize::{AuthorizationRequest, resolve_callback_url};
pub use config::{ProviderConfig, ProviderConfigBuilder, ResponseMode};
pub use error::AuthError;
pub use id_token::{Audience, IdTokenVerifier, IdentityClaims};
pub use jwks::{JwksCache, KeySource, StaticKeys};
pub use profile::{FirstAuthorizationUser, Name, Profile};
pub use strategy::{
    AppleStrategy, AppleStrategyBuilder, AuthInfo, AuthOutcome, AuthenticateOptions,
    CallbackRequest, Verdict, Verify,
};
pub use token::{TokenClient, TokenExchange, TokenResponse};
