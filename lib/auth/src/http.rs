use crate::error::AuthError;
use siwa_core::Result;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds the HTTP client used for Apple's token and key endpoints.
///
/// Redirects are not followed: the token endpoint must answer directly.
pub(crate) fn build_http_client() -> Result<reqwest::Client, AuthError> {
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| AuthError::configuration(format!("failed to create HTTP client: {e}")))?;
    Ok(client)
}
