//! Shared HTTP client helpers for the hosted collaborators.

use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};

use crate::chat::core::config::HttpConfig;
use crate::chat::core::errors::{ChatError, ChatResult};

/// Build the outbound HTTP client shared by providers and the vector store.
///
/// # Errors
/// Returns an error if the client cannot be built.
pub fn build_client(config: &HttpConfig) -> ChatResult<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    if let Ok(ua) = HeaderValue::from_str(&format!("citysense/{}", env!("CARGO_PKG_VERSION"))) {
        headers.insert(USER_AGENT, ua);
    }

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(config.request_timeout())
        .connect_timeout(config.connect_timeout())
        .gzip(true)
        .build()
        .map_err(ChatError::from)
}

/// Pass a successful response through, turn any other status into [`ChatError::Api`].
///
/// # Errors
/// Returns an error if the status is not a success.
pub async fn ensure_success(
    response: reqwest::Response,
    service: &'static str,
) -> ChatResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::debug!("{service} returned {status}: {body}");
    Err(ChatError::api(service, status.as_u16(), &body))
}

/// Join an API root and a path without doubling slashes.
#[must_use]
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
