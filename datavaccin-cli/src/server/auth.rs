use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;

use super::config::AuthConfig;

/// Check whether `token` may perform a write.
/// Returns true if no write tokens are configured (open mode).
pub fn check_write_token(auth: &AuthConfig, token: Option<&str>) -> bool {
    if auth.write_tokens.is_empty() {
        return true;
    }

    let Some(token) = token else { return false };
    auth.write_tokens.iter().any(|t| t == token)
}

/// Extract bearer token from Authorization header value.
pub fn extract_bearer_token(header_value: &str) -> Option<&str> {
    header_value.strip_prefix("Bearer ")
}

pub fn token_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer_token)
}
