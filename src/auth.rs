//! Bearer authentication.
//!
//! The proxy never interprets API keys beyond a shape check: the token after
//! `Bearer ` must match the configured pattern (when one is set), and the
//! whole header value is forwarded to the upstream untouched.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use regex::Regex;

use crate::error::AppError;

/// Validate the `Authorization` header and return its raw value for
/// verbatim forwarding.
pub fn authenticate(headers: &HeaderMap, pattern: Option<&Regex>) -> Result<String, AppError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".to_string()))?;

    let value = header
        .to_str()
        .map_err(|_| AppError::Unauthorized("Invalid Authorization header encoding".to_string()))?;

    let token = value.strip_prefix("Bearer ").ok_or_else(|| {
        AppError::Unauthorized("Authorization header must use Bearer scheme".to_string())
    })?;

    if token.is_empty() {
        return Err(AppError::Unauthorized("Empty Bearer token".to_string()));
    }

    if let Some(pattern) = pattern {
        if !pattern.is_match(token) {
            return Err(AppError::Unauthorized(
                "API key does not match the expected format".to_string(),
            ));
        }
    }

    Ok(value.to_string())
}
