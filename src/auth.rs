//! Bearer-token gate for operator endpoints.
//!
//! The comparison is constant-time with respect to the secret so response
//! timing leaks nothing about how much of a guessed token matched.

use axum::http::{HeaderMap, header};
use subtle::ConstantTimeEq;

/// Check the `Authorization: Bearer <token>` header against the configured
/// operator token.
pub fn is_authorized(headers: &HeaderMap, expected_token: &str) -> bool {
    let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let Some(presented) = value.strip_prefix("Bearer ") else {
        return false;
    };
    presented.as_bytes().ct_eq(expected_token.as_bytes()).into()
}
