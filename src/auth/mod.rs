//! Request authentication.
//!
//! Two independent layers: an optional pre-shared key gating the whole API
//! (constant-time comparison), and the caller identity asserted by the
//! upstream gateway through `x-auth-*` headers.

use axum::{
    extract::{FromRequestParts, Request},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::errors::{AppError, AppErrorWithRevision};
use crate::models::Identity;

/// Header name for the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

pub const UID_HEADER: &str = "x-auth-uid";
pub const EMAIL_HEADER: &str = "x-auth-email";
pub const NAME_HEADER: &str = "x-auth-name";
pub const PHOTO_HEADER: &str = "x-auth-photo";

/// PSK authentication layer function that takes the expected PSK as a parameter.
pub async fn psk_auth_layer(
    expected_psk: Option<String>,
    request: Request,
    next: Next,
) -> Response {
    // If no PSK is configured, allow all requests (dev mode)
    let Some(expected) = expected_psk else {
        return next.run(request).await;
    };

    let provided = header_value(request.headers(), API_KEY_HEADER).or_else(|| {
        request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(str::to_string)
    });

    match provided {
        Some(key) if constant_time_compare(&key, &expected) => next.run(request).await,
        Some(_) => unauthorized_response("Invalid API key"),
        None => unauthorized_response("Missing or invalid API key"),
    }
}

/// Perform constant-time string comparison.
fn constant_time_compare(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn unauthorized_response(message: &str) -> Response {
    AppErrorWithRevision::from(AppError::Unauthorized(message.to_string())).into_response()
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// The authenticated caller of a request.
///
/// Rejects with `UNAUTHENTICATED` when the gateway did not assert a uid.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Identity);

impl AuthUser {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AppError> {
        let uid = header_value(headers, UID_HEADER)
            .ok_or_else(|| AppError::Unauthenticated("Sign in required".to_string()))?;

        Ok(AuthUser(Identity {
            uid,
            email: header_value(headers, EMAIL_HEADER),
            display_name: header_value(headers, NAME_HEADER),
            photo_url: header_value(headers, PHOTO_HEADER),
        }))
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppErrorWithRevision;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(AuthUser::from_headers(&parts.headers)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_constant_time_compare_equal() {
        assert!(constant_time_compare("test-key-123", "test-key-123"));
    }

    #[test]
    fn test_constant_time_compare_not_equal() {
        assert!(!constant_time_compare("test-key-123", "test-key-124"));
        assert!(!constant_time_compare("short", "much-longer-key"));
    }

    #[test]
    fn test_identity_requires_uid() {
        let mut headers = HeaderMap::new();
        headers.insert(EMAIL_HEADER, HeaderValue::from_static("ana@example.com"));
        let err = AuthUser::from_headers(&headers).unwrap_err();
        assert_eq!(err.error_code(), "UNAUTHENTICATED");

        headers.insert(UID_HEADER, HeaderValue::from_static("  "));
        assert!(AuthUser::from_headers(&headers).is_err());
    }

    #[test]
    fn test_identity_reads_optional_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(UID_HEADER, HeaderValue::from_static("uid-1"));
        headers.insert(NAME_HEADER, HeaderValue::from_static("Ana"));

        let AuthUser(identity) = AuthUser::from_headers(&headers).unwrap();
        assert_eq!(identity.uid, "uid-1");
        assert_eq!(identity.display_name.as_deref(), Some("Ana"));
        assert_eq!(identity.email, None);
        assert_eq!(identity.photo_url, None);
    }
}
