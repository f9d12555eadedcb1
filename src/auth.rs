//! Bearer-token gate for the answering routes.
//!
//! A single shared secret is configured at startup. Requests without a well-formed
//! `Authorization: Bearer <token>` header are rejected with `401`; well-formed tokens that do not
//! match are rejected with `403`. Tokens are compared as SHA-256 digests in constant time, so
//! neither the content nor the length of the secret leaks through timing.

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{
        HeaderValue, Request, StatusCode,
        header::{AUTHORIZATION, WWW_AUTHENTICATE},
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Reasons a request fails authentication.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No `Authorization` header was sent.
    #[error("Authorization header missing or invalid.")]
    Missing,
    /// Header present but not `Bearer <token>`. The token is taken verbatim after one space.
    #[error("Authorization header missing or invalid.")]
    Malformed,
    /// Token did not match the configured secret.
    #[error("Invalid authorization token.")]
    Mismatch,
}

impl AuthError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Missing | Self::Malformed => StatusCode::UNAUTHORIZED,
            Self::Mismatch => StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let mut response =
            (self.status(), Json(json!({ "detail": self.to_string() }))).into_response();
        if self.status() == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

/// Shared secret held by the middleware.
#[derive(Clone)]
pub struct BearerAuth {
    digest: [u8; 32],
}

impl BearerAuth {
    /// Create a gate for the given secret.
    pub fn new(secret: &str) -> Self {
        Self {
            digest: digest(secret),
        }
    }

    /// Check a raw `Authorization` header value.
    pub fn verify(&self, header: Option<&str>) -> Result<(), AuthError> {
        let header = header.ok_or(AuthError::Missing)?;
        let token = header
            .strip_prefix("Bearer ")
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::Malformed)?;

        if bool::from(digest(token).as_slice().ct_eq(self.digest.as_slice())) {
            Ok(())
        } else {
            Err(AuthError::Mismatch)
        }
    }
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

/// Axum middleware rejecting requests that fail [`BearerAuth::verify`].
pub async fn require_bearer(
    State(auth): State<BearerAuth>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let header = match request.headers().get(AUTHORIZATION) {
        None => None,
        Some(value) => match value.to_str() {
            Ok(text) => Some(text),
            Err(_) => return AuthError::Malformed.into_response(),
        },
    };

    if let Err(error) = auth.verify(header) {
        tracing::warn!(
            path = %request.uri().path(),
            reason = ?error,
            "Rejected unauthenticated request"
        );
        return error.into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_matching_token() {
        let auth = BearerAuth::new("secret");
        assert_eq!(auth.verify(Some("Bearer secret")), Ok(()));
    }

    #[test]
    fn missing_and_malformed_headers_are_unauthorized() {
        let auth = BearerAuth::new("secret");
        assert_eq!(auth.verify(None), Err(AuthError::Missing));
        assert_eq!(auth.verify(Some("secret")), Err(AuthError::Malformed));
        assert_eq!(auth.verify(Some("Basic c2VjcmV0")), Err(AuthError::Malformed));
        assert_eq!(auth.verify(Some("Bearer ")), Err(AuthError::Malformed));
        assert_eq!(AuthError::Malformed.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn wrong_token_is_forbidden() {
        let auth = BearerAuth::new("secret");
        assert_eq!(auth.verify(Some("Bearer secret2")), Err(AuthError::Mismatch));
        assert_eq!(auth.verify(Some("Bearer s")), Err(AuthError::Mismatch));
        assert_eq!(
            auth.verify(Some("Bearer  secret ")),
            Err(AuthError::Mismatch)
        );
        assert_eq!(AuthError::Mismatch.status(), StatusCode::FORBIDDEN);
    }
}
