//! # Authentication Errors
//!
//! This module defines the error taxonomy for the storefront authentication
//! core. Every error maps to an HTTP status code so that the axum middleware
//! can surface it directly, and security-relevant variants feed the audit
//! trail (see [`crate::audit`]) in addition to being returned to the caller.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Errors produced by the authentication and session security core.
#[derive(Error, Debug)]
pub enum AuthError {
    // ==================== Token Errors ====================
    /// The token has expired; caller must re-authenticate
    #[error("Token has expired")]
    TokenExpired,

    /// The token is structurally invalid or cannot be decoded
    #[error("Malformed token: {0}")]
    TokenMalformed(String),

    /// The token signature does not verify against the configured key
    #[error("Invalid token signature")]
    TokenSignatureInvalid,

    /// A token of the wrong type was presented (access vs refresh)
    #[error("Invalid token type: expected {expected}, got {actual}")]
    TokenTypeMismatch { expected: String, actual: String },

    /// Token issuer does not match the configured issuer
    #[error("Token issuer mismatch: expected '{expected}', got '{actual}'")]
    IssuerMismatch { expected: String, actual: String },

    /// The token's device fingerprint does not match the presenting client
    #[error("Token device fingerprint mismatch")]
    FingerprintMismatch,

    /// Token generation failed
    #[error("Token generation failed: {0}")]
    TokenGenerationFailed(String),

    // ==================== Session Errors ====================
    /// The token is cryptographically valid but the server-side session is
    /// gone (revoked, overwritten by re-login, or expired). Surfaced to the
    /// caller identically to a token error, but logged differently for audit.
    #[error("Session not found")]
    SessionNotFound,

    /// No authentication token was supplied
    #[error("Missing authentication token")]
    MissingAuthToken,

    /// The Authorization header or cookie is not in the expected format
    #[error("Invalid authentication format")]
    InvalidAuthFormat,

    // ==================== Rate Limiting ====================
    /// Too many attempts; carries a retry-after hint, never silently dropped
    #[error("Rate limit exceeded, retry after {retry_after_secs} seconds")]
    RateLimitExceeded { retry_after_secs: i64 },

    // ==================== OTP Errors ====================
    /// Code is wrong, expired, or was never issued. Deliberately opaque so a
    /// caller cannot enumerate which case occurred.
    #[error("Verification code is invalid or has expired")]
    OtpInvalidOrExpired,

    /// Issuance cap reached for this identifier
    #[error("Too many verification codes requested, retry after {retry_after_secs} seconds")]
    OtpIssuanceCapped { retry_after_secs: i64 },

    // ==================== CSRF ====================
    /// The double-submit cookie and header pair did not match
    #[error("CSRF token mismatch")]
    CsrfMismatch,

    /// One or both halves of the double-submit pair are missing
    #[error("Missing CSRF token")]
    CsrfMissing,

    // ==================== Cache ====================
    /// The cache backend is unreachable. Recovered locally by treating the
    /// operation as a miss (fail-open); logged at warn level because it
    /// weakens rate limiting and session revocation.
    #[error("Cache backend unavailable: {0}")]
    CacheUnavailable(String),

    /// A cache-resident record failed to (de)serialize
    #[error("Serialization error: {0}")]
    Serialization(String),

    // ==================== Password & Input Validation ====================
    /// Password does not meet the configured policy
    #[error("Password does not meet security requirements: {0}")]
    PasswordTooWeak(String),

    /// Error occurred while hashing or parsing a password hash
    #[error("Password hashing failed: {0}")]
    PasswordHashError(String),

    /// A structured field failed validation; never a 5xx condition
    #[error("Invalid value for field '{field}': {message}")]
    ValidationField { field: String, message: String },

    /// Injection-shaped or otherwise dangerous content detected
    #[error("Dangerous content detected: {kind}")]
    DangerousContent { kind: String },

    // ==================== Configuration ====================
    /// Invalid or missing configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Internal error that has no more specific variant
    #[error("Internal authentication error: {0}")]
    Internal(String),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => Self::TokenExpired,
            jsonwebtoken::errors::ErrorKind::InvalidSignature => Self::TokenSignatureInvalid,
            _ => Self::TokenMalformed(err.to_string()),
        }
    }
}

impl From<argon2::password_hash::Error> for AuthError {
    fn from(err: argon2::password_hash::Error) -> Self {
        Self::PasswordHashError(err.to_string())
    }
}

impl From<redis::RedisError> for AuthError {
    fn from(err: redis::RedisError) -> Self {
        Self::CacheUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl AuthError {
    /// Returns the HTTP status code that should be returned for this error
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::TokenExpired
            | Self::TokenMalformed(_)
            | Self::TokenSignatureInvalid
            | Self::TokenTypeMismatch { .. }
            | Self::IssuerMismatch { .. }
            | Self::FingerprintMismatch
            | Self::SessionNotFound
            | Self::MissingAuthToken
            | Self::InvalidAuthFormat
            | Self::OtpInvalidOrExpired => StatusCode::UNAUTHORIZED,

            Self::RateLimitExceeded { .. } | Self::OtpIssuanceCapped { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }

            Self::CsrfMismatch | Self::CsrfMissing => StatusCode::FORBIDDEN,

            Self::PasswordTooWeak(_)
            | Self::ValidationField { .. }
            | Self::DangerousContent { .. } => StatusCode::BAD_REQUEST,

            Self::CacheUnavailable(_)
            | Self::Serialization(_)
            | Self::PasswordHashError(_)
            | Self::TokenGenerationFailed(_)
            | Self::Config(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to the client.
    ///
    /// Token and session failures all collapse to a single re-authenticate
    /// message so that callers cannot distinguish a revoked session from an
    /// expired token; the audit trail keeps the distinction.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::TokenExpired
            | Self::TokenMalformed(_)
            | Self::TokenSignatureInvalid
            | Self::TokenTypeMismatch { .. }
            | Self::IssuerMismatch { .. }
            | Self::FingerprintMismatch
            | Self::SessionNotFound
            | Self::MissingAuthToken
            | Self::InvalidAuthFormat => "Authentication required".to_string(),

            Self::CacheUnavailable(_)
            | Self::Serialization(_)
            | Self::PasswordHashError(_)
            | Self::TokenGenerationFailed(_)
            | Self::Config(_)
            | Self::Internal(_) => "Internal server error".to_string(),

            other => other.to_string(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = json!({ "error": self.public_message() });

        if let Self::RateLimitExceeded { retry_after_secs }
        | Self::OtpIssuanceCapped { retry_after_secs } = &self
        {
            body["retry_after"] = json!(retry_after_secs);
        }

        (status, Json(body)).into_response()
    }
}
