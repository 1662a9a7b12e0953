//! # Middleware for Authentication and Security
//!
//! Axum middleware and extractors wiring the services into the request path:
//! token verification with fingerprint binding and server-side session
//! resolution, double-submit CSRF enforcement on mutating methods, per-IP
//! rate limiting, and security response headers. Cookie helpers build the
//! hardened `Set-Cookie` values the login handlers need.

use axum::{
    extract::{FromRequestParts, State},
    http::{HeaderMap, HeaderValue, Method, Request, header, request::Parts},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::debug;

use crate::csrf::CsrfService;
use crate::error::AuthError;
use crate::ratelimit::RateLimiter;
use crate::session::{SessionManager, UserSession};
use crate::token::{Claims, fingerprint_hash};

/// Cookie carrying the access token for browser clients.
pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// Cookie carrying the refresh token, scoped to the refresh endpoint.
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";

/// Cookie carrying the CSRF token (readable by scripts by design; the
/// double-submit scheme depends on the client echoing it into the header).
pub const CSRF_COOKIE: &str = "csrf_token";

/// Header the client must echo the CSRF cookie into.
pub const CSRF_HEADER: &str = "x-csrf-token";

// ==================== Auth Extractor ====================

/// Authenticated-session extractor for Axum handlers.
///
/// Retrieves the session and claims placed in the request extensions by
/// [`auth_middleware`]; rejects with 401 when the middleware did not run or
/// did not authenticate the request.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub session: UserSession,
    pub claims: Claims,
}

impl<S> FromRequestParts<S> for AuthSession
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let session = parts
            .extensions
            .get::<UserSession>()
            .ok_or(AuthError::MissingAuthToken)?
            .clone();
        let claims = parts
            .extensions
            .get::<Claims>()
            .ok_or(AuthError::MissingAuthToken)?
            .clone();

        Ok(Self { session, claims })
    }
}

// ==================== Auth Middleware ====================

/// Authentication middleware.
///
/// Pulls the access token from the `Authorization: Bearer` header or the
/// `access_token` cookie, verifies it (including device-fingerprint binding
/// when the token carries one), resolves the server-side session, and stores
/// both in the request extensions. A token whose session was revoked is
/// rejected exactly like a missing token.
pub async fn auth_middleware(
    State(sessions): State<Arc<SessionManager>>,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let token = extract_access_token(request.headers())?;

    let presented = request_fingerprint(request.headers());
    let claims = sessions
        .tokens()
        .verify_access_bound(&token, presented.as_deref())?;

    let session = sessions
        .resolve_claims(&claims)
        .await?
        .ok_or(AuthError::SessionNotFound)?;

    request.extensions_mut().insert(session);
    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}

// ==================== CSRF Middleware ====================

/// Double-submit CSRF middleware.
///
/// For mutating methods (everything except GET/HEAD/OPTIONS) the
/// `csrf_token` cookie must equal the `X-CSRF-Token` header. Safe methods
/// pass through untouched.
pub async fn csrf_middleware(
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AuthError> {
    if matches!(
        *request.method(),
        Method::GET | Method::HEAD | Method::OPTIONS
    ) {
        return Ok(next.run(request).await);
    }

    let headers = request.headers();
    let cookie = cookie_value(headers, CSRF_COOKIE);
    let header = headers.get(CSRF_HEADER).and_then(|v| v.to_str().ok());

    if cookie.is_none() && header.is_none() {
        return Err(AuthError::CsrfMissing);
    }
    if !CsrfService::validate_pair(cookie.as_deref(), header) {
        return Err(AuthError::CsrfMismatch);
    }

    Ok(next.run(request).await)
}

// ==================== Rate Limit Middleware ====================

/// Per-IP rate-limiting middleware over the login policy.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let ip = extract_client_ip(request.headers());

    limiter.check_login(&ip).await?.into_result()?;
    debug!(%ip, "rate limit check passed");

    Ok(next.run(request).await)
}

// ==================== Security Headers Middleware ====================

/// Security headers middleware.
///
/// Adds common security headers to responses:
/// - X-Content-Type-Options
/// - X-Frame-Options
/// - Strict-Transport-Security
/// - Content-Security-Policy
/// - Referrer-Policy
pub async fn security_headers_middleware(
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        "X-Content-Type-Options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "Strict-Transport-Security",
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    headers.insert(
        "Content-Security-Policy",
        HeaderValue::from_static("default-src 'self'; script-src 'self'; object-src 'none'; frame-ancestors 'none'; base-uri 'self'; form-action 'self'"),
    );
    headers.insert(
        "Referrer-Policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );

    response
}

// ==================== Cookie Helpers ====================

/// Build a hardened `Set-Cookie` value for the access-token cookie:
/// httpOnly so scripts cannot read it, SameSite=Lax, Secure when configured.
#[must_use]
pub fn access_token_cookie(token: &str, max_age_secs: i64, secure: bool) -> String {
    let secure_attr = if secure { "; Secure" } else { "" };
    format!(
        "{ACCESS_TOKEN_COOKIE}={token}; Path=/; Max-Age={max_age_secs}; HttpOnly; SameSite=Lax{secure_attr}"
    )
}

/// Build a hardened `Set-Cookie` value for the refresh-token cookie. Scoped
/// to the refresh endpoint so the long-lived token never rides along on
/// ordinary requests.
#[must_use]
pub fn refresh_token_cookie(token: &str, max_age_secs: i64, secure: bool) -> String {
    let secure_attr = if secure { "; Secure" } else { "" };
    format!(
        "{REFRESH_TOKEN_COOKIE}={token}; Path=/auth/refresh; Max-Age={max_age_secs}; HttpOnly; SameSite=Lax{secure_attr}"
    )
}

/// Build the `Set-Cookie` value for the CSRF cookie. Deliberately NOT
/// httpOnly: the double-submit scheme requires the client to read it back
/// into the `X-CSRF-Token` header.
#[must_use]
pub fn csrf_cookie(token: &str, max_age_secs: i64, secure: bool) -> String {
    let secure_attr = if secure { "; Secure" } else { "" };
    format!("{CSRF_COOKIE}={token}; Path=/; Max-Age={max_age_secs}; SameSite=Lax{secure_attr}")
}

/// Build a `Set-Cookie` value that clears a cookie (logout path).
#[must_use]
pub fn clear_cookie(name: &str) -> String {
    format!("{name}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax")
}

// ==================== Helper Functions ====================

/// Extract the access token from the `Authorization: Bearer` header, falling
/// back to the `access_token` cookie for browser clients.
fn extract_access_token(headers: &HeaderMap) -> Result<String, AuthError> {
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        let value = auth_header
            .to_str()
            .map_err(|_| AuthError::InvalidAuthFormat)?;
        let token = value
            .strip_prefix("Bearer ")
            .ok_or(AuthError::InvalidAuthFormat)?;
        return Ok(token.to_string());
    }

    cookie_value(headers, ACCESS_TOKEN_COOKIE).ok_or(AuthError::MissingAuthToken)
}

/// Read a cookie's value out of the `Cookie` header.
fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;

    raw.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

/// Extract the client IP from proxy headers.
fn extract_client_ip(headers: &HeaderMap) -> String {
    if let Some(forwarded_for) = headers.get("X-Forwarded-For") {
        if let Ok(value) = forwarded_for.to_str() {
            if let Some(first_ip) = value.split(',').next() {
                return first_ip.trim().to_string();
            }
        }
    }

    if let Some(real_ip) = headers.get("X-Real-IP") {
        if let Ok(value) = real_ip.to_str() {
            return value.to_string();
        }
    }

    "unknown".to_string()
}

/// Fingerprint of the requesting client, when both inputs are present.
fn request_fingerprint(headers: &HeaderMap) -> Option<String> {
    let user_agent = headers.get(header::USER_AGENT)?.to_str().ok()?;
    let ip = extract_client_ip(headers);
    if ip == "unknown" {
        return None;
    }
    Some(fingerprint_hash(user_agent, &ip))
}

// ==================== Tests ====================
