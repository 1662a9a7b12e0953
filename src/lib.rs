//! # Storefront Auth
//!
//! Authentication and session security for the storefront: signed tokens,
//! cache-backed revocable sessions, rate limiting, one-time passcodes, CSRF
//! protection, and password/input security.
//!
//! ## Architecture
//!
//! Every stateful service runs over one shared [`cache::CacheStore`] — an
//! in-process bounded LRU for a single instance, Redis when configured — so
//! sessions, rate-limit counters, OTP codes, and CSRF tokens all live and
//! expire in one place:
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │             Application Layer               │
//! │        (storefront API, admin API)          │
//! └──────────────────────┬──────────────────────┘
//!                        │
//! ┌──────────────────────▼──────────────────────┐
//! │               Middleware                    │
//! │   token verification · CSRF · rate limits   │
//! └──────┬─────────┬─────────┬─────────┬────────┘
//!        │         │         │         │
//!   ┌────▼───┐ ┌───▼────┐ ┌──▼─────┐ ┌─▼──────┐
//!   │Session │ │ Token  │ │  OTP   │ │  CSRF  │
//!   │Manager │ │Service │ │ Engine │ │Service │
//!   └────┬───┘ └────────┘ └──┬─────┘ └─┬──────┘
//!        │                   │         │
//! ┌──────▼───────────────────▼─────────▼────────┐
//! │          CacheStore (memory / Redis)        │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Tokens themselves are stateless; the session record in the cache is what
//! makes them revocable. Deleting the record (logout, forced invalidation,
//! re-login) defeats every token minted for it, signature validity
//! notwithstanding.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use storefront_auth::{
//!     AuthConfig, SessionManager, TokenService, UserSession, cache,
//! };
//!
//! # async fn run() -> storefront_auth::Result<()> {
//! let config = AuthConfig::from_env()?;
//! config.validate()?;
//!
//! let store = cache::connect(&config.cache)?;
//! let tokens = TokenService::new(&config.token)?;
//! let sessions = Arc::new(SessionManager::new(store, tokens, &config.session));
//!
//! let auth = sessions
//!     .create_session(
//!         UserSession {
//!             user_id: "u1".to_string(),
//!             email: "u1@example.com".to_string(),
//!             role: "customer".to_string(),
//!             permissions: vec!["orders:read".to_string()],
//!             mfa_enabled: false,
//!             last_login: 0,
//!             ip_address: None,
//!             user_agent: None,
//!         },
//!         false,
//!     )
//!     .await?;
//!
//! let session = sessions.resolve_token(&auth.access_token).await?;
//! assert!(session.is_some());
//! # Ok(())
//! # }
//! ```
//!
//! ## Security
//!
//! - **Argon2id** for password hashing, with rehash detection on parameter
//!   upgrades
//! - **HS256** token signing by default, RS256 for deployments where
//!   verifying services must not hold signing material
//! - **Constant-time** comparison for CSRF tokens
//! - **Fail-open** cache degradation: an unreachable Redis never takes the
//!   storefront down, at the cost of temporarily unenforced limits

// Core modules
pub mod audit;
pub mod cache;
pub mod config;
pub mod csrf;
pub mod error;
pub mod middleware;
pub mod otp;
pub mod password;
pub mod ratelimit;
pub mod session;
pub mod token;
pub mod validation;

// Authentication-specific errors
pub use error::AuthError;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AuthError>;

// Re-exports for convenience

// Cache
pub use cache::{CacheStore, MemoryCache, RedisCache};

// Tokens
pub use token::{Claims, IssuedIdentity, TokenKeys, TokenService, TokenType, fingerprint_hash};

// Sessions
pub use session::{ADMIN_ROLE, AuthenticatedSession, SessionManager, UserSession};

// Rate limiting
pub use ratelimit::{RateLimitDecision, RateLimiter};

// OTP
pub use otp::{LogDelivery, OtpDelivery, OtpService, SweeperHandle};

// CSRF
pub use csrf::{CsrfService, constant_time_eq};

// Password
pub use password::{PasswordCheck, PasswordPolicy, PasswordService, calculate_strength};

// Validation
pub use validation::{
    sanitize_html, validate_email, validate_file, validate_name, validate_safe_string,
};

// Middleware
pub use middleware::{
    AuthSession, auth_middleware, csrf_middleware, rate_limit_middleware,
    security_headers_middleware,
};

// Configuration
pub use config::{
    AuthConfig, CacheConfig, CsrfConfig, OtpConfig, RateLimitConfig, SessionConfig, TokenConfig,
};

// Audit
pub use audit::{AuditEvent, AuditSeverity};

// Prelude for easy imports
pub mod prelude {
    pub use crate::{
        ADMIN_ROLE,
        // Configuration
        AuthConfig,
        AuthError,
        // Middleware
        AuthSession,
        AuthenticatedSession,
        // Cache
        CacheStore,
        // Tokens
        Claims,
        // Services
        CsrfService,
        OtpService,
        PasswordService,
        RateLimiter,
        Result,
        SessionManager,
        TokenService,
        TokenType,
        UserSession,

        auth_middleware,
        csrf_middleware,
        rate_limit_middleware,
        security_headers_middleware,

        // Validation
        sanitize_html,
        validate_email,
        validate_safe_string,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prelude_import() {
        // Verify prelude works
        use crate::prelude::*;

        let service = TokenService::new(&TokenConfig::test_defaults()).unwrap();
        assert_eq!(service.issuer(), "storefront-test");
    }
}
