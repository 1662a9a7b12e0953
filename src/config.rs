//! # Configuration
//!
//! Configuration structures for every service in the crate:
//! - Cache backend selection (in-process vs Redis)
//! - Rate-limit policy (login window, burst guard)
//! - Token signing (keys, lifetimes, rotation threshold)
//! - Session, OTP, and CSRF lifetimes
//!
//! ## Example
//!
//! ```no_run
//! use storefront_auth::AuthConfig;
//!
//! // Load from environment variables
//! let config = AuthConfig::from_env().unwrap();
//!
//! // Validate configuration
//! config.validate().unwrap();
//!
//! // Access sub-configurations
//! let token_config = &config.token;
//! let rate_limit = &config.rate_limit;
//! ```

use crate::token::TokenKeys;
use crate::{Result, error::AuthError};

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T: ToString,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AuthError::Config(format!("invalid value for {key}: '{raw}'"))),
        Err(_) => Ok(default),
    }
}

// ==================== Cache Configuration ====================

/// Cache backend configuration.
///
/// A present `redis_url` selects the networked backend; absent, the
/// in-process bounded cache is used (suitable for development and tests,
/// not for multi-instance deployments).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Redis connection URL, e.g. `redis://127.0.0.1:6379/0`
    pub redis_url: Option<String>,

    /// Entry capacity of the in-process backend before LRU eviction
    pub memory_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            memory_capacity: 10_000,
        }
    }
}

impl CacheConfig {
    /// Load from environment variables.
    ///
    /// # Environment Variables
    /// - `REDIS_URL`: Redis connection URL (optional; in-process when absent)
    /// - `CACHE_MEMORY_CAPACITY`: in-process entry capacity (default: 10000)
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            redis_url: std::env::var("REDIS_URL").ok(),
            memory_capacity: env_parse("CACHE_MEMORY_CAPACITY", 10_000)?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.memory_capacity == 0 {
            return Err(AuthError::Config(
                "CACHE_MEMORY_CAPACITY must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ==================== Rate Limit Configuration ====================

/// Rate-limit policy.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Login attempts allowed per window, per identifier
    pub login_max_attempts: u32,

    /// Login window duration in seconds
    pub login_window_secs: u64,

    /// Consecutive sub-gap requests tolerated before the burst guard denies
    pub burst_ceiling: u32,

    /// Inter-request gap (milliseconds) under which requests count as a burst
    pub burst_gap_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            login_max_attempts: 5,
            login_window_secs: 900, // 15 minutes
            burst_ceiling: 10,
            burst_gap_ms: 1_000,
        }
    }
}

impl RateLimitConfig {
    /// Load from environment variables.
    ///
    /// # Environment Variables
    /// - `RATE_LIMIT_LOGIN_MAX_ATTEMPTS`: attempts per window (default: 5)
    /// - `RATE_LIMIT_LOGIN_WINDOW_SECONDS`: window length (default: 900)
    /// - `RATE_LIMIT_BURST_CEILING`: burst tolerance (default: 10)
    /// - `RATE_LIMIT_BURST_GAP_MS`: burst gap in ms (default: 1000)
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            login_max_attempts: env_parse("RATE_LIMIT_LOGIN_MAX_ATTEMPTS", 5)?,
            login_window_secs: env_parse("RATE_LIMIT_LOGIN_WINDOW_SECONDS", 900)?,
            burst_ceiling: env_parse("RATE_LIMIT_BURST_CEILING", 10)?,
            burst_gap_ms: env_parse("RATE_LIMIT_BURST_GAP_MS", 1_000)?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.login_max_attempts == 0 {
            return Err(AuthError::Config(
                "RATE_LIMIT_LOGIN_MAX_ATTEMPTS must be greater than 0".to_string(),
            ));
        }
        if self.login_window_secs == 0 {
            return Err(AuthError::Config(
                "RATE_LIMIT_LOGIN_WINDOW_SECONDS must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ==================== Token Configuration ====================

/// Token signing configuration.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// Signing key material (HS256 shared secret or RS256 key pair)
    ///
    /// # Security
    /// - HMAC secrets must be at least 32 characters
    /// - Use a cryptographically secure random string
    /// - Keep this secret! Never commit to version control
    ///
    /// ```bash
    /// # Generate a secure secret
    /// openssl rand -base64 48
    /// ```
    pub keys: TokenKeys,

    /// Issuer claim stamped into and required from every token
    pub issuer: String,

    /// Access-token lifetime in seconds
    ///
    /// # Security Trade-off
    /// - Shorter = a stolen token is useful for less time
    /// - Longer = fewer refresh round-trips
    pub access_ttl_secs: i64,

    /// Refresh-token lifetime in seconds
    pub refresh_ttl_secs: i64,

    /// Refresh-token lifetime when the user opted into persistent login
    pub persistent_refresh_ttl_secs: i64,

    /// Fraction of lifetime (0..1) after which rotation is signaled
    pub rotation_threshold: f64,
}

impl TokenConfig {
    /// Load from environment variables.
    ///
    /// # Environment Variables
    /// - `JWT_SECRET`: HS256 signing secret (required unless RSA keys given)
    /// - `JWT_RSA_PRIVATE_PEM` / `JWT_RSA_PUBLIC_PEM`: RS256 key pair;
    ///   selects RS256 when both are set
    /// - `JWT_ISSUER`: issuer claim (default: "storefront-auth")
    /// - `JWT_ACCESS_TTL`: access lifetime in seconds (default: 900)
    /// - `JWT_REFRESH_TTL`: refresh lifetime in seconds (default: 604800)
    /// - `JWT_PERSISTENT_REFRESH_TTL`: persistent-login refresh lifetime
    ///   (default: 2592000)
    /// - `JWT_ROTATION_THRESHOLD`: rotation fraction (default: 0.8)
    pub fn from_env() -> Result<Self> {
        let keys = match (
            std::env::var("JWT_RSA_PRIVATE_PEM").ok(),
            std::env::var("JWT_RSA_PUBLIC_PEM").ok(),
        ) {
            (Some(private_pem), Some(public_pem)) => TokenKeys::Rsa {
                private_pem,
                public_pem,
            },
            _ => TokenKeys::Hmac(std::env::var("JWT_SECRET").map_err(|_| {
                AuthError::Config("missing required configuration: JWT_SECRET".to_string())
            })?),
        };

        Ok(Self {
            keys,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "storefront-auth".to_string()),
            access_ttl_secs: env_parse("JWT_ACCESS_TTL", 900)?,
            refresh_ttl_secs: env_parse("JWT_REFRESH_TTL", 604_800)?,
            persistent_refresh_ttl_secs: env_parse("JWT_PERSISTENT_REFRESH_TTL", 2_592_000)?,
            rotation_threshold: env_parse("JWT_ROTATION_THRESHOLD", 0.8)?,
        })
    }

    /// Validate token configuration.
    ///
    /// # Errors
    /// Returns [`AuthError::Config`] when:
    /// - the HMAC secret is shorter than 32 characters
    /// - an RSA key half is empty
    /// - the issuer is empty
    /// - a lifetime is non-positive
    /// - the rotation threshold is outside (0, 1]
    pub fn validate(&self) -> Result<()> {
        match &self.keys {
            TokenKeys::Hmac(secret) if secret.len() < 32 => {
                return Err(AuthError::Config(format!(
                    "JWT_SECRET must be at least 32 characters (got {})",
                    secret.len()
                )));
            }
            TokenKeys::Rsa { public_pem, .. } if public_pem.is_empty() => {
                return Err(AuthError::Config(
                    "JWT_RSA_PUBLIC_PEM cannot be empty".to_string(),
                ));
            }
            _ => {}
        }

        if self.issuer.is_empty() {
            return Err(AuthError::Config("JWT_ISSUER cannot be empty".to_string()));
        }

        if self.access_ttl_secs <= 0 || self.refresh_ttl_secs <= 0 {
            return Err(AuthError::Config(
                "token lifetimes must be positive".to_string(),
            ));
        }

        if !(self.rotation_threshold > 0.0 && self.rotation_threshold <= 1.0) {
            return Err(AuthError::Config(
                "JWT_ROTATION_THRESHOLD must be in (0, 1]".to_string(),
            ));
        }

        Ok(())
    }

    /// Fixed configuration for tests and local development. Never use the
    /// embedded secret anywhere near production.
    #[must_use]
    pub fn test_defaults() -> Self {
        Self {
            keys: TokenKeys::Hmac("test_secret_key_at_least_32_characters_long".to_string()),
            issuer: "storefront-test".to_string(),
            access_ttl_secs: 900,
            refresh_ttl_secs: 604_800,
            persistent_refresh_ttl_secs: 2_592_000,
            rotation_threshold: 0.8,
        }
    }
}

// ==================== Session Configuration ====================

/// Session lifetime configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Session record lifetime in seconds; the outer bound on how long any
    /// token chain can stay alive without re-authentication
    pub ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 604_800, // 7 days
        }
    }
}

impl SessionConfig {
    /// Load from environment variables.
    ///
    /// # Environment Variables
    /// - `SESSION_TTL_SECONDS`: session lifetime (default: 604800)
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            ttl_secs: env_parse("SESSION_TTL_SECONDS", 604_800)?,
        })
    }
}

// ==================== OTP Configuration ====================

/// One-time-passcode configuration.
#[derive(Debug, Clone)]
pub struct OtpConfig {
    /// Code lifetime in seconds
    pub ttl_secs: u64,

    /// Codes issuable per identifier per issuance window
    pub max_per_window: u32,

    /// Issuance window in seconds
    pub issue_window_secs: u64,

    /// Failed verifications tolerated before the record is deleted
    pub max_verify_attempts: u32,

    /// Interval between background sweeps of expired records
    pub sweep_interval_secs: u64,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 600, // 10 minutes
            max_per_window: 3,
            issue_window_secs: 600,
            max_verify_attempts: 5,
            sweep_interval_secs: 60,
        }
    }
}

impl OtpConfig {
    /// Load from environment variables.
    ///
    /// # Environment Variables
    /// - `OTP_TTL_SECONDS`: code lifetime (default: 600)
    /// - `OTP_MAX_PER_WINDOW`: issuance cap (default: 3)
    /// - `OTP_ISSUE_WINDOW_SECONDS`: issuance window (default: 600)
    /// - `OTP_MAX_VERIFY_ATTEMPTS`: verification budget (default: 5)
    /// - `OTP_SWEEP_INTERVAL_SECONDS`: sweep interval (default: 60)
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            ttl_secs: env_parse("OTP_TTL_SECONDS", 600)?,
            max_per_window: env_parse("OTP_MAX_PER_WINDOW", 3)?,
            issue_window_secs: env_parse("OTP_ISSUE_WINDOW_SECONDS", 600)?,
            max_verify_attempts: env_parse("OTP_MAX_VERIFY_ATTEMPTS", 5)?,
            sweep_interval_secs: env_parse("OTP_SWEEP_INTERVAL_SECONDS", 60)?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_per_window == 0 {
            return Err(AuthError::Config(
                "OTP_MAX_PER_WINDOW must be greater than 0".to_string(),
            ));
        }
        if self.max_verify_attempts == 0 {
            return Err(AuthError::Config(
                "OTP_MAX_VERIFY_ATTEMPTS must be greater than 0".to_string(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(AuthError::Config(
                "OTP_SWEEP_INTERVAL_SECONDS must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ==================== CSRF Configuration ====================

/// CSRF token configuration.
#[derive(Debug, Clone)]
pub struct CsrfConfig {
    /// Server-side token record lifetime in seconds
    pub ttl_secs: u64,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 1_800, // 30 minutes
        }
    }
}

impl CsrfConfig {
    /// Load from environment variables.
    ///
    /// # Environment Variables
    /// - `CSRF_TTL_SECONDS`: token lifetime (default: 1800)
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            ttl_secs: env_parse("CSRF_TTL_SECONDS", 1_800)?,
        })
    }
}

// ==================== Main Auth Configuration ====================

/// Unified configuration for the whole authentication stack.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub token: TokenConfig,
    pub session: SessionConfig,
    pub otp: OtpConfig,
    pub csrf: CsrfConfig,

    /// Whether cookies are marked `Secure` (HTTPS-only); disable only in
    /// local development
    pub secure_cookies: bool,
}

impl AuthConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    /// See individual configuration structs for details:
    /// - `REDIS_URL`, `CACHE_*`: cache backend
    /// - `RATE_LIMIT_*`: rate limiting
    /// - `JWT_*`: token signing
    /// - `SESSION_*`, `OTP_*`, `CSRF_*`: lifetimes
    /// - `SECURE_COOKIES`: mark cookies Secure (default: true)
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            cache: CacheConfig::from_env()?,
            rate_limit: RateLimitConfig::from_env()?,
            token: TokenConfig::from_env()?,
            session: SessionConfig::from_env()?,
            otp: OtpConfig::from_env()?,
            csrf: CsrfConfig::from_env()?,
            secure_cookies: env_parse("SECURE_COOKIES", true)?,
        })
    }

    /// Validate all sub-configurations, returning the first error found.
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.rate_limit.validate()?;
        self.token.validate()?;
        self.otp.validate()?;
        Ok(())
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_config_defaults_validate() {
        assert!(TokenConfig::test_defaults().validate().is_ok());
    }

    #[test]
    fn test_short_hmac_secret_rejected() {
        let config = TokenConfig {
            keys: TokenKeys::Hmac("short".to_string()),
            ..TokenConfig::test_defaults()
        };
        assert!(matches!(config.validate(), Err(AuthError::Config(_))));
    }

    #[test]
    fn test_empty_issuer_rejected() {
        let config = TokenConfig {
            issuer: String::new(),
            ..TokenConfig::test_defaults()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rotation_threshold_bounds() {
        for bad in [0.0, -0.1, 1.5] {
            let config = TokenConfig {
                rotation_threshold: bad,
                ..TokenConfig::test_defaults()
            };
            assert!(config.validate().is_err(), "threshold {bad} should fail");
        }
    }

    #[test]
    fn test_rate_limit_defaults() {
        let config = RateLimitConfig::default();
        assert_eq!(config.login_max_attempts, 5);
        assert_eq!(config.login_window_secs, 900);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_otp_defaults() {
        let config = OtpConfig::default();
        assert_eq!(config.max_per_window, 3);
        assert_eq!(config.issue_window_secs, 600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_cache_rejected() {
        let config = CacheConfig {
            memory_capacity: 0,
            ..CacheConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
