//! # Token Service
//!
//! This module issues and verifies the signed, time-bounded tokens that carry
//! a user's identity between requests.
//!
//! ## Features
//!
//! - Access tokens (15 minutes) and refresh tokens (7 days, 30 with a
//!   persistent-login preference)
//! - HS256 (shared secret) or RS256 signing; RS256 lets services that must
//!   not hold the signing key verify with the public half alone
//! - Unique token IDs (`jti`) on every issued token
//! - Proactive rotation signal once a token has burned 80% of its lifetime
//! - Optional device-fingerprint binding
//!
//! ## Security
//!
//! Tokens are stateless: a signature stays valid until expiry no matter what
//! happens server-side. Revocation is the session manager's job — it checks
//! that the session a token references still exists (see
//! [`crate::session::SessionManager::resolve_token`]).

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::TokenConfig;
use crate::{Result, error::AuthError};

// ==================== Claims ====================

/// Token payload.
///
/// Everything the middleware needs to authorize a request without a database
/// round-trip, plus the `session_id` linking the token to its revocable
/// server-side session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Subject - the user ID this token represents
    pub sub: String,

    /// User email, for convenience in handlers and audit logs
    pub email: String,

    /// Role name (`customer`, `staff`, `admin`, ...)
    pub role: String,

    /// Granted permissions
    pub permissions: Vec<String>,

    /// Whether this authentication passed a second factor
    pub mfa_verified: bool,

    /// Server-side session this token is bound to
    pub session_id: String,

    /// Distinguishes access from refresh tokens
    #[serde(rename = "type")]
    pub token_type: TokenType,

    /// Unique ID for this specific token, for replay/blacklist checks
    pub jti: String,

    /// Issued-at, unix timestamp
    pub iat: i64,

    /// Expiry, unix timestamp
    pub exp: i64,

    /// Issuing service
    pub iss: String,

    /// Optional hash of client characteristics; verification may reject a
    /// token replayed from a materially different device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl Claims {
    /// Whether the token is past its expiry.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.exp < OffsetDateTime::now_utc().unix_timestamp()
    }

    /// Seconds until expiry; negative once expired.
    #[must_use]
    pub fn time_until_expiration(&self) -> i64 {
        self.exp - OffsetDateTime::now_utc().unix_timestamp()
    }
}

impl fmt::Display for Claims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Claims {{ sub: {}, role: {}, session: {}, type: {}, exp: {} }}",
            self.sub, self.role, self.session_id, self.token_type, self.exp
        )
    }
}

// ==================== Token Type ====================

/// Token type for the two token purposes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    /// Short-lived credential proving recent authentication, used per-request
    Access,

    /// Long-lived credential used solely to mint new access tokens
    Refresh,
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Access => write!(f, "access"),
            Self::Refresh => write!(f, "refresh"),
        }
    }
}

// ==================== Identity ====================

/// The authenticated identity baked into freshly issued tokens.
#[derive(Debug, Clone)]
pub struct IssuedIdentity {
    pub user_id: String,
    pub email: String,
    pub role: String,
    pub permissions: Vec<String>,
    pub mfa_verified: bool,
    pub session_id: String,
    /// Optional device binding, see [`fingerprint_hash`]
    pub fingerprint: Option<String>,
}

// ==================== Signing Keys ====================

/// Signing key material.
///
/// `Hmac` is the single-service default. `Rsa` signs with the private key and
/// verifies with the public key, so verification-only services never hold
/// signing material.
#[derive(Debug, Clone)]
pub enum TokenKeys {
    /// HS256 shared secret (at least 32 characters)
    Hmac(String),
    /// RS256 key pair in PEM form; `private_pem` may be empty on
    /// verification-only services
    Rsa {
        private_pem: String,
        public_pem: String,
    },
}

impl TokenKeys {
    fn algorithm(&self) -> Algorithm {
        match self {
            Self::Hmac(_) => Algorithm::HS256,
            Self::Rsa { .. } => Algorithm::RS256,
        }
    }

    fn encoding_key(&self) -> Result<EncodingKey> {
        match self {
            Self::Hmac(secret) => Ok(EncodingKey::from_secret(secret.as_bytes())),
            Self::Rsa { private_pem, .. } => EncodingKey::from_rsa_pem(private_pem.as_bytes())
                .map_err(|e| AuthError::TokenGenerationFailed(e.to_string())),
        }
    }

    fn decoding_key(&self) -> Result<DecodingKey> {
        match self {
            Self::Hmac(secret) => Ok(DecodingKey::from_secret(secret.as_bytes())),
            Self::Rsa { public_pem, .. } => DecodingKey::from_rsa_pem(public_pem.as_bytes())
                .map_err(|e| AuthError::Config(format!("invalid RSA public key: {e}"))),
        }
    }
}

// ==================== Token Service ====================

/// Issues and verifies signed access/refresh tokens.
///
/// # Thread Safety
///
/// The service is cheap to clone and safe to share across tasks.
#[derive(Debug, Clone)]
pub struct TokenService {
    keys: TokenKeys,
    issuer: String,
    access_ttl_secs: i64,
    refresh_ttl_secs: i64,
    persistent_refresh_ttl_secs: i64,
    /// Fraction of lifetime after which rotation is signaled
    rotation_threshold: f64,
}

impl TokenService {
    /// Build a service from configuration.
    pub fn new(config: &TokenConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            keys: config.keys.clone(),
            issuer: config.issuer.clone(),
            access_ttl_secs: config.access_ttl_secs,
            refresh_ttl_secs: config.refresh_ttl_secs,
            persistent_refresh_ttl_secs: config.persistent_refresh_ttl_secs,
            rotation_threshold: config.rotation_threshold,
        })
    }

    /// Get the issuer.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Access-token lifetime in seconds.
    #[must_use]
    pub const fn access_ttl_secs(&self) -> i64 {
        self.access_ttl_secs
    }

    /// Issue a short-lived access token for an authenticated identity.
    pub fn issue_access_token(&self, identity: &IssuedIdentity) -> Result<String> {
        let claims = self.build_claims(identity, TokenType::Access, self.access_ttl_secs);
        self.encode_token(&claims)
    }

    /// Issue a refresh token bound to a session.
    ///
    /// With `persistent` set (a "remember me" preference at issuance) the
    /// token lives 30 days instead of 7.
    pub fn issue_refresh_token(
        &self,
        user_id: &str,
        session_id: &str,
        persistent: bool,
    ) -> Result<String> {
        let ttl = if persistent {
            self.persistent_refresh_ttl_secs
        } else {
            self.refresh_ttl_secs
        };

        // Refresh tokens carry the minimum: identity lookup happens against
        // the session when a new access token is minted.
        let identity = IssuedIdentity {
            user_id: user_id.to_string(),
            email: String::new(),
            role: String::new(),
            permissions: Vec::new(),
            mfa_verified: false,
            session_id: session_id.to_string(),
            fingerprint: None,
        };
        let claims = self.build_claims(&identity, TokenType::Refresh, ttl);
        self.encode_token(&claims)
    }

    /// Sign pre-built claims. Exists for flows that need full control over
    /// the payload (and for expiry tests).
    pub fn issue_with_claims(&self, claims: &Claims) -> Result<String> {
        self.encode_token(claims)
    }

    /// Verify a token and return its claims.
    ///
    /// # Errors
    ///
    /// - [`AuthError::TokenExpired`] past `exp`
    /// - [`AuthError::TokenSignatureInvalid`] on a bad signature
    /// - [`AuthError::TokenMalformed`] on anything structurally wrong
    /// - [`AuthError::IssuerMismatch`] when `iss` differs
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let claims = self.decode_token(token)?;

        if claims.iss != self.issuer {
            return Err(AuthError::IssuerMismatch {
                expected: self.issuer.clone(),
                actual: claims.iss,
            });
        }

        Ok(claims)
    }

    /// Verify a token and require it to be an access token.
    pub fn verify_access(&self, token: &str) -> Result<Claims> {
        let claims = self.verify(token)?;
        self.require_type(&claims, TokenType::Access)?;
        Ok(claims)
    }

    /// Verify a token and require it to be a refresh token.
    pub fn verify_refresh(&self, token: &str) -> Result<Claims> {
        let claims = self.verify(token)?;
        self.require_type(&claims, TokenType::Refresh)?;
        Ok(claims)
    }

    /// Verify an access token and enforce device-fingerprint binding.
    ///
    /// A token without an embedded fingerprint passes regardless of
    /// `presented` — binding is a per-issuance policy, not a universal rule.
    pub fn verify_access_bound(&self, token: &str, presented: Option<&str>) -> Result<Claims> {
        let claims = self.verify_access(token)?;

        if let Some(expected) = &claims.fingerprint {
            match presented {
                Some(actual) if actual == expected => {}
                _ => return Err(AuthError::FingerprintMismatch),
            }
        }

        Ok(claims)
    }

    /// Whether the token has burned enough of its lifetime that the caller
    /// should proactively reissue before hard expiry.
    #[must_use]
    pub fn needs_rotation(&self, claims: &Claims) -> bool {
        let lifetime = claims.exp - claims.iat;
        if lifetime <= 0 {
            return true;
        }

        let elapsed = OffsetDateTime::now_utc().unix_timestamp() - claims.iat;
        elapsed as f64 / lifetime as f64 >= self.rotation_threshold
    }

    // ==================== Internal Methods ====================

    fn build_claims(&self, identity: &IssuedIdentity, token_type: TokenType, ttl: i64) -> Claims {
        let now = OffsetDateTime::now_utc().unix_timestamp();

        Claims {
            sub: identity.user_id.clone(),
            email: identity.email.clone(),
            role: identity.role.clone(),
            permissions: identity.permissions.clone(),
            mfa_verified: identity.mfa_verified,
            session_id: identity.session_id.clone(),
            token_type,
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + ttl,
            iss: self.issuer.clone(),
            fingerprint: identity.fingerprint.clone(),
        }
    }

    fn require_type(&self, claims: &Claims, expected: TokenType) -> Result<()> {
        if claims.token_type != expected {
            return Err(AuthError::TokenTypeMismatch {
                expected: expected.to_string(),
                actual: claims.token_type.to_string(),
            });
        }
        Ok(())
    }

    fn encode_token(&self, claims: &Claims) -> Result<String> {
        let key = self.keys.encoding_key()?;
        encode(&Header::new(self.keys.algorithm()), claims, &key)
            .map_err(|e| AuthError::TokenGenerationFailed(e.to_string()))
    }

    fn decode_token(&self, token: &str) -> Result<Claims> {
        let key = self.keys.decoding_key()?;
        let mut validation = Validation::new(self.keys.algorithm());
        validation.validate_exp = true;
        validation.validate_aud = false;
        validation.leeway = 0;

        let token_data = decode::<Claims>(token, &key, &validation)?;
        Ok(token_data.claims)
    }
}

// ==================== Fingerprint ====================

/// Hash client characteristics into a stable device fingerprint.
///
/// The hash deliberately uses coarse inputs (user agent and IP); anything
/// finer churns on ordinary client updates and logs users out for no reason.
#[must_use]
pub fn fingerprint_hash(user_agent: &str, ip_address: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_agent.as_bytes());
    hasher.update(b"|");
    hasher.update(ip_address.as_bytes());

    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

// ==================== Tests ====================
