//! # CSRF Protection
//!
//! Double-submit anti-forgery tokens: the same high-entropy value is placed
//! in an httpOnly-exempt cookie and must be echoed back in a custom request
//! header (`X-CSRF-Token`). Validation succeeds only when both halves are
//! present and equal.
//!
//! All comparisons are constant-time (`subtle`), never a short-circuiting
//! `==` — a byte-wise early exit would leak token bytes through response
//! timing.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;

use crate::Result;
use crate::audit::{AuditEvent, AuditSeverity};
use crate::cache::CacheStore;
use crate::config::CsrfConfig;

/// Random bytes per token; 32 bytes ≈ 256 bits of entropy.
const TOKEN_BYTES: usize = 32;

/// Issues and validates double-submit CSRF tokens.
#[derive(Clone)]
pub struct CsrfService {
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl CsrfService {
    /// Create a service over the given store.
    #[must_use]
    pub fn new(cache: Arc<dyn CacheStore>, config: &CsrfConfig) -> Self {
        Self {
            cache,
            ttl: Duration::from_secs(config.ttl_secs),
        }
    }

    /// Generate a high-entropy token (base64url, unpadded).
    #[must_use]
    pub fn generate() -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Generate a token and record it against a session for server-side
    /// validation. One token per session/cookie pair; reissuing replaces it.
    pub async fn issue(&self, session_id: &str) -> Result<String> {
        let token = Self::generate();
        self.cache
            .set(&Self::key(session_id), &token, Some(self.ttl))
            .await?;
        Ok(token)
    }

    /// Double-submit check: the cookie-held token against the header-echoed
    /// token. Constant-time; both halves must be present and equal.
    #[must_use]
    pub fn validate_pair(cookie_token: Option<&str>, header_token: Option<&str>) -> bool {
        match (cookie_token, header_token) {
            (Some(cookie), Some(header)) => constant_time_eq(cookie, header),
            _ => false,
        }
    }

    /// Validate a submitted token against the server-side record for a
    /// session. Absent or expired records fail closed.
    pub async fn validate_stored(&self, session_id: &str, submitted: &str) -> Result<bool> {
        let Some(stored) = self.cache.get(&Self::key(session_id)).await? else {
            return Ok(false);
        };

        let ok = constant_time_eq(&stored, submitted);
        if !ok {
            AuditEvent::new(AuditSeverity::High, "csrf_token_mismatch")
                .with_identifier(session_id)
                .record();
        }
        Ok(ok)
    }

    /// Drop the token for a session (logout path).
    pub async fn revoke(&self, session_id: &str) -> Result<()> {
        self.cache.delete(&Self::key(session_id)).await
    }

    fn key(session_id: &str) -> String {
        format!("csrf:token:{session_id}")
    }
}

/// Constant-time string equality. Unequal lengths compare unequal without
/// revealing position information for equal-length inputs.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

// ==================== Tests ====================
