//! # Rate Limiter
//!
//! Counts attempts per (identifier, action) inside a fixed window held in the
//! cache, with a secondary burst guard for sub-second flooding that a coarse
//! window would miss.
//!
//! The attempt counter goes through the cache's atomic `increment` primitive.
//! Two concurrent requests for the same identifier must never both observe
//! the pre-increment count, so plain read-modify-write is not allowed here.
//! Window and burst metadata live in a sibling record where a lost update
//! only softens the burst heuristic, never the main count.
//!
//! When the cache backend is unreachable the limiter fails open (requests
//! pass); the cache layer logs that degradation at warn level.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

use crate::audit::{AuditEvent, AuditSeverity};
use crate::cache::{self, CacheStore};
use crate::config::RateLimitConfig;
use crate::{Result, error::AuthError};

/// Window and burst metadata, keyed by `ratelimit:{identifier}:{action}:meta`.
/// The main counter is a plain integer under `ratelimit:{identifier}:{action}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RateLimitRecord {
    /// Unix timestamp at which the current window ends and reseeds
    window_reset_at: i64,
    /// Consecutive requests arriving under the burst gap
    burst_count: u32,
    /// Unix timestamp in milliseconds of the previous request
    last_request_ms: i64,
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether this request may proceed
    pub allowed: bool,
    /// Attempts left in the current window (zero when denied)
    pub remaining: u32,
    /// Unix timestamp at which the window reseeds
    pub reset_at: i64,
}

impl RateLimitDecision {
    /// Seconds until the window reseeds, floored at zero.
    #[must_use]
    pub fn retry_after_secs(&self) -> i64 {
        (self.reset_at - OffsetDateTime::now_utc().unix_timestamp()).max(0)
    }

    /// Convert a denial into the error surfaced to callers.
    pub fn into_result(self) -> Result<Self> {
        if self.allowed {
            Ok(self)
        } else {
            Err(AuthError::RateLimitExceeded {
                retry_after_secs: self.retry_after_secs(),
            })
        }
    }
}

/// Windowed rate limiter over the shared cache.
#[derive(Clone)]
pub struct RateLimiter {
    cache: Arc<dyn CacheStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    /// Create a limiter over the given store.
    #[must_use]
    pub fn new(cache: Arc<dyn CacheStore>, config: RateLimitConfig) -> Self {
        Self { cache, config }
    }

    /// Count one attempt for `(identifier, action)` against a window of
    /// `max_attempts` per `window`.
    ///
    /// The first request in a fresh window seeds `reset_at = now + window`;
    /// exactly `max_attempts` requests are admitted and the one after that
    /// is the first denial, which holds until `reset_at` passes, at which
    /// point the window reseeds rather than decrementing. The OTP issuance
    /// cap depends on this count-then-compare ordering (3 sends succeed,
    /// the 4th is refused), so do not move the comparison ahead of the
    /// increment. Two consecutive requests arriving under the burst
    /// gap (1s) bump a burst counter; exceeding the burst ceiling denies
    /// immediately regardless of the main window.
    pub async fn check_and_consume(
        &self,
        identifier: &str,
        action: &str,
        max_attempts: u32,
        window: Duration,
    ) -> Result<RateLimitDecision> {
        let now = OffsetDateTime::now_utc();
        let now_secs = now.unix_timestamp();
        let now_ms = (now.unix_timestamp_nanos() / 1_000_000) as i64;

        let counter_key = format!("ratelimit:{identifier}:{action}");
        let meta_key = format!("{counter_key}:meta");

        let mut record = match cache::get_json::<RateLimitRecord>(self.cache.as_ref(), &meta_key)
            .await?
        {
            Some(record) if now_secs < record.window_reset_at => record,
            _ => {
                // Fresh window: reseed, drop the stale counter
                self.cache.delete(&counter_key).await?;
                RateLimitRecord {
                    window_reset_at: now_secs + window.as_secs() as i64,
                    burst_count: 0,
                    last_request_ms: 0,
                }
            }
        };

        // Burst guard: resets once the inter-request gap exceeds the
        // threshold, so a paced client is never penalized.
        if record.last_request_ms > 0
            && now_ms - record.last_request_ms < self.config.burst_gap_ms as i64
        {
            record.burst_count += 1;
        } else {
            record.burst_count = 0;
        }
        record.last_request_ms = now_ms;

        let remaining_window =
            Duration::from_secs((record.window_reset_at - now_secs).max(1) as u64);
        cache::set_json(
            self.cache.as_ref(),
            &meta_key,
            &record,
            Some(remaining_window),
        )
        .await?;

        if record.burst_count > self.config.burst_ceiling {
            self.audit_denied(identifier, action, "burst ceiling exceeded");
            return Ok(RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at: record.window_reset_at,
            });
        }

        // Atomic count; this is the lost-update-sensitive step
        let count = self.cache.increment(&counter_key, 1).await?;
        if count == 1 {
            self.cache.expire(&counter_key, remaining_window).await?;
        }

        let allowed = count <= max_attempts as i64;
        if !allowed {
            self.audit_denied(identifier, action, "window exhausted");
        }

        Ok(RateLimitDecision {
            allowed,
            remaining: (max_attempts as i64 - count).max(0) as u32,
            reset_at: record.window_reset_at,
        })
    }

    /// Apply the login policy (per IP or account identifier).
    pub async fn check_login(&self, identifier: &str) -> Result<RateLimitDecision> {
        self.check_and_consume(
            identifier,
            "login",
            self.config.login_max_attempts,
            Duration::from_secs(self.config.login_window_secs),
        )
        .await
    }

    /// Forget all counts for `(identifier, action)`, e.g. after a successful
    /// login.
    pub async fn reset(&self, identifier: &str, action: &str) -> Result<()> {
        let counter_key = format!("ratelimit:{identifier}:{action}");
        self.cache.delete(&counter_key).await?;
        self.cache.delete(&format!("{counter_key}:meta")).await?;
        Ok(())
    }

    fn audit_denied(&self, identifier: &str, action: &str, reason: &str) {
        AuditEvent::new(AuditSeverity::Medium, "rate_limit_denied")
            .with_identifier(identifier)
            .with_detail("action", action)
            .with_detail("reason", reason)
            .record();
    }
}

// ==================== Tests ====================
