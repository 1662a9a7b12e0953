//! # One-Time-Passcode Engine
//!
//! Generates, stores, verifies, and consumes the short numeric codes used by
//! phone/email verification flows (registration, password reset).
//!
//! ## Lifecycle
//!
//! A code stays verifiable for its whole lifetime so multi-step flows work:
//! a password reset verifies the code once to show the form, then again when
//! the new password is submitted. The record is deleted exactly once — by
//! [`OtpService::consume`] when the downstream action completes — or earlier
//! if it expires or burns its verify-attempt budget.
//!
//! ## Issuance cap
//!
//! Storage is capped at 3 codes per 10-minute window per identifier, through
//! the rate limiter. Callers surface the `false` return as a 429.
//!
//! ## Delivery
//!
//! [`OtpService::send_code`] hands `{identifier, code, expires_at}` to an
//! [`OtpDelivery`] collaborator. Delivery failure never blocks generation or
//! storage; the code stays valid and the failure is logged.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::{self, CacheStore};
use crate::config::OtpConfig;
use crate::ratelimit::{RateLimitDecision, RateLimiter};
use crate::{Result, error::AuthError};

const OTP_KEY_PREFIX: &str = "otp:code:";

// ==================== Records ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OtpRecord {
    code: String,
    /// Absolute expiry, unix timestamp
    expires_at: i64,
    /// Failed verification attempts against this record
    attempts: u32,
    /// Email address or phone number the code was issued for
    identifier: String,
}

impl OtpRecord {
    fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

// ==================== Delivery ====================

/// External delivery collaborator (SMS gateway or email provider).
#[async_trait]
pub trait OtpDelivery: Send + Sync {
    /// Deliver a code to its recipient. Errors are logged by the engine and
    /// never block code storage.
    async fn deliver(&self, identifier: &str, code: &str, expires_at: i64) -> Result<()>;
}

/// Delivery sink for environments without a real provider. Logs the handoff
/// so the code is retrievable from development logs; never use outside
/// non-production environments.
pub struct LogDelivery;

#[async_trait]
impl OtpDelivery for LogDelivery {
    async fn deliver(&self, identifier: &str, _code: &str, expires_at: i64) -> Result<()> {
        debug!(%identifier, expires_at, "OTP delivery handed to log sink");
        Ok(())
    }
}

// ==================== OTP Service ====================

/// Generates and manages one-time passcodes over the shared cache.
pub struct OtpService {
    cache: Arc<dyn CacheStore>,
    limiter: RateLimiter,
    delivery: Arc<dyn OtpDelivery>,
    config: OtpConfig,
}

impl OtpService {
    /// Create an OTP service over the given store.
    #[must_use]
    pub fn new(
        cache: Arc<dyn CacheStore>,
        limiter: RateLimiter,
        delivery: Arc<dyn OtpDelivery>,
        config: OtpConfig,
    ) -> Self {
        Self {
            cache,
            limiter,
            delivery,
            config,
        }
    }

    /// Generate a uniformly random 6-digit numeric code.
    #[must_use]
    pub fn generate() -> String {
        let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
        format!("{n:06}")
    }

    /// Store a code for an identifier, enforcing the issuance cap.
    ///
    /// Returns `false` when the identifier has exhausted its window (the
    /// caller must surface a 429-equivalent); the code is not stored in that
    /// case. Storing replaces any previous unconsumed code.
    pub async fn store(&self, identifier: &str, code: &str) -> Result<bool> {
        Ok(self.try_store(identifier, code).await?.is_none())
    }

    /// Store a code, returning the denying rate-limit decision when the
    /// issuance cap is hit (so callers can surface a retry-after hint).
    async fn try_store(
        &self,
        identifier: &str,
        code: &str,
    ) -> Result<Option<RateLimitDecision>> {
        let decision = self
            .limiter
            .check_and_consume(
                identifier,
                "otp_issue",
                self.config.max_per_window,
                Duration::from_secs(self.config.issue_window_secs),
            )
            .await?;

        if !decision.allowed {
            return Ok(Some(decision));
        }

        let ttl = Duration::from_secs(self.config.ttl_secs);
        let record = OtpRecord {
            code: code.to_string(),
            expires_at: OffsetDateTime::now_utc().unix_timestamp() + ttl.as_secs() as i64,
            attempts: 0,
            identifier: identifier.to_string(),
        };
        cache::set_json(self.cache.as_ref(), &Self::key(identifier), &record, Some(ttl)).await?;
        Ok(None)
    }

    /// Verify a code without consuming it.
    ///
    /// Returns `false` on a missing record, an expired record (which is
    /// deleted), or a mismatch. Mismatches count against a per-record
    /// attempt budget; exhausting it deletes the record. A successful
    /// verification retains the record so multi-step flows can verify again
    /// before the terminal [`consume`](Self::consume).
    pub async fn verify(&self, identifier: &str, code: &str) -> Result<bool> {
        let key = Self::key(identifier);
        let Some(mut record) = cache::get_json::<OtpRecord>(self.cache.as_ref(), &key).await?
        else {
            return Ok(false);
        };

        let now = OffsetDateTime::now_utc().unix_timestamp();
        if record.is_expired(now) {
            self.cache.delete(&key).await?;
            return Ok(false);
        }

        if record.code != code {
            record.attempts += 1;
            if record.attempts >= self.config.max_verify_attempts {
                // Budget burned: drop the record so guessing cannot continue
                self.cache.delete(&key).await?;
            } else {
                let remaining = Duration::from_secs((record.expires_at - now).max(1) as u64);
                cache::set_json(self.cache.as_ref(), &key, &record, Some(remaining)).await?;
            }
            return Ok(false);
        }

        Ok(true)
    }

    /// Verify a code, converting a failed check into the error handlers
    /// return. Deliberately opaque: missing, expired, and mismatched codes
    /// all surface identically so a caller cannot enumerate which occurred.
    pub async fn verify_or_reject(&self, identifier: &str, code: &str) -> Result<()> {
        if self.verify(identifier, code).await? {
            Ok(())
        } else {
            Err(AuthError::OtpInvalidOrExpired)
        }
    }

    /// Terminal deletion, called once the action the code authorized (e.g. a
    /// password change) completes.
    pub async fn consume(&self, identifier: &str) -> Result<()> {
        self.cache.delete(&Self::key(identifier)).await
    }

    /// Generate, store, and deliver a code in one step.
    ///
    /// Returns `None` when the issuance cap is hit. Delivery failure is
    /// logged and the stored code remains valid for manual or alternate
    /// retrieval in non-production environments.
    pub async fn send_code(&self, identifier: &str) -> Result<Option<String>> {
        let code = Self::generate();
        if self.try_store(identifier, &code).await?.is_some() {
            return Ok(None);
        }

        self.dispatch(identifier, &code).await;
        Ok(Some(code))
    }

    /// Like [`send_code`](Self::send_code), converting an exhausted issuance
    /// window into the 429-equivalent error with its retry-after hint.
    pub async fn send_code_or_reject(&self, identifier: &str) -> Result<String> {
        let code = Self::generate();
        if let Some(decision) = self.try_store(identifier, &code).await? {
            return Err(AuthError::OtpIssuanceCapped {
                retry_after_secs: decision.retry_after_secs(),
            });
        }

        self.dispatch(identifier, &code).await;
        Ok(code)
    }

    /// Hand a stored code to the delivery collaborator; failures are logged,
    /// never propagated.
    async fn dispatch(&self, identifier: &str, code: &str) {
        let expires_at = OffsetDateTime::now_utc().unix_timestamp() + self.config.ttl_secs as i64;
        if let Err(err) = self.delivery.deliver(identifier, code, expires_at).await {
            warn!(%identifier, error = %err, "OTP delivery channel unavailable, code remains stored");
        }
    }

    /// Delete every expired OTP record. Normally driven by the sweeper task;
    /// exposed so tests and shutdown paths can run it directly.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let keys = self
            .cache
            .keys_matching(&format!("{OTP_KEY_PREFIX}*"))
            .await?;

        let mut removed = 0;
        for key in keys {
            match cache::get_json::<OtpRecord>(self.cache.as_ref(), &key).await? {
                Some(record) if record.is_expired(now) => {
                    self.cache.delete(&key).await?;
                    removed += 1;
                }
                // The read itself prunes entries the backend already expired
                _ => {}
            }
        }

        if removed > 0 {
            debug!(removed, "swept expired OTP records");
        }
        Ok(removed)
    }

    /// Start the periodic sweep task (bounds growth from abandoned flows).
    ///
    /// The task is owned by the returned handle: dropping it leaves the task
    /// running, [`SweeperHandle::stop`] shuts it down cleanly.
    pub fn start_sweeper(self: &Arc<Self>) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let service = Arc::clone(self);
        let interval = Duration::from_secs(service.config.sweep_interval_secs);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so startup is quiet
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = service.sweep_expired().await {
                            warn!(error = %err, "OTP sweep failed");
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        SweeperHandle { shutdown_tx, task }
    }

    fn key(identifier: &str) -> String {
        format!("{OTP_KEY_PREFIX}{identifier}")
    }
}

/// Handle owning the background sweep task.
pub struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweep task and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::RateLimitConfig;

    fn service() -> OtpService {
        service_with_config(OtpConfig::default())
    }

    fn service_with_config(config: OtpConfig) -> OtpService {
        let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new(64));
        let limiter = RateLimiter::new(
            Arc::clone(&cache),
            RateLimitConfig {
                // OTP issuance in these tests is intentionally back-to-back
                burst_ceiling: 100,
                ..RateLimitConfig::default()
            },
        );
        OtpService::new(cache, limiter, Arc::new(LogDelivery), config)
    }

    #[test]
    fn test_generate_is_six_digits() {
        for _ in 0..100 {
            let code = OtpService::generate();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn test_verify_retains_until_consume() {
        let service = service();
        let code = OtpService::generate();
        assert!(service.store("a@b.com", &code).await.unwrap());

        // Verifiable repeatedly while the flow is in progress
        assert!(service.verify("a@b.com", &code).await.unwrap());
        assert!(service.verify("a@b.com", &code).await.unwrap());

        // Terminal consumption
        service.consume("a@b.com").await.unwrap();
        assert!(!service.verify("a@b.com", &code).await.unwrap());
    }

    #[tokio::test]
    async fn test_verify_unknown_identifier() {
        let service = service();
        assert!(!service.verify("nobody@b.com", "123456").await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_code_rejected() {
        let service = service();
        assert!(service.store("a@b.com", "111111").await.unwrap());
        assert!(!service.verify("a@b.com", "222222").await.unwrap());

        // The right code still works afterwards
        assert!(service.verify("a@b.com", "111111").await.unwrap());
    }

    #[tokio::test]
    async fn test_attempt_budget_deletes_record() {
        let service = service_with_config(OtpConfig {
            max_verify_attempts: 3,
            ..OtpConfig::default()
        });
        assert!(service.store("a@b.com", "111111").await.unwrap());

        for _ in 0..3 {
            assert!(!service.verify("a@b.com", "000000").await.unwrap());
        }

        // Budget burned: even the correct code is now rejected
        assert!(!service.verify("a@b.com", "111111").await.unwrap());
    }

    #[tokio::test]
    async fn test_issuance_cap() {
        let service = service();

        for _ in 0..3 {
            assert!(service.store("a@b.com", "123456").await.unwrap());
        }
        // 4th store inside the window is refused
        assert!(!service.store("a@b.com", "123456").await.unwrap());

        // A different identifier is unaffected
        assert!(service.store("c@d.com", "123456").await.unwrap());
    }

    #[tokio::test]
    async fn test_send_code_returns_none_when_capped() {
        let service = service();

        for _ in 0..3 {
            assert!(service.send_code("a@b.com").await.unwrap().is_some());
        }
        assert!(service.send_code("a@b.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_verify_or_reject_error_variant() {
        let service = service();
        assert!(service.store("a@b.com", "111111").await.unwrap());

        assert!(service.verify_or_reject("a@b.com", "111111").await.is_ok());
        assert!(matches!(
            service.verify_or_reject("a@b.com", "000000").await,
            Err(AuthError::OtpInvalidOrExpired)
        ));
        // Unknown identifier is indistinguishable from a wrong code
        assert!(matches!(
            service.verify_or_reject("nobody@b.com", "111111").await,
            Err(AuthError::OtpInvalidOrExpired)
        ));
    }

    #[tokio::test]
    async fn test_capped_issuance_error_carries_retry_after() {
        let service = service();

        for _ in 0..3 {
            service.send_code_or_reject("a@b.com").await.unwrap();
        }

        match service.send_code_or_reject("a@b.com").await {
            Err(AuthError::OtpIssuanceCapped { retry_after_secs }) => {
                assert!(retry_after_secs > 0);
            }
            other => panic!("expected OtpIssuanceCapped, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_expired_record_rejected_and_removed() {
        let service = service_with_config(OtpConfig {
            ttl_secs: 0,
            ..OtpConfig::default()
        });
        assert!(service.store("a@b.com", "123456").await.unwrap());

        assert!(!service.verify("a@b.com", "123456").await.unwrap());
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_records() {
        let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new(64));
        let limiter = RateLimiter::new(
            Arc::clone(&cache),
            RateLimitConfig {
                burst_ceiling: 100,
                ..RateLimitConfig::default()
            },
        );
        let service = OtpService::new(
            Arc::clone(&cache),
            limiter,
            Arc::new(LogDelivery),
            OtpConfig::default(),
        );

        // Plant an already-expired record directly, bypassing the TTL layer,
        // the way an abandoned flow would leave one behind
        let record = OtpRecord {
            code: "123456".to_string(),
            expires_at: OffsetDateTime::now_utc().unix_timestamp() - 60,
            attempts: 0,
            identifier: "stale@b.com".to_string(),
        };
        cache::set_json(cache.as_ref(), "otp:code:stale@b.com", &record, None)
            .await
            .unwrap();
        assert!(service.store("fresh@b.com", "654321").await.unwrap());

        let removed = service.sweep_expired().await.unwrap();
        assert_eq!(removed, 1);
        assert!(!cache.exists("otp:code:stale@b.com").await.unwrap());
        assert!(cache.exists("otp:code:fresh@b.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_sweeper_lifecycle() {
        let service = Arc::new(service());
        let handle = service.start_sweeper();
        // Clean start/stop without waiting out the interval
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_delivery_failure_keeps_code_valid() {
        struct FailingDelivery;

        #[async_trait]
        impl OtpDelivery for FailingDelivery {
            async fn deliver(&self, _: &str, _: &str, _: i64) -> Result<()> {
                Err(crate::error::AuthError::Internal(
                    "gateway down".to_string(),
                ))
            }
        }

        let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new(64));
        let limiter = RateLimiter::new(
            Arc::clone(&cache),
            RateLimitConfig {
                burst_ceiling: 100,
                ..RateLimitConfig::default()
            },
        );
        let service = OtpService::new(
            cache,
            limiter,
            Arc::new(FailingDelivery),
            OtpConfig::default(),
        );

        let code = service
            .send_code("a@b.com")
            .await
            .unwrap()
            .expect("code stored despite delivery failure");
        assert!(service.verify("a@b.com", &code).await.unwrap());
    }
}
