//! # Session Manager
//!
//! Binds verified tokens to server-held session records in the cache. The
//! session record is the revocation mechanism for otherwise-stateless
//! tokens: deleting it makes every previously issued token stop resolving,
//! even though their signatures remain technically valid until expiry.
//!
//! One live session per user: re-login overwrites the record with a fresh
//! session id, which orphans (and therefore revokes) tokens minted for the
//! previous session.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditSeverity};
use crate::cache::{self, CacheStore};
use crate::config::SessionConfig;
use crate::token::{Claims, IssuedIdentity, TokenService};
use crate::{Result, error::AuthError};

/// Super-role that satisfies every permission and role check.
pub const ADMIN_ROLE: &str = "admin";

// ==================== Session Record ====================

/// Server-held session state for an authenticated user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserSession {
    pub user_id: String,
    pub email: String,
    pub role: String,
    pub permissions: Vec<String>,
    pub mfa_enabled: bool,
    /// Unix timestamp of the authentication that created this session
    pub last_login: i64,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// What actually sits in the cache under `user:session:{userId}`: the
/// session plus the id that issued tokens must match.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionRecord {
    session_id: String,
    session: UserSession,
}

/// A freshly created session with its token pair.
#[derive(Debug, Clone, Serialize)]
pub struct AuthenticatedSession {
    pub session_id: String,
    pub session: UserSession,
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds, for `expires_in` responses
    pub expires_in: i64,
}

// ==================== Session Manager ====================

/// Creates, resolves, and invalidates sessions over the shared cache.
#[derive(Clone)]
pub struct SessionManager {
    cache: Arc<dyn CacheStore>,
    tokens: TokenService,
    ttl: Duration,
}

impl SessionManager {
    /// Create a manager over the given store and token service.
    #[must_use]
    pub fn new(cache: Arc<dyn CacheStore>, tokens: TokenService, config: &SessionConfig) -> Self {
        Self {
            cache,
            tokens,
            ttl: Duration::from_secs(config.ttl_secs),
        }
    }

    /// The token service backing this manager.
    #[must_use]
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Create a session for an authenticated user and issue its token pair.
    ///
    /// Writes the session under `user:session:{userId}` (overwriting any
    /// previous session for that user), then mints access and refresh tokens
    /// referencing the fresh session id. `persistent` extends the refresh
    /// token's lifetime per the login form's "stay signed in" preference.
    pub async fn create_session(
        &self,
        mut session: UserSession,
        persistent: bool,
    ) -> Result<AuthenticatedSession> {
        session.last_login = OffsetDateTime::now_utc().unix_timestamp();
        let session_id = Uuid::new_v4().to_string();

        let record = SessionRecord {
            session_id: session_id.clone(),
            session: session.clone(),
        };
        cache::set_json(
            self.cache.as_ref(),
            &Self::session_key(&session.user_id),
            &record,
            Some(self.ttl),
        )
        .await?;

        let fingerprint = session
            .user_agent
            .as_deref()
            .zip(session.ip_address.as_deref())
            .map(|(ua, ip)| crate::token::fingerprint_hash(ua, ip));

        let identity = IssuedIdentity {
            user_id: session.user_id.clone(),
            email: session.email.clone(),
            role: session.role.clone(),
            permissions: session.permissions.clone(),
            mfa_verified: session.mfa_enabled,
            session_id: session_id.clone(),
            fingerprint,
        };

        let access_token = self.tokens.issue_access_token(&identity)?;
        let refresh_token =
            self.tokens
                .issue_refresh_token(&session.user_id, &session_id, persistent)?;

        debug!(user_id = %session.user_id, %session_id, "session created");

        Ok(AuthenticatedSession {
            session_id,
            session,
            access_token,
            refresh_token,
            expires_in: self.tokens.access_ttl_secs(),
        })
    }

    /// Resolve an access token to its live session.
    ///
    /// Verifies the signature, then confirms the referenced session still
    /// exists in the cache with a matching session id. A verified token whose
    /// session is gone resolves to `None` — that is the deliberate
    /// server-side revocation path, logged distinctly for audit but surfaced
    /// to the caller as plain "unauthenticated".
    pub async fn resolve_token(&self, access_token: &str) -> Result<Option<UserSession>> {
        let claims = self.tokens.verify_access(access_token)?;
        self.resolve_claims(&claims).await
    }

    /// Like [`resolve_token`](Self::resolve_token) for already-verified
    /// claims, e.g. from middleware that also enforced fingerprint binding.
    pub async fn resolve_claims(&self, claims: &Claims) -> Result<Option<UserSession>> {
        let record = cache::get_json::<SessionRecord>(
            self.cache.as_ref(),
            &Self::session_key(&claims.sub),
        )
        .await?;

        match record {
            Some(record) if record.session_id == claims.session_id => Ok(Some(record.session)),
            Some(_) | None => {
                AuditEvent::new(AuditSeverity::Medium, "session_revoked_token_presented")
                    .with_identifier(&claims.sub)
                    .with_detail("jti", &claims.jti)
                    .record();
                Ok(None)
            }
        }
    }

    /// Mint a new access token from a refresh token.
    ///
    /// A refresh token can mint only while the session it references still
    /// exists; the fresh access token carries the session's current identity
    /// data, not whatever the refresh token was issued with.
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<String> {
        let claims = self.tokens.verify_refresh(refresh_token)?;

        let record = cache::get_json::<SessionRecord>(
            self.cache.as_ref(),
            &Self::session_key(&claims.sub),
        )
        .await?;

        let record = match record {
            Some(record) if record.session_id == claims.session_id => record,
            _ => {
                AuditEvent::new(AuditSeverity::Medium, "refresh_for_revoked_session")
                    .with_identifier(&claims.sub)
                    .record();
                return Err(AuthError::SessionNotFound);
            }
        };

        let identity = IssuedIdentity {
            user_id: record.session.user_id.clone(),
            email: record.session.email.clone(),
            role: record.session.role.clone(),
            permissions: record.session.permissions.clone(),
            mfa_verified: record.session.mfa_enabled,
            session_id: record.session_id,
            fingerprint: None,
        };
        self.tokens.issue_access_token(&identity)
    }

    /// Delete a user's session. Previously issued tokens stop resolving
    /// immediately even though they have not expired.
    pub async fn invalidate(&self, user_id: &str) -> Result<()> {
        self.cache.delete(&Self::session_key(user_id)).await?;
        debug!(%user_id, "session invalidated");
        Ok(())
    }

    /// Whether a session grants a permission. `admin` grants everything.
    #[must_use]
    pub fn has_permission(session: &UserSession, permission: &str) -> bool {
        session.role == ADMIN_ROLE || session.permissions.iter().any(|p| p == permission)
    }

    /// Whether a session holds a role. `admin` satisfies any role check.
    #[must_use]
    pub fn has_role(session: &UserSession, role: &str) -> bool {
        session.role == ADMIN_ROLE || session.role == role
    }

    fn session_key(user_id: &str) -> String {
        format!("user:session:{user_id}")
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::TokenConfig;

    fn manager() -> SessionManager {
        let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new(64));
        let tokens = TokenService::new(&TokenConfig::test_defaults()).unwrap();
        SessionManager::new(cache, tokens, &SessionConfig::default())
    }

    fn customer_session() -> UserSession {
        UserSession {
            user_id: "u1".to_string(),
            email: "u1@example.com".to_string(),
            role: "customer".to_string(),
            permissions: vec!["orders:read".to_string()],
            mfa_enabled: false,
            last_login: 0,
            ip_address: Some("10.0.0.1".to_string()),
            user_agent: Some("Mozilla/5.0".to_string()),
        }
    }

    #[tokio::test]
    async fn test_create_and_resolve_session() {
        let manager = manager();
        let auth = manager
            .create_session(customer_session(), false)
            .await
            .unwrap();

        let fp = crate::token::fingerprint_hash("Mozilla/5.0", "10.0.0.1");
        let resolved = manager
            .tokens()
            .verify_access_bound(&auth.access_token, Some(&fp))
            .unwrap();
        assert_eq!(resolved.sub, "u1");

        let session = manager
            .resolve_token(&auth.access_token)
            .await
            .unwrap()
            .expect("session should resolve");
        assert_eq!(session.user_id, "u1");
        assert_eq!(session.role, "customer");
        assert!(session.last_login > 0);
    }

    #[tokio::test]
    async fn test_revocation_defeats_valid_token() {
        let manager = manager();
        let auth = manager
            .create_session(customer_session(), false)
            .await
            .unwrap();

        manager.invalidate("u1").await.unwrap();

        // Signature still verifies...
        assert!(manager.tokens().verify_access(&auth.access_token).is_ok());
        // ...but the session no longer resolves
        assert_eq!(
            manager.resolve_token(&auth.access_token).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_relogin_orphans_previous_tokens() {
        let manager = manager();
        let first = manager
            .create_session(customer_session(), false)
            .await
            .unwrap();
        let second = manager
            .create_session(customer_session(), false)
            .await
            .unwrap();

        assert_eq!(
            manager.resolve_token(&first.access_token).await.unwrap(),
            None
        );
        assert!(
            manager
                .resolve_token(&second.access_token)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_refresh_mints_access_token_while_session_lives() {
        let manager = manager();
        let auth = manager
            .create_session(customer_session(), false)
            .await
            .unwrap();

        let new_access = manager
            .refresh_access_token(&auth.refresh_token)
            .await
            .unwrap();
        let session = manager
            .resolve_token(&new_access)
            .await
            .unwrap()
            .expect("refreshed token should resolve");
        assert_eq!(session.user_id, "u1");
    }

    #[tokio::test]
    async fn test_refresh_fails_after_invalidation() {
        let manager = manager();
        let auth = manager
            .create_session(customer_session(), false)
            .await
            .unwrap();

        manager.invalidate("u1").await.unwrap();

        let result = manager.refresh_access_token(&auth.refresh_token).await;
        assert!(matches!(result, Err(AuthError::SessionNotFound)));
    }

    #[tokio::test]
    async fn test_access_token_cannot_refresh() {
        let manager = manager();
        let auth = manager
            .create_session(customer_session(), false)
            .await
            .unwrap();

        let result = manager.refresh_access_token(&auth.access_token).await;
        assert!(matches!(result, Err(AuthError::TokenTypeMismatch { .. })));
    }

    #[test]
    fn test_admin_is_super_role() {
        let mut session = customer_session();
        session.role = ADMIN_ROLE.to_string();
        session.permissions.clear();

        assert!(SessionManager::has_permission(&session, "anything:at:all"));
        assert!(SessionManager::has_role(&session, "staff"));
    }

    #[test]
    fn test_permission_and_role_checks() {
        let session = customer_session();

        assert!(SessionManager::has_permission(&session, "orders:read"));
        assert!(!SessionManager::has_permission(&session, "orders:write"));
        assert!(SessionManager::has_role(&session, "customer"));
        assert!(!SessionManager::has_role(&session, "staff"));
    }
}
