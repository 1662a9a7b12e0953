//! # Security Audit Events
//!
//! A thin, structured layer over `tracing` for security-relevant events:
//! rate-limit denials, revoked-session token presentations, CSRF mismatches,
//! injection-shaped input. Events carry a severity tier so log pipelines can
//! route and alert without parsing message text.
//!
//! Identifiers are recorded as given; callers pass user ids or session ids,
//! never secrets or raw tokens.

use tracing::{error, info, warn};

/// Severity tier for a security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuditSeverity {
    /// Routine security-relevant activity (successful logins, logouts)
    Low,
    /// Suspicious but expected under normal abuse levels
    Medium,
    /// Likely attack traffic; worth alerting on in aggregate
    High,
    /// Individual events that warrant immediate attention
    Critical,
}

impl AuditSeverity {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Builder for a single audit event.
///
/// # Example
///
/// ```no_run
/// use storefront_auth::audit::{AuditEvent, AuditSeverity};
///
/// AuditEvent::new(AuditSeverity::Medium, "rate_limit_exceeded")
///     .with_identifier("10.0.0.1")
///     .with_detail("action", "login")
///     .record();
/// ```
#[derive(Debug)]
pub struct AuditEvent {
    severity: AuditSeverity,
    name: &'static str,
    identifier: Option<String>,
    details: Vec<(&'static str, String)>,
}

impl AuditEvent {
    #[must_use]
    pub fn new(severity: AuditSeverity, name: &'static str) -> Self {
        Self {
            severity,
            name,
            identifier: None,
            details: Vec::new(),
        }
    }

    /// Attach the subject (user id, session id, or client IP).
    #[must_use]
    pub fn with_identifier(mut self, identifier: &str) -> Self {
        self.identifier = Some(identifier.to_string());
        self
    }

    /// Attach a key/value detail.
    #[must_use]
    pub fn with_detail(mut self, key: &'static str, value: &str) -> Self {
        self.details.push((key, value.to_string()));
        self
    }

    /// Emit the event through `tracing` at a level matching its severity.
    pub fn record(self) {
        let identifier = self.identifier.as_deref().unwrap_or("-");
        let details = self
            .details
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");

        match self.severity {
            AuditSeverity::Low => info!(
                target: "audit",
                event = self.name,
                severity = self.severity.as_str(),
                %identifier,
                %details,
                "security audit event"
            ),
            AuditSeverity::Medium => warn!(
                target: "audit",
                event = self.name,
                severity = self.severity.as_str(),
                %identifier,
                %details,
                "security audit event"
            ),
            AuditSeverity::High | AuditSeverity::Critical => error!(
                target: "audit",
                event = self.name,
                severity = self.severity.as_str(),
                %identifier,
                %details,
                "security audit event"
            ),
        }
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(AuditSeverity::Low < AuditSeverity::Medium);
        assert!(AuditSeverity::Medium < AuditSeverity::High);
        assert!(AuditSeverity::High < AuditSeverity::Critical);
    }

    #[test]
    fn test_builder_and_record() {
        // Must not panic with or without optional fields
        AuditEvent::new(AuditSeverity::Low, "test_event").record();
        AuditEvent::new(AuditSeverity::Critical, "test_event")
            .with_identifier("u1")
            .with_detail("action", "login")
            .with_detail("count", "3")
            .record();
    }
}
