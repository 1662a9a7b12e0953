//! # Validation Module
//!
//! Input validation and sanitization for every user-supplied string that
//! reaches persistence: strict-schema field validators, HTML sanitization,
//! injection-shape heuristics, and file-upload checks.
//!
//! ## Heuristics are audit signals
//!
//! [`detect_sql_injection_shape`] and [`detect_xss_shape`] are
//! pattern-matching approximations, not security boundaries. A positive
//! detection feeds the audit trail and whatever blocking policy sits above;
//! it does not replace parameterized queries or output encoding at render
//! time. [`sanitize_html`] likewise is defense-in-depth, not a substitute
//! for output encoding.

use regex::Regex;

use crate::audit::{AuditEvent, AuditSeverity};
use crate::{Result, error::AuthError};

// ==================== Field Validators ====================

lazy_static::lazy_static! {
    /// Email shape (pragmatic, not full RFC 5322)
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$"
    ).expect("Failed to compile email regex");

    /// Display names: letters (any script), spaces, hyphens, apostrophes
    static ref NAME_REGEX: Regex = Regex::new(
        r"^[\p{L}][\p{L} '\-]{0,99}$"
    ).expect("Failed to compile name regex");

    static ref XSS_REGEX: Regex = Regex::new(
        r"(?i)(<script|</script|javascript:|vbscript:|data:text/html|on\w+\s*=|<iframe|<object|<embed|expression\s*\()"
    ).expect("Failed to compile XSS regex");

    /// Dangerous URI schemes and inline handlers stripped by the sanitizer
    static ref DANGEROUS_CONTENT_REGEX: Regex = Regex::new(
        r"(?i)(javascript:|data:|vbscript:|on\w+\s*=|expression\s*\()"
    ).expect("Failed to compile dangerous-content regex");
}

/// Validate an email address against a strict schema.
///
/// # Example
///
/// ```no_run
/// use storefront_auth::validation::validate_email;
///
/// assert!(validate_email("user@example.com").is_ok());
/// assert!(validate_email("invalid@").is_err());
/// ```
pub fn validate_email(email: &str) -> Result<()> {
    if email.is_empty() {
        return Err(AuthError::ValidationField {
            field: "email".to_string(),
            message: "Email is required".to_string(),
        });
    }

    if email.len() > 254 || !EMAIL_REGEX.is_match(email) {
        return Err(AuthError::ValidationField {
            field: "email".to_string(),
            message: "Invalid email format".to_string(),
        });
    }

    Ok(())
}

/// Validate a person's display name.
pub fn validate_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AuthError::ValidationField {
            field: "name".to_string(),
            message: "Name is required".to_string(),
        });
    }

    if !NAME_REGEX.is_match(trimmed) {
        return Err(AuthError::ValidationField {
            field: "name".to_string(),
            message: "Name contains invalid characters".to_string(),
        });
    }

    Ok(())
}

/// Check if a string is a valid email (boolean convenience).
#[must_use]
pub fn is_valid_email(email: &str) -> bool {
    validate_email(email).is_ok()
}

// ==================== Injection Heuristics ====================

/// Heuristic check for XSS-shaped input. Audit signal, not a boundary.
#[must_use]
pub fn detect_xss_shape(value: &str) -> bool {
    XSS_REGEX.is_match(value)
}

/// Heuristic check for SQL-injection-shaped input. Audit signal, not a
/// boundary — queries stay parameterized regardless.
#[must_use]
pub fn detect_sql_injection_shape(value: &str) -> bool {
    const SQL_PATTERNS: &[&str] = &[
        "union select",
        "or 1=1",
        "and 1=1",
        "drop table",
        "delete from",
        "insert into",
        "exec(",
        "xp_cmdshell",
        "sp_executesql",
        "'; --",
        "' or '1'='1",
        "1'='1",
        "/*",
        "*/",
        "--",
    ];

    let lower = value.to_lowercase();
    SQL_PATTERNS.iter().any(|pattern| lower.contains(pattern))
}

/// Reject injection-shaped input, recording a high-severity audit event on
/// detection.
pub fn validate_safe_string(value: &str) -> Result<()> {
    if value.is_empty() {
        return Ok(());
    }

    if detect_xss_shape(value) {
        AuditEvent::new(AuditSeverity::High, "xss_shaped_input")
            .with_detail("length", &value.len().to_string())
            .record();
        return Err(AuthError::DangerousContent {
            kind: "XSS pattern".to_string(),
        });
    }

    if detect_sql_injection_shape(value) {
        AuditEvent::new(AuditSeverity::High, "sql_injection_shaped_input")
            .with_detail("length", &value.len().to_string())
            .record();
        return Err(AuthError::DangerousContent {
            kind: "SQL injection pattern".to_string(),
        });
    }

    Ok(())
}

/// Boolean convenience over [`validate_safe_string`].
#[must_use]
pub fn is_safe_string(value: &str) -> bool {
    validate_safe_string(value).is_ok()
}

// ==================== Sanitization ====================

/// Sanitize a string for storage alongside HTML.
///
/// Entity-escapes `& < > " ' /`, then strips dangerous URI schemes
/// (`javascript:`, `data:`, `vbscript:`), inline event handlers, and CSS
/// `expression()`. Defense-in-depth: output encoding at render time is still
/// required.
#[must_use]
pub fn sanitize_html(value: &str) -> String {
    let escaped = value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
        .replace('/', "&#x2F;");

    DANGEROUS_CONTENT_REGEX.replace_all(&escaped, "").to_string()
}

// ==================== File Validation ====================

/// An upload to validate; metadata only, content is not inspected.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub file_name: String,
    pub size_bytes: u64,
    pub mime_type: String,
}

/// Outcome of file validation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FileValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Upload size ceiling: 5 MB.
pub const MAX_FILE_SIZE_BYTES: u64 = 5 * 1024 * 1024;

const ALLOWED_MIME_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];
const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

/// Validate an upload against the size ceiling, MIME and extension
/// allow-lists, and path-shape rules (no traversal sequences, no double
/// extensions).
#[must_use]
pub fn validate_file(file: &FileUpload) -> FileValidation {
    let mut errors = Vec::new();

    if file.size_bytes == 0 {
        errors.push("File is empty".to_string());
    }
    if file.size_bytes > MAX_FILE_SIZE_BYTES {
        errors.push(format!(
            "File exceeds the maximum size of {} bytes",
            MAX_FILE_SIZE_BYTES
        ));
    }

    if !ALLOWED_MIME_TYPES.contains(&file.mime_type.to_lowercase().as_str()) {
        errors.push(format!("MIME type '{}' is not allowed", file.mime_type));
    }

    let name = file.file_name.as_str();
    if name.contains("..") || name.contains('/') || name.contains('\\') {
        errors.push("File name contains path traversal sequences".to_string());
    }

    let parts: Vec<&str> = name.split('.').collect();
    match parts.as_slice() {
        [_stem, ext] => {
            if !ALLOWED_EXTENSIONS.contains(&ext.to_lowercase().as_str()) {
                errors.push(format!("File extension '.{ext}' is not allowed"));
            }
        }
        [_only] => errors.push("File has no extension".to_string()),
        // "invoice.pdf.exe" and friends
        _ => errors.push("File has multiple extensions".to_string()),
    }

    FileValidation {
        valid: errors.is_empty(),
        errors,
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email_valid() {
        assert!(validate_email("user@example.com").is_ok());
        assert!(validate_email("user.name+tag@example.co.uk").is_ok());
    }

    #[test]
    fn test_validate_email_invalid() {
        assert!(validate_email("").is_err());
        assert!(validate_email("invalid").is_err());
        assert!(validate_email("invalid@").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("user@example").is_err());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("Ada Lovelace").is_ok());
        assert!(validate_name("O'Brien").is_ok());
        assert!(validate_name("Anne-Marie").is_ok());
        assert!(validate_name("Søren").is_ok());

        assert!(validate_name("").is_err());
        assert!(validate_name("   ").is_err());
        assert!(validate_name("<script>").is_err());
        assert!(validate_name("robert; drop table").is_err());
    }

    #[test]
    fn test_detect_xss_shape() {
        assert!(detect_xss_shape("<script>alert(1)</script>"));
        assert!(detect_xss_shape("javascript:alert(1)"));
        assert!(detect_xss_shape("<img src=x onerror=alert(1)>"));
        assert!(detect_xss_shape("<div style=\"width: expression(alert(1))\">"));

        assert!(!detect_xss_shape("a perfectly ordinary review"));
        assert!(!detect_xss_shape("I rate this 5/5"));
    }

    #[test]
    fn test_detect_sql_injection_shape() {
        assert!(detect_sql_injection_shape("' OR '1'='1"));
        assert!(detect_sql_injection_shape("1; DROP TABLE users; --"));
        assert!(detect_sql_injection_shape("admin' UNION SELECT * FROM users"));

        assert!(!detect_sql_injection_shape("ordinary search terms"));
        assert!(!detect_sql_injection_shape("O'Brien"));
    }

    #[test]
    fn test_validate_safe_string() {
        assert!(validate_safe_string("").is_ok());
        assert!(validate_safe_string("normal input").is_ok());
        assert!(matches!(
            validate_safe_string("<script>alert(1)</script>"),
            Err(AuthError::DangerousContent { .. })
        ));
        assert!(!is_safe_string("' OR '1'='1"));
    }

    #[test]
    fn test_sanitize_html_escapes_entities() {
        assert_eq!(
            sanitize_html("<b>bold</b> & \"quotes\""),
            "&lt;b&gt;bold&lt;&#x2F;b&gt; &amp; &quot;quotes&quot;"
        );
    }

    #[test]
    fn test_sanitize_html_strips_dangerous_content() {
        let sanitized = sanitize_html("click javascript:alert(1) onload= data:x expression(1)");
        let lower = sanitized.to_lowercase();
        assert!(!lower.contains("javascript:"));
        assert!(!lower.contains("onload"));
        assert!(!lower.contains("data:"));
        assert!(!lower.contains("expression("));
    }

    #[test]
    fn test_sanitize_html_preserves_plain_text() {
        assert_eq!(sanitize_html("plain text"), "plain text");
    }

    fn image_upload() -> FileUpload {
        FileUpload {
            file_name: "product.png".to_string(),
            size_bytes: 100_000,
            mime_type: "image/png".to_string(),
        }
    }

    #[test]
    fn test_validate_file_accepts_image() {
        let result = validate_file(&image_upload());
        assert!(result.valid, "errors: {:?}", result.errors);
    }

    #[test]
    fn test_validate_file_size_ceiling() {
        let file = FileUpload {
            size_bytes: MAX_FILE_SIZE_BYTES + 1,
            ..image_upload()
        };
        assert!(!validate_file(&file).valid);
    }

    #[test]
    fn test_validate_file_mime_allow_list() {
        let file = FileUpload {
            mime_type: "application/x-msdownload".to_string(),
            ..image_upload()
        };
        assert!(!validate_file(&file).valid);
    }

    #[test]
    fn test_validate_file_rejects_traversal() {
        let file = FileUpload {
            file_name: "../../etc/passwd.png".to_string(),
            ..image_upload()
        };
        assert!(!validate_file(&file).valid);
    }

    #[test]
    fn test_validate_file_rejects_double_extension() {
        let file = FileUpload {
            file_name: "invoice.png.exe".to_string(),
            ..image_upload()
        };
        let result = validate_file(&file);
        assert!(!result.valid);
        assert!(
            result
                .errors
                .iter()
                .any(|e| e.contains("multiple extensions"))
        );
    }

    #[test]
    fn test_validate_file_rejects_bad_extension() {
        let file = FileUpload {
            file_name: "script.svg".to_string(),
            ..image_upload()
        };
        assert!(!validate_file(&file).valid);
    }
}
