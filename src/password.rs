//! # Password Service
//!
//! Password strength scoring, Argon2id hashing, and lazy hash upgrades.
//!
//! ## Acceptance model
//!
//! A password is accepted only when it has zero hard errors (length bounds,
//! required character classes, no common-password match) AND its strength
//! score meets the policy threshold. The score is a secondary gate, not a
//! replacement for the hard rules.
//!
//! ## Hashing
//!
//! Argon2id with a tunable work factor. Hashing is intentionally
//! CPU-expensive, so the async entry points run it on the blocking pool
//! rather than starving the request workers. `needs_rehash` flags hashes
//! created under a weaker-than-current work factor so they can be upgraded
//! on the next successful login.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use crate::{Result, error::AuthError};

// ==================== Password Policy ====================

/// Requirements a password must meet.
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    /// Minimum password length
    pub min_length: usize,

    /// Maximum password length
    pub max_length: usize,

    /// Require at least one uppercase letter
    pub require_uppercase: bool,

    /// Require at least one lowercase letter
    pub require_lowercase: bool,

    /// Require at least one digit
    pub require_numbers: bool,

    /// Require at least one special character
    pub require_special_chars: bool,

    /// Minimum strength score (0-100); the secondary gate
    pub min_strength_score: u32,

    /// Argon2 work factor
    pub argon2_params: Argon2Params,
}

/// Argon2 parameters: the tunable work factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argon2Params {
    /// Time cost (iterations)
    pub t_cost: u32,

    /// Memory cost (in KiB)
    pub m_cost: u32,

    /// Parallelism (lanes)
    pub parallelism: u32,

    /// Output length (bytes)
    pub output_length: u32,
}

impl Default for Argon2Params {
    fn default() -> Self {
        Self {
            t_cost: 3,
            m_cost: 32768, // 32 MB
            parallelism: 1,
            output_length: 32,
        }
    }
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 12,
            max_length: 128,
            require_uppercase: true,
            require_lowercase: true,
            require_numbers: true,
            require_special_chars: true,
            min_strength_score: 80,
            argon2_params: Argon2Params::default(),
        }
    }
}

impl PasswordPolicy {
    /// Policy with relaxed requirements, for low-risk surfaces.
    #[must_use]
    pub fn lenient() -> Self {
        Self {
            min_length: 8,
            require_uppercase: false,
            require_special_chars: false,
            min_strength_score: 50,
            ..Self::default()
        }
    }

    /// Hardened policy for back-office accounts.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            min_length: 16,
            min_strength_score: 85,
            argon2_params: Argon2Params {
                t_cost: 4,
                m_cost: 65536, // 64 MB
                ..Argon2Params::default()
            },
            ..Self::default()
        }
    }
}

// ==================== Password Check ====================

/// Outcome of validating a password against a policy.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PasswordCheck {
    /// Zero hard errors and score at or above the threshold
    pub valid: bool,

    /// Strength score, 0-100
    pub score: u32,

    /// Hard failures; structured and field-level, never a 5xx
    pub errors: Vec<String>,

    /// Non-blocking improvements
    pub suggestions: Vec<String>,
}

// ==================== Password Service ====================

/// Password validation, hashing, and verification.
///
/// # Thread Safety
///
/// Cheap to clone; safe to share across tasks.
#[derive(Debug, Clone)]
pub struct PasswordService {
    policy: PasswordPolicy,
}

impl Default for PasswordService {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordService {
    /// Create a service with the default policy.
    #[must_use]
    pub fn new() -> Self {
        Self {
            policy: PasswordPolicy::default(),
        }
    }

    /// Create a service with a custom policy.
    #[must_use]
    pub fn with_policy(policy: PasswordPolicy) -> Self {
        Self { policy }
    }

    /// Get the policy.
    #[must_use]
    pub const fn policy(&self) -> &PasswordPolicy {
        &self.policy
    }

    /// Score a password and collect hard errors and suggestions.
    #[must_use]
    pub fn check_password(&self, password: &str) -> PasswordCheck {
        let mut errors = Vec::new();
        let mut suggestions = Vec::new();
        let policy = &self.policy;

        if password.len() < policy.min_length {
            errors.push(format!(
                "Password must be at least {} characters",
                policy.min_length
            ));
        }
        if password.len() > policy.max_length {
            errors.push(format!(
                "Password must be at most {} characters",
                policy.max_length
            ));
        }
        if policy.require_uppercase && !password.chars().any(char::is_uppercase) {
            errors.push("Password must contain an uppercase letter".to_string());
        }
        if policy.require_lowercase && !password.chars().any(char::is_lowercase) {
            errors.push("Password must contain a lowercase letter".to_string());
        }
        if policy.require_numbers && !password.chars().any(char::is_numeric) {
            errors.push("Password must contain a digit".to_string());
        }
        if policy.require_special_chars && !password.chars().any(|c| !c.is_alphanumeric()) {
            errors.push("Password must contain a special character".to_string());
        }

        // Common-password containment is a hard error: padding a dictionary
        // word with extra characters does not make it acceptable
        if contains_common_password(password) {
            errors.push("Password contains a commonly used password".to_string());
        }

        let score = calculate_strength(password);
        if score < policy.min_strength_score && errors.is_empty() {
            errors.push(format!(
                "Password strength score {score} is below the minimum {}",
                policy.min_strength_score
            ));
        }

        if has_repeated_run(password) {
            suggestions.push("Avoid repeating the same character".to_string());
        }
        if has_sequential_pattern(password) {
            suggestions.push("Avoid sequential characters like 'abc' or '123'".to_string());
        }
        if password.len() < 16 {
            suggestions.push("Longer passphrases score higher".to_string());
        }

        PasswordCheck {
            valid: errors.is_empty() && score >= policy.min_strength_score,
            score,
            errors,
            suggestions,
        }
    }

    /// Validate a password, converting a failed check into an error.
    pub fn validate_password(&self, password: &str) -> Result<()> {
        let check = self.check_password(password);
        if check.valid {
            Ok(())
        } else {
            Err(AuthError::PasswordTooWeak(check.errors.join("; ")))
        }
    }

    /// Hash a password with Argon2id (PHC string format, salt included).
    ///
    /// Runs on the blocking pool; the work factor makes this far too
    /// expensive for an async worker thread.
    pub async fn hash_password(&self, password: &str) -> Result<String> {
        let service = self.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || service.hash_password_sync(&password))
            .await
            .map_err(|e| AuthError::Internal(format!("hashing task failed: {e}")))?
    }

    /// Verify a password against a stored hash, on the blocking pool.
    pub async fn verify_password(&self, password: &str, hash: &str) -> Result<bool> {
        let service = self.clone();
        let password = password.to_string();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || service.verify_password_sync(&password, &hash))
            .await
            .map_err(|e| AuthError::Internal(format!("verification task failed: {e}")))?
    }

    /// Synchronous hash; prefer [`hash_password`](Self::hash_password) on
    /// request paths.
    pub fn hash_password_sync(&self, password: &str) -> Result<String> {
        let argon2 = self.create_argon2()?;
        let salt = SaltString::generate(&mut OsRng);

        argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::PasswordHashError(e.to_string()))
    }

    /// Synchronous verify; prefer [`verify_password`](Self::verify_password)
    /// on request paths.
    pub fn verify_password_sync(&self, password: &str, hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(hash)?;
        let argon2 = self.create_argon2()?;

        Ok(argon2
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }

    /// Whether a stored hash was created under a weaker work factor than the
    /// current policy and should be regenerated on the next login.
    ///
    /// Unparseable hashes report `true`: whatever produced them is not the
    /// current scheme.
    #[must_use]
    pub fn needs_rehash(&self, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return true;
        };
        let Ok(params) = Params::try_from(&parsed) else {
            return true;
        };

        let current = &self.policy.argon2_params;
        params.m_cost() < current.m_cost
            || params.t_cost() < current.t_cost
            || params.p_cost() < current.parallelism
    }

    fn create_argon2(&self) -> Result<Argon2<'static>> {
        let p = &self.policy.argon2_params;
        let params = Params::new(p.m_cost, p.t_cost, p.parallelism, Some(p.output_length as usize))
            .map_err(|e| AuthError::Config(format!("invalid Argon2 parameters: {e}")))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

// ==================== Strength Scoring ====================

/// Calculate a strength score (0-100).
///
/// Rewards length, character-class diversity, and unique-character entropy;
/// penalizes repeated runs, sequences, and dictionary matches.
#[must_use]
pub fn calculate_strength(password: &str) -> u32 {
    let mut score = 0u32;

    // Length (max 40 points)
    score += ((password.chars().count() as u32) * 2).min(40);

    // Character-class diversity (max 40 points)
    if password.chars().any(|c| c.is_ascii_uppercase()) {
        score += 8;
    }
    if password.chars().any(|c| c.is_ascii_lowercase()) {
        score += 8;
    }
    if password.chars().any(|c| c.is_ascii_digit()) {
        score += 8;
    }
    if password.chars().any(|c| !c.is_alphanumeric() && c.is_ascii()) {
        score += 8;
    }
    if password.chars().any(|c| !c.is_ascii()) {
        score += 8;
    }

    // Weak-pattern deductions
    if contains_common_password(password) {
        score = score.saturating_sub(20);
    }
    if has_sequential_pattern(password) {
        score = score.saturating_sub(10);
    }
    if has_repeated_run(password) {
        score = score.saturating_sub(10);
    }

    // Unique-character entropy bonus (max 20 points)
    let entropy = estimate_entropy(password);
    score += (entropy / 10.0).min(20.0) as u32;

    score.min(100)
}

/// Check against a list of the most common passwords; containment counts.
fn contains_common_password(password: &str) -> bool {
    const COMMON_PASSWORDS: &[&str] = &[
        "password", "123456", "12345678", "qwerty", "abc123", "admin", "welcome", "monkey",
        "letmein", "dragon", "master", "login", "passw0rd", "football", "superman", "iloveyou",
        "sunshine", "princess", "shopping",
    ];

    let lower = password.to_lowercase();
    COMMON_PASSWORDS.iter().any(|common| lower.contains(common))
}

/// Three or more of the same character in a row.
fn has_repeated_run(password: &str) -> bool {
    let chars: Vec<char> = password.chars().collect();
    chars
        .windows(3)
        .any(|w| w[0] == w[1] && w[1] == w[2])
}

/// Three or more sequential characters (abc, 123) in either direction.
fn has_sequential_pattern(password: &str) -> bool {
    let chars: Vec<char> = password.chars().collect();
    chars.windows(3).any(|w| {
        let (a, b, c) = (w[0] as u32, w[1] as u32, w[2] as u32);
        (a + 1 == b && b + 1 == c) || (a == b + 1 && b == c + 1)
    })
}

/// Approximate entropy: unique characters drawn from the estimated charset.
fn estimate_entropy(password: &str) -> f64 {
    let mut charset = 0f64;
    if password.chars().any(|c| c.is_ascii_digit()) {
        charset += 10.0;
    }
    if password.chars().any(|c| c.is_ascii_lowercase()) {
        charset += 26.0;
    }
    if password.chars().any(|c| c.is_ascii_uppercase()) {
        charset += 26.0;
    }
    if password.chars().any(|c| !c.is_alphanumeric() && c.is_ascii()) {
        charset += 32.0;
    }
    if password.chars().any(|c| !c.is_ascii()) {
        charset += 64.0;
    }

    let unique: std::collections::HashSet<char> = password.chars().collect();
    unique.len() as f64 * charset.max(1.0).log2()
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> PasswordService {
        PasswordService::new()
    }

    #[tokio::test]
    async fn test_hash_and_verify_roundtrip() {
        let service = service();
        let hash = service.hash_password("Correct#Horse9Battery").await.unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(
            service
                .verify_password("Correct#Horse9Battery", &hash)
                .await
                .unwrap()
        );
        assert!(!service.verify_password("wrong", &hash).await.unwrap());
    }

    #[test]
    fn test_salted_hashes_differ() {
        let service = service();
        let a = service.hash_password_sync("Correct#Horse9Battery").unwrap();
        let b = service.hash_password_sync("Correct#Horse9Battery").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_verify_rejects_garbage_hash() {
        let service = service();
        assert!(
            service
                .verify_password_sync("anything", "not-a-phc-string")
                .is_err()
        );
    }

    #[test]
    fn test_strong_password_accepted() {
        // 20 characters mixing all classes, no repeats or sequences
        let check = service().check_password("Kk7#mQ2$wXp9!rTz5&vN");
        assert!(check.errors.is_empty(), "errors: {:?}", check.errors);
        assert!(check.score >= 80, "score was {}", check.score);
        assert!(check.valid);
    }

    #[test]
    fn test_common_password_rejected_despite_padding() {
        let service = service();

        let plain = service.check_password("password123");
        assert!(!plain.valid);

        // Padding the same dictionary word does not rescue it
        let padded = service.check_password("Password123!ExtraPadding#99");
        assert!(!padded.valid);
        assert!(
            padded
                .errors
                .iter()
                .any(|e| e.contains("commonly used")),
            "errors: {:?}",
            padded.errors
        );
    }

    #[test]
    fn test_hard_errors_reported_per_field() {
        let check = service().check_password("short");
        assert!(!check.valid);
        assert!(check.errors.iter().any(|e| e.contains("at least 12")));
        assert!(check.errors.iter().any(|e| e.contains("uppercase")));
        assert!(check.errors.iter().any(|e| e.contains("digit")));
    }

    #[test]
    fn test_score_alone_can_block() {
        // Meets every hard rule but is short and low-entropy
        let policy = PasswordPolicy {
            min_length: 8,
            ..PasswordPolicy::default()
        };
        let check = PasswordService::with_policy(policy).check_password("Aa1!Aa1!");
        assert!(check.score < 80);
        assert!(!check.valid);
    }

    #[test]
    fn test_validate_password_error_variant() {
        let result = service().validate_password("weak");
        assert!(matches!(result, Err(AuthError::PasswordTooWeak(_))));
    }

    #[test]
    fn test_repeated_run_penalized() {
        let with_run = calculate_strength("Kk7#mQQQ2$wXp9!rTz");
        let without = calculate_strength("Kk7#mQ2$wXp9!rTz5&");
        assert!(with_run < without);
    }

    #[test]
    fn test_sequential_pattern_detection() {
        assert!(has_sequential_pattern("xabc1"));
        assert!(has_sequential_pattern("x321z"));
        assert!(!has_sequential_pattern("K7#mQ"));
    }

    #[test]
    fn test_repeated_run_detection() {
        assert!(has_repeated_run("aaa"));
        assert!(has_repeated_run("x111y"));
        assert!(!has_repeated_run("aabbaabb"));
    }

    #[test]
    fn test_strength_capped_at_100() {
        let long = "Kk7#mQ2$wXp9!rTz5&vN".repeat(4);
        assert!(calculate_strength(&long) <= 100);
    }

    #[test]
    fn test_unicode_counts_as_extra_class() {
        let ascii = calculate_strength("Kk7#mQ2$wXp");
        let unicode = calculate_strength("Kk7#mQ2$wXpé");
        assert!(unicode > ascii);
    }

    #[test]
    fn test_needs_rehash_on_weaker_params() {
        let weak = PasswordService::with_policy(PasswordPolicy {
            argon2_params: Argon2Params {
                t_cost: 1,
                m_cost: 8192,
                parallelism: 1,
                output_length: 32,
            },
            ..PasswordPolicy::default()
        });
        let current = PasswordService::new();

        let old_hash = weak.hash_password_sync("Correct#Horse9Battery").unwrap();
        assert!(current.needs_rehash(&old_hash));

        let fresh_hash = current.hash_password_sync("Correct#Horse9Battery").unwrap();
        assert!(!current.needs_rehash(&fresh_hash));
    }

    #[test]
    fn test_needs_rehash_on_unparseable_hash() {
        assert!(service().needs_rehash("$unknown$format"));
    }

    #[test]
    fn test_lenient_policy_allows_simpler_passwords() {
        let service = PasswordService::with_policy(PasswordPolicy::lenient());
        let check = service.check_password("plum-gravel-07");
        assert!(check.valid, "errors: {:?}", check.errors);
    }
}
