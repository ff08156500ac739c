//! # Text Processing Utilities
//!
//! Redaction of credential-like values before they reach logs or error records.

use once_cell::sync::Lazy;
use regex::Regex;

/// Redacts values that look like secrets in a string.
///
/// Key names are kept so the redacted text is still useful for debugging.
///
/// # Example
/// ```rust
/// use conduit_util::text_processing::redact_sensitive;
///
/// assert_eq!(redact_sensitive("API_KEY=abc123"), "API_KEY=[REDACTED]");
/// assert_eq!(redact_sensitive("Authorization: Bearer abc"), "Authorization: [REDACTED]");
/// ```
pub fn redact_sensitive(input: &str) -> String {
    redact_sensitive_with(input, "[REDACTED]")
}

/// Redacts sensitive-looking values, using a custom replacement token.
pub fn redact_sensitive_with(input: &str, replacement: &str) -> String {
    let mut redacted = input.to_string();
    for pattern in get_redact_patterns().iter() {
        redacted = pattern
            .replace_all(&redacted, |captures: &regex::Captures| {
                let prefix = captures.get(1).map(|m| m.as_str()).unwrap_or("");
                let suffix = captures.get(3).map(|m| m.as_str()).unwrap_or("");
                format!("{}{}{}", prefix, replacement, suffix)
            })
            .to_string();
    }
    redacted
}

/// Returns the compiled redaction patterns.
///
/// Every pattern captures the preserved prefix in group 1, the secret in
/// group 2, and an optional preserved suffix in group 3.
pub fn get_redact_patterns() -> &'static Vec<Regex> {
    static REDACT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(build_redact_patterns);

    &REDACT_PATTERNS
}

fn build_redact_patterns() -> Vec<Regex> {
    [
        r"(?i)(authorization:\s*)([^\r\n]+)()",
        r"(?i)((?:^|\b)Bearer\s+)([A-Za-z0-9\-._~+/]+=*)()",
        r"(?i)(\b[A-Z0-9_]*(?:KEY|TOKEN|SECRET|PASSWORD)=)([^\s&]+)()",
        r#"(?i)("(?:api_key|access_token|token|secret|password|client_secret)"\s*:\s*")([^"]*)(")"#,
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
}
