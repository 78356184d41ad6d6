//! Log Redaction Layer
//!
//! Scrubs access tokens and credential-looking values from strings before
//! they are written to the execution trail. HTTP task actions can carry
//! Authorization headers, and captured command output can echo secrets.

use once_cell::sync::Lazy;
use regex::Regex;

static BEARER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)bearer\s+[a-zA-Z0-9\-\._~+/]+=*").unwrap()
});
static API_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(sk|pk|ak|ghp|xox[baprs])[-_][a-zA-Z0-9\-_]{16,}\b").unwrap()
});
static KV_SECRET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(password|passwd|secret|token|api[-_]?key)\s*[=:]\s*[^\s&"']+"#)
        .unwrap()
});

/// Redacts sensitive patterns in a string.
pub fn redact_sensitive_data(input: &str) -> String {
    let mut redacted = input.to_string();

    redacted = BEARER_RE.replace_all(&redacted, "[REDACTED_TOKEN]").to_string();
    redacted = API_KEY_RE.replace_all(&redacted, "[REDACTED_KEY]").to_string();
    redacted = KV_SECRET_RE
        .replace_all(&redacted, "$1=[REDACTED]")
        .to_string();

    redacted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_tokens_are_scrubbed() {
        let raw = "GET https://api.example.com with Bearer eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9";
        let clean = redact_sensitive_data(raw);
        assert!(!clean.contains("eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9"));
        assert!(clean.contains("[REDACTED_TOKEN]"));
    }

    #[test]
    fn key_value_secrets_are_scrubbed() {
        let raw = "connecting with password=hunter2 and api_key: sk-ignored";
        let clean = redact_sensitive_data(raw);
        assert!(!clean.contains("hunter2"));
    }

    #[test]
    fn prefixed_keys_are_scrubbed() {
        let raw = "stdout contained ghp_abcdefghijklmnop1234 verbatim";
        let clean = redact_sensitive_data(raw);
        assert!(!clean.contains("ghp_abcdefghijklmnop1234"));
        assert!(clean.contains("[REDACTED_KEY]"));
    }

    #[test]
    fn plain_text_is_untouched() {
        let raw = "echo hello from task 42";
        assert_eq!(redact_sensitive_data(raw), raw);
    }
}
