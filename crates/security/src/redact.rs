//! Keep API keys out of logs and error payloads.

const REDACTED: &str = "[REDACTED]";

/// Whether `text` contains any of the known secrets.
pub fn contains_secret(text: &str, secrets: &[&str]) -> bool {
    secrets.iter().any(|s| !s.is_empty() && text.contains(s))
}

/// Replace every occurrence of each non-empty secret with `[REDACTED]`.
pub fn redact_secrets(text: &str, secrets: &[&str]) -> String {
    let mut out = text.to_string();
    for secret in secrets.iter().filter(|s| !s.is_empty()) {
        if out.contains(secret) {
            out = out.replace(secret, REDACTED);
        }
    }
    out
}
