//! Helpers to keep sensitive values out of logs and audit trails.

use sha2::{Digest, Sha256};

const REDACTION_MARKER: &str = "[REDACTED]";

/// Truncate a sensitive value to `first2***last2` for logging.
///
/// Values too short to keep any context are replaced with a marker.
#[must_use]
pub fn redact(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() < 6 {
        return REDACTION_MARKER.to_string();
    }
    let first: String = chars.iter().take(2).collect();
    let last: String = chars.iter().rev().take(2).collect::<Vec<_>>().into_iter().rev().collect();
    format!("{first}***{last}")
}

/// Truncated SHA-256 fingerprint of a secret value, safe for audit
/// correlation. The raw value is never derivable from it.
#[must_use]
pub fn fingerprint(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
    hex.chars().take(12).collect()
}
