//! Entropy and weak-pattern checks for candidate secrets.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Minimum Shannon entropy, in bits per character, for an accepted secret.
pub const MIN_ENTROPY_BITS: f64 = 3.5;

const STRONG_ENTROPY_BITS: f64 = 4.0;
const STRONG_MIN_LENGTH: usize = 32;

// Substrings that show up in virtually every credential dump.
const COMMON_WORDS: &[&str] = &[
    "password", "passwort", "secret", "admin", "qwerty", "letmein", "welcome", "monkey",
    "dragon", "default", "changeme", "iloveyou", "abc123",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strength {
    Weak,
    Medium,
    Strong,
}

/// Result of validating a candidate secret.
#[derive(Clone, Debug)]
pub struct SecretValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub strength: Strength,
}

/// Shannon entropy in bits per character over the character frequencies.
#[must_use]
pub fn shannon_entropy(value: &str) -> f64 {
    let total = value.chars().count();
    if total == 0 {
        return 0.0;
    }
    let mut frequencies: HashMap<char, usize> = HashMap::new();
    for ch in value.chars() {
        *frequencies.entry(ch).or_insert(0) += 1;
    }
    #[allow(clippy::cast_precision_loss)]
    frequencies
        .values()
        .map(|&count| {
            let p = count as f64 / total as f64;
            -p * p.log2()
        })
        .sum()
}

/// Weak patterns are rejected regardless of measured entropy.
fn weak_pattern(value: &str) -> Option<String> {
    if !value.is_empty() && value.chars().all(|ch| Some(ch) == value.chars().next()) {
        return Some("secret is a single repeated character".to_string());
    }
    let lowered = value.to_lowercase();
    if let Some(word) = COMMON_WORDS.iter().find(|word| lowered.contains(*word)) {
        return Some(format!("secret contains a common word: {word}"));
    }
    if value.chars().all(|ch| ch.is_ascii_digit()) {
        return Some("secret is purely numeric".to_string());
    }
    if value.chars().all(char::is_alphabetic) {
        return Some("secret is purely alphabetic".to_string());
    }
    None
}

/// Validate a candidate secret against length, entropy, and weak patterns.
#[must_use]
pub fn validate(value: &str, min_length: usize) -> SecretValidation {
    let mut errors = Vec::new();

    if value.chars().count() < min_length {
        errors.push(format!("secret must be at least {min_length} characters"));
    }

    let entropy = shannon_entropy(value);
    if entropy < MIN_ENTROPY_BITS {
        errors.push(format!(
            "secret entropy {entropy:.2} bits/char is below the {MIN_ENTROPY_BITS} minimum"
        ));
    }

    if let Some(reason) = weak_pattern(value) {
        errors.push(reason);
    }

    let is_valid = errors.is_empty();
    let strength = if !is_valid {
        Strength::Weak
    } else if entropy >= STRONG_ENTROPY_BITS && value.chars().count() >= STRONG_MIN_LENGTH {
        Strength::Strong
    } else {
        Strength::Medium
    };

    SecretValidation {
        is_valid,
        errors,
        strength,
    }
}
