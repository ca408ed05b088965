//! Backup-code generation and verification.
//!
//! Backup codes are single-use recovery credentials for when the primary
//! TOTP factor is unavailable. Only Argon2id hashes (with a server-side
//! pepper) are retained; plaintext codes are returned to the caller exactly
//! once.

use crate::error::{Error, Result};
use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

const CODE_LEN: usize = 12;
const CODE_GROUP_SIZE: usize = 4;
// No 0/O or 1/I: codes get read over the phone.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// A stored backup-code hash and whether it has been spent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupCode {
    pub hash: String,
    pub used: bool,
}

/// A freshly generated batch: plaintext codes plus their hashes.
#[derive(Debug)]
pub struct BackupCodeBatch {
    pub codes: Vec<String>,
    pub hashed: Vec<BackupCode>,
}

impl BackupCodeBatch {
    /// Generate `count` backup codes hashed with the provided pepper.
    ///
    /// # Errors
    /// Returns an error if hashing fails.
    pub fn generate(count: usize, pepper: &[u8]) -> Result<Self> {
        let mut rng = OsRng;
        let mut codes = Vec::with_capacity(count);
        let mut hashed = Vec::with_capacity(count);
        for _ in 0..count {
            let code = generate_code(&mut rng);
            let hash = hash_code(&code, pepper)?;
            codes.push(code);
            hashed.push(BackupCode { hash, used: false });
        }
        Ok(Self { codes, hashed })
    }
}

/// Normalize a backup code for verification: strip separators, uppercase.
///
/// # Errors
/// Returns an error for codes of the wrong length or alphabet.
pub fn normalize_code(input: &str) -> Result<String> {
    let normalized: String = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_uppercase())
        .collect();

    if normalized.len() != CODE_LEN {
        return Err(Error::Crypto("invalid backup code length".to_string()));
    }

    if !normalized
        .as_bytes()
        .iter()
        .all(|ch| CODE_ALPHABET.contains(ch))
    {
        return Err(Error::Crypto("invalid backup code characters".to_string()));
    }

    Ok(normalized)
}

/// Verify a backup code against a stored hash.
///
/// An unparseable or non-matching code verifies as `false` rather than
/// erroring, so callers can fall through to the next unused hash.
#[must_use]
pub fn verify_code(code: &str, stored_hash: &str, pepper: &[u8]) -> bool {
    let Ok(normalized) = normalize_code(code) else {
        return false;
    };
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    let Ok(argon2) = argon2_with_pepper(pepper) else {
        return false;
    };
    argon2
        .verify_password(normalized.as_bytes(), &parsed)
        .is_ok()
}

fn generate_code<R: RngCore + ?Sized>(rng: &mut R) -> String {
    let mut raw = [0u8; CODE_LEN];
    rng.fill_bytes(&mut raw);
    let mut out = String::with_capacity(CODE_LEN + 2);
    for (idx, byte) in raw.iter().enumerate() {
        if idx > 0 && idx % CODE_GROUP_SIZE == 0 {
            out.push('-');
        }
        let alphabet_idx = usize::from(*byte) % CODE_ALPHABET.len();
        if let Some(&char_byte) = CODE_ALPHABET.get(alphabet_idx) {
            out.push(char_byte as char);
        }
    }
    out
}

fn hash_code(code: &str, pepper: &[u8]) -> Result<String> {
    let normalized = normalize_code(code)?;
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = argon2_with_pepper(pepper)?;
    let hash = argon2
        .hash_password(normalized.as_bytes(), &salt)
        .map_err(|_| Error::Crypto("failed to hash backup code".to_string()))?
        .to_string();
    Ok(hash)
}

fn argon2_with_pepper(pepper: &[u8]) -> Result<Argon2<'_>> {
    Argon2::new_with_secret(
        pepper,
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2::Params::default(),
    )
    .map_err(|_| Error::Crypto("failed to initialize Argon2id".to_string()))
}
