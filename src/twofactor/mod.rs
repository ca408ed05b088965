//! Second-factor enrollment and verification: TOTP plus single-use backup
//! codes.
//!
//! The service is stateless; callers own the per-user [`TwoFactorConfig`]
//! and persist it wherever their account records live.

pub mod backup;

use crate::error::{Error, Result};
use backup::{BackupCode, BackupCodeBatch};
use serde::{Deserialize, Serialize};
use totp_rs::{Algorithm, Secret, TOTP};
use tracing::{info, warn};

const TOTP_DIGITS: usize = 6;
const TOTP_STEP_SECONDS: u64 = 30;
// Accept one step of clock skew on either side.
const TOTP_SKEW_STEPS: u8 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TwoFactorMethod {
    Totp,
    BackupCode,
}

/// Per-user second-factor state. `verified` flips true only after a
/// successful enrollment-time code check.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TwoFactorConfig {
    pub identifier: String,
    pub method: TwoFactorMethod,
    pub verified: bool,
    pub secret_base32: String,
    pub backup_codes: Vec<BackupCode>,
}

/// Everything the user needs to enroll, returned exactly once.
///
/// The plaintext backup codes and the QR rendering exist only here; the
/// retained [`TwoFactorConfig`] holds hashes and the shared secret.
#[derive(Debug)]
pub struct TwoFactorSetup {
    pub identifier: String,
    pub secret_base32: String,
    pub otpauth_url: String,
    pub qr_png_base64: String,
    pub backup_codes: Vec<String>,
    pub config: TwoFactorConfig,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TwoFactorOutcome {
    pub success: bool,
    pub method: Option<TwoFactorMethod>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TwoFactorStatus {
    pub enabled: bool,
    pub verified: bool,
    pub backup_codes_remaining: usize,
}

pub struct TwoFactor {
    issuer: String,
    pepper: Vec<u8>,
    backup_code_count: usize,
}

impl TwoFactor {
    #[must_use]
    pub fn new(issuer: String, pepper: Vec<u8>, backup_code_count: usize) -> Self {
        Self {
            issuer,
            pepper,
            backup_code_count,
        }
    }

    /// Begin enrollment: generate a shared secret, its otpauth URL and QR
    /// rendering, and a fresh batch of backup codes.
    ///
    /// # Errors
    /// Returns an error if secret generation, QR rendering, or backup-code
    /// hashing fails.
    pub fn setup(&self, identifier: &str) -> Result<TwoFactorSetup> {
        let secret = Secret::generate_secret();
        let secret_bytes = secret
            .to_bytes()
            .map_err(|e| Error::Crypto(format!("secret generation failed: {e}")))?;

        let totp = self.totp_from_bytes(secret_bytes, identifier)?;
        let otpauth_url = totp.get_url();
        let qr = totp
            .get_qr_base64()
            .map_err(|e| Error::Crypto(format!("QR rendering failed: {e}")))?;
        let secret_base32 = totp.get_secret_base32();

        let batch = BackupCodeBatch::generate(self.backup_code_count, &self.pepper)?;

        info!(identifier = identifier, "two-factor enrollment started");

        Ok(TwoFactorSetup {
            identifier: identifier.to_string(),
            secret_base32: secret_base32.clone(),
            otpauth_url,
            qr_png_base64: format!("data:image/png;base64,{qr}"),
            backup_codes: batch.codes,
            config: TwoFactorConfig {
                identifier: identifier.to_string(),
                method: TwoFactorMethod::Totp,
                verified: false,
                secret_base32,
                backup_codes: batch.hashed,
            },
        })
    }

    /// Confirm enrollment by verifying the first code against the pending
    /// secret. Already-verified configs confirm idempotently.
    ///
    /// # Errors
    /// Returns an error if the stored secret cannot be decoded.
    pub fn verify_setup(&self, config: &mut TwoFactorConfig, code: &str) -> Result<bool> {
        if config.verified {
            return Ok(true);
        }

        let valid = self.check_totp(config, code)?;
        if valid {
            config.verified = true;
        } else {
            warn!("two-factor enrollment code rejected");
        }

        Ok(valid)
    }

    /// Authenticate a second factor: the time-based code first, then unused
    /// backup codes, consuming the first hash that matches.
    ///
    /// The returned outcome names the method that succeeded so callers can
    /// warn the user when a backup code was spent.
    ///
    /// # Errors
    /// Returns `Error::TwoFactorNotVerified` when enrollment was never
    /// confirmed.
    pub fn authenticate(
        &self,
        config: &mut TwoFactorConfig,
        code: &str,
        method: Option<TwoFactorMethod>,
    ) -> Result<TwoFactorOutcome> {
        if !config.verified {
            return Err(Error::TwoFactorNotVerified);
        }

        if method != Some(TwoFactorMethod::BackupCode) && self.check_totp(config, code)? {
            return Ok(TwoFactorOutcome {
                success: true,
                method: Some(TwoFactorMethod::Totp),
            });
        }

        if method != Some(TwoFactorMethod::Totp) {
            for stored in config.backup_codes.iter_mut().filter(|c| !c.used) {
                if backup::verify_code(code, &stored.hash, &self.pepper) {
                    stored.used = true;
                    info!("backup code consumed");
                    return Ok(TwoFactorOutcome {
                        success: true,
                        method: Some(TwoFactorMethod::BackupCode),
                    });
                }
            }
        }

        Ok(TwoFactorOutcome {
            success: false,
            method: None,
        })
    }

    /// Replace every backup code with a fresh batch, returning the new
    /// plaintext codes exactly once.
    ///
    /// # Errors
    /// Returns an error if backup-code hashing fails.
    pub fn regenerate_backup_codes(&self, config: &mut TwoFactorConfig) -> Result<Vec<String>> {
        let batch = BackupCodeBatch::generate(self.backup_code_count, &self.pepper)?;
        config.backup_codes = batch.hashed;
        Ok(batch.codes)
    }

    #[must_use]
    pub fn status(config: &TwoFactorConfig) -> TwoFactorStatus {
        TwoFactorStatus {
            enabled: true,
            verified: config.verified,
            backup_codes_remaining: config.backup_codes.iter().filter(|c| !c.used).count(),
        }
    }

    fn check_totp(&self, config: &TwoFactorConfig, code: &str) -> Result<bool> {
        let secret_bytes = Secret::Encoded(config.secret_base32.clone())
            .to_bytes()
            .map_err(|e| Error::Crypto(format!("stored secret undecodable: {e}")))?;
        let totp = self.totp_from_bytes(secret_bytes, &config.identifier)?;
        Ok(totp.check_current(code).unwrap_or(false))
    }

    fn totp_from_bytes(&self, secret_bytes: Vec<u8>, label: &str) -> Result<TOTP> {
        TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW_STEPS,
            TOTP_STEP_SECONDS,
            secret_bytes,
            Some(self.issuer.clone()),
            label.to_string(),
        )
        .map_err(|e| Error::Crypto(format!("TOTP init failed: {e}")))
    }
}
