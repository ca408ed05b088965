//! Named-secret generation, validation, and encrypted persistence.
//!
//! Secrets live in an in-memory cache; the ones marked persistent are also
//! written to a single sealed blob on disk (`hex(nonce):hex(ciphertext)`).
//! Raw values are never logged, only truncated fingerprints.

pub mod crypto;
pub mod strength;

use crate::error::{Error, Result};
use crate::redact::fingerprint;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::{info, warn};

pub use strength::{SecretValidation, Strength};

const MIN_MASTER_KEY_CHARS: usize = 16;
const DEFAULT_SECRET_BYTES: usize = 32;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Encoding {
    #[default]
    Hex,
    Base64,
    Base64Url,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoredSecret {
    value: String,
    strength: Strength,
    persistent: bool,
}

/// Options for [`SecretManager::get`].
#[derive(Clone, Copy, Debug)]
pub struct SecretOptions {
    pub length: usize,
    pub encoding: Encoding,
    pub persistent: bool,
    pub regenerate: bool,
}

impl Default for SecretOptions {
    fn default() -> Self {
        Self {
            length: DEFAULT_SECRET_BYTES,
            encoding: Encoding::Hex,
            persistent: false,
            regenerate: false,
        }
    }
}

/// Audit record for a rotation: fingerprints only, never raw values.
#[derive(Clone, Debug)]
pub struct RotatedSecret {
    pub name: String,
    pub old_fingerprint: String,
    pub new_fingerprint: String,
}

pub struct SecretManager {
    secrets: RwLock<HashMap<String, StoredSecret>>,
    store_key: [u8; 32],
    path: Option<PathBuf>,
    min_length: usize,
}

impl SecretManager {
    /// Create a manager keyed by an operator-supplied master key.
    ///
    /// The master key is a hard startup requirement: there is no
    /// platform-derived fallback, and construction fails closed without it.
    ///
    /// # Errors
    /// Returns `Error::Config` when the master key is shorter than 16 chars.
    pub fn new(
        master_key: &SecretString,
        min_length: usize,
        path: Option<PathBuf>,
    ) -> Result<Self> {
        let exposed = master_key.expose_secret();
        if exposed.chars().count() < MIN_MASTER_KEY_CHARS {
            return Err(Error::Config(format!(
                "master key must be at least {MIN_MASTER_KEY_CHARS} characters"
            )));
        }

        let mut hasher = Sha256::new();
        hasher.update(exposed.as_bytes());
        let digest = hasher.finalize();
        let mut store_key = [0u8; 32];
        store_key.copy_from_slice(&digest);

        Ok(Self {
            secrets: RwLock::new(HashMap::new()),
            store_key,
            path,
            min_length,
        })
    }

    /// Generate `length` cryptographically random bytes in the requested
    /// encoding.
    #[must_use]
    pub fn generate(&self, length: usize, encoding: Encoding) -> String {
        let mut bytes = vec![0u8; length];
        OsRng.fill_bytes(&mut bytes);
        match encoding {
            Encoding::Hex => hex_encode(&bytes),
            Encoding::Base64 => STANDARD.encode(&bytes),
            Encoding::Base64Url => URL_SAFE_NO_PAD.encode(&bytes),
        }
    }

    /// Validate a candidate secret against entropy and weak-pattern rules.
    #[must_use]
    pub fn validate(&self, value: &str, min_length: usize) -> SecretValidation {
        strength::validate(value, min_length)
    }

    /// Return the named secret, generating it on first request.
    ///
    /// A cached value is returned unless `regenerate` is set. Freshly
    /// generated values must pass validation; persistent secrets are sealed
    /// to disk before the call returns.
    ///
    /// # Errors
    /// Returns `Error::WeakSecret` when a generated value fails validation,
    /// or a persistence error when the sealed write fails.
    pub async fn get(&self, name: &str, options: SecretOptions) -> Result<String> {
        if !options.regenerate {
            let secrets = self.secrets.read().map_err(|_| poisoned())?;
            if let Some(stored) = secrets.get(name) {
                return Ok(stored.value.clone());
            }
        }

        let value = self.generate(options.length, options.encoding);
        let validation = strength::validate(&value, self.min_length);
        if !validation.is_valid {
            // Generated output failing entropy checks means the length was
            // too small for the encoding; surface it rather than retrying.
            return Err(Error::WeakSecret(validation.errors.join("; ")));
        }

        self.insert(name, &value, validation.strength, options.persistent)?;
        info!(
            name = name,
            fingerprint = %fingerprint(&value),
            persistent = options.persistent,
            "secret generated"
        );

        if options.persistent {
            self.persist().await?;
        }

        Ok(value)
    }

    /// Accept a caller-supplied secret after validating it.
    ///
    /// # Errors
    /// Returns `Error::WeakSecret` when the value fails validation.
    pub async fn set(&self, name: &str, value: &str, persistent: bool) -> Result<()> {
        let validation = strength::validate(value, self.min_length);
        if !validation.is_valid {
            return Err(Error::WeakSecret(validation.errors.join("; ")));
        }

        self.insert(name, value, validation.strength, persistent)?;

        if persistent {
            self.persist().await?;
        }

        Ok(())
    }

    /// Regenerate the named secret in place.
    ///
    /// Only hash fingerprints of the old and new values are returned, for
    /// audit correlation; the old value is never re-exposed.
    ///
    /// # Errors
    /// Returns `Error::SecretNotFound` for unknown names.
    pub async fn rotate(&self, name: &str) -> Result<RotatedSecret> {
        let (old_value, persistent) = {
            let secrets = self.secrets.read().map_err(|_| poisoned())?;
            let stored = secrets
                .get(name)
                .ok_or_else(|| Error::SecretNotFound(name.to_string()))?;
            (stored.value.clone(), stored.persistent)
        };

        let new_value = self
            .get(
                name,
                SecretOptions {
                    length: DEFAULT_SECRET_BYTES,
                    encoding: Encoding::Hex,
                    persistent,
                    regenerate: true,
                },
            )
            .await?;

        let rotated = RotatedSecret {
            name: name.to_string(),
            old_fingerprint: fingerprint(&old_value),
            new_fingerprint: fingerprint(&new_value),
        };

        info!(
            name = name,
            old = %rotated.old_fingerprint,
            new = %rotated.new_fingerprint,
            "secret rotated"
        );

        Ok(rotated)
    }

    /// Load previously persisted secrets from disk.
    ///
    /// A missing store file is a first boot, not an error.
    ///
    /// # Errors
    /// Returns an error when the blob exists but cannot be opened; a store
    /// that fails authentication under the current master key is unusable.
    pub async fn load(&self) -> Result<usize> {
        let Some(path) = self.path.as_ref() else {
            return Ok(0);
        };
        if !path.exists() {
            return Ok(0);
        }

        let contents = tokio::fs::read_to_string(path).await?;
        let (nonce_hex, ciphertext_hex) = contents
            .trim()
            .split_once(':')
            .ok_or_else(|| Error::Crypto("malformed secret store".to_string()))?;

        let mut sealed = hex_decode(nonce_hex)?;
        sealed.extend(hex_decode(ciphertext_hex)?);

        let plaintext = crypto::open(&self.store_key, &sealed)?;
        let loaded: HashMap<String, StoredSecret> = serde_json::from_slice(&plaintext)?;
        let count = loaded.len();

        {
            let mut secrets = self.secrets.write().map_err(|_| poisoned())?;
            secrets.extend(loaded);
        }

        info!(count = count, "persistent secrets loaded");
        Ok(count)
    }

    fn insert(&self, name: &str, value: &str, strength: Strength, persistent: bool) -> Result<()> {
        let mut secrets = self.secrets.write().map_err(|_| poisoned())?;
        secrets.insert(
            name.to_string(),
            StoredSecret {
                value: value.to_string(),
                strength,
                persistent,
            },
        );
        Ok(())
    }

    /// Seal every persistent secret into the on-disk blob.
    ///
    /// Persistence failures propagate: losing a newly generated secret is
    /// unsafe to ignore.
    async fn persist(&self) -> Result<()> {
        let Some(path) = self.path.as_ref() else {
            warn!("persistent secret requested without a secrets path; kept in memory only");
            return Ok(());
        };

        let snapshot: HashMap<String, StoredSecret> = {
            let secrets = self.secrets.read().map_err(|_| poisoned())?;
            secrets
                .iter()
                .filter(|(_, stored)| stored.persistent)
                .map(|(name, stored)| (name.clone(), stored.clone()))
                .collect()
        };

        let plaintext = serde_json::to_vec(&snapshot)?;
        let sealed = crypto::seal(&self.store_key, &plaintext)?;
        let (nonce, ciphertext) = sealed.split_at(12);
        let contents = format!("{}:{}", hex_encode(nonce), hex_encode(ciphertext));

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, contents).await?;

        Ok(())
    }
}

fn poisoned() -> Error {
    Error::Internal("secret cache lock poisoned".to_string())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

fn hex_decode(hex: &str) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(Error::Crypto("odd-length hex".to_string()));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            hex.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| Error::Crypto("invalid hex".to_string()))
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn manager(path: Option<PathBuf>) -> SecretManager {
        let master = SecretString::from("unit-test-master-key-material");
        SecretManager::new(&master, 32, path).unwrap()
    }

    #[test]
    fn short_master_key_fails_closed() {
        let master = SecretString::from("short");
        assert!(matches!(
            SecretManager::new(&master, 32, None),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn generate_respects_encoding() {
        let manager = manager(None);
        let hex = manager.generate(32, Encoding::Hex);
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));

        let b64url = manager.generate(32, Encoding::Base64Url);
        assert_eq!(URL_SAFE_NO_PAD.decode(b64url).unwrap().len(), 32);
    }

    #[tokio::test]
    async fn get_caches_until_regenerate() {
        let manager = manager(None);
        let first = manager.get("signing", SecretOptions::default()).await.unwrap();
        let second = manager.get("signing", SecretOptions::default()).await.unwrap();
        assert_eq!(first, second);

        let third = manager
            .get(
                "signing",
                SecretOptions {
                    regenerate: true,
                    ..SecretOptions::default()
                },
            )
            .await
            .unwrap();
        assert_ne!(first, third);
    }

    #[tokio::test]
    async fn set_rejects_weak_values() {
        let manager = manager(None);
        assert!(matches!(
            manager.set("api", "password123", false).await,
            Err(Error::WeakSecret(_))
        ));
        assert!(manager
            .get("api", SecretOptions::default())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn rotate_returns_fingerprints_only() {
        let manager = manager(None);
        let value = manager.get("signing", SecretOptions::default()).await.unwrap();
        let rotated = manager.rotate("signing").await.unwrap();
        assert_eq!(rotated.old_fingerprint, fingerprint(&value));
        assert_ne!(rotated.old_fingerprint, rotated.new_fingerprint);
        assert_eq!(rotated.new_fingerprint.len(), 12);
    }

    #[tokio::test]
    async fn rotate_unknown_name_fails() {
        let manager = manager(None);
        assert!(matches!(
            manager.rotate("missing").await,
            Err(Error::SecretNotFound(_))
        ));
    }

    #[tokio::test]
    async fn persistent_secrets_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.enc");

        let value = {
            let manager = manager(Some(path.clone()));
            manager
                .get(
                    "signing",
                    SecretOptions {
                        persistent: true,
                        ..SecretOptions::default()
                    },
                )
                .await
                .unwrap()
        };

        let reloaded = manager(Some(path));
        assert_eq!(reloaded.load().await.unwrap(), 1);
        let restored = reloaded.get("signing", SecretOptions::default()).await.unwrap();
        assert_eq!(restored, value);
    }

    #[tokio::test]
    async fn store_file_is_nonce_ciphertext_hex_pair() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.enc");

        let manager = manager(Some(path.clone()));
        manager
            .get(
                "signing",
                SecretOptions {
                    persistent: true,
                    ..SecretOptions::default()
                },
            )
            .await
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let (nonce, ciphertext) = contents.split_once(':').unwrap();
        assert_eq!(nonce.len(), 24);
        assert!(ciphertext.len() > 32);
        assert!(!contents.contains("signing"));
    }

    #[tokio::test]
    async fn wrong_master_key_cannot_open_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.enc");

        let manager = manager(Some(path.clone()));
        manager
            .get(
                "signing",
                SecretOptions {
                    persistent: true,
                    ..SecretOptions::default()
                },
            )
            .await
            .unwrap();

        let other = SecretString::from("a-different-master-key-entirely");
        let reloaded = SecretManager::new(&other, 32, Some(path)).unwrap();
        assert!(reloaded.load().await.is_err());
    }
}
