//! Access-token issuance and single-use refresh-token rotation.
//!
//! Access tokens are short-lived signed JWTs; refresh tokens are opaque
//! random values whose SHA-256 hash is recorded server-side with its own
//! expiry. Raw refresh tokens never touch the record map.

use crate::error::{Error, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub sid: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

#[derive(Clone, Debug)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access-token lifetime in seconds.
    pub expires_in: i64,
}

#[derive(Clone, Debug)]
struct RefreshRecord {
    user_id: String,
    session_id: String,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    revoked: bool,
}

pub struct TokenService {
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    records: RwLock<HashMap<String, RefreshRecord>>,
}

impl TokenService {
    #[must_use]
    pub fn new(
        signing_key: &[u8],
        issuer: String,
        access_ttl_seconds: i64,
        refresh_ttl_seconds: i64,
    ) -> Self {
        let mut validation = Validation::default();
        validation.set_issuer(&[&issuer]);

        Self {
            issuer,
            access_ttl: Duration::seconds(access_ttl_seconds),
            refresh_ttl: Duration::seconds(refresh_ttl_seconds),
            encoding_key: EncodingKey::from_secret(signing_key),
            decoding_key: DecodingKey::from_secret(signing_key),
            validation,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Issue a new access/refresh pair bound to the given identity.
    ///
    /// # Errors
    /// Returns an error if signing fails or internal state is unusable.
    pub fn generate(&self, user_id: &str, session_id: &str) -> Result<TokenPair> {
        let now = Utc::now();
        let exp = now + self.access_ttl;

        let claims = Claims {
            sub: user_id.to_string(),
            sid: session_id.to_string(),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let access_token = encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| Error::Crypto(format!("token signing failed: {e}")))?;

        let refresh_token = generate_refresh_token();
        {
            let mut records = self.records.write().map_err(|_| poisoned())?;
            records.insert(
                hash_refresh_token(&refresh_token),
                RefreshRecord {
                    user_id: user_id.to_string(),
                    session_id: session_id.to_string(),
                    created_at: now,
                    expires_at: now + self.refresh_ttl,
                    revoked: false,
                },
            );
        }

        debug!(user = %user_id, session = %session_id, "token pair issued");

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in: self.access_ttl.num_seconds(),
        })
    }

    /// Verify an access token, distinguishing expiry from invalidity.
    ///
    /// # Errors
    /// `Error::TokenExpired` past `exp`; `Error::InvalidToken` for any other
    /// verification failure.
    pub fn verify_access(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => Error::TokenExpired,
                _ => Error::InvalidToken,
            })
    }

    /// Rotate a refresh token: strictly single-use.
    ///
    /// The consumed record is revoked before the new pair is minted; a
    /// second call with the same token fails with `RefreshReuse`.
    ///
    /// # Errors
    /// `Error::RefreshReuse` for unknown or already-consumed tokens,
    /// `Error::TokenExpired` past the record's own expiry.
    pub fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let hash = hash_refresh_token(refresh_token);
        let (user_id, session_id) = {
            let mut records = self.records.write().map_err(|_| poisoned())?;
            let record = records.get_mut(&hash).ok_or(Error::RefreshReuse)?;
            if record.revoked {
                return Err(Error::RefreshReuse);
            }
            if Utc::now() >= record.expires_at {
                return Err(Error::TokenExpired);
            }
            record.revoked = true;
            (record.user_id.clone(), record.session_id.clone())
        };

        info!(user = %user_id, "refresh token rotated");
        self.generate(&user_id, &session_id)
    }

    /// Delete the server-side record; future refresh attempts fail closed.
    ///
    /// # Errors
    /// Returns an error only on unusable internal state.
    pub fn revoke(&self, refresh_token: &str) -> Result<bool> {
        let hash = hash_refresh_token(refresh_token);
        let removed = self
            .records
            .write()
            .map_err(|_| poisoned())?
            .remove(&hash)
            .is_some();
        if removed {
            info!("refresh token revoked");
        }
        Ok(removed)
    }

    /// Count of live (unrevoked, unexpired) refresh records.
    ///
    /// # Errors
    /// Returns an error only on unusable internal state.
    pub fn active_refresh_tokens(&self) -> Result<usize> {
        let now = Utc::now();
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records
            .values()
            .filter(|record| !record.revoked && record.expires_at > now)
            .count())
    }

    /// Drop records past their own expiry. Revoked records are kept until
    /// then so reuse stays distinguishable from expiry.
    ///
    /// # Errors
    /// Returns an error only on unusable internal state.
    pub fn cleanup(&self) -> Result<()> {
        let now = Utc::now();
        let mut records = self.records.write().map_err(|_| poisoned())?;
        records.retain(|_, record| record.expires_at > now);
        Ok(())
    }
}

fn generate_refresh_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Raw refresh tokens are never stored; lookups go through this hash.
fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

fn poisoned() -> Error {
    Error::Internal("token record lock poisoned".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new(b"a-test-signing-key-of-decent-size", "gardi".to_string(), 900, 86400)
    }

    #[test]
    fn generate_and_verify_access_token() {
        let service = service();
        let pair = service.generate("alice", "session-1").unwrap();
        let claims = service.verify_access(&pair.access_token).unwrap();
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.sid, "session-1");
        assert_eq!(claims.iss, "gardi");
        assert_eq!(pair.expires_in, 900);
    }

    #[test]
    fn tampered_token_is_invalid() {
        let service = service();
        let pair = service.generate("alice", "session-1").unwrap();
        let mut tampered = pair.access_token.clone();
        tampered.push('x');
        assert!(matches!(
            service.verify_access(&tampered),
            Err(Error::InvalidToken)
        ));
    }

    #[test]
    fn token_from_other_key_is_invalid() {
        let service = service();
        let other = TokenService::new(b"an-entirely-different-signing-key", "gardi".to_string(), 900, 86400);
        let pair = other.generate("alice", "session-1").unwrap();
        assert!(matches!(
            service.verify_access(&pair.access_token),
            Err(Error::InvalidToken)
        ));
    }

    #[test]
    fn refresh_is_single_use() {
        let service = service();
        let pair = service.generate("alice", "session-1").unwrap();

        let rotated = service.refresh(&pair.refresh_token).unwrap();
        assert_ne!(rotated.refresh_token, pair.refresh_token);
        let claims = service.verify_access(&rotated.access_token).unwrap();
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.sid, "session-1");

        assert!(matches!(
            service.refresh(&pair.refresh_token),
            Err(Error::RefreshReuse)
        ));
    }

    #[test]
    fn revoked_token_cannot_refresh() {
        let service = service();
        let pair = service.generate("alice", "session-1").unwrap();
        assert!(service.revoke(&pair.refresh_token).unwrap());
        assert!(!service.revoke(&pair.refresh_token).unwrap());
        assert!(matches!(
            service.refresh(&pair.refresh_token),
            Err(Error::RefreshReuse)
        ));
    }

    #[test]
    fn unknown_refresh_token_fails_closed() {
        let service = service();
        assert!(matches!(
            service.refresh("never-issued"),
            Err(Error::RefreshReuse)
        ));
    }

    #[test]
    fn expired_refresh_record_reports_expiry() {
        let service = TokenService::new(
            b"a-test-signing-key-of-decent-size",
            "gardi".to_string(),
            900,
            -1,
        );
        let pair = service.generate("alice", "session-1").unwrap();
        assert!(matches!(
            service.refresh(&pair.refresh_token),
            Err(Error::TokenExpired)
        ));
    }

    #[test]
    fn cleanup_drops_expired_records_only() {
        let service = service();
        let pair = service.generate("alice", "session-1").unwrap();
        service.refresh(&pair.refresh_token).unwrap();

        // One revoked + one live record before cleanup; both unexpired.
        assert_eq!(service.active_refresh_tokens().unwrap(), 1);
        service.cleanup().unwrap();
        assert_eq!(service.active_refresh_tokens().unwrap(), 1);
    }
}
