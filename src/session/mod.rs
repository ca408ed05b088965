//! Sessions and the pluggable session store contract.
//!
//! The engine owns session *semantics* (sliding expiration, lazy expiry);
//! durability is delegated to a [`SessionStore`], which may be in-memory or
//! network-bound.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub ip: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub persistent: bool,
    pub revoked: bool,
}

impl Session {
    #[must_use]
    pub fn new(user_id: &str, ip: &str, user_agent: &str, ttl: Duration, persistent: bool) -> Self {
        let now = Utc::now();
        Self {
            id: generate_session_id(),
            user_id: user_id.to_string(),
            ip: ip.to_string(),
            user_agent: user_agent.to_string(),
            created_at: now,
            last_activity: now,
            expires_at: now + ttl,
            persistent,
            revoked: false,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.revoked || now >= self.expires_at
    }

    /// Sliding expiration: every read refreshes activity and pushes the
    /// expiry forward by the full TTL.
    pub fn touch(&mut self, ttl: Duration) {
        let now = Utc::now();
        self.last_activity = now;
        self.expires_at = now + ttl;
    }
}

/// Random 256-bit identifier; unguessable without a separate signing step.
#[must_use]
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Durability contract for sessions. Implementations may be network-bound;
/// every method may suspend.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &str) -> anyhow::Result<Option<Session>>;
    /// `ttl` lets network-bound stores set their own expiry (e.g. Redis
    /// EXPIRE); lazy expiry on read is enforced by the engine regardless.
    async fn set(&self, session: Session, ttl: Duration) -> anyhow::Result<()>;
    async fn delete(&self, id: &str) -> anyhow::Result<()>;
    async fn clear(&self) -> anyhow::Result<()>;
}

/// In-process store; state is lost on restart by design.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, id: &str) -> anyhow::Result<Option<Session>> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn set(&self, session: Session, _ttl: Duration) -> anyhow::Result<()> {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session);
        Ok(())
    }

    async fn delete(&self, id: &str) -> anyhow::Result<()> {
        self.sessions.write().await.remove(id);
        Ok(())
    }

    async fn clear(&self) -> anyhow::Result<()> {
        self.sessions.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique_and_urlsafe() {
        let first = generate_session_id();
        let second = generate_session_id();
        assert_ne!(first, second);
        assert_eq!(URL_SAFE_NO_PAD.decode(&first).unwrap().len(), 32);
    }

    #[test]
    fn touch_extends_expiry() {
        let mut session = Session::new("alice", "198.51.100.7", "ua", Duration::hours(1), false);
        let before = session.expires_at;
        session.touch(Duration::hours(2));
        assert!(session.expires_at > before);
        assert!(!session.is_expired(Utc::now()));
    }

    #[test]
    fn expired_and_revoked_sessions_detected() {
        let mut session = Session::new("alice", "198.51.100.7", "ua", Duration::seconds(-1), false);
        assert!(session.is_expired(Utc::now()));

        session.touch(Duration::hours(1));
        assert!(!session.is_expired(Utc::now()));
        session.revoked = true;
        assert!(session.is_expired(Utc::now()));
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemorySessionStore::new();
        let session = Session::new("alice", "198.51.100.7", "ua", Duration::hours(1), false);
        let id = session.id.clone();

        store.set(session, Duration::hours(1)).await.unwrap();
        assert!(store.get(&id).await.unwrap().is_some());

        store.delete(&id).await.unwrap();
        assert!(store.get(&id).await.unwrap().is_none());

        store
            .set(
                Session::new("bob", "198.51.100.8", "ua", Duration::hours(1), false),
                Duration::hours(1),
            )
            .await
            .unwrap();
        store.clear().await.unwrap();
        assert!(store.get("anything").await.unwrap().is_none());
    }
}
