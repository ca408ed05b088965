//! gardi - adaptive authentication and threat detection.
//!
//! An embeddable security engine: managed secrets with encrypted
//! persistence, TOTP/backup-code second factors, a composite
//! threat-scoring engine, and an orchestrating [`SecurityService`] that
//! owns password hashing, token and session lifecycles, account lockout,
//! and the combined security check.
//!
//! ```no_run
//! use gardi::{SecurityConfig, SecurityService};
//! use secrecy::SecretString;
//!
//! # async fn demo() -> gardi::Result<()> {
//! let master_key = SecretString::from(std::env::var("GARDI_MASTER_KEY").unwrap_or_default());
//! let engine = SecurityService::new(SecurityConfig::default(), &master_key).await?;
//!
//! let session = engine.create_session("alice", "203.0.113.9", "Mozilla/5.0", false).await?;
//! let tokens = engine.generate_tokens("alice", &session.id)?;
//! let claims = engine.verify_token(&tokens.access_token)?;
//! assert_eq!(claims.sub, "alice");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod geoip;
pub mod redact;
pub mod secrets;
pub mod security;
pub mod session;
pub mod threat;
pub mod tokens;
pub mod twofactor;

pub use config::SecurityConfig;
pub use error::{Error, Result};
pub use geoip::{GeoIp, Location, LocationRisk, NoopGeoIp, VpnReport};
pub use secrets::{Encoding, SecretManager, SecretOptions};
pub use security::{
    NoopRateLimiter, RateLimitDecision, RateLimiter, SecurityCheck, SecurityService,
};
pub use session::{MemorySessionStore, Session, SessionStore};
pub use threat::{
    AttemptLocation, AttemptMetadata, ThreatAssessment, ThreatDetection, ThreatLevel,
    ThreatSettings,
};
pub use tokens::{Claims, TokenPair, TokenService};
pub use twofactor::{TwoFactor, TwoFactorConfig, TwoFactorMethod, TwoFactorSetup};
