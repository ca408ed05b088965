//! The orchestrating façade: password hashing, token and session
//! lifecycles, identifier-keyed lockout, the 2FA surface, and the combined
//! security check.
//!
//! The façade never writes the threat engine's internal maps directly; all
//! mutations go through its public methods.

use crate::config::SecurityConfig;
use crate::error::{Error, Result};
use crate::geoip::{is_private_ip, GeoIp, NoopGeoIp};
use crate::redact::redact;
use crate::secrets::{Encoding, SecretManager, SecretOptions};
use crate::session::{MemorySessionStore, Session, SessionStore};
use crate::threat::{
    AttemptMetadata, ThreatAssessment, ThreatDetection, ThreatScoreRecord, ThreatSettings,
    ThreatStatistics,
};
use crate::tokens::{Claims, TokenPair, TokenService};
use crate::twofactor::{
    TwoFactor, TwoFactorConfig, TwoFactorMethod, TwoFactorOutcome, TwoFactorSetup, TwoFactorStatus,
};
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{error, info, instrument, warn};

const SIGNING_SECRET_NAME: &str = "token_signing";
const PEPPER_SECRET_NAME: &str = "backup_code_pepper";

const LOCATION_WEIGHT: f64 = 0.3;
const THREAT_WEIGHT: f64 = 0.4;
const VPN_WEIGHT: f64 = 0.2;
const RATE_LIMIT_PENALTY: f64 = 20.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

/// The generic rate limiter is a separate component, consumed here only as
/// a signal; the default implementation is intentionally disabled.
pub trait RateLimiter: Send + Sync {
    fn check(&self, ip: &str, identifier: Option<&str>) -> RateLimitDecision;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check(&self, _ip: &str, _identifier: Option<&str>) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}

/// One weighted contribution to the combined check, kept for auditability.
#[derive(Clone, Debug, Serialize)]
pub struct SecurityFactor {
    pub factor: String,
    pub value: f64,
    pub weight: f64,
    pub contribution: f64,
}

/// Outcome of [`SecurityService::perform_security_check`].
#[derive(Clone, Debug, Serialize)]
pub struct SecurityCheck {
    pub allowed: bool,
    pub score: f64,
    pub factors: Vec<SecurityFactor>,
    pub rate_limited: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct SecurityStatistics {
    pub threat: ThreatStatistics,
    pub locked_identifiers: usize,
    pub active_refresh_tokens: usize,
    pub two_factor_enrollments: usize,
}

#[derive(Clone, Debug)]
struct LockoutEntry {
    failures: u32,
    locked_until: Option<DateTime<Utc>>,
}

pub struct SecurityService {
    config: SecurityConfig,
    secrets: SecretManager,
    two_factor: TwoFactor,
    threat: Arc<ThreatDetection>,
    tokens: TokenService,
    sessions: Arc<dyn SessionStore>,
    geoip: Arc<dyn GeoIp>,
    rate_limiter: Arc<dyn RateLimiter>,
    lockouts: RwLock<HashMap<String, LockoutEntry>>,
    two_factor_configs: RwLock<HashMap<String, TwoFactorConfig>>,
}

impl SecurityService {
    /// Build the engine with in-memory sessions and no-op collaborators.
    ///
    /// # Errors
    /// Fails fast on invalid configuration, a missing/short master key, or
    /// an unreadable secret store.
    pub async fn new(config: SecurityConfig, master_key: &SecretString) -> Result<Self> {
        Self::with_collaborators(
            config,
            master_key,
            Arc::new(MemorySessionStore::new()),
            Arc::new(NoopGeoIp),
            Arc::new(NoopRateLimiter),
        )
        .await
    }

    /// Build the engine with injected collaborators.
    ///
    /// # Errors
    /// Fails fast on invalid configuration, a missing/short master key, or
    /// an unreadable secret store.
    pub async fn with_collaborators(
        config: SecurityConfig,
        master_key: &SecretString,
        sessions: Arc<dyn SessionStore>,
        geoip: Arc<dyn GeoIp>,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> Result<Self> {
        config.validate()?;

        let secrets = SecretManager::new(
            master_key,
            config.secret_min_length(),
            config.secrets_path().cloned(),
        )?;
        secrets.load().await?;

        let persist = config.secrets_path().is_some();
        let signing_key = secrets
            .get(
                SIGNING_SECRET_NAME,
                SecretOptions {
                    length: 32,
                    encoding: Encoding::Hex,
                    persistent: persist,
                    regenerate: false,
                },
            )
            .await?;
        let pepper = secrets
            .get(
                PEPPER_SECRET_NAME,
                SecretOptions {
                    length: 32,
                    encoding: Encoding::Hex,
                    persistent: persist,
                    regenerate: false,
                },
            )
            .await?;

        let tokens = TokenService::new(
            signing_key.as_bytes(),
            config.token_issuer().to_string(),
            config.access_token_ttl_seconds(),
            config.refresh_token_ttl_seconds(),
        );

        let two_factor = TwoFactor::new(
            config.token_issuer().to_string(),
            pepper.into_bytes(),
            config.backup_code_count(),
        );

        let threat = Arc::new(ThreatDetection::new(ThreatSettings {
            attempt_window: config.attempt_window(),
            max_login_attempts: config.max_login_attempts(),
            block_threshold: config.block_threshold(),
            max_requests_per_minute: config.max_requests_per_minute(),
            max_travel_speed_kmh: config.max_travel_speed_kmh(),
            min_travel_distance_km: config.min_travel_distance_km(),
            retention: chrono::Duration::from_std(config.cleanup_retention())
                .map_err(|e| Error::Config(format!("retention: {e}")))?,
            track_requests: config.track_requests(),
        })?);

        info!("security engine initialized");

        Ok(Self {
            config,
            secrets,
            two_factor,
            threat,
            tokens,
            sessions,
            geoip,
            rate_limiter,
            lockouts: RwLock::new(HashMap::new()),
            two_factor_configs: RwLock::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn threat(&self) -> &Arc<ThreatDetection> {
        &self.threat
    }

    #[must_use]
    pub fn secrets(&self) -> &SecretManager {
        &self.secrets
    }

    // --- Passwords ---

    /// # Errors
    /// Returns an error if hashing fails.
    pub fn hash_password(&self, password: &str) -> Result<String> {
        bcrypt::hash(password, self.config.bcrypt_cost())
            .map_err(|e| Error::Crypto(format!("password hashing failed: {e}")))
    }

    /// Constant-time-equivalent verification.
    ///
    /// # Errors
    /// Returns an error for a malformed stored hash.
    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool> {
        bcrypt::verify(password, hash)
            .map_err(|e| Error::Crypto(format!("password verification failed: {e}")))
    }

    // --- Tokens ---

    /// # Errors
    /// See [`TokenService::generate`].
    pub fn generate_tokens(&self, user_id: &str, session_id: &str) -> Result<TokenPair> {
        self.tokens.generate(user_id, session_id)
    }

    /// # Errors
    /// See [`TokenService::verify_access`].
    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        self.tokens.verify_access(token)
    }

    /// # Errors
    /// See [`TokenService::refresh`].
    pub fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenPair> {
        self.tokens.refresh(refresh_token)
    }

    /// # Errors
    /// Returns an error only on unusable internal state.
    pub fn revoke_refresh_token(&self, refresh_token: &str) -> Result<bool> {
        self.tokens.revoke(refresh_token)
    }

    // --- Sessions ---

    /// # Errors
    /// Propagates store write failures; a session that was never stored
    /// must not be handed out.
    #[instrument(skip(self, user_agent))]
    pub async fn create_session(
        &self,
        user_id: &str,
        ip: &str,
        user_agent: &str,
        persistent: bool,
    ) -> Result<Session> {
        let ttl = chrono::Duration::seconds(self.config.session_ttl_seconds());
        let session = Session::new(user_id, ip, user_agent, ttl, persistent);
        self.sessions.set(session.clone(), ttl).await?;
        info!(user = %user_id, session = %redact(&session.id), "session created");
        Ok(session)
    }

    /// Read a session, enforcing lazy expiry and sliding expiration.
    ///
    /// Store read failures degrade to a cache miss: read paths favor
    /// availability over strict consistency.
    ///
    /// # Errors
    /// Never fails on store errors; the error is logged instead.
    pub async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let session = match self.sessions.get(id).await {
            Ok(found) => found,
            Err(err) => {
                error!("session read failed, degrading to miss: {err}");
                return Ok(None);
            }
        };

        let Some(mut session) = session else {
            return Ok(None);
        };

        if session.is_expired(Utc::now()) {
            if let Err(err) = self.sessions.delete(id).await {
                warn!("failed to delete expired session: {err}");
            }
            return Ok(None);
        }

        let ttl = chrono::Duration::seconds(self.config.session_ttl_seconds());
        session.touch(ttl);
        if let Err(err) = self.sessions.set(session.clone(), ttl).await {
            warn!("failed to extend session activity: {err}");
        }

        Ok(Some(session))
    }

    /// # Errors
    /// Propagates store delete failures.
    pub async fn destroy_session(&self, id: &str) -> Result<()> {
        self.sessions.delete(id).await?;
        info!(session = %redact(id), "session destroyed");
        Ok(())
    }

    // --- Identifier-keyed lockout ---

    /// Record a login outcome for the identifier-keyed lockout.
    ///
    /// Success clears only this lock; the IP-keyed threat score is cleared
    /// separately (or not at all) — the two defenses stay independent.
    ///
    /// # Errors
    /// Returns an error only on unusable internal state.
    pub fn record_login_attempt(&self, identifier: &str, success: bool) -> Result<()> {
        let mut lockouts = self.lockouts.write().map_err(|_| poisoned())?;
        if success {
            lockouts.remove(identifier);
            return Ok(());
        }

        let entry = lockouts.entry(identifier.to_string()).or_insert(LockoutEntry {
            failures: 0,
            locked_until: None,
        });
        entry.failures += 1;
        if entry.failures >= self.config.max_login_attempts() && entry.locked_until.is_none() {
            entry.locked_until = Some(Utc::now() + self.config.lockout_duration());
            warn!(identifier = %redact(identifier), "identifier locked out");
        }
        Ok(())
    }

    /// # Errors
    /// Returns an error only on unusable internal state.
    pub fn is_account_locked(&self, identifier: &str) -> Result<bool> {
        let now = Utc::now();
        let mut lockouts = self.lockouts.write().map_err(|_| poisoned())?;
        match lockouts.get(identifier) {
            Some(entry) => match entry.locked_until {
                Some(until) if until > now => Ok(true),
                Some(_) => {
                    // Lock elapsed: lazily clear the whole entry.
                    lockouts.remove(identifier);
                    Ok(false)
                }
                None => Ok(false),
            },
            None => Ok(false),
        }
    }

    /// # Errors
    /// Returns an error only on unusable internal state.
    pub fn reset_login_attempts(&self, identifier: &str) -> Result<()> {
        self.lockouts
            .write()
            .map_err(|_| poisoned())?
            .remove(identifier);
        Ok(())
    }

    // --- Threat detection surface ---

    /// # Errors
    /// See [`ThreatDetection::track_login_attempt`].
    pub fn track_login_attempt(
        &self,
        ip: &str,
        user_id: &str,
        success: bool,
        metadata: &AttemptMetadata,
    ) -> Result<ThreatAssessment> {
        self.threat.track_login_attempt(ip, user_id, success, metadata)
    }

    /// # Errors
    /// See [`ThreatDetection::is_blocked`].
    pub fn is_blocked_by_threat_detection(&self, ip: &str, user_id: &str) -> Result<bool> {
        self.threat.is_blocked(ip, user_id)
    }

    /// # Errors
    /// See [`ThreatDetection::get_threat_report`].
    pub fn get_threat_report(&self, key: &str) -> Result<Option<ThreatScoreRecord>> {
        self.threat.get_threat_report(key)
    }

    /// # Errors
    /// See [`ThreatDetection::reset_threat_data`].
    pub fn reset_threat_data(&self, key: &str) -> Result<()> {
        self.threat.reset_threat_data(key)
    }

    // --- Two-factor surface ---

    /// Begin 2FA enrollment. The returned setup carries the plaintext
    /// backup codes and QR rendering exactly once; the retained config
    /// keeps only hashes.
    ///
    /// # Errors
    /// See [`TwoFactor::setup`].
    pub fn setup_2fa(&self, identifier: &str) -> Result<TwoFactorSetup> {
        let setup = self.two_factor.setup(identifier)?;
        self.two_factor_configs
            .write()
            .map_err(|_| poisoned())?
            .insert(identifier.to_string(), setup.config.clone());
        Ok(setup)
    }

    /// # Errors
    /// `Error::TwoFactorNotEnrolled` when no enrollment is pending.
    pub fn verify_2fa_setup(&self, identifier: &str, code: &str) -> Result<bool> {
        let mut configs = self.two_factor_configs.write().map_err(|_| poisoned())?;
        let config = configs
            .get_mut(identifier)
            .ok_or(Error::TwoFactorNotEnrolled)?;
        self.two_factor.verify_setup(config, code)
    }

    /// # Errors
    /// `Error::TwoFactorNotEnrolled` when the identifier never enrolled;
    /// `Error::TwoFactorNotVerified` when enrollment was never confirmed.
    pub fn authenticate_2fa(
        &self,
        identifier: &str,
        code: &str,
        method: Option<TwoFactorMethod>,
    ) -> Result<TwoFactorOutcome> {
        let mut configs = self.two_factor_configs.write().map_err(|_| poisoned())?;
        let config = configs
            .get_mut(identifier)
            .ok_or(Error::TwoFactorNotEnrolled)?;
        let outcome = self.two_factor.authenticate(config, code, method)?;
        if outcome.method == Some(TwoFactorMethod::BackupCode) {
            warn!(identifier = %redact(identifier), "backup code spent");
        }
        Ok(outcome)
    }

    /// # Errors
    /// `Error::TwoFactorNotEnrolled` when the identifier never enrolled.
    pub fn regenerate_2fa_backup_codes(&self, identifier: &str) -> Result<Vec<String>> {
        let mut configs = self.two_factor_configs.write().map_err(|_| poisoned())?;
        let config = configs
            .get_mut(identifier)
            .ok_or(Error::TwoFactorNotEnrolled)?;
        self.two_factor.regenerate_backup_codes(config)
    }

    /// # Errors
    /// Returns an error only on unusable internal state.
    pub fn disable_2fa(&self, identifier: &str) -> Result<bool> {
        Ok(self
            .two_factor_configs
            .write()
            .map_err(|_| poisoned())?
            .remove(identifier)
            .is_some())
    }

    /// # Errors
    /// Returns an error only on unusable internal state.
    pub fn two_factor_status(&self, identifier: &str) -> Result<TwoFactorStatus> {
        let configs = self.two_factor_configs.read().map_err(|_| poisoned())?;
        Ok(configs.get(identifier).map_or(
            TwoFactorStatus {
                enabled: false,
                verified: false,
                backup_codes_remaining: 0,
            },
            |config| TwoFactor::status(config),
        ))
    }

    // --- Combined check ---

    /// The aggregation point: location risk, threat score, VPN confidence,
    /// and the rate-limit signal combined into one clamped [0,100] score.
    ///
    /// # Errors
    /// Returns an error only on unusable internal state; missing location
    /// data contributes zero rather than failing the check.
    #[instrument(skip(self))]
    pub async fn perform_security_check(&self, ip: &str, user_id: &str) -> Result<SecurityCheck> {
        let location = if is_private_ip(ip) {
            None
        } else {
            self.geoip.location_from_ip(ip).await
        };

        let location_risk = match location.as_ref() {
            Some(location) => self.geoip.assess_location_risk(location).await.risk_score,
            None => 0.0,
        };
        let vpn = self.geoip.detect_vpn(ip, location.as_ref()).await;

        let threat_score = {
            let ip_score = self
                .threat
                .get_threat_report(ip)?
                .map_or(0.0, |record| f64::from(record.score));
            let user_score = self
                .threat
                .get_threat_report(user_id)?
                .map_or(0.0, |record| f64::from(record.score));
            ip_score.max(user_score)
        };

        let rate_limited =
            self.rate_limiter.check(ip, Some(user_id)) == RateLimitDecision::Limited;

        let mut factors = Vec::new();
        let mut score = 0.0;

        for (name, value, weight) in [
            ("location_risk", location_risk, LOCATION_WEIGHT),
            ("threat_score", threat_score, THREAT_WEIGHT),
            ("vpn_confidence", vpn.confidence * 100.0, VPN_WEIGHT),
        ] {
            let contribution = value * weight;
            score += contribution;
            factors.push(SecurityFactor {
                factor: name.to_string(),
                value,
                weight,
                contribution,
            });
        }

        if rate_limited {
            score += RATE_LIMIT_PENALTY;
            factors.push(SecurityFactor {
                factor: "rate_limited".to_string(),
                value: 1.0,
                weight: RATE_LIMIT_PENALTY,
                contribution: RATE_LIMIT_PENALTY,
            });
        }

        let score = score.clamp(0.0, 100.0);
        let allowed = score < f64::from(self.config.block_threshold());

        if !allowed {
            warn!(score = score, "security check blocked");
        }

        Ok(SecurityCheck {
            allowed,
            score,
            factors,
            rate_limited,
        })
    }

    /// Guard a login attempt before any credential work.
    ///
    /// # Errors
    /// `Error::AccountLocked` when the identifier lockout is active;
    /// `Error::ThreatBlocked` when threat detection blocks the pair.
    pub fn check_login_allowed(&self, identifier: &str, ip: &str) -> Result<()> {
        if self.is_account_locked(identifier)? {
            return Err(Error::AccountLocked);
        }
        if self.threat.is_blocked(ip, identifier)? {
            return Err(Error::ThreatBlocked);
        }
        Ok(())
    }

    /// One combined sweep: stale threat data and expired token records.
    /// Sessions expire lazily on read and are not touched here.
    ///
    /// # Errors
    /// Returns an error only on unusable internal state.
    pub fn cleanup(&self) -> Result<()> {
        self.threat.cleanup()?;
        self.tokens.cleanup()
    }

    /// Spawn the periodic cleanup sweep over the whole engine. Abort the
    /// returned handle on shutdown.
    #[must_use]
    pub fn spawn_cleanup(
        self: &Arc<Self>,
        every: std::time::Duration,
    ) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(err) = engine.cleanup() {
                    warn!("cleanup sweep failed: {err}");
                }
            }
        })
    }

    /// # Errors
    /// Returns an error only on unusable internal state.
    pub fn get_security_statistics(&self) -> Result<SecurityStatistics> {
        let now = Utc::now();
        let locked_identifiers = self
            .lockouts
            .read()
            .map_err(|_| poisoned())?
            .values()
            .filter(|entry| entry.locked_until.is_some_and(|until| until > now))
            .count();

        Ok(SecurityStatistics {
            threat: self.threat.statistics()?,
            locked_identifiers,
            active_refresh_tokens: self.tokens.active_refresh_tokens()?,
            two_factor_enrollments: self
                .two_factor_configs
                .read()
                .map_err(|_| poisoned())?
                .len(),
        })
    }
}

fn poisoned() -> Error {
    Error::Internal("security state lock poisoned".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::geoip::{Location, LocationRisk, VpnReport};
    use async_trait::async_trait;

    fn master_key() -> SecretString {
        SecretString::from("unit-test-master-key-material")
    }

    async fn service() -> SecurityService {
        SecurityService::new(SecurityConfig::default(), &master_key())
            .await
            .unwrap()
    }

    struct RiskyGeoIp;

    #[async_trait]
    impl GeoIp for RiskyGeoIp {
        async fn location_from_ip(&self, _ip: &str) -> Option<Location> {
            Some(Location {
                country: "XX".to_string(),
                city: "Nowhere".to_string(),
                latitude: 0.0,
                longitude: 0.0,
                accuracy: 50.0,
            })
        }

        async fn detect_vpn(&self, _ip: &str, _location: Option<&Location>) -> VpnReport {
            VpnReport {
                is_vpn: true,
                confidence: 0.9,
                indicators: vec!["hosting-provider".to_string()],
            }
        }

        async fn assess_location_risk(&self, _location: &Location) -> LocationRisk {
            LocationRisk {
                risk_score: 90.0,
                risk_level: "high".to_string(),
                risks: vec!["sanctioned-region".to_string()],
            }
        }
    }

    struct AlwaysLimited;

    impl RateLimiter for AlwaysLimited {
        fn check(&self, _ip: &str, _identifier: Option<&str>) -> RateLimitDecision {
            RateLimitDecision::Limited
        }
    }

    #[tokio::test]
    async fn password_round_trip() {
        let service = service().await;
        let hash = service.hash_password("correct horse battery staple").unwrap();
        assert!(service
            .verify_password("correct horse battery staple", &hash)
            .unwrap());
        assert!(!service.verify_password("wrong", &hash).unwrap());
    }

    #[tokio::test]
    async fn weak_config_fails_at_startup() {
        let config = SecurityConfig::default().with_bcrypt_cost(8);
        let result = SecurityService::new(config, &master_key()).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn short_master_key_fails_at_startup() {
        let result =
            SecurityService::new(SecurityConfig::default(), &SecretString::from("short")).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn lockout_engages_after_max_failures() {
        let service = service().await;
        for _ in 0..5 {
            service.record_login_attempt("alice", false).unwrap();
        }
        assert!(service.is_account_locked("alice").unwrap());

        service.reset_login_attempts("alice").unwrap();
        assert!(!service.is_account_locked("alice").unwrap());
    }

    #[tokio::test]
    async fn success_clears_identifier_lock_only() {
        let service = service().await;
        for _ in 0..4 {
            service.record_login_attempt("alice", false).unwrap();
        }
        service.record_login_attempt("alice", true).unwrap();
        assert!(!service.is_account_locked("alice").unwrap());
    }

    #[tokio::test]
    async fn lockout_expires_lazily() {
        let config = SecurityConfig::default().with_lockout_seconds(1);
        // A 1-second lockout cannot be awaited out in a unit test without
        // sleeping; assert the locked state only.
        let service = SecurityService::new(config, &master_key()).await.unwrap();
        for _ in 0..5 {
            service.record_login_attempt("alice", false).unwrap();
        }
        assert!(service.is_account_locked("alice").unwrap());
    }

    #[tokio::test]
    async fn login_guard_reports_lock_and_block() {
        let service = service().await;
        assert!(service.check_login_allowed("alice", "198.51.100.7").is_ok());

        for _ in 0..5 {
            service.record_login_attempt("alice", false).unwrap();
        }
        assert!(matches!(
            service.check_login_allowed("alice", "198.51.100.7"),
            Err(Error::AccountLocked)
        ));

        service.reset_login_attempts("alice").unwrap();
        let metadata = AttemptMetadata {
            user_agent: Some("curl/8.0".to_string()),
            location: None,
        };
        for _ in 0..5 {
            service
                .track_login_attempt("203.0.113.9", "alice", false, &metadata)
                .unwrap();
        }
        assert!(matches!(
            service.check_login_allowed("alice", "203.0.113.9"),
            Err(Error::ThreatBlocked)
        ));
    }

    #[tokio::test]
    async fn security_check_with_noop_collaborators_allows() {
        let service = service().await;
        let check = service
            .perform_security_check("198.51.100.7", "alice")
            .await
            .unwrap();
        assert!(check.allowed);
        assert!(check.score < f64::EPSILON);
        assert!(!check.rate_limited);
    }

    #[tokio::test]
    async fn security_check_combines_weighted_factors() {
        let service = SecurityService::with_collaborators(
            SecurityConfig::default(),
            &master_key(),
            Arc::new(MemorySessionStore::new()),
            Arc::new(RiskyGeoIp),
            Arc::new(AlwaysLimited),
        )
        .await
        .unwrap();

        let check = service
            .perform_security_check("203.0.113.9", "mallory")
            .await
            .unwrap();
        // 0.3*90 + 0.4*0 + 0.2*90 + 20 = 65
        assert!((check.score - 65.0).abs() < 1e-9);
        assert!(check.allowed);
        assert!(check.rate_limited);
        assert_eq!(check.factors.len(), 4);

        // Pile threat score on top and the check crosses the threshold.
        let metadata = AttemptMetadata {
            user_agent: Some("curl/8.0".to_string()),
            location: None,
        };
        for _ in 0..6 {
            service
                .track_login_attempt("203.0.113.9", "mallory", false, &metadata)
                .unwrap();
        }
        let check = service
            .perform_security_check("203.0.113.9", "mallory")
            .await
            .unwrap();
        assert!(!check.allowed);
        assert!(check.score >= 70.0);
    }

    #[tokio::test]
    async fn private_ips_skip_location_lookup() {
        let service = SecurityService::with_collaborators(
            SecurityConfig::default(),
            &master_key(),
            Arc::new(MemorySessionStore::new()),
            Arc::new(RiskyGeoIp),
            Arc::new(NoopRateLimiter),
        )
        .await
        .unwrap();

        let check = service
            .perform_security_check("192.168.1.10", "alice")
            .await
            .unwrap();
        let location = check
            .factors
            .iter()
            .find(|f| f.factor == "location_risk")
            .unwrap();
        assert!(location.value < f64::EPSILON);
    }

    #[tokio::test]
    async fn statistics_reflect_engine_state() {
        let service = service().await;
        for _ in 0..5 {
            service.record_login_attempt("alice", false).unwrap();
        }
        let session = service
            .create_session("alice", "198.51.100.7", "ua", false)
            .await
            .unwrap();
        service.generate_tokens("alice", &session.id).unwrap();
        service.setup_2fa("alice").unwrap();

        let stats = service.get_security_statistics().unwrap();
        assert_eq!(stats.locked_identifiers, 1);
        assert_eq!(stats.active_refresh_tokens, 1);
        assert_eq!(stats.two_factor_enrollments, 1);
    }
}
