//! The threat-detection scoring engine.
//!
//! Tracks login attempts and requests per identity/IP, maintains behavioral
//! and geolocation history, and computes a bounded composite risk score with
//! a block decision. All state is ephemeral and per-instance; it is
//! acceptable to lose it on restart.

pub mod behavior;
pub mod geo;

use crate::error::{Error, Result};
use behavior::BehaviorProfile;
use chrono::{DateTime, Duration, Utc};
use geo::GeoSample;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, info, instrument, warn};

const MAX_SCORE: u32 = 100;
const FAILED_LOGIN_CAP: u32 = 30;
const FAILED_LOGIN_WEIGHT: u32 = 6;
const USER_AGENT_SCORE: u32 = 20;
const REQUEST_RATE_CAP: u32 = 25;
const GEO_VELOCITY_SCORE: u32 = 15;
const BEHAVIOR_SCORE: u32 = 10;

const GEO_RETENTION_DAYS: i64 = 30;
const REQUEST_RATE_WINDOW_SECONDS: i64 = 60;

/// Tuning knobs for the engine; derived from `SecurityConfig` by the façade.
#[derive(Clone, Debug)]
pub struct ThreatSettings {
    pub attempt_window: Duration,
    pub max_login_attempts: u32,
    pub block_threshold: u8,
    pub max_requests_per_minute: u32,
    pub max_travel_speed_kmh: f64,
    pub min_travel_distance_km: f64,
    pub retention: Duration,
    pub track_requests: bool,
}

impl Default for ThreatSettings {
    fn default() -> Self {
        Self {
            attempt_window: Duration::minutes(15),
            max_login_attempts: 5,
            block_threshold: 70,
            max_requests_per_minute: 60,
            max_travel_speed_kmh: 1000.0,
            min_travel_distance_km: 100.0,
            retention: Duration::hours(24),
            track_requests: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    #[must_use]
    pub fn from_score(score: u8) -> Self {
        match score {
            80..=u8::MAX => Self::Critical,
            60..=79 => Self::High,
            40..=59 => Self::Medium,
            20..=39 => Self::Low,
            _ => Self::Minimal,
        }
    }
}

/// One contributing factor in a composite score.
#[derive(Clone, Debug, Serialize)]
pub struct ThreatFactor {
    pub factor: String,
    pub score: u8,
    pub details: String,
}

/// The superseding score record for an IP or user key.
#[derive(Clone, Debug, Serialize)]
pub struct ThreatScoreRecord {
    pub score: u8,
    pub level: ThreatLevel,
    pub factors: Vec<ThreatFactor>,
    pub timestamp: DateTime<Utc>,
}

/// Location context attached to a tracked attempt.
#[derive(Clone, Debug)]
pub struct AttemptLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub country: String,
}

/// Caller-supplied context for a tracked attempt.
#[derive(Clone, Debug, Default)]
pub struct AttemptMetadata {
    pub user_agent: Option<String>,
    pub location: Option<AttemptLocation>,
}

/// Result of tracking one login attempt.
#[derive(Clone, Debug)]
pub struct ThreatAssessment {
    pub score: u8,
    pub level: ThreatLevel,
    pub factors: Vec<ThreatFactor>,
    pub blocked: bool,
}

#[derive(Clone, Debug)]
struct LoginAttempt {
    timestamp: DateTime<Utc>,
    success: bool,
    #[allow(dead_code)]
    user_agent: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ThreatStatistics {
    pub tracked_attempt_keys: usize,
    pub scored_keys: usize,
    pub behavior_profiles: usize,
    pub geo_histories: usize,
    pub active_ip_blocks: usize,
    pub average_score: f64,
}

pub struct ThreatDetection {
    settings: ThreatSettings,
    bot_pattern: Regex,
    browser_pattern: Regex,
    attempts: RwLock<HashMap<(String, String), Vec<LoginAttempt>>>,
    scores: RwLock<HashMap<String, ThreatScoreRecord>>,
    behavior: RwLock<HashMap<String, BehaviorProfile>>,
    geo_history: RwLock<HashMap<String, Vec<GeoSample>>>,
    request_log: RwLock<HashMap<String, Vec<DateTime<Utc>>>>,
    blocked_ips: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl ThreatDetection {
    /// # Errors
    /// Returns an error if the user-agent classifier patterns fail to
    /// compile (a build defect, surfaced fail-fast).
    pub fn new(settings: ThreatSettings) -> Result<Self> {
        let bot_pattern = Regex::new(
            r"(?i)(bot|crawl|spider|scrap|curl|wget|python-requests|go-http-client|headless|phantomjs|selenium)",
        )
        .map_err(|e| Error::Config(format!("bot pattern: {e}")))?;
        let browser_pattern = Regex::new(r"^(Mozilla/|Opera/|Opera )")
            .map_err(|e| Error::Config(format!("browser pattern: {e}")))?;

        Ok(Self {
            settings,
            bot_pattern,
            browser_pattern,
            attempts: RwLock::new(HashMap::new()),
            scores: RwLock::new(HashMap::new()),
            behavior: RwLock::new(HashMap::new()),
            geo_history: RwLock::new(HashMap::new()),
            request_log: RwLock::new(HashMap::new()),
            blocked_ips: RwLock::new(HashMap::new()),
        })
    }

    /// Track one login attempt and recompute the composite score.
    ///
    /// The stored score record supersedes the previous one for both the IP
    /// and the user key; scores never accumulate across computations.
    ///
    /// # Errors
    /// Returns an error only when internal state is unusable (poisoned
    /// lock); scoring itself is total.
    #[instrument(skip(self, metadata), fields(ip = %ip, user = %user_id, success = success))]
    pub fn track_login_attempt(
        &self,
        ip: &str,
        user_id: &str,
        success: bool,
        metadata: &AttemptMetadata,
    ) -> Result<ThreatAssessment> {
        let now = Utc::now();

        self.record_request(ip, now)?;
        let requests_this_minute = self.requests_in_window(ip, now)?;

        let failed_count = {
            let mut attempts = self.attempts.write().map_err(|_| poisoned())?;
            let list = attempts
                .entry((ip.to_string(), user_id.to_string()))
                .or_default();
            list.push(LoginAttempt {
                timestamp: now,
                success,
                user_agent: metadata.user_agent.clone(),
            });
            let horizon = now - self.settings.attempt_window;
            list.retain(|attempt| attempt.timestamp >= horizon);
            list.iter().filter(|attempt| !attempt.success).count() as u32
        };
        let blocked_by_attempts = failed_count >= self.settings.max_login_attempts;

        let geo_flagged = self.update_geo_history(user_id, metadata.location.as_ref(), now)?;
        let behavior_flagged = self.update_behavior(user_id, success, now)?;

        let mut factors = Vec::new();
        let mut total: u32 = 0;

        if failed_count > 0 {
            let score = (failed_count * FAILED_LOGIN_WEIGHT).min(FAILED_LOGIN_CAP);
            total += score;
            factors.push(factor(
                "failed_logins",
                score,
                format!("{failed_count} failed attempts in window"),
            ));
        }

        if let Some(details) = self.user_agent_suspicion(metadata.user_agent.as_deref()) {
            total += USER_AGENT_SCORE;
            factors.push(factor("user_agent", USER_AGENT_SCORE, details));
        }

        let rate_score = self.request_rate_score(requests_this_minute);
        if rate_score > 0 {
            total += rate_score;
            factors.push(factor(
                "request_rate",
                rate_score,
                format!("{requests_this_minute} requests in the last minute"),
            ));
        }

        if geo_flagged {
            total += GEO_VELOCITY_SCORE;
            factors.push(factor(
                "geo_velocity",
                GEO_VELOCITY_SCORE,
                "implausible travel between recent locations".to_string(),
            ));
        }

        if behavior_flagged {
            total += BEHAVIOR_SCORE;
            factors.push(factor(
                "behavior",
                BEHAVIOR_SCORE,
                "action history deviates from baseline".to_string(),
            ));
        }

        let score = total.min(MAX_SCORE) as u8;
        let level = ThreatLevel::from_score(score);
        let record = ThreatScoreRecord {
            score,
            level,
            factors: factors.clone(),
            timestamp: now,
        };

        {
            let mut scores = self.scores.write().map_err(|_| poisoned())?;
            scores.insert(ip.to_string(), record.clone());
            scores.insert(user_id.to_string(), record);
        }

        let blocked =
            blocked_by_attempts || score >= self.settings.block_threshold || self.ip_block_active(ip, now)?;

        if blocked {
            warn!(score = score, "login attempt blocked");
        } else {
            debug!(score = score, "login attempt scored");
        }

        Ok(ThreatAssessment {
            score,
            level,
            factors,
            blocked,
        })
    }

    /// Stable interface point for generic request tracking.
    ///
    /// Disabled by deployment policy: unless `track_requests` is set, the
    /// call is a pass-through. Login attempts always feed the per-minute
    /// counter regardless.
    ///
    /// # Errors
    /// Returns an error only on unusable internal state.
    pub fn track_request(&self, ip: &str, endpoint: &str) -> Result<()> {
        if !self.settings.track_requests {
            return Ok(());
        }
        debug!(ip = %ip, endpoint = %endpoint, "request tracked");
        self.record_request(ip, Utc::now())
    }

    /// Whether the pair is currently blocked.
    ///
    /// Two independent conditions, each sufficient: the stored score meets
    /// the threshold, or the failed-attempt rule holds in the current
    /// window. A transient IP block also counts.
    ///
    /// # Errors
    /// Returns an error only on unusable internal state.
    pub fn is_blocked(&self, ip: &str, user_id: &str) -> Result<bool> {
        let now = Utc::now();

        if self.ip_block_active(ip, now)? {
            return Ok(true);
        }

        {
            let scores = self.scores.read().map_err(|_| poisoned())?;
            for key in [ip, user_id] {
                if let Some(record) = scores.get(key) {
                    if record.score >= self.settings.block_threshold {
                        return Ok(true);
                    }
                }
            }
        }

        let attempts = self.attempts.read().map_err(|_| poisoned())?;
        if let Some(list) = attempts.get(&(ip.to_string(), user_id.to_string())) {
            let horizon = now - self.settings.attempt_window;
            let failed = list
                .iter()
                .filter(|attempt| attempt.timestamp >= horizon && !attempt.success)
                .count() as u32;
            if failed >= self.settings.max_login_attempts {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Transient IP block, independent of score records.
    ///
    /// # Errors
    /// Returns an error only on unusable internal state.
    pub fn block_ip(&self, ip: &str, duration: Duration) -> Result<()> {
        let unblock_at = Utc::now() + duration;
        let mut blocked = self.blocked_ips.write().map_err(|_| poisoned())?;
        blocked.insert(ip.to_string(), unblock_at);
        info!(ip = %ip, until = %unblock_at, "ip blocked");
        Ok(())
    }

    /// The latest score record for an IP or user key.
    ///
    /// # Errors
    /// Returns an error only on unusable internal state.
    pub fn get_threat_report(&self, key: &str) -> Result<Option<ThreatScoreRecord>> {
        let scores = self.scores.read().map_err(|_| poisoned())?;
        Ok(scores.get(key).cloned())
    }

    /// Drop all tracked state for a key (IP or user).
    ///
    /// # Errors
    /// Returns an error only on unusable internal state.
    pub fn reset_threat_data(&self, key: &str) -> Result<()> {
        self.scores.write().map_err(|_| poisoned())?.remove(key);
        self.behavior.write().map_err(|_| poisoned())?.remove(key);
        self.geo_history.write().map_err(|_| poisoned())?.remove(key);
        self.request_log.write().map_err(|_| poisoned())?.remove(key);
        self.blocked_ips.write().map_err(|_| poisoned())?.remove(key);
        self.attempts
            .write()
            .map_err(|_| poisoned())?
            .retain(|(ip, user), _| ip != key && user != key);
        info!(key = %key, "threat data reset");
        Ok(())
    }

    /// Purge records older than the retention horizon. Sessions and refresh
    /// tokens are not touched here; they expire on their own `expires_at`.
    ///
    /// # Errors
    /// Returns an error only on unusable internal state.
    #[instrument(skip(self))]
    pub fn cleanup(&self) -> Result<()> {
        let now = Utc::now();
        let horizon = now - self.settings.retention;

        {
            let mut attempts = self.attempts.write().map_err(|_| poisoned())?;
            for list in attempts.values_mut() {
                list.retain(|attempt| attempt.timestamp >= horizon);
            }
            attempts.retain(|_, list| !list.is_empty());
        }
        {
            let mut scores = self.scores.write().map_err(|_| poisoned())?;
            scores.retain(|_, record| record.timestamp >= horizon);
        }
        {
            let mut behavior = self.behavior.write().map_err(|_| poisoned())?;
            for profile in behavior.values_mut() {
                profile.prune(now);
            }
            behavior.retain(|_, profile| !profile.is_empty());
        }
        {
            let geo_horizon = now - Duration::days(GEO_RETENTION_DAYS);
            let mut geo = self.geo_history.write().map_err(|_| poisoned())?;
            for history in geo.values_mut() {
                history.retain(|sample| sample.timestamp >= geo_horizon);
            }
            geo.retain(|_, history| !history.is_empty());
        }
        {
            let mut requests = self.request_log.write().map_err(|_| poisoned())?;
            let rate_horizon = now - Duration::seconds(REQUEST_RATE_WINDOW_SECONDS);
            for log in requests.values_mut() {
                log.retain(|stamp| *stamp >= rate_horizon);
            }
            requests.retain(|_, log| !log.is_empty());
        }
        {
            let mut blocked = self.blocked_ips.write().map_err(|_| poisoned())?;
            blocked.retain(|_, unblock_at| *unblock_at > now);
        }

        debug!("threat data cleanup complete");
        Ok(())
    }

    /// # Errors
    /// Returns an error only on unusable internal state.
    #[allow(clippy::cast_precision_loss)]
    pub fn statistics(&self) -> Result<ThreatStatistics> {
        let scores = self.scores.read().map_err(|_| poisoned())?;
        let average_score = if scores.is_empty() {
            0.0
        } else {
            scores.values().map(|r| f64::from(r.score)).sum::<f64>() / scores.len() as f64
        };
        let now = Utc::now();

        Ok(ThreatStatistics {
            tracked_attempt_keys: self.attempts.read().map_err(|_| poisoned())?.len(),
            scored_keys: scores.len(),
            behavior_profiles: self.behavior.read().map_err(|_| poisoned())?.len(),
            geo_histories: self.geo_history.read().map_err(|_| poisoned())?.len(),
            active_ip_blocks: self
                .blocked_ips
                .read()
                .map_err(|_| poisoned())?
                .values()
                .filter(|unblock_at| **unblock_at > now)
                .count(),
            average_score,
        })
    }

    fn record_request(&self, ip: &str, now: DateTime<Utc>) -> Result<()> {
        let mut requests = self.request_log.write().map_err(|_| poisoned())?;
        let log = requests.entry(ip.to_string()).or_default();
        log.push(now);
        let horizon = now - Duration::seconds(REQUEST_RATE_WINDOW_SECONDS);
        log.retain(|stamp| *stamp >= horizon);
        Ok(())
    }

    fn requests_in_window(&self, ip: &str, now: DateTime<Utc>) -> Result<u32> {
        let requests = self.request_log.read().map_err(|_| poisoned())?;
        let horizon = now - Duration::seconds(REQUEST_RATE_WINDOW_SECONDS);
        Ok(requests
            .get(ip)
            .map(|log| log.iter().filter(|stamp| **stamp >= horizon).count() as u32)
            .unwrap_or(0))
    }

    fn ip_block_active(&self, ip: &str, now: DateTime<Utc>) -> Result<bool> {
        let blocked = self.blocked_ips.read().map_err(|_| poisoned())?;
        Ok(blocked
            .get(ip)
            .is_some_and(|unblock_at| *unblock_at > now))
    }

    /// Update geo history and evaluate the velocity rules.
    fn update_geo_history(
        &self,
        user_id: &str,
        location: Option<&AttemptLocation>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(location) = location else {
            return Ok(false);
        };

        let mut geo = self.geo_history.write().map_err(|_| poisoned())?;
        let history = geo.entry(user_id.to_string()).or_default();

        let sample = GeoSample {
            latitude: location.latitude,
            longitude: location.longitude,
            country: location.country.clone(),
            timestamp: now,
        };

        let impossible = history.last().is_some_and(|previous| {
            geo::is_impossible_travel(
                previous,
                &sample,
                self.settings.max_travel_speed_kmh,
                self.settings.min_travel_distance_km,
            )
        });

        history.push(sample);
        let horizon = now - Duration::days(GEO_RETENTION_DAYS);
        history.retain(|entry| entry.timestamp >= horizon);

        Ok(impossible || geo::country_hopping(history))
    }

    fn update_behavior(&self, user_id: &str, success: bool, now: DateTime<Utc>) -> Result<bool> {
        let mut behavior = self.behavior.write().map_err(|_| poisoned())?;
        let profile = behavior.entry(user_id.to_string()).or_default();
        let action = if success { "login_success" } else { "login_failed" };
        profile.record(action, HashMap::new(), now);
        Ok(profile.is_anomalous())
    }

    fn user_agent_suspicion(&self, user_agent: Option<&str>) -> Option<String> {
        let Some(agent) = user_agent else {
            return Some("user agent missing".to_string());
        };
        if self.bot_pattern.is_match(agent) {
            return Some("matches bot/scraper pattern".to_string());
        }
        let length = agent.chars().count();
        if (length < 10 || length > 500) && !self.browser_pattern.is_match(agent) {
            return Some(format!("implausible user agent length {length}"));
        }
        None
    }

    fn request_rate_score(&self, requests_this_minute: u32) -> u32 {
        let ratio = f64::from(requests_this_minute) / f64::from(self.settings.max_requests_per_minute);
        let scaled = (ratio * f64::from(REQUEST_RATE_CAP)).floor();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        (scaled as u32).min(REQUEST_RATE_CAP)
    }
}

fn factor(name: &str, score: u32, details: String) -> ThreatFactor {
    ThreatFactor {
        factor: name.to_string(),
        score: score.min(MAX_SCORE) as u8,
        details,
    }
}

fn poisoned() -> Error {
    Error::Internal("threat state lock poisoned".to_string())
}
