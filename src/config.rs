//! Engine configuration with fail-fast validation.

use crate::error::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_BCRYPT_COST: u32 = 12;
const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_SESSION_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_MAX_LOGIN_ATTEMPTS: u32 = 5;
const DEFAULT_ATTEMPT_WINDOW_SECONDS: i64 = 15 * 60;
const DEFAULT_LOCKOUT_SECONDS: i64 = 30 * 60;
const DEFAULT_BLOCK_THRESHOLD: u8 = 70;
const DEFAULT_MAX_REQUESTS_PER_MINUTE: u32 = 60;
const DEFAULT_MAX_TRAVEL_SPEED_KMH: f64 = 1000.0;
const DEFAULT_MIN_TRAVEL_DISTANCE_KM: f64 = 100.0;
const DEFAULT_SECRET_MIN_LENGTH: usize = 32;
const DEFAULT_BACKUP_CODE_COUNT: usize = 10;
const DEFAULT_TOKEN_ISSUER: &str = "gardi";

#[derive(Clone, Debug)]
pub struct SecurityConfig {
    bcrypt_cost: u32,
    access_token_ttl_seconds: i64,
    refresh_token_ttl_seconds: i64,
    session_ttl_seconds: i64,
    max_login_attempts: u32,
    attempt_window_seconds: i64,
    lockout_seconds: i64,
    block_threshold: u8,
    max_requests_per_minute: u32,
    max_travel_speed_kmh: f64,
    min_travel_distance_km: f64,
    secret_min_length: usize,
    secrets_path: Option<PathBuf>,
    backup_code_count: usize,
    token_issuer: String,
    track_requests: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            bcrypt_cost: DEFAULT_BCRYPT_COST,
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            refresh_token_ttl_seconds: DEFAULT_REFRESH_TOKEN_TTL_SECONDS,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            max_login_attempts: DEFAULT_MAX_LOGIN_ATTEMPTS,
            attempt_window_seconds: DEFAULT_ATTEMPT_WINDOW_SECONDS,
            lockout_seconds: DEFAULT_LOCKOUT_SECONDS,
            block_threshold: DEFAULT_BLOCK_THRESHOLD,
            max_requests_per_minute: DEFAULT_MAX_REQUESTS_PER_MINUTE,
            max_travel_speed_kmh: DEFAULT_MAX_TRAVEL_SPEED_KMH,
            min_travel_distance_km: DEFAULT_MIN_TRAVEL_DISTANCE_KM,
            secret_min_length: DEFAULT_SECRET_MIN_LENGTH,
            secrets_path: None,
            backup_code_count: DEFAULT_BACKUP_CODE_COUNT,
            token_issuer: DEFAULT_TOKEN_ISSUER.to_string(),
            track_requests: false,
        }
    }
}

impl SecurityConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_max_login_attempts(mut self, attempts: u32) -> Self {
        self.max_login_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_attempt_window_seconds(mut self, seconds: i64) -> Self {
        self.attempt_window_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_lockout_seconds(mut self, seconds: i64) -> Self {
        self.lockout_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_block_threshold(mut self, threshold: u8) -> Self {
        self.block_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_max_requests_per_minute(mut self, max: u32) -> Self {
        self.max_requests_per_minute = max;
        self
    }

    #[must_use]
    pub fn with_max_travel_speed_kmh(mut self, kmh: f64) -> Self {
        self.max_travel_speed_kmh = kmh;
        self
    }

    #[must_use]
    pub fn with_min_travel_distance_km(mut self, km: f64) -> Self {
        self.min_travel_distance_km = km;
        self
    }

    #[must_use]
    pub fn with_secret_min_length(mut self, length: usize) -> Self {
        self.secret_min_length = length;
        self
    }

    #[must_use]
    pub fn with_secrets_path(mut self, path: PathBuf) -> Self {
        self.secrets_path = Some(path);
        self
    }

    #[must_use]
    pub fn with_backup_code_count(mut self, count: usize) -> Self {
        self.backup_code_count = count;
        self
    }

    #[must_use]
    pub fn with_token_issuer(mut self, issuer: String) -> Self {
        self.token_issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_track_requests(mut self, enabled: bool) -> Self {
        self.track_requests = enabled;
        self
    }

    /// Validate the configuration before the engine starts.
    ///
    /// # Errors
    /// Returns `Error::Config` for any out-of-range value; the engine never
    /// silently downgrades a bad setting.
    pub fn validate(&self) -> Result<()> {
        if !(10..=15).contains(&self.bcrypt_cost) {
            return Err(Error::Config(format!(
                "bcrypt cost must be within 10..=15, got {}",
                self.bcrypt_cost
            )));
        }
        if self.access_token_ttl_seconds <= 0 || self.refresh_token_ttl_seconds <= 0 {
            return Err(Error::Config("token ttls must be positive".to_string()));
        }
        if self.refresh_token_ttl_seconds <= self.access_token_ttl_seconds {
            return Err(Error::Config(
                "refresh token ttl must outlive the access token ttl".to_string(),
            ));
        }
        if self.session_ttl_seconds <= 0 {
            return Err(Error::Config("session ttl must be positive".to_string()));
        }
        if self.max_login_attempts == 0 {
            return Err(Error::Config(
                "max login attempts must be at least 1".to_string(),
            ));
        }
        if self.attempt_window_seconds <= 0 || self.lockout_seconds <= 0 {
            return Err(Error::Config(
                "attempt window and lockout duration must be positive".to_string(),
            ));
        }
        if self.block_threshold > 100 {
            return Err(Error::Config(
                "block threshold must be within 0..=100".to_string(),
            ));
        }
        if self.max_requests_per_minute == 0 {
            return Err(Error::Config(
                "max requests per minute must be at least 1".to_string(),
            ));
        }
        if self.max_travel_speed_kmh <= 0.0 || self.min_travel_distance_km < 0.0 {
            return Err(Error::Config(
                "travel speed must be positive and distance floor non-negative".to_string(),
            ));
        }
        if self.secret_min_length < 16 {
            return Err(Error::Config(
                "secret minimum length must be at least 16".to_string(),
            ));
        }
        if self.backup_code_count == 0 {
            return Err(Error::Config(
                "backup code count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn bcrypt_cost(&self) -> u32 {
        self.bcrypt_cost
    }

    #[must_use]
    pub fn access_token_ttl_seconds(&self) -> i64 {
        self.access_token_ttl_seconds
    }

    #[must_use]
    pub fn refresh_token_ttl_seconds(&self) -> i64 {
        self.refresh_token_ttl_seconds
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn max_login_attempts(&self) -> u32 {
        self.max_login_attempts
    }

    #[must_use]
    pub fn attempt_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.attempt_window_seconds)
    }

    #[must_use]
    pub fn lockout_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lockout_seconds)
    }

    #[must_use]
    pub fn block_threshold(&self) -> u8 {
        self.block_threshold
    }

    #[must_use]
    pub fn max_requests_per_minute(&self) -> u32 {
        self.max_requests_per_minute
    }

    #[must_use]
    pub fn max_travel_speed_kmh(&self) -> f64 {
        self.max_travel_speed_kmh
    }

    #[must_use]
    pub fn min_travel_distance_km(&self) -> f64 {
        self.min_travel_distance_km
    }

    #[must_use]
    pub fn secret_min_length(&self) -> usize {
        self.secret_min_length
    }

    #[must_use]
    pub fn secrets_path(&self) -> Option<&PathBuf> {
        self.secrets_path.as_ref()
    }

    #[must_use]
    pub fn backup_code_count(&self) -> usize {
        self.backup_code_count
    }

    #[must_use]
    pub fn token_issuer(&self) -> &str {
        &self.token_issuer
    }

    #[must_use]
    pub fn track_requests(&self) -> bool {
        self.track_requests
    }

    #[must_use]
    pub fn cleanup_retention(&self) -> Duration {
        // Records older than this horizon are purged by the cleanup sweep.
        Duration::from_secs(24 * 60 * 60)
    }
}
