//! Per-user behavior profiles and anomaly rules.

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const RETENTION_DAYS: i64 = 7;
// Percentage rules are meaningless on near-empty histories.
const MIN_SAMPLE_SIZE: usize = 10;

const NIGHT_START_HOUR: u32 = 3;
const NIGHT_END_HOUR: u32 = 7;
const NIGHT_SHARE_THRESHOLD: f64 = 0.30;
const RAPID_GAP_MILLIS: i64 = 1_000;
const RAPID_SHARE_THRESHOLD: f64 = 0.20;
const DOMINANT_ACTION_THRESHOLD: f64 = 0.80;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BehaviorAction {
    pub action: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

/// Rolling 7-day action history for one user.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BehaviorProfile {
    actions: Vec<BehaviorAction>,
}

impl BehaviorProfile {
    /// Append an action and prune entries older than the retention window.
    pub fn record(&mut self, action: &str, metadata: HashMap<String, String>, now: DateTime<Utc>) {
        self.actions.push(BehaviorAction {
            action: action.to_string(),
            timestamp: now,
            metadata,
        });
        self.prune(now);
    }

    pub fn prune(&mut self, now: DateTime<Utc>) {
        let horizon = now - Duration::days(RETENTION_DAYS);
        self.actions.retain(|entry| entry.timestamp >= horizon);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Action counts per hour of day.
    #[must_use]
    pub fn hourly_distribution(&self) -> [u32; 24] {
        let mut hours = [0u32; 24];
        for entry in &self.actions {
            let hour = entry.timestamp.hour() as usize;
            if let Some(slot) = hours.get_mut(hour) {
                *slot += 1;
            }
        }
        hours
    }

    #[must_use]
    pub fn action_type_counts(&self) -> HashMap<String, u32> {
        let mut counts = HashMap::new();
        for entry in &self.actions {
            *counts.entry(entry.action.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Flag the profile as anomalous when any rule trips:
    /// nighttime (03:00-07:00) share above 30%, more than 20% of
    /// consecutive gaps under one second, or one action type above 80%.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn is_anomalous(&self) -> bool {
        let total = self.actions.len();
        if total < MIN_SAMPLE_SIZE {
            return false;
        }
        let total_f = total as f64;

        let hours = self.hourly_distribution();
        let night: u32 = (NIGHT_START_HOUR..NIGHT_END_HOUR)
            .filter_map(|hour| hours.get(hour as usize))
            .sum();
        if f64::from(night) / total_f > NIGHT_SHARE_THRESHOLD {
            return true;
        }

        let rapid = self
            .actions
            .windows(2)
            .filter(|pair| {
                pair[1]
                    .timestamp
                    .signed_duration_since(pair[0].timestamp)
                    .num_milliseconds()
                    < RAPID_GAP_MILLIS
            })
            .count();
        if rapid as f64 / (total - 1) as f64 > RAPID_SHARE_THRESHOLD {
            return true;
        }

        let dominant = self.action_type_counts().into_values().max().unwrap_or(0);
        if f64::from(dominant) / total_f > DOMINANT_ACTION_THRESHOLD {
            return true;
        }

        false
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 20, hour, minute, second)
            .unwrap()
    }

    fn profile_with(times: &[DateTime<Utc>], actions: &[&str]) -> BehaviorProfile {
        let mut profile = BehaviorProfile::default();
        for (time, action) in times.iter().zip(actions.iter().cycle()) {
            profile.record(action, HashMap::new(), *time);
        }
        profile
    }

    #[test]
    fn small_profiles_never_flag() {
        let times: Vec<_> = (0..5).map(|i| at(4, i, 0)).collect();
        let profile = profile_with(&times, &["login"]);
        assert!(!profile.is_anomalous());
    }

    #[test]
    fn nighttime_share_flags() {
        // 6 of 12 actions between 03:00 and 07:00.
        let mut times: Vec<_> = (0..6).map(|i| at(4, i * 7, 0)).collect();
        times.extend((0..6).map(|i| at(14, i * 7, 0)));
        let profile = profile_with(
            &times,
            &["login", "view", "edit", "view", "login", "view"],
        );
        assert!(profile.is_anomalous());
    }

    #[test]
    fn rapid_fire_actions_flag() {
        // 12 actions each 200ms apart.
        let base = at(12, 0, 0);
        let times: Vec<_> = (0..12)
            .map(|i| base + Duration::milliseconds(i * 200))
            .collect();
        let profile = profile_with(
            &times,
            &["login", "view", "edit", "view", "login", "view"],
        );
        assert!(profile.is_anomalous());
    }

    #[test]
    fn dominant_action_type_flags() {
        let times: Vec<_> = (0..12).map(|i| at(12, i * 4, 0)).collect();
        let mut profile = BehaviorProfile::default();
        for (i, time) in times.iter().enumerate() {
            let action = if i == 0 { "view" } else { "login" };
            profile.record(action, HashMap::new(), *time);
        }
        assert!(profile.is_anomalous());
    }

    #[test]
    fn balanced_daytime_profile_is_normal() {
        let times: Vec<_> = (0..12).map(|i| at(9 + (i % 8), i * 4, 30)).collect();
        let profile = profile_with(&times, &["login", "view", "edit", "search"]);
        assert!(!profile.is_anomalous());
    }

    #[test]
    fn old_entries_are_pruned() {
        let mut profile = BehaviorProfile::default();
        let now = Utc::now();
        profile.record("login", HashMap::new(), now - Duration::days(8));
        profile.record("login", HashMap::new(), now);
        assert_eq!(profile.len(), 1);
    }

    #[test]
    fn hourly_distribution_counts_by_hour() {
        let profile = profile_with(&[at(4, 0, 0), at(4, 30, 0), at(14, 0, 0)], &["login"]);
        let hours = profile.hourly_distribution();
        assert_eq!(hours[4], 2);
        assert_eq!(hours[14], 1);
    }
}
