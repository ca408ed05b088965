//! Geo-velocity checks over a user's recent location history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Samples this recent are considered together for the country-variety rule.
const COUNTRY_VARIETY_SAMPLES: usize = 5;
const COUNTRY_VARIETY_THRESHOLD: usize = 4;

/// One observed location for a user.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeoSample {
    pub latitude: f64,
    pub longitude: f64,
    pub country: String,
    pub timestamp: DateTime<Utc>,
}

/// Great-circle distance in kilometers (Haversine).
#[must_use]
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let earth_radius_km = 6371.0;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    earth_radius_km * c
}

/// Flag "impossible travel" between the two most recent samples.
///
/// The observed distance must exceed both the distance reachable at
/// `max_speed_kmh` in the elapsed time and a minimum-distance floor; the
/// floor avoids false positives on short hops with low GPS precision.
#[must_use]
pub fn is_impossible_travel(
    previous: &GeoSample,
    current: &GeoSample,
    max_speed_kmh: f64,
    min_distance_km: f64,
) -> bool {
    let distance_km = haversine_km(
        previous.latitude,
        previous.longitude,
        current.latitude,
        current.longitude,
    );
    if distance_km <= min_distance_km {
        return false;
    }

    let elapsed = current.timestamp.signed_duration_since(previous.timestamp);
    let elapsed_hours = elapsed.num_milliseconds() as f64 / 3_600_000.0;
    if elapsed_hours <= 0.0 {
        // Two far-apart locations at the same instant cannot both be real.
        return true;
    }

    distance_km > max_speed_kmh * elapsed_hours
}

/// Flag when too many distinct countries appear in the most recent samples.
#[must_use]
pub fn country_hopping(history: &[GeoSample]) -> bool {
    let recent = history
        .iter()
        .rev()
        .take(COUNTRY_VARIETY_SAMPLES)
        .map(|sample| sample.country.as_str())
        .collect::<HashSet<_>>();
    recent.len() >= COUNTRY_VARIETY_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(lat: f64, lon: f64, country: &str, at: DateTime<Utc>) -> GeoSample {
        GeoSample {
            latitude: lat,
            longitude: lon,
            country: country.to_string(),
            timestamp: at,
        }
    }

    #[test]
    fn haversine_matches_known_distance() {
        // Paris to New York, roughly 5,837 km.
        let distance = haversine_km(48.8566, 2.3522, 40.7128, -74.0060);
        assert!((distance - 5837.0).abs() < 50.0, "got {distance}");
    }

    #[test]
    fn nine_thousand_km_in_one_hour_is_impossible() {
        let now = Utc::now();
        // Tokyo and London are just under 9,600 km apart.
        let previous = sample(35.6762, 139.6503, "JP", now - Duration::hours(1));
        let current = sample(51.5074, -0.1278, "GB", now);
        assert!(is_impossible_travel(&previous, &current, 1000.0, 100.0));
    }

    #[test]
    fn same_distance_over_twenty_hours_is_plausible() {
        let now = Utc::now();
        let previous = sample(35.6762, 139.6503, "JP", now - Duration::hours(20));
        let current = sample(51.5074, -0.1278, "GB", now);
        assert!(!is_impossible_travel(&previous, &current, 1000.0, 100.0));
    }

    #[test]
    fn short_hops_never_flag() {
        let now = Utc::now();
        // Two points a few km apart observed seconds apart: GPS jitter.
        let previous = sample(48.8566, 2.3522, "FR", now - Duration::seconds(5));
        let current = sample(48.8666, 2.3722, "FR", now);
        assert!(!is_impossible_travel(&previous, &current, 1000.0, 100.0));
    }

    #[test]
    fn country_hopping_needs_four_distinct() {
        let now = Utc::now();
        let history: Vec<GeoSample> = ["FR", "DE", "FR", "DE", "FR"]
            .iter()
            .enumerate()
            .map(|(i, c)| sample(48.0, 2.0, c, now - Duration::minutes(i as i64)))
            .collect();
        assert!(!country_hopping(&history));

        let history: Vec<GeoSample> = ["FR", "DE", "JP", "US", "BR"]
            .iter()
            .enumerate()
            .map(|(i, c)| sample(48.0, 2.0, c, now - Duration::minutes(i as i64)))
            .collect();
        assert!(country_hopping(&history));
    }
}
