//! Geolocation and VPN-detection capability, consumed — never implemented —
//! by this engine.
//!
//! Deployments inject a real lookup backend; the default [`NoopGeoIp`]
//! reports nothing and keeps every decision purely threat-score driven.

use async_trait::async_trait;
use serde::Serialize;
use std::net::IpAddr;

#[derive(Clone, Debug, Serialize)]
pub struct Location {
    pub country: String,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Lookup accuracy radius in kilometers.
    pub accuracy: f64,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct VpnReport {
    pub is_vpn: bool,
    /// Confidence in [0,1].
    pub confidence: f64,
    pub indicators: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct LocationRisk {
    /// Risk in [0,100].
    pub risk_score: f64,
    pub risk_level: String,
    pub risks: Vec<String>,
}

#[async_trait]
pub trait GeoIp: Send + Sync {
    async fn location_from_ip(&self, ip: &str) -> Option<Location>;
    async fn detect_vpn(&self, ip: &str, location: Option<&Location>) -> VpnReport;
    async fn assess_location_risk(&self, location: &Location) -> LocationRisk;
}

/// Default capability: no location data, no VPN signal, zero location risk.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopGeoIp;

#[async_trait]
impl GeoIp for NoopGeoIp {
    async fn location_from_ip(&self, _ip: &str) -> Option<Location> {
        None
    }

    async fn detect_vpn(&self, _ip: &str, _location: Option<&Location>) -> VpnReport {
        VpnReport::default()
    }

    async fn assess_location_risk(&self, _location: &Location) -> LocationRisk {
        LocationRisk::default()
    }
}

/// Whether an address is private, loopback, or link-local; such addresses
/// never reach external lookup backends.
#[must_use]
pub fn is_private_ip(ip: &str) -> bool {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
        }
        Ok(IpAddr::V6(v6)) => {
            v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xfe00) == 0xfc00
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_ranges_detected() {
        assert!(is_private_ip("10.1.2.3"));
        assert!(is_private_ip("192.168.0.1"));
        assert!(is_private_ip("172.16.5.5"));
        assert!(is_private_ip("127.0.0.1"));
        assert!(is_private_ip("::1"));
        assert!(is_private_ip("fd00::1"));
    }

    #[test]
    fn public_addresses_are_not_private() {
        assert!(!is_private_ip("203.0.113.9"));
        assert!(!is_private_ip("2001:db8::1"));
        assert!(!is_private_ip("not-an-ip"));
    }

    #[tokio::test]
    async fn noop_capability_reports_nothing() {
        let geoip = NoopGeoIp;
        assert!(geoip.location_from_ip("203.0.113.9").await.is_none());
        let vpn = geoip.detect_vpn("203.0.113.9", None).await;
        assert!(!vpn.is_vpn);
        assert!(vpn.confidence < f64::EPSILON);
    }
}
