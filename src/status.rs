use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::state::AvoidanceState;
use crate::vehicle::AvoidanceSnapshot;

/// Per-cycle record for the ground station
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AvoidanceStatus {
    pub timestamp: DateTime<Utc>,
    pub state: AvoidanceState,
    pub next_waypoint: u16,
    // Position
    pub lat: f64,     // degrees
    pub lon: f64,     // degrees
    pub alt: f64,     // m above home
    // Attitude
    pub heading: f64, // degrees
    pub pitch: f64,   // degrees
    pub airspeed: f64,
    pub mode: String,
    pub monitor_count: u32,
}

impl AvoidanceStatus {
    pub fn from_snapshot(
        snapshot: &AvoidanceSnapshot,
        state: AvoidanceState,
        monitor_count: u32,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            state,
            next_waypoint: snapshot.next_waypoint_index,
            lat: snapshot.location.lat_deg(),
            lon: snapshot.location.lon_deg(),
            alt: snapshot.location.alt,
            heading: snapshot.heading.to_degrees(),
            pitch: snapshot.pitch.to_degrees(),
            airspeed: snapshot.airspeed,
            mode: snapshot.mode.name().to_string(),
            monitor_count,
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Location;
    use crate::sim::SimVehicle;

    #[test]
    fn test_status_from_snapshot() {
        let vehicle = SimVehicle::builder()
            .location(Location::from_degrees(38.1446, -76.4280, 120.0))
            .heading(std::f64::consts::FRAC_PI_2)
            .build();
        let snapshot = AvoidanceSnapshot::capture(&vehicle);
        let status = AvoidanceStatus::from_snapshot(&snapshot, AvoidanceState::Monitor, 2);

        assert!((status.lat - 38.1446).abs() < 1e-9);
        assert!((status.heading - 90.0).abs() < 1e-9);
        assert_eq!(status.alt, 120.0);
        assert_eq!(status.mode, "AUTO");
        assert_eq!(status.monitor_count, 2);
    }

    #[test]
    fn test_status_save() {
        let vehicle = SimVehicle::builder().build();
        let snapshot = AvoidanceSnapshot::capture(&vehicle);
        let status = AvoidanceStatus::from_snapshot(&snapshot, AvoidanceState::Standby, 0);

        let path = std::env::temp_dir().join(format!("avoid_status_{}.json", std::process::id()));
        status.save(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        let loaded: AvoidanceStatus = serde_json::from_str(&text).unwrap();
        assert_eq!(loaded.state, AvoidanceState::Standby);
        assert!(text.contains("\"state\": \"Standby\""));
    }
}
