use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{AvoidanceError, Result};

// ===== Configuration =====

/// Tunables for classification, maneuvering and the controller loop.
///
/// Every field has a default, so a config file only needs the values it
/// overrides. Altitudes are meters relative to home, distances are meters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvoidanceConfig {
    // Altitude gating
    pub starting_altitude: f64,
    pub safe_alt_lower: f64,
    pub safe_alt_upper: f64,
    pub standby_cycles: u32,

    // Obstacle envelopes
    pub static_buffer: f64,
    pub moving_buffer: f64,

    // Maneuvering
    pub far_waypoint_distance: f64,
    pub moving_loiter_distance: f64,
    pub monitor_retries: u32,

    // Controller loop
    pub cycle_period_ms: u64,

    // Telemetry waits
    pub home_wait_attempts: u32,
    pub home_wait_base_ms: u64,
}

impl Default for AvoidanceConfig {
    fn default() -> Self {
        Self {
            starting_altitude: 50.0,
            safe_alt_lower: 25.0,
            safe_alt_upper: 250.0,
            standby_cycles: 3,
            static_buffer: 40.0,
            moving_buffer: 45.0,
            far_waypoint_distance: 1000.0,
            moving_loiter_distance: 75.0,
            monitor_retries: 5,
            cycle_period_ms: 100,
            home_wait_attempts: 30,
            home_wait_base_ms: 1000,
        }
    }
}

impl AvoidanceConfig {
    /// Load a JSON config file, filling unspecified fields with defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: AvoidanceConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.safe_alt_lower >= self.safe_alt_upper {
            return Err(AvoidanceError::InvalidConfig(format!(
                "safe altitude band is empty ({} >= {})",
                self.safe_alt_lower, self.safe_alt_upper
            )));
        }
        if self.static_buffer < 0.0 || self.moving_buffer < 0.0 {
            return Err(AvoidanceError::InvalidConfig(
                "avoid buffers must be non-negative".to_string(),
            ));
        }
        if self.far_waypoint_distance <= 0.0 {
            return Err(AvoidanceError::InvalidConfig(
                "far waypoint distance must be positive".to_string(),
            ));
        }
        if self.cycle_period_ms == 0 {
            return Err(AvoidanceError::InvalidConfig(
                "cycle period must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn cycle_period(&self) -> Duration {
        Duration::from_millis(self.cycle_period_ms)
    }

    pub fn is_safe_altitude(&self, alt: f64) -> bool {
        alt >= self.safe_alt_lower && alt <= self.safe_alt_upper
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AvoidanceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cycle_period(), Duration::from_millis(100));
        assert_eq!(config.standby_cycles, 3);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: AvoidanceConfig =
            serde_json::from_str(r#"{"static_buffer": 30.0, "cycle_period_ms": 50}"#).unwrap();
        assert_eq!(config.static_buffer, 30.0);
        assert_eq!(config.cycle_period_ms, 50);
        assert_eq!(config.moving_buffer, 45.0);
        assert_eq!(config.safe_alt_upper, 250.0);
    }

    #[test]
    fn test_rejects_empty_safe_band() {
        let config = AvoidanceConfig {
            safe_alt_lower: 300.0,
            ..AvoidanceConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(AvoidanceError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_safe_altitude_band_inclusive() {
        let config = AvoidanceConfig::default();
        assert!(config.is_safe_altitude(25.0));
        assert!(config.is_safe_altitude(250.0));
        assert!(!config.is_safe_altitude(24.9));
        assert!(!config.is_safe_altitude(250.1));
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!(
            "avoid_config_{}.json",
            std::process::id()
        ));
        let config = AvoidanceConfig {
            moving_loiter_distance: 90.0,
            ..AvoidanceConfig::default()
        };
        config.save(&path).unwrap();
        let loaded = AvoidanceConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        let _ = fs::remove_file(&path);
    }
}
