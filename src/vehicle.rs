use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{AvoidanceError, Result};
use crate::geometry::{turn_angle, turn_displacement, Distance, Location};

/// Autopilot flight modes the avoidance system distinguishes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlightMode {
    Auto,
    Guided,
    Loiter,
    Other(String),
}

impl FlightMode {
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "AUTO" => FlightMode::Auto,
            "GUIDED" => FlightMode::Guided,
            "LOITER" => FlightMode::Loiter,
            other => FlightMode::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            FlightMode::Auto => "AUTO",
            FlightMode::Guided => "GUIDED",
            FlightMode::Loiter => "LOITER",
            FlightMode::Other(name) => name,
        }
    }

    /// Modes in which the avoidance system is allowed to act
    pub fn is_autonomous(&self) -> bool {
        matches!(self, FlightMode::Auto | FlightMode::Guided | FlightMode::Loiter)
    }
}

impl fmt::Display for FlightMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Narrow capability interface onto the autopilot link.
///
/// Reads return the latest telemetry and must not block. Commands are
/// fire-and-forget from the avoidance system's point of view; an `Err`
/// means the command could not be queued.
pub trait Vehicle: Send + Sync {
    fn location(&self) -> Location;
    /// Radians clockwise from north
    fn heading(&self) -> f64;
    /// m/s
    fn airspeed(&self) -> f64;
    /// Radians, nose up positive
    fn pitch(&self) -> f64;
    fn mode(&self) -> FlightMode;
    /// Minimum horizontal turn radius at the current airspeed (m)
    fn turning_radius(&self) -> f64;
    fn next_waypoint(&self) -> Option<Location>;
    fn next_waypoint_index(&self) -> u16;
    fn waypoint_acceptance_radius(&self) -> f64;
    fn command_count(&self) -> usize;
    /// `None` until the autopilot has a home fix
    fn home_location(&self) -> Option<Location>;

    /// All per-cycle reads at once. Implementations backed by shared
    /// telemetry should override this to read under a single lock.
    fn snapshot(&self) -> AvoidanceSnapshot {
        AvoidanceSnapshot::read_each(self)
    }

    fn set_mode(&self, mode: FlightMode) -> Result<()>;
    fn navigate_to(&self, target: Location) -> Result<()>;
}

// ===== Per-cycle snapshot =====

/// Immutable capture of vehicle telemetry for one decision cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct AvoidanceSnapshot {
    pub location: Location,
    pub heading: f64,
    pub airspeed: f64,
    pub pitch: f64,
    pub mode: FlightMode,
    pub turning_radius: f64,
    pub next_waypoint: Option<Location>,
    pub next_waypoint_index: u16,
    pub waypoint_radius: f64,
    pub command_count: usize,
}

impl AvoidanceSnapshot {
    pub fn capture<V: Vehicle + ?Sized>(vehicle: &V) -> Self {
        vehicle.snapshot()
    }

    fn read_each<V: Vehicle + ?Sized>(vehicle: &V) -> Self {
        Self {
            location: vehicle.location(),
            heading: vehicle.heading(),
            airspeed: vehicle.airspeed(),
            pitch: vehicle.pitch(),
            mode: vehicle.mode(),
            turning_radius: vehicle.turning_radius(),
            next_waypoint: vehicle.next_waypoint(),
            next_waypoint_index: vehicle.next_waypoint_index(),
            waypoint_radius: vehicle.waypoint_acceptance_radius(),
            command_count: vehicle.command_count(),
        }
    }

    pub fn next_waypoint(&self) -> Result<&Location> {
        self.next_waypoint
            .as_ref()
            .ok_or(AvoidanceError::MissingWaypoint)
    }

    /// Displacement to `target` in the aircraft's heading frame
    pub fn relative(&self, target: &Location) -> Distance {
        self.location.distance_to(target, self.heading)
    }

    /// Angle of the minimum-radius turn onto the direct course to the next
    /// waypoint. Zero without a waypoint.
    pub fn waypoint_turn_angle(&self) -> f64 {
        match &self.next_waypoint {
            Some(wp) => turn_angle(&self.relative(wp), self.turning_radius),
            None => 0.0,
        }
    }

    /// Displacement covered while flying [`Self::waypoint_turn_angle`]
    pub fn waypoint_turn_displacement(&self) -> Distance {
        turn_displacement(self.waypoint_turn_angle(), self.turning_radius, self.pitch)
    }
}

/// Poll for the home location with exponential backoff, capped at 10 s.
///
/// Home is unset until the autopilot's first GPS fix; callers that need
/// absolute altitudes retry here instead of failing.
pub async fn wait_for_home<V: Vehicle + ?Sized>(
    vehicle: &V,
    max_attempts: u32,
    base_delay: Duration,
) -> Result<Location> {
    let mut delay = base_delay;
    for attempt in 1..=max_attempts {
        if let Some(home) = vehicle.home_location() {
            return Ok(home);
        }
        log::warn!(
            "Home location not set (attempt {}/{}), retrying in {:.1}s",
            attempt,
            max_attempts,
            delay.as_secs_f64()
        );
        tokio::time::sleep(delay).await;
        delay = Duration::from_secs_f64((delay.as_secs_f64() * 1.5).min(10.0));
    }
    vehicle.home_location().ok_or_else(|| {
        AvoidanceError::TelemetryUnavailable(format!(
            "home location after {} attempts",
            max_attempts
        ))
    })
}
