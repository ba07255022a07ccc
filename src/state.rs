//! Avoidance state classification.
//!
//! [`determine_state`] is a pure function of one cycle's snapshot, the
//! obstacle lists and the system flags. It never touches the vehicle.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::AvoidanceConfig;
use crate::obstacle::{Envelope, ObstacleKind};
use crate::system::{ObstacleField, ObstacleId};
use crate::vehicle::{AvoidanceSnapshot, FlightMode};

/// The ten avoidance states, listed from lowest to highest threat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AvoidanceState {
    /// Avoidance is closed or closing; terminal
    Closed,
    /// Stopped, not in autonomous flight, or no next waypoint
    Inactive,
    /// Not yet consistently above the starting altitude
    Standby,
    /// Outside the safe altitude band
    Unsafe,
    /// Active with nothing to avoid
    Monitor,
    /// An obstacle blocks the leg to the next waypoint
    Avoid,
    /// Inside an obstacle's avoid radius and able to turn clear
    Dodge,
    /// A moving obstacle sits over the next waypoint
    Loiter,
    /// Inside an avoid radius and unable to turn clear
    Imminent,
    /// Inside an obstacle body
    Collision,
}

impl AvoidanceState {
    pub fn name(&self) -> &'static str {
        match self {
            AvoidanceState::Closed => "CLOSED",
            AvoidanceState::Inactive => "INACTIVE",
            AvoidanceState::Standby => "STANDBY",
            AvoidanceState::Unsafe => "UNSAFE",
            AvoidanceState::Monitor => "MONITOR",
            AvoidanceState::Avoid => "AVOID",
            AvoidanceState::Dodge => "DODGE",
            AvoidanceState::Loiter => "LOITER",
            AvoidanceState::Imminent => "IMMINENT",
            AvoidanceState::Collision => "COLLISION",
        }
    }
}

impl fmt::Display for AvoidanceState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// System flags the classifier reads
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SystemView {
    pub active: bool,
    pub closed: bool,
    pub standby_count: u32,
}

/// Result of one classification
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Classification {
    pub state: AvoidanceState,
    /// Obstacle the state reacts to (Avoid, Dodge, Loiter)
    pub selected: Option<ObstacleId>,
}

impl Classification {
    fn plain(state: AvoidanceState) -> Self {
        Self { state, selected: None }
    }

    fn reacting_to(state: AvoidanceState, id: ObstacleId) -> Self {
        Self { state, selected: Some(id) }
    }
}

/// Classify the current situation. Checks run in strict priority order:
/// Closed, Inactive, Standby, Unsafe, Collision/Imminent/Dodge, Avoid,
/// Loiter, Monitor.
pub fn determine_state(
    snapshot: &AvoidanceSnapshot,
    obstacles: &ObstacleField,
    system: &SystemView,
    config: &AvoidanceConfig,
) -> Classification {
    if system.closed {
        return Classification::plain(AvoidanceState::Closed);
    }

    if !system.active || !snapshot.mode.is_autonomous() || snapshot.next_waypoint.is_none() {
        return Classification::plain(AvoidanceState::Inactive);
    }

    if system.standby_count < config.standby_cycles {
        return Classification::plain(AvoidanceState::Standby);
    }

    let loc = &snapshot.location;
    if !config.is_safe_altitude(loc.alt) {
        return Classification::plain(AvoidanceState::Unsafe);
    }

    let r = snapshot.turning_radius;
    for (id, obs) in obstacles.iter() {
        if obs.is_location_inside(loc) {
            return Classification::plain(AvoidanceState::Collision);
        }

        let obs_dist = snapshot.relative(&obs.location());
        if obs.is_location_in_avoid_radius(loc) && obs_dist.y > 0.0 {
            // Closest approach achievable by a hard turn away from it
            let clearance = (r + obs_dist.x.abs()).hypot(obs_dist.y) - r;
            if obs.cross_sectional_radius(loc.alt) > clearance {
                return Classification::plain(AvoidanceState::Imminent);
            }
            return Classification::reacting_to(AvoidanceState::Dodge, id);
        }
    }

    if snapshot.mode != FlightMode::Loiter {
        for (id, obs) in obstacles.iter() {
            if obs.is_in_way(snapshot) {
                return Classification::reacting_to(AvoidanceState::Avoid, id);
            }
        }
    }

    for (id, obs) in obstacles.iter_kind(ObstacleKind::Moving) {
        let horizontal = snapshot.relative(&obs.location()).magnitude_xy();
        if obs.is_in_next_waypoint(snapshot) && horizontal < config.moving_loiter_distance {
            return Classification::reacting_to(AvoidanceState::Loiter, id);
        }
    }

    Classification::plain(AvoidanceState::Monitor)
}
