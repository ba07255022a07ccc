//! Per-state actions.
//!
//! [`decide`] turns a classified state into at most one [`Command`]. It is
//! pure: dispatching the command and updating counters is the controller's
//! job.

use std::f64::consts::FRAC_PI_2;

use crate::config::AvoidanceConfig;
use crate::error::{AvoidanceError, Result};
use crate::geometry::{turn_target, Distance, Location};
use crate::obstacle::{Envelope, Obstacle};
use crate::state::AvoidanceState;
use crate::vehicle::{AvoidanceSnapshot, FlightMode};

/// Which code path requested a turn
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnOrigin {
    /// Avoid or Dodge maneuver
    Maneuver,
    /// Monitor re-check after a maneuver in GUIDED mode
    MonitorCorrection,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Hand control back to the mission
    ResumeAuto,
    /// Hold position in a loiter orbit
    Loiter,
    /// Fly a turn of `angle` radians (positive = right) by navigating to
    /// `target`
    Turn {
        angle: f64,
        target: Location,
        origin: TurnOrigin,
    },
}

impl Command {
    /// Monitor retry counter after this command has been dispatched
    pub fn next_monitor_count(&self, current: u32) -> u32 {
        match self {
            // Corrections count toward `monitor_retries` instead of resetting,
            // otherwise a blocked turn circle would be re-checked forever
            Command::Turn {
                origin: TurnOrigin::MonitorCorrection,
                ..
            } => current + 1,
            Command::ResumeAuto
            | Command::Turn {
                origin: TurnOrigin::Maneuver,
                ..
            } => 0,
            Command::Loiter => current,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::ResumeAuto => "resume auto",
            Command::Loiter => "loiter",
            Command::Turn { .. } => "turn",
        }
    }
}

/// Inputs to [`decide`] beyond the state and snapshot
#[derive(Clone, Copy, Debug)]
pub struct ActionContext<'a> {
    /// Obstacle named by the classification, or remembered from an earlier
    /// cycle for Monitor
    pub selected: Option<&'a Obstacle>,
    pub monitor_count: u32,
    pub config: &'a AvoidanceConfig,
}

/// Choose the command for `state`. `Ok(None)` means leave the vehicle alone.
pub fn decide(
    state: AvoidanceState,
    snapshot: &AvoidanceSnapshot,
    ctx: &ActionContext,
) -> Result<Option<Command>> {
    let command = match state {
        AvoidanceState::Closed => None,

        AvoidanceState::Inactive => match snapshot.mode {
            FlightMode::Guided | FlightMode::Loiter => Some(Command::ResumeAuto),
            _ => None,
        },

        // No bespoke maneuver for these yet; the mission is the safe default
        AvoidanceState::Standby
        | AvoidanceState::Unsafe
        | AvoidanceState::Imminent
        | AvoidanceState::Collision => Some(Command::ResumeAuto),

        AvoidanceState::Monitor => Some(monitor(snapshot, ctx)),

        AvoidanceState::Avoid => {
            let obs = ctx
                .selected
                .ok_or(AvoidanceError::NoSelectedObstacle(state.name()))?;
            match avoid_turn_angle(snapshot, obs) {
                Ok(Some(angle)) => Some(turn(snapshot, angle, TurnOrigin::Maneuver, ctx.config)),
                Ok(None) => Some(Command::ResumeAuto),
                Err(err @ AvoidanceError::UnsupportedGeometry(_)) => {
                    log::warn!("Avoid maneuver unavailable, resuming auto: {}", err);
                    Some(Command::ResumeAuto)
                }
                // Out of domain: skip the cycle and keep the current target
                Err(err) => return Err(err),
            }
        }

        AvoidanceState::Dodge => {
            let obs = ctx
                .selected
                .ok_or(AvoidanceError::NoSelectedObstacle(state.name()))?;
            let angle = dodge_turn_angle(snapshot, obs);
            Some(turn(snapshot, angle, TurnOrigin::Maneuver, ctx.config))
        }

        AvoidanceState::Loiter => Some(Command::Loiter),
    };

    if let Some(Command::Turn { angle, .. }) = &command {
        if !angle.is_finite() {
            return Err(AvoidanceError::OutOfDomain(format!(
                "non-finite turn angle in state {}",
                state
            )));
        }
    }

    Ok(command)
}

fn turn(
    snapshot: &AvoidanceSnapshot,
    angle: f64,
    origin: TurnOrigin,
    config: &AvoidanceConfig,
) -> Command {
    let target = turn_target(
        &snapshot.location,
        snapshot.heading,
        angle,
        snapshot.turning_radius,
        config.far_waypoint_distance,
    );
    Command::Turn {
        angle,
        target,
        origin,
    }
}

/// Re-check after a maneuver: while in GUIDED, turn back onto the waypoint
/// course if a turning circle still lies within one turning radius of the
/// remembered obstacle. Gives up after `monitor_retries` corrections.
fn monitor(snapshot: &AvoidanceSnapshot, ctx: &ActionContext) -> Command {
    let Some(obs) = ctx.selected else {
        return Command::ResumeAuto;
    };
    if snapshot.mode != FlightMode::Guided || ctx.monitor_count >= ctx.config.monitor_retries {
        return Command::ResumeAuto;
    }

    let r = snapshot.turning_radius;
    let obs_loc = obs.location();
    let circle_blocked = |offset: f64| {
        let center = snapshot
            .location
            .offset_by(&Distance::from_magnitude(r, snapshot.heading + offset));
        center.distance_to(&obs_loc, 0.0).magnitude_xy() < r
    };

    if circle_blocked(-FRAC_PI_2) || circle_blocked(FRAC_PI_2) {
        turn(
            snapshot,
            snapshot.waypoint_turn_angle(),
            TurnOrigin::MonitorCorrection,
            ctx.config,
        )
    } else {
        Command::ResumeAuto
    }
}

/// Turn that puts the aircraft on a tangent to the obstacle's avoid circle.
///
/// `Ok(None)` once the obstacle is no longer ahead. Only the case where the
/// obstacle sits off the aircraft's course on the same side as the next
/// waypoint is solved. When the waypoint lies across the obstacle from the
/// aircraft's course the geometry is reported as unsupported, and an aircraft
/// already inside the combined avoid circle is out of domain.
pub fn avoid_turn_angle(snapshot: &AvoidanceSnapshot, obs: &Obstacle) -> Result<Option<f64>> {
    let wp = snapshot.next_waypoint()?;
    let obs_loc = obs.location();
    let obs_dist = snapshot.relative(&obs_loc);
    if obs_dist.y <= 0.0 {
        return Ok(None);
    }

    let wp_obs_dist = obs_loc.distance_to(wp, snapshot.heading);
    let same_side = (obs_dist.x >= 0.0 && wp_obs_dist.x >= 0.0)
        || (obs_dist.x <= 0.0 && wp_obs_dist.x <= 0.0);
    if !same_side {
        return Err(AvoidanceError::UnsupportedGeometry(format!(
            "waypoint crosses obstacle side (obstacle x {:.1} m, waypoint x {:.1} m)",
            obs_dist.x, wp_obs_dist.x
        )));
    }

    let big_r = obs.avoid_radius(snapshot.location.alt);
    let r = snapshot.turning_radius;
    let lateral = r + obs_dist.x.abs();

    let d_sq = obs_dist.y * obs_dist.y + lateral * lateral - (big_r + r) * (big_r + r);
    if d_sq < 0.0 {
        return Err(AvoidanceError::OutOfDomain(format!(
            "inside combined avoid circle (d² = {:.1})",
            d_sq
        )));
    }

    let tangent = FRAC_PI_2 - (big_r + r).atan2(d_sq.sqrt()) - obs_dist.y.abs().atan2(lateral);
    Ok(Some(-tangent.copysign(obs_dist.x)))
}

/// Hardest useful turn away from an obstacle inside its avoid radius
pub fn dodge_turn_angle(snapshot: &AvoidanceSnapshot, obs: &Obstacle) -> f64 {
    let obs_dist = snapshot.relative(&obs.location());
    let lateral = snapshot.turning_radius + obs_dist.x.abs();
    -obs_dist.y.atan2(lateral).copysign(obs_dist.x)
}
