//! Fixed-wing turn geometry.
//!
//! Turns are modeled as arcs of the minimum turning circle flown at a
//! constant bank angle, followed by a straight leg.

use std::f64::consts::{FRAC_PI_2, PI};

use super::{Distance, Location};

/// Standard gravity (m/s²)
pub const ACCEL_GRAV: f64 = 9.80665;

/// Radius of a coordinated level turn: `v² / (g · tan φ)`
pub fn turning_radius(airspeed: f64, bank_angle: f64) -> f64 {
    airspeed * airspeed / ACCEL_GRAV / bank_angle.tan()
}

/// Signed angle (radians, positive = clockwise) the aircraft must turn so
/// that, after flying the turning circle on the target's side, it points
/// straight at `target`.
///
/// `target` is the displacement to the target in the aircraft's heading
/// frame. Targets inside the turning circle cannot be reached by a tangent,
/// so the direct bearing is returned instead.
pub fn turn_angle(target: &Distance, radius: f64) -> f64 {
    let side = if target.x >= 0.0 { 1.0 } else { -1.0 };
    let lateral = target.x.abs();

    // Circle center sits one radius off the wing on the target's side
    let dx = lateral - radius;
    let dy = target.y;
    let center_dist = dx.hypot(dy);

    if center_dist <= radius {
        return side * lateral.atan2(dy);
    }

    let tangent_len = (center_dist * center_dist - radius * radius).sqrt();
    let mut angle = dx.atan2(dy) + radius.atan2(tangent_len);
    if angle < -FRAC_PI_2 {
        angle += 2.0 * PI;
    }

    side * angle
}

/// Displacement, in the pre-turn heading frame, from the start of a turn of
/// `angle` radians to its end. Altitude changes at `pitch` along the arc.
pub fn turn_displacement(angle: f64, radius: f64, pitch: f64) -> Distance {
    let swept = angle.abs();
    let side = angle.signum();
    let arc_len = radius * swept;

    Distance::new(
        side * radius * (1.0 - swept.cos()),
        radius * swept.sin(),
        arc_len * pitch.sin(),
    )
}

/// Target point that makes a direct-to navigation fly a turn of `angle`.
///
/// The target is the chord of the turn arc followed by `far_distance` meters
/// along the post-turn heading, so the autopilot's own path controller flies
/// the arc and then holds the new course.
pub fn turn_target(
    origin: &Location,
    heading: f64,
    angle: f64,
    radius: f64,
    far_distance: f64,
) -> Location {
    let chord = 2.0 * radius * (angle.abs() / 2.0).sin();
    let arc = Distance::from_magnitude(chord, heading + angle / 2.0);
    let leg = Distance::from_magnitude(far_distance, heading + angle);
    origin.offset_by(&(arc + leg))
}
