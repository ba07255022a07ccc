//! Position and displacement primitives.

pub mod distance;
pub mod location;
pub mod turn;

pub use distance::Distance;
pub use location::{wrap_pi, Location, EARTH_ECCEN, EARTH_RADIUS};
pub use turn::{turn_angle, turn_displacement, turn_target, turning_radius, ACCEL_GRAV};
