//! Obstacle envelopes.
//!
//! Static obstacles are vertical cylinders, moving obstacles are spheres.
//! Both expose the same altitude-dependent queries through [`Envelope`] and
//! are stored together as the closed [`Obstacle`] enum.

use serde::{Deserialize, Serialize};

use crate::geometry::Location;
use crate::vehicle::AvoidanceSnapshot;

pub const DEFAULT_STATIC_BUFFER: f64 = 40.0;
pub const DEFAULT_MOVING_BUFFER: f64 = 45.0;

/// Body radius plus a buffer that stays full-width while `offset` is within
/// `half_extent` and tapers as a circular arc over the next `buffer` meters.
fn tapered_avoid_radius(body_radius: f64, offset: f64, half_extent: f64, buffer: f64) -> f64 {
    if offset <= half_extent {
        return body_radius + buffer;
    }
    let beyond = offset - half_extent;
    if beyond < buffer {
        return body_radius + (buffer * buffer - beyond * beyond).sqrt();
    }
    0.0
}

/// Shared contract of all obstacle shapes.
pub trait Envelope {
    fn location(&self) -> Location;

    /// Horizontal radius of the obstacle body at `alt`, 0 outside the body
    fn cross_sectional_radius(&self, alt: f64) -> f64;

    /// Horizontal radius that triggers avoidance at `alt`, 0 once clear
    fn avoid_radius(&self, alt: f64) -> f64;

    fn horizontal_distance(&self, loc: &Location) -> f64 {
        self.location().distance_to(loc, 0.0).magnitude_xy()
    }

    fn is_location_inside(&self, loc: &Location) -> bool {
        self.cross_sectional_radius(loc.alt) > self.horizontal_distance(loc)
    }

    fn is_location_in_avoid_radius(&self, loc: &Location) -> bool {
        self.avoid_radius(loc.alt) > self.horizontal_distance(loc)
    }

    /// Whether the avoid envelope reaches into the acceptance circle of `wp`
    fn is_in_waypoint(&self, snapshot: &AvoidanceSnapshot, wp: &Location) -> bool {
        let radius = self.avoid_radius(wp.alt);
        if radius == 0.0 {
            return false;
        }
        radius + snapshot.waypoint_radius > self.horizontal_distance(wp)
    }

    fn is_in_next_waypoint(&self, snapshot: &AvoidanceSnapshot) -> bool {
        match &snapshot.next_waypoint {
            Some(wp) => self.is_in_waypoint(snapshot, wp),
            None => false,
        }
    }

    /// Whether the avoid envelope crosses the straight leg flown after
    /// turning onto the direct course to the next waypoint.
    ///
    /// Only the straight leg is checked; obstacles swept during the turn
    /// itself are not detected here.
    fn is_in_way(&self, snapshot: &AvoidanceSnapshot) -> bool {
        let Some(wp) = snapshot.next_waypoint.as_ref() else {
            return false;
        };

        let turn = snapshot.waypoint_turn_angle();
        let turn_end = snapshot.waypoint_turn_displacement();

        let wp_dist = (snapshot.relative(wp) - turn_end).rotate(turn);
        let obs_dist = (snapshot.relative(&self.location()) - turn_end).rotate(turn);

        if wp_dist.y <= 0.0 || obs_dist.y < 0.0 || obs_dist.y > wp_dist.y {
            return false;
        }

        let progress = obs_dist.y / wp_dist.y;
        let pass_alt = snapshot.location.alt + turn_end.z + progress * wp_dist.z;
        let corridor_x = progress * wp_dist.x;

        self.avoid_radius(pass_alt) > (obs_dist.x - corridor_x).abs()
    }

    /// Whether both avoid envelopes intersect at `alt`
    fn overlaps(&self, other: &dyn Envelope, alt: f64) -> bool {
        let r1 = self.avoid_radius(alt);
        let r2 = other.avoid_radius(alt);
        if r1 == 0.0 || r2 == 0.0 {
            return false;
        }
        r1 + r2 > self.horizontal_distance(&other.location())
    }
}

// ===== Static obstacles =====

/// Vertical cylinder. `location.alt` is the altitude of its vertical center.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StaticObstacle {
    pub location: Location,
    pub radius: f64,
    pub height: f64,
    pub buffer: f64,
}

impl StaticObstacle {
    pub fn new(location: Location, radius: f64, height: f64) -> Self {
        Self {
            location,
            radius,
            height,
            buffer: DEFAULT_STATIC_BUFFER,
        }
    }

    /// Cylinder standing on the ground, centered at half its height
    pub fn grounded(lat: f64, lon: f64, radius: f64, height: f64) -> Self {
        Self::new(Location::new(lat, lon, height / 2.0), radius, height)
    }

    pub fn with_buffer(mut self, buffer: f64) -> Self {
        self.buffer = buffer;
        self
    }
}

impl Envelope for StaticObstacle {
    fn location(&self) -> Location {
        self.location
    }

    fn cross_sectional_radius(&self, alt: f64) -> f64 {
        if (alt - self.location.alt).abs() < self.height / 2.0 {
            self.radius
        } else {
            0.0
        }
    }

    fn avoid_radius(&self, alt: f64) -> f64 {
        tapered_avoid_radius(
            self.radius,
            (alt - self.location.alt).abs(),
            self.height / 2.0,
            self.buffer,
        )
    }
}

// ===== Moving obstacles =====

/// Sphere whose center is replaced by every position update from the feed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MovingObstacle {
    pub location: Location,
    pub radius: f64,
    pub buffer: f64,
}

impl MovingObstacle {
    pub fn new(location: Location, radius: f64) -> Self {
        Self {
            location,
            radius,
            buffer: DEFAULT_MOVING_BUFFER,
        }
    }

    pub fn with_buffer(mut self, buffer: f64) -> Self {
        self.buffer = buffer;
        self
    }

    pub fn set_location(&mut self, location: Location) {
        self.location = location;
    }
}

impl Envelope for MovingObstacle {
    fn location(&self) -> Location {
        self.location
    }

    fn cross_sectional_radius(&self, alt: f64) -> f64 {
        let offset = alt - self.location.alt;
        if offset.abs() < self.radius {
            (self.radius * self.radius - offset * offset).sqrt()
        } else {
            0.0
        }
    }

    fn avoid_radius(&self, alt: f64) -> f64 {
        tapered_avoid_radius(
            self.radius,
            (alt - self.location.alt).abs(),
            self.radius,
            self.buffer,
        )
    }
}

// ===== Closed variant =====

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObstacleKind {
    Static,
    Moving,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Obstacle {
    Static(StaticObstacle),
    Moving(MovingObstacle),
}

impl Obstacle {
    pub fn kind(&self) -> ObstacleKind {
        match self {
            Obstacle::Static(_) => ObstacleKind::Static,
            Obstacle::Moving(_) => ObstacleKind::Moving,
        }
    }

    fn shape(&self) -> &dyn Envelope {
        match self {
            Obstacle::Static(obs) => obs,
            Obstacle::Moving(obs) => obs,
        }
    }
}

impl Envelope for Obstacle {
    fn location(&self) -> Location {
        self.shape().location()
    }

    fn cross_sectional_radius(&self, alt: f64) -> f64 {
        self.shape().cross_sectional_radius(alt)
    }

    fn avoid_radius(&self, alt: f64) -> f64 {
        self.shape().avoid_radius(alt)
    }
}

impl From<StaticObstacle> for Obstacle {
    fn from(obs: StaticObstacle) -> Self {
        Obstacle::Static(obs)
    }
}

impl From<MovingObstacle> for Obstacle {
    fn from(obs: MovingObstacle) -> Self {
        Obstacle::Moving(obs)
    }
}
