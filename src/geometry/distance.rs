use nalgebra::{Rotation2, Vector2};
use serde::{Deserialize, Serialize};
use std::ops::{Add, Neg, Sub};

/// Displacement expressed in a heading-relative local frame.
///
/// `x` is lateral (positive to the right of the frame heading), `y` is
/// along-track (positive ahead) and `z` is vertical (positive up), all in
/// meters. Two values may only be combined when they share a frame; when the
/// frame is north-aligned, `x` is east and `y` is north.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Distance {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Distance {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub const fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// Horizontal displacement of `magnitude` meters along `bearing`
    /// (radians, clockwise from the frame's +y axis).
    pub fn from_magnitude(magnitude: f64, bearing: f64) -> Self {
        Self::new(magnitude * bearing.sin(), magnitude * bearing.cos(), 0.0)
    }

    /// Re-express this displacement in a frame whose heading is `angle`
    /// radians further clockwise. Vertical component is unchanged.
    pub fn rotate(&self, angle: f64) -> Self {
        let v = Rotation2::new(angle) * Vector2::new(self.x, self.y);
        Self::new(v.x, v.y, self.z)
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn magnitude_xy(&self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Bearing of the horizontal component, clockwise from +y.
    pub fn bearing(&self) -> f64 {
        self.x.atan2(self.y)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Add for Distance {
    type Output = Distance;

    fn add(self, rhs: Distance) -> Distance {
        Distance::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Distance {
    type Output = Distance;

    fn sub(self, rhs: Distance) -> Distance {
        Distance::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Neg for Distance {
    type Output = Distance;

    fn neg(self) -> Distance {
        Distance::new(-self.x, -self.y, -self.z)
    }
}
