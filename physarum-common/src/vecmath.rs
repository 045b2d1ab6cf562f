use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul};

/// A continuous 2D point or displacement in grid units.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    #[inline(always)]
    pub fn new(x: f32, y: f32) -> Self {
        Vec2 { x, y }
    }

    /// Unit vector pointing along `angle_rad` (0 = +x, counter-clockwise towards +y).
    #[inline(always)]
    pub fn from_angle(angle_rad: f32) -> Self {
        Vec2::new(angle_rad.cos(), angle_rad.sin())
    }

    /// Bearing of the vector in radians. `atan2(0, 0)` is 0, so this is total.
    #[inline(always)]
    pub fn angle(self) -> f32 {
        self.y.atan2(self.x)
    }

    #[inline(always)]
    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    #[inline(always)]
    pub fn scale(self, scalar: f32) -> Self {
        Vec2::new(self.x * scalar, self.y * scalar)
    }

    /// Point reached by travelling `distance` along `angle_rad` from `self`.
    #[inline(always)]
    pub fn offset_by(self, angle_rad: f32, distance: f32) -> Self {
        self + Vec2::from_angle(angle_rad).scale(distance)
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Add for Vec2 {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self { x: self.x + other.x, y: self.y + other.y }
    }
}

impl Mul<f32> for Vec2 {
    type Output = Self;
    fn mul(self, scalar: f32) -> Self {
        self.scale(scalar)
    }
}

/// Wraps `value` into `[0, extent)`.
///
/// `rem_euclid` can round a tiny negative input up to exactly `extent`; that case
/// is folded back to 0 so the result is always a valid coordinate.
#[inline(always)]
pub fn wrap(value: f32, extent: f32) -> f32 {
    let wrapped = value.rem_euclid(extent);
    if wrapped >= extent { 0.0 } else { wrapped }
}

/// Clamps a value between a minimum and maximum.
#[inline(always)]
pub fn clamp(value: f32, min: f32, max: f32) -> f32 {
    value.max(min).min(max)
}
