//! Math types for alsonic

pub use glam::{Quat, Vec3};

/// Position plus orientation, used as a convenience for driving the listener.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Pose {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    pub fn identity() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
        }
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * (-Vec3::Z)
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

/// Replace NaN, infinities and denormals with `fallback`.
///
/// Values coming from the API are validated, but values derived from them
/// (normalised vectors, ratios) can still degenerate.
#[inline]
pub fn zap(value: f32, fallback: f32) -> f32 {
    if value.is_finite() && (value == 0.0 || value.is_normal()) {
        value
    } else if value.is_finite() {
        // denormal
        0.0
    } else {
        fallback
    }
}

/// Component-wise [`zap`] with a zero fallback.
#[inline]
pub fn zap_vec(v: Vec3) -> Vec3 {
    Vec3::new(zap(v.x, 0.0), zap(v.y, 0.0), zap(v.z, 0.0))
}

/// Normalise `v`, returning `fallback` when `v` has no usable length.
#[inline]
pub fn normalize_or(v: Vec3, fallback: Vec3) -> Vec3 {
    let v = zap_vec(v);
    let len = v.length();
    if len > f32::EPSILON && len.is_finite() {
        v / len
    } else {
        fallback
    }
}

pub(crate) fn is_finite_vec(v: Vec3) -> bool {
    v.x.is_finite() && v.y.is_finite() && v.z.is_finite()
}
