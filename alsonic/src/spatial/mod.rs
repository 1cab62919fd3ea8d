//! Listener-relative geometry, distance attenuation, cone attenuation and doppler.

mod attenuation;
mod doppler;

pub use attenuation::{DistanceParams, cone_gain, distance_gain};
pub use doppler::{MAX_DOPPLER, MIN_DOPPLER, doppler_shift};

use crate::error::{AlSonicError, Result};
use crate::math::{Pose, Vec3, is_finite_vec, normalize_or, zap_vec};

/// Attenuation curve family applied as a function of listener distance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DistanceModel {
    None,
    Inverse,
    #[default]
    InverseClamped,
    Linear,
    LinearClamped,
    Exponential,
    ExponentialClamped,
}

impl DistanceModel {
    pub fn is_clamped(self) -> bool {
        matches!(
            self,
            Self::InverseClamped | Self::LinearClamped | Self::ExponentialClamped
        )
    }
}

/// The "ears" of the context.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Listener {
    pub position: Vec3,
    pub velocity: Vec3,
    /// Look direction
    pub at: Vec3,
    pub up: Vec3,
    /// Master gain applied to every source
    pub gain: f32,
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            at: -Vec3::Z,
            up: Vec3::Y,
            gain: 1.0,
        }
    }
}

impl Listener {
    pub fn set_position(&mut self, position: Vec3) -> Result<()> {
        check_vec("listener position", position)?;
        self.position = position;
        Ok(())
    }

    pub fn set_velocity(&mut self, velocity: Vec3) -> Result<()> {
        check_vec("listener velocity", velocity)?;
        self.velocity = velocity;
        Ok(())
    }

    pub fn set_orientation(&mut self, at: Vec3, up: Vec3) -> Result<()> {
        check_vec("listener at", at)?;
        check_vec("listener up", up)?;
        self.at = at;
        self.up = up;
        Ok(())
    }

    pub fn set_pose(&mut self, pose: Pose) -> Result<()> {
        self.set_orientation(pose.forward(), pose.up())?;
        self.set_position(pose.position)
    }

    pub fn set_gain(&mut self, gain: f32) -> Result<()> {
        if !(gain >= 0.0 && gain.is_finite()) {
            return Err(AlSonicError::InvalidValue(format!(
                "Listener gain {} must be finite and non-negative",
                gain
            )));
        }
        self.gain = gain;
        Ok(())
    }

    /// Orthonormal basis used for the current render cycle
    pub fn frame(&self) -> ListenerFrame {
        let look = normalize_or(self.at, -Vec3::Z);
        let right = normalize_or(look.cross(normalize_or(self.up, Vec3::Y)), Vec3::X);
        let up = right.cross(look);
        ListenerFrame {
            position: zap_vec(self.position),
            velocity: zap_vec(self.velocity),
            right,
            look,
            up,
            gain: self.gain,
        }
    }
}

pub(crate) fn check_vec(what: &str, v: Vec3) -> Result<()> {
    if is_finite_vec(v) {
        Ok(())
    } else {
        Err(AlSonicError::InvalidValue(format!("{} {:?} is not finite", what, v)))
    }
}

/// Listener basis with all bad values zapped
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ListenerFrame {
    pub position: Vec3,
    pub velocity: Vec3,
    pub right: Vec3,
    pub look: Vec3,
    pub up: Vec3,
    pub gain: f32,
}

impl Default for ListenerFrame {
    fn default() -> Self {
        Listener::default().frame()
    }
}

/// Where a source sits relative to the listener
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelativePlacement {
    /// Listener-to-source vector in world space
    pub offset: Vec3,
    pub distance: f32,
    /// Degrees, positive to the right
    pub azimuth: f32,
    /// Degrees, positive above
    pub elevation: f32,
}

impl ListenerFrame {
    /// Place a source. `source_relative` positions are offsets from the listener
    /// expressed in world axes.
    pub fn place(&self, position: Vec3, source_relative: bool) -> RelativePlacement {
        let position = zap_vec(position);
        let offset = if source_relative {
            position
        } else {
            position - self.position
        };
        let distance = offset.length();
        if !(distance > f32::EPSILON) || !distance.is_finite() {
            return RelativePlacement {
                offset,
                distance: 0.0,
                azimuth: 0.0,
                elevation: 0.0,
            };
        }

        let x = offset.dot(self.right);
        let z = offset.dot(self.look);
        let y = offset.dot(self.up);
        RelativePlacement {
            offset,
            distance,
            azimuth: x.atan2(z).to_degrees(),
            elevation: (y / distance).clamp(-1.0, 1.0).asin().to_degrees(),
        }
    }
}

/// Angle in degrees between a source's direction and the source-to-listener vector.
///
/// `None` when the source is omnidirectional or sits on the listener.
pub fn cone_angle(direction: Vec3, offset: Vec3) -> Option<f32> {
    let direction = zap_vec(direction);
    if direction.length_squared() <= f32::EPSILON {
        return None;
    }
    let to_listener = -offset;
    if to_listener.length_squared() <= f32::EPSILON {
        return None;
    }
    let cos = direction.normalize().dot(to_listener.normalize()).clamp(-1.0, 1.0);
    Some(cos.acos().to_degrees())
}
