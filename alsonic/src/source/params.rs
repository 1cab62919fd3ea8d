use crate::error::{AlSonicError, Result};
use crate::math::Vec3;
use crate::spatial::{DistanceParams, check_vec};

/// Scalar source properties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceFloat {
    Gain,
    Pitch,
    MinGain,
    MaxGain,
    ReferenceDistance,
    MaxDistance,
    RolloffFactor,
    /// Full inner cone angle in degrees
    ConeInnerAngle,
    /// Full outer cone angle in degrees
    ConeOuterAngle,
    ConeOuterGain,
    ReverbSendLevel,
    /// dB, <= 0
    Occlusion,
    /// dB, <= 0
    Obstruction,
}

/// Vector source properties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceVector {
    Position,
    Velocity,
    /// Zero means omnidirectional
    Direction,
}

/// Spatial and mixing parameters of a source
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceParams {
    pub position: Vec3,
    pub velocity: Vec3,
    pub direction: Vec3,
    pub gain: f32,
    pub pitch: f32,
    pub min_gain: f32,
    pub max_gain: f32,
    pub distance: DistanceParams,
    pub cone_inner_angle: f32,
    pub cone_outer_angle: f32,
    pub cone_outer_gain: f32,
    pub reverb_send: f32,
    pub occlusion: f32,
    pub obstruction: f32,
    pub looping: bool,
    pub source_relative: bool,
}

impl Default for SourceParams {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            direction: Vec3::ZERO,
            gain: 1.0,
            pitch: 1.0,
            min_gain: 0.0,
            max_gain: 1.0,
            distance: DistanceParams::default(),
            cone_inner_angle: 360.0,
            cone_outer_angle: 360.0,
            cone_outer_gain: 0.0,
            reverb_send: 0.0,
            occlusion: 0.0,
            obstruction: 0.0,
            looping: false,
            source_relative: false,
        }
    }
}

fn check_range(param: SourceFloat, value: f32, min: f32, max: f32) -> Result<()> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(AlSonicError::InvalidValue(format!(
            "{:?} {} is outside [{}, {}]",
            param, value, min, max
        )))
    }
}

impl SourceParams {
    pub fn get(&self, param: SourceFloat) -> f32 {
        match param {
            SourceFloat::Gain => self.gain,
            SourceFloat::Pitch => self.pitch,
            SourceFloat::MinGain => self.min_gain,
            SourceFloat::MaxGain => self.max_gain,
            SourceFloat::ReferenceDistance => self.distance.reference_distance,
            SourceFloat::MaxDistance => self.distance.max_distance,
            SourceFloat::RolloffFactor => self.distance.rolloff_factor,
            SourceFloat::ConeInnerAngle => self.cone_inner_angle,
            SourceFloat::ConeOuterAngle => self.cone_outer_angle,
            SourceFloat::ConeOuterGain => self.cone_outer_gain,
            SourceFloat::ReverbSendLevel => self.reverb_send,
            SourceFloat::Occlusion => self.occlusion,
            SourceFloat::Obstruction => self.obstruction,
        }
    }

    /// Validate and store. Returns true when cone geometry changed.
    pub fn set(&mut self, param: SourceFloat, value: f32) -> Result<bool> {
        const MAX: f32 = f32::MAX;
        match param {
            SourceFloat::Gain => check_range(param, value, 0.0, MAX)?,
            SourceFloat::Pitch => check_range(param, value, f32::MIN_POSITIVE, MAX)?,
            SourceFloat::MinGain | SourceFloat::MaxGain | SourceFloat::ConeOuterGain => {
                check_range(param, value, 0.0, 1.0)?
            }
            SourceFloat::ReferenceDistance
            | SourceFloat::MaxDistance
            | SourceFloat::RolloffFactor => check_range(param, value, 0.0, MAX)?,
            SourceFloat::ConeInnerAngle | SourceFloat::ConeOuterAngle => {
                check_range(param, value, 0.0, 360.0)?
            }
            SourceFloat::ReverbSendLevel => check_range(param, value, 0.0, 1.0)?,
            SourceFloat::Occlusion | SourceFloat::Obstruction => {
                check_range(param, value, -100.0, 0.0)?
            }
        }

        let slot = match param {
            SourceFloat::Gain => &mut self.gain,
            SourceFloat::Pitch => &mut self.pitch,
            SourceFloat::MinGain => &mut self.min_gain,
            SourceFloat::MaxGain => &mut self.max_gain,
            SourceFloat::ReferenceDistance => &mut self.distance.reference_distance,
            SourceFloat::MaxDistance => &mut self.distance.max_distance,
            SourceFloat::RolloffFactor => &mut self.distance.rolloff_factor,
            SourceFloat::ConeInnerAngle => &mut self.cone_inner_angle,
            SourceFloat::ConeOuterAngle => &mut self.cone_outer_angle,
            SourceFloat::ConeOuterGain => &mut self.cone_outer_gain,
            SourceFloat::ReverbSendLevel => &mut self.reverb_send,
            SourceFloat::Occlusion => &mut self.occlusion,
            SourceFloat::Obstruction => &mut self.obstruction,
        };
        *slot = value;

        Ok(matches!(
            param,
            SourceFloat::ConeInnerAngle | SourceFloat::ConeOuterAngle | SourceFloat::ConeOuterGain
        ))
    }

    pub fn get_vector(&self, param: SourceVector) -> Vec3 {
        match param {
            SourceVector::Position => self.position,
            SourceVector::Velocity => self.velocity,
            SourceVector::Direction => self.direction,
        }
    }

    /// Validate and store. Returns true when cone geometry changed.
    pub fn set_vector(&mut self, param: SourceVector, value: Vec3) -> Result<bool> {
        check_vec(&format!("{:?}", param), value)?;
        match param {
            SourceVector::Position => self.position = value,
            SourceVector::Velocity => self.velocity = value,
            SourceVector::Direction => self.direction = value,
        }
        Ok(param != SourceVector::Velocity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_values_without_mutating() {
        let mut params = SourceParams::default();
        assert!(params.set(SourceFloat::Gain, -0.5).is_err());
        assert!(params.set(SourceFloat::Pitch, 0.0).is_err());
        assert!(params.set(SourceFloat::ConeOuterAngle, 400.0).is_err());
        assert!(params.set(SourceFloat::Occlusion, 3.0).is_err());
        assert!(params.set(SourceFloat::MaxGain, f32::NAN).is_err());
        assert!(params.set_vector(SourceVector::Position, Vec3::new(0.0, f32::INFINITY, 0.0)).is_err());
        assert_eq!(params, SourceParams::default());
    }

    #[test]
    fn reports_cone_changes() {
        let mut params = SourceParams::default();
        assert!(params.set(SourceFloat::ConeInnerAngle, 90.0).unwrap());
        assert!(!params.set(SourceFloat::Gain, 0.5).unwrap());
        assert!(params.set_vector(SourceVector::Direction, Vec3::X).unwrap());
        assert!(!params.set_vector(SourceVector::Velocity, Vec3::X).unwrap());
        assert_eq!(params.get(SourceFloat::ConeInnerAngle), 90.0);
        assert_eq!(params.get_vector(SourceVector::Direction), Vec3::X);
    }
}
