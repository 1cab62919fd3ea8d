use super::DistanceModel;
use crate::math::zap;

/// Distance curve parameters shared by every distance model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceParams {
    pub reference_distance: f32,
    pub max_distance: f32,
    pub rolloff_factor: f32,
}

impl Default for DistanceParams {
    fn default() -> Self {
        Self {
            reference_distance: 1.0,
            max_distance: f32::MAX,
            rolloff_factor: 1.0,
        }
    }
}

/// Linear gain for a source `distance` units away from the listener.
pub fn distance_gain(model: DistanceModel, distance: f32, params: &DistanceParams) -> f32 {
    let reference = params.reference_distance;
    let max = params.max_distance;
    let rolloff = params.rolloff_factor;
    let mut d = zap(distance, 0.0).max(0.0);

    if model.is_clamped() {
        // a reference distance beyond the maximum disables attenuation
        if reference > max {
            return 1.0;
        }
        d = d.clamp(reference, max);
    }

    let gain = match model {
        DistanceModel::None => 1.0,
        DistanceModel::Inverse | DistanceModel::InverseClamped => {
            let denom = reference + rolloff * (d - reference);
            if denom > 0.0 { reference / denom } else { 1.0 }
        }
        DistanceModel::Linear | DistanceModel::LinearClamped => {
            let span = max - reference;
            if span > 0.0 {
                1.0 - rolloff * (d.min(max) - reference) / span
            } else {
                1.0
            }
        }
        DistanceModel::Exponential | DistanceModel::ExponentialClamped => {
            if reference > 0.0 && d > 0.0 {
                (d / reference).powf(-rolloff)
            } else {
                1.0
            }
        }
    };

    zap(gain, 1.0).max(0.0)
}

/// Directional gain of a cone with the given full inner/outer angles in degrees.
///
/// `angle` is the angle in degrees between the source direction and the vector
/// from the source to the listener.
pub fn cone_gain(angle: f32, inner_angle: f32, outer_angle: f32, outer_gain: f32) -> f32 {
    let half_inner = inner_angle * 0.5;
    let half_outer = outer_angle * 0.5;
    let angle = zap(angle, 0.0).abs();

    if angle <= half_inner {
        1.0
    } else if angle >= half_outer || half_outer <= half_inner {
        outer_gain
    } else {
        let t = (angle - half_inner) / (half_outer - half_inner);
        1.0 + (outer_gain - 1.0) * t
    }
}
