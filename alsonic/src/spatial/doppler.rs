use crate::math::{is_finite_vec, Vec3};

pub const MIN_DOPPLER: f32 = 0.125;
pub const MAX_DOPPLER: f32 = 16.0;

/// Pitch multiplier caused by relative motion of a source and the listener.
///
/// `relative` is the vector from the listener to the source. Degenerate input
/// (a zero velocity on either side, coincident positions, a zero factor, anything
/// non-finite) yields exactly 1.0; everything else is clamped to
/// `[MIN_DOPPLER, MAX_DOPPLER]`.
pub fn doppler_shift(
    relative: Vec3,
    source_velocity: Vec3,
    listener_velocity: Vec3,
    doppler_factor: f32,
    speed_of_sound: f32,
) -> f32 {
    if !(doppler_factor > 0.0 && doppler_factor.is_finite())
        || !(speed_of_sound > 0.0 && speed_of_sound.is_finite())
    {
        return 1.0;
    }
    if !is_finite_vec(relative) || !is_finite_vec(source_velocity) || !is_finite_vec(listener_velocity)
    {
        return 1.0;
    }
    if source_velocity == Vec3::ZERO || listener_velocity == Vec3::ZERO {
        return 1.0;
    }

    let to_listener = -relative;
    let distance = to_listener.length();
    if !(distance > f32::EPSILON) || !distance.is_finite() {
        return 1.0;
    }

    // radial speeds along the source-to-listener axis, positive toward the listener
    let limit = speed_of_sound / doppler_factor;
    let listener_radial = (to_listener.dot(listener_velocity) / distance).min(limit);
    let source_radial = (to_listener.dot(source_velocity) / distance).min(limit);

    let numerator = speed_of_sound - doppler_factor * listener_radial;
    let denominator = speed_of_sound - doppler_factor * source_radial;
    let shift = numerator / denominator;

    if !shift.is_finite() {
        return 1.0;
    }
    shift.clamp(MIN_DOPPLER, MAX_DOPPLER)
}

#[cfg(test)]
mod tests {
    use super::*;

    const C: f32 = 343.3;

    #[test]
    fn zero_velocity_is_unity() {
        let rel = Vec3::new(0.0, 0.0, -10.0);
        assert_eq!(doppler_shift(rel, Vec3::ZERO, Vec3::new(5.0, 0.0, 0.0), 1.0, C), 1.0);
        assert_eq!(doppler_shift(rel, Vec3::new(0.0, 0.0, 30.0), Vec3::ZERO, 1.0, C), 1.0);
    }

    #[test]
    fn approaching_raises_pitch() {
        // listener at the origin, source at -Z moving toward it, listener drifting sideways
        let rel = Vec3::new(0.0, 0.0, -10.0);
        let shift = doppler_shift(rel, Vec3::new(0.0, 0.0, 30.0), Vec3::new(1.0, 0.0, 0.0), 1.0, C);
        assert!(shift > 1.0);
        let receding =
            doppler_shift(rel, Vec3::new(0.0, 0.0, -30.0), Vec3::new(1.0, 0.0, 0.0), 1.0, C);
        assert!(receding < 1.0);
    }

    #[test]
    fn degenerate_inputs_are_unity() {
        let v = Vec3::new(0.0, 0.0, 30.0);
        assert_eq!(doppler_shift(Vec3::ZERO, v, v, 1.0, C), 1.0);
        assert_eq!(doppler_shift(Vec3::Z, v, v, 0.0, C), 1.0);
        assert_eq!(doppler_shift(Vec3::Z, Vec3::new(f32::NAN, 0.0, 0.0), v, 1.0, C), 1.0);
    }

    #[test]
    fn always_within_clamp_range() {
        let rel = Vec3::new(0.0, 0.0, -1.0);
        for speed in [-10_000.0f32, -400.0, -343.3, -100.0, 0.5, 100.0, 343.3, 400.0, 10_000.0] {
            for listener in [-10_000.0f32, -200.0, 3.0, 343.3, 10_000.0] {
                let shift = doppler_shift(
                    rel,
                    Vec3::new(0.0, 0.0, speed),
                    Vec3::new(0.0, 0.0, listener),
                    4.0,
                    C,
                );
                assert!((MIN_DOPPLER..=MAX_DOPPLER).contains(&shift), "{}", shift);
            }
        }
    }
}
