// Mecanum inverse kinematics for the X-configured four-wheel base
// Converts a planar motion request (vx, vy, vw) to signed wheel duties.

use crate::config::DUTY_MAX;
use crate::messages::MotionCommand;

/// Signed duty per wheel, each within [-DUTY_MAX, DUTY_MAX]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WheelSet {
    pub fl: i32,
    pub fr: i32,
    pub rl: i32,
    pub rr: i32,
}

impl WheelSet {
    pub fn new(fl: i32, fr: i32, rl: i32, rr: i32) -> Self {
        Self { fl, fr, rl, rr }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::zero()
    }

    /// Returns duties as array [fl, fr, rl, rr]
    pub fn as_array(&self) -> [i32; 4] {
        [self.fl, self.fr, self.rl, self.rr]
    }

    pub fn from_array([fl, fr, rl, rr]: [i32; 4]) -> Self {
        Self { fl, fr, rl, rr }
    }
}

/// Per-wheel speed fractions in [-1, 1], [fl, fr, rl, rr]
///
/// When any wheel would exceed 1 all four are divided by the largest magnitude,
/// so the ratio between wheels (and therefore the travel direction) survives.
pub fn wheel_fractions(vx: f32, vy: f32, vw: f32) -> [f32; 4] {
    let mut wheels = [
        vx + vy + vw, // FL
        vx - vy - vw, // FR
        vx - vy + vw, // RL
        vx + vy - vw, // RR
    ];

    let max = wheels.iter().fold(0.0f32, |acc, w| acc.max(w.abs()));
    if max > 1.0 {
        for w in &mut wheels {
            *w /= max;
        }
    }

    wheels
}

/// Convert a motion request to wheel duties scaled by `max_duty`
///
/// Inputs are untrusted: out of range values are normalized, non-finite values
/// collapse to zero duty.
pub fn compute_wheel_set(cmd: MotionCommand, max_duty: i32) -> WheelSet {
    let max_duty = max_duty.clamp(0, DUTY_MAX) as f32;
    // `as` truncates toward zero and maps NaN to 0
    let [fl, fr, rl, rr] = wheel_fractions(cmd.vx, cmd.vy, cmd.vw)
        .map(|w| ((w * max_duty) as i32).clamp(-DUTY_MAX, DUTY_MAX));

    WheelSet { fl, fr, rl, rr }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wheels(vx: f32, vy: f32, vw: f32) -> WheelSet {
        compute_wheel_set(MotionCommand::new(vx, vy, vw), DUTY_MAX)
    }

    #[test]
    fn test_zero_velocity() {
        assert!(wheels(0.0, 0.0, 0.0).is_zero());
    }

    #[test]
    fn test_half_forward_needs_no_normalization() {
        let w = wheels(0.5, 0.0, 0.0);
        let expected = (0.5 * DUTY_MAX as f32) as i32;
        assert_eq!(w, WheelSet::new(expected, expected, expected, expected));
    }

    #[test]
    fn test_diagonal_is_normalized() {
        // raw (2, 0, 0, 2) -> (1, 0, 0, 1)
        let w = wheels(1.0, 1.0, 0.0);
        assert_eq!(w, WheelSet::new(DUTY_MAX, 0, 0, DUTY_MAX));
    }

    #[test]
    fn test_rotation_only() {
        // Left side forward, right side backward
        let w = wheels(0.0, 0.0, 0.5);
        assert!(w.fl > 0 && w.rl > 0);
        assert!(w.fr < 0 && w.rr < 0);
        assert_eq!(w.fl, -w.fr);
    }

    #[test]
    fn test_strafe() {
        let w = wheels(0.0, 0.5, 0.0);
        assert!(w.fl > 0 && w.rr > 0);
        assert!(w.fr < 0 && w.rl < 0);
    }

    #[test]
    fn test_bounded_and_ratio_preserved() {
        let axis = [-3.0f32, -1.0, -0.7, -0.2, 0.0, 0.3, 0.9, 1.0, 2.5];
        for &vx in &axis {
            for &vy in &axis {
                for &vw in &axis {
                    let raw = [vx + vy + vw, vx - vy - vw, vx - vy + vw, vx + vy - vw];
                    let norm = wheel_fractions(vx, vy, vw);

                    for w in norm {
                        assert!(w.abs() <= 1.0 + 1e-6, "{:?} exceeds 1", norm);
                    }
                    // norm = raw / k for a single k >= 1
                    let max_raw = raw.iter().fold(0.0f32, |a, w| a.max(w.abs()));
                    let k = max_raw.max(1.0);
                    for i in 0..4 {
                        assert!((norm[i] * k - raw[i]).abs() < 1e-4);
                    }

                    for d in wheels(vx, vy, vw).as_array() {
                        assert!(d.abs() <= DUTY_MAX);
                    }
                }
            }
        }
    }

    #[test]
    fn test_scaled_by_max_duty() {
        let w = compute_wheel_set(MotionCommand::new(1.0, 0.0, 0.0), 400);
        assert_eq!(w, WheelSet::new(400, 400, 400, 400));

        // Scalar above the hardware limit is capped
        let w = compute_wheel_set(MotionCommand::new(-1.0, 0.0, 0.0), 5000);
        assert_eq!(w, WheelSet::new(-DUTY_MAX, -DUTY_MAX, -DUTY_MAX, -DUTY_MAX));
    }

    #[test]
    fn test_truncates_toward_zero() {
        let w = compute_wheel_set(MotionCommand::new(-0.5, 0.0, 0.0), 3);
        // -1.5 -> -1
        assert_eq!(w.fl, -1);
    }

    #[test]
    fn test_non_finite_inputs() {
        let w = wheels(f32::NAN, 0.0, 0.0);
        assert!(w.is_zero());

        let w = wheels(f32::INFINITY, 0.0, 0.0);
        for d in w.as_array() {
            assert!(d.abs() <= DUTY_MAX);
        }
    }
}
