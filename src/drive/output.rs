// Motor output stage: clamping, dead-zone compensation and H-bridge direction pins

use tracing::debug;

use crate::config::{DEADZONE_THRESHOLD, DUTY_MAX, MIN_DUTY, MOTOR_PINS, MotorPins};
use crate::hw::{IoPort, Result};

/// Wheel positions, in [fl, fr, rl, rr] order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wheel {
    FrontLeft = 0,
    FrontRight = 1,
    RearLeft = 2,
    RearRight = 3,
}

pub const WHEELS: [Wheel; 4] = [
    Wheel::FrontLeft,
    Wheel::FrontRight,
    Wheel::RearLeft,
    Wheel::RearRight,
];

impl Wheel {
    /// Motor numbering used by the bench tools: 1=FL, 2=FR, 3=RL, 4=RR
    pub fn from_motor_id(id: i32) -> Option<Self> {
        let index = usize::try_from(id).ok()?.checked_sub(1)?;
        WHEELS.get(index).copied()
    }
}

/// Remap a requested duty magnitude so that small nonzero requests still move the car
///
/// `|duty| <= DEADZONE_THRESHOLD` becomes 0, `(DEADZONE_THRESHOLD, DUTY_MAX]` is mapped
/// linearly onto `[MIN_DUTY, DUTY_MAX]`. Sign is preserved, input is clamped first.
pub fn compensate_dead_zone(duty: i32) -> i32 {
    let duty = duty.clamp(-DUTY_MAX, DUTY_MAX);
    let magnitude = duty.abs();

    if magnitude <= DEADZONE_THRESHOLD {
        return 0;
    }

    let span_in = DUTY_MAX - DEADZONE_THRESHOLD;
    let span_out = DUTY_MAX - MIN_DUTY;
    let mapped = MIN_DUTY + (magnitude - DEADZONE_THRESHOLD) * span_out / span_in;

    mapped * duty.signum()
}

/// Drives the four H-bridge channels
pub struct MotorOutput<P: IoPort> {
    port: P,
    pins: [MotorPins; 4],
}

impl<P: IoPort> MotorOutput<P> {
    pub fn new(port: P) -> Self {
        Self::with_pins(port, MOTOR_PINS)
    }

    pub fn with_pins(port: P, pins: [MotorPins; 4]) -> Self {
        Self { port, pins }
    }

    /// Write one wheel: direction pins first, then the PWM duty
    ///
    /// Returns the duty actually written after compensation.
    pub fn apply_duty(&mut self, wheel: Wheel, signed_duty: i32) -> Result<i32> {
        let output = compensate_dead_zone(signed_duty);
        let pins = self.pins[wheel as usize];

        // Forward: IN1 high, IN2 low. Reverse: swapped. Zero: both low.
        let (in1, in2) = match output.signum() {
            1 => (true, false),
            -1 => (false, true),
            _ => (false, false),
        };
        self.port.set_level(pins.in1, in1)?;
        self.port.set_level(pins.in2, in2)?;
        self.port.set_duty(pins.pwm, output.unsigned_abs() as u16)?;

        debug!(
            "Wheel {:?}: requested={}, output={}",
            wheel, signed_duty, output
        );
        Ok(output)
    }

    /// Plain output pins (light, horn) live on the same port
    pub fn set_level(&mut self, pin: u8, high: bool) -> Result<()> {
        self.port.set_level(pin, high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::{SimBoard, SimWrite};

    #[test]
    fn test_motor_ids() {
        assert_eq!(Wheel::from_motor_id(1), Some(Wheel::FrontLeft));
        assert_eq!(Wheel::from_motor_id(4), Some(Wheel::RearRight));
        assert_eq!(Wheel::from_motor_id(0), None);
        assert_eq!(Wheel::from_motor_id(5), None);
        assert_eq!(Wheel::from_motor_id(-1), None);
    }

    #[test]
    fn test_zero_maps_to_zero() {
        assert_eq!(compensate_dead_zone(0), 0);
    }

    #[test]
    fn test_inside_dead_zone_is_zero() {
        for d in -DEADZONE_THRESHOLD..=DEADZONE_THRESHOLD {
            assert_eq!(compensate_dead_zone(d), 0, "duty {}", d);
        }
    }

    #[test]
    fn test_endpoints() {
        assert_eq!(compensate_dead_zone(DUTY_MAX), DUTY_MAX);
        assert_eq!(compensate_dead_zone(-DUTY_MAX), -DUTY_MAX);
        assert_eq!(compensate_dead_zone(DEADZONE_THRESHOLD + 1), MIN_DUTY);
        // Out of range requests clamp before mapping
        assert_eq!(compensate_dead_zone(10 * DUTY_MAX), DUTY_MAX);
    }

    #[test]
    fn test_monotonic_and_never_below_min() {
        let mut prev = 0;
        for d in 0..=DUTY_MAX {
            let out = compensate_dead_zone(d);
            assert!(out >= prev, "not monotonic at {}", d);
            assert!(out == 0 || out >= MIN_DUTY, "{} -> {} below MIN_DUTY", d, out);
            assert_eq!(compensate_dead_zone(-d), -out);
            prev = out;
        }
    }

    #[test]
    fn test_strictly_increasing_above_threshold() {
        // Output span is narrower than input span, so compare inputs two apart
        let mut d = DEADZONE_THRESHOLD + 1;
        while d + 2 <= DUTY_MAX {
            assert!(compensate_dead_zone(d) < compensate_dead_zone(d + 2));
            d += 1;
        }
    }

    #[test]
    fn test_forward_writes() {
        let board = SimBoard::new();
        let mut out = MotorOutput::new(board.clone());
        let written = out.apply_duty(Wheel::FrontLeft, DUTY_MAX).unwrap();
        assert_eq!(written, DUTY_MAX);

        let pins = MOTOR_PINS[0];
        assert_eq!(
            board.writes(),
            vec![
                SimWrite::Level { pin: pins.in1, high: true },
                SimWrite::Level { pin: pins.in2, high: false },
                SimWrite::Duty { channel: pins.pwm, duty: DUTY_MAX as u16 },
            ]
        );
    }

    #[test]
    fn test_reverse_and_coast() {
        let board = SimBoard::new();
        let mut out = MotorOutput::new(board.clone());
        let pins = MOTOR_PINS[3];

        out.apply_duty(Wheel::RearRight, -500).unwrap();
        assert!(!board.level(pins.in1));
        assert!(board.level(pins.in2));
        assert_eq!(board.duty(pins.pwm) as i32, compensate_dead_zone(500));

        out.apply_duty(Wheel::RearRight, 10).unwrap();
        assert!(!board.level(pins.in1));
        assert!(!board.level(pins.in2));
        assert_eq!(board.duty(pins.pwm), 0);
    }

    #[test]
    fn test_write_failure_reported() {
        let board = SimBoard::new();
        board.set_fail_writes(true);
        let mut out = MotorOutput::new(board);
        assert!(out.apply_duty(Wheel::FrontRight, 700).is_err());
    }
}
