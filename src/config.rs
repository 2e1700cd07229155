// Timing, limits, pin map and topics for the car runtime
use std::time::Duration;

// Control/telemetry loop period
pub const LOOP_PERIOD: Duration = Duration::from_millis(500);

// Capacity of the command queue between transport handlers and the control task
pub const EVENT_QUEUE_DEPTH: usize = 64;

// Zenoh key expressions
pub const TOPIC_CMD: &str = "car/cmd/**"; // commands, suffix names the link
pub const TOPIC_LINK: &str = "car/link/**"; // liveliness tokens
pub const TOPIC_STATUS: &str = "car/state/status"; // telemetry
pub const TOPIC_EVENTS: &str = "car/state/events"; // reset notices

// Serial port of the peripheral bridge board
pub const BRIDGE_PORT: &str = "/dev/ttyUSB0";

// === Drive ===

// 10-bit PWM
pub const DUTY_MAX: i32 = 1023;

// Top of the app speed slider, maps onto DUTY_MAX
pub const SPEED_SLIDER_MAX: i32 = 255;

// Requests at or below this magnitude cannot overcome static friction
pub const DEADZONE_THRESHOLD: i32 = 40;

// Smallest nonzero duty ever written to a motor
pub const MIN_DUTY: i32 = 300;

/// PWM channel and direction pins of one wheel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorPins {
    pub pwm: u8,
    pub in1: u8,
    pub in2: u8,
}

// Order: front-left, front-right, rear-left, rear-right
pub const MOTOR_PINS: [MotorPins; 4] = [
    MotorPins { pwm: 0, in1: 21, in2: 13 },
    MotorPins { pwm: 1, in1: 5, in2: 6 },
    MotorPins { pwm: 2, in1: 15, in2: 16 },
    MotorPins { pwm: 3, in1: 18, in2: 8 },
];

pub const LIGHT_PIN: u8 = 2;
pub const HORN_PIN: u8 = 3;

// === Servos (PCA9685, 50 Hz, 4096 ticks per period) ===

pub const SERVO_CHANNELS: usize = 16;
pub const SERVO_PERIOD_TICKS: u32 = 4096;
pub const SERVO_FRAME_US: u32 = 20_000;

const fn pulse_ticks(width_us: u32) -> u16 {
    (width_us * SERVO_PERIOD_TICKS / SERVO_FRAME_US) as u16
}

// 500us and 2500us pulses
pub const MIN_PULSE: u16 = pulse_ticks(500);
pub const MAX_PULSE: u16 = pulse_ticks(2500);

// Continuous servo: 90 holds still, above turns CCW, below turns CW
pub const STEP_ANGLE_POSITIVE: f32 = 95.0;
pub const STEP_ANGLE_NEGATIVE: f32 = 85.0;
pub const STEP_MS_PER_UNIT: u64 = 20;
pub const STEP_MAX: Duration = Duration::from_millis(500);

pub const SERVO_PAN: u8 = 0; // ultrasonic pan
pub const SERVO_CAMERA: u8 = 1; // continuous rotation
pub const SERVO_RESERVE: u8 = 2;

// === Range sensor ===

pub const RANGE_SAMPLES: usize = 5;
pub const ECHO_TIMEOUT: Duration = Duration::from_micros(30_000);
pub const INTER_SAMPLE_DELAY: Duration = Duration::from_millis(15);
pub const SENSOR_PERIOD: Duration = Duration::from_millis(100);

// cm per microsecond, halved later for the round trip
pub const SPEED_OF_SOUND_CM_PER_US: f32 = 0.0343;

pub const RANGE_MIN_CM: f32 = 2.0;
pub const RANGE_MAX_CM: f32 = 400.0;

// === Auto mode ===

pub const OBSTACLE_CM: f32 = 30.0;
pub const AUTO_TURN_VW: f32 = 0.6;
pub const AUTO_CREEP_VX: f32 = 0.4;

// === Battery ===

// 12-bit ADC on a 3.3V reference behind a 1:4 divider
pub const ADC_FULL_SCALE: f32 = 4095.0;
pub const ADC_VREF: f32 = 3.3;
pub const BATTERY_DIVIDER: f32 = 4.0;
