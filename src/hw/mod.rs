// Peripheral primitives the controller drives
//
// Provides:
// - Traits for PWM/GPIO, servo PWM, echo ranging and battery ADC
// - Serial bridge board backend
// - In-memory simulation backend

pub mod bridge;
pub mod sim;

use std::time::Duration;

pub use bridge::Bridge;
pub use sim::{SimBoard, SimWrite};

/// Error types for peripheral access
#[derive(Debug, thiserror::Error)]
pub enum HwError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response from bridge: {reason}")]
    InvalidResponse { reason: String },

    #[error("Checksum mismatch in bridge response")]
    ChecksumMismatch,

    #[error("Bridge returned error status: 0x{status:02X}")]
    Device { status: u8 },

    #[error("Timeout waiting for bridge response")]
    Timeout,

    #[error("Injected fault on {0}")]
    Injected(&'static str),
}

pub type Result<T> = std::result::Result<T, HwError>;

/// Motor PWM channels and plain output pins
pub trait IoPort: Send {
    fn set_duty(&mut self, channel: u8, duty: u16) -> Result<()>;
    fn set_level(&mut self, pin: u8, high: bool) -> Result<()>;
}

/// 16-channel servo PWM expander with ON/OFF tick registers
pub trait ServoPort: Send {
    fn set_pwm(&mut self, channel: u8, on: u16, off: u16) -> Result<()>;
}

/// Ultrasonic transducer
pub trait RangeTransducer: Send {
    /// Trigger one ping and return the echo pulse width in microseconds.
    /// `None` when the echo did not rise or fall within `timeout`.
    fn measure_once(&mut self, timeout: Duration) -> Option<f32>;
}

pub trait BatteryPort: Send {
    /// Raw 12-bit ADC reading of the battery divider
    fn read_battery_raw(&mut self) -> Result<u16>;
}

/// Everything the runtime needs from one board
pub trait Board: IoPort + ServoPort + RangeTransducer + BatteryPort + Clone + 'static {}

impl<T> Board for T where T: IoPort + ServoPort + RangeTransducer + BatteryPort + Clone + 'static {}
