// Drive module for the four-wheel mecanum base
//
// Provides:
// - Mecanum inverse kinematics (motion request -> wheel duties)
// - Motor output stage (dead-zone compensation, direction pins)
// - DriveTrain: owns the max-duty scalar and the last commanded WheelSet

pub mod kinematics;
pub mod output;

use tracing::{info, warn};

pub use kinematics::{compute_wheel_set, wheel_fractions, WheelSet};
pub use output::{compensate_dead_zone, MotorOutput, Wheel, WHEELS};

use crate::config::DUTY_MAX;
use crate::hw::{IoPort, Result};
use crate::messages::MotionCommand;

pub struct DriveTrain<P: IoPort> {
    output: MotorOutput<P>,
    max_duty: i32,
    wheels: WheelSet,
}

impl<P: IoPort> DriveTrain<P> {
    pub fn new(port: P) -> Self {
        Self::with_output(MotorOutput::new(port))
    }

    pub fn with_output(output: MotorOutput<P>) -> Self {
        Self {
            output,
            max_duty: DUTY_MAX,
            wheels: WheelSet::zero(),
        }
    }

    pub fn max_duty(&self) -> i32 {
        self.max_duty
    }

    /// Takes effect on the next motion update, the current wheels are left alone
    pub fn set_max_duty(&mut self, max_duty: i32) {
        self.max_duty = max_duty.clamp(0, DUTY_MAX);
        info!("Max duty set to {}", self.max_duty);
    }

    /// Last commanded wheel duties (before dead-zone compensation)
    pub fn wheels(&self) -> WheelSet {
        self.wheels
    }

    /// Run kinematics and write all four wheels
    pub fn set_motion(&mut self, cmd: MotionCommand) -> Result<WheelSet> {
        let wheels = compute_wheel_set(cmd, self.max_duty);
        self.set_wheels(wheels)?;
        Ok(wheels)
    }

    /// Every wheel is attempted even if an earlier one fails, the first error is returned
    pub fn set_wheels(&mut self, wheels: WheelSet) -> Result<()> {
        self.wheels = wheels;
        let mut first_err = None;
        for (wheel, duty) in WHEELS.into_iter().zip(wheels.as_array()) {
            if let Err(e) = self.output.apply_duty(wheel, duty) {
                warn!("Failed to write {:?}: {}", wheel, e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Write a single wheel, leaving the other three as they are
    pub fn set_wheel(&mut self, wheel: Wheel, duty: i32) -> Result<i32> {
        let mut duties = self.wheels.as_array();
        duties[wheel as usize] = duty.clamp(-DUTY_MAX, DUTY_MAX);
        self.wheels = WheelSet::from_array(duties);
        self.output.apply_duty(wheel, duty)
    }

    pub fn stop(&mut self) -> Result<()> {
        self.set_wheels(WheelSet::zero())
    }

    pub fn set_level(&mut self, pin: u8, high: bool) -> Result<()> {
        self.output.set_level(pin, high)
    }
}

impl<P: IoPort> Drop for DriveTrain<P> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to stop motors on drop: {}", e);
        }
    }
}
