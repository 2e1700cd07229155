// Mode/command state machine
//
// Arbitrates between teleop commands (Manual) and the obstacle-avoidance law (Auto)
// and owns the safety stop. One instance is owned by the control task; transport
// handlers never touch it directly, they queue events for that task.

use std::collections::HashSet;
use tracing::{debug, error, info, warn};

use crate::config::{
    AUTO_CREEP_VX, AUTO_TURN_VW, DUTY_MAX, HORN_PIN, LIGHT_PIN, OBSTACLE_CM, SPEED_SLIDER_MAX,
};
use crate::drive::{DriveTrain, Wheel, WheelSet};
use crate::hw::{IoPort, Result, ServoPort};
use crate::messages::{Command, MotionCommand, OperatingMode, StatusReset};
use crate::sensor::RangeEstimate;
use crate::servo::{self, SharedServos, StepRequest};

/// What the control task has to do after a command was applied
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    Applied,
    /// Accepted but without effect (e.g. move while in Auto, bad servo id)
    Ignored,
    /// Run on a separate task, see `servo::run_step`
    Step(StepRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyState {
    pub link_connected: bool,
    /// Set by a link loss, cleared by the next accepted command
    pub halted: bool,
}

/// App speed slider (0..=255) to max duty, 255 is full duty
pub fn slider_to_duty(value: i32) -> i32 {
    value.clamp(0, SPEED_SLIDER_MAX) * DUTY_MAX / SPEED_SLIDER_MAX
}

/// Auto-mode control law: turn in place and sound the horn when something is
/// closer than OBSTACLE_CM, otherwise creep forward. No reading counts as clear.
pub fn auto_law(estimate: &RangeEstimate) -> (MotionCommand, bool) {
    match estimate.distance_cm {
        Some(d) if d < OBSTACLE_CM => (MotionCommand::new(0.0, 0.0, AUTO_TURN_VW), true),
        _ => (MotionCommand::new(AUTO_CREEP_VX, 0.0, 0.0), false),
    }
}

pub struct Controller<P: IoPort, S: ServoPort> {
    drive: DriveTrain<P>,
    servos: SharedServos<S>,
    mode: OperatingMode,
    target: MotionCommand,
    light: bool,
    horn: bool,
    links: HashSet<String>,
    halted: bool,
}

impl<P: IoPort, S: ServoPort> Controller<P, S> {
    pub fn new(port: P, servos: SharedServos<S>) -> Self {
        Self {
            drive: DriveTrain::new(port),
            servos,
            mode: OperatingMode::Manual,
            target: MotionCommand::zero(),
            light: false,
            horn: false,
            links: HashSet::new(),
            halted: false,
        }
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    pub fn wheels(&self) -> WheelSet {
        self.drive.wheels()
    }

    pub fn target(&self) -> MotionCommand {
        self.target
    }

    pub fn max_duty(&self) -> i32 {
        self.drive.max_duty()
    }

    pub fn light(&self) -> bool {
        self.light
    }

    pub fn horn(&self) -> bool {
        self.horn
    }

    pub fn safety(&self) -> SafetyState {
        SafetyState {
            link_connected: !self.links.is_empty(),
            halted: self.halted,
        }
    }

    /// Handle for servo step tasks
    pub fn servos(&self) -> SharedServos<S> {
        self.servos.clone()
    }

    /// Apply one decoded command
    ///
    /// An actuator failure is returned to the caller; controller state still
    /// reflects the command.
    pub fn handle_command(&mut self, cmd: Command) -> Result<Outcome> {
        if cmd != Command::Ping && self.halted {
            info!("Command received after link loss, releasing halt");
            self.halted = false;
        }

        match cmd {
            Command::Move { vx, vy, vw } => match self.mode {
                OperatingMode::Manual => {
                    self.target = MotionCommand::new(vx, vy, vw);
                    self.drive.set_motion(self.target)?;
                    Ok(Outcome::Applied)
                }
                OperatingMode::Auto => {
                    debug!("Move ignored in auto mode");
                    Ok(Outcome::Ignored)
                }
            },
            Command::Mode { value } => {
                self.set_mode(value)?;
                Ok(Outcome::Applied)
            }
            Command::Speed { value } => {
                self.drive.set_max_duty(slider_to_duty(value));
                Ok(Outcome::Applied)
            }
            Command::Servo { id, angle } => {
                let Some(ch) = servo::channel_id(id) else {
                    warn!("Servo id {} out of range", id);
                    return Ok(Outcome::Ignored);
                };
                info!("Servo {} -> {} deg", ch, angle);
                self.servos.lock().set_angle(ch, angle)?;
                Ok(Outcome::Applied)
            }
            Command::ServoStep { id, step } => {
                let Some(ch) = servo::channel_id(id) else {
                    warn!("Servo id {} out of range", id);
                    return Ok(Outcome::Ignored);
                };
                let mut bank = self.servos.lock();
                match bank.plan_step(ch, step) {
                    Some(req) => Ok(Outcome::Step(req)),
                    None => {
                        bank.stop(ch)?;
                        Ok(Outcome::Applied)
                    }
                }
            }
            Command::ServoStop { id } => {
                let Some(ch) = servo::channel_id(id) else {
                    warn!("Servo id {} out of range", id);
                    return Ok(Outcome::Ignored);
                };
                self.servos.lock().stop(ch)?;
                Ok(Outcome::Applied)
            }
            Command::MotorTest { id, speed } => {
                if self.mode != OperatingMode::Manual {
                    debug!("Motor test ignored in auto mode");
                    return Ok(Outcome::Ignored);
                }
                let Some(wheel) = Wheel::from_motor_id(id) else {
                    warn!("Motor id {} out of range", id);
                    return Ok(Outcome::Ignored);
                };
                info!("Motor test: {:?} at {}", wheel, speed);
                self.drive.set_wheel(wheel, speed)?;
                Ok(Outcome::Applied)
            }
            Command::Light { val } => {
                self.set_light(val != 0)?;
                Ok(Outcome::Applied)
            }
            Command::Horn { val } => {
                self.set_horn(val != 0)?;
                Ok(Outcome::Applied)
            }
            Command::Ping => Ok(Outcome::Ignored),
        }
    }

    /// Any mode command stops the wheels and clears the cached target, even when
    /// the mode does not change
    fn set_mode(&mut self, mode: OperatingMode) -> Result<()> {
        info!("Mode changed: {} -> {}", self.mode, mode);
        let leaving_auto = self.mode == OperatingMode::Auto && mode != OperatingMode::Auto;
        self.mode = mode;
        self.target = MotionCommand::zero();
        self.drive.stop()?;
        if leaving_auto && self.horn {
            self.set_horn(false)?;
        }
        Ok(())
    }

    fn set_light(&mut self, on: bool) -> Result<()> {
        self.light = on;
        info!("Light: {}", on);
        self.drive.set_level(LIGHT_PIN, on)
    }

    fn set_horn(&mut self, on: bool) -> Result<()> {
        if self.horn != on {
            debug!("Horn: {}", on);
        }
        self.horn = on;
        self.drive.set_level(HORN_PIN, on)
    }

    /// Periodic step: runs the auto-mode law when in Auto and not halted
    pub fn tick(&mut self, estimate: &RangeEstimate) -> Result<()> {
        if self.mode != OperatingMode::Auto || self.halted {
            return Ok(());
        }

        let (cmd, horn) = auto_law(estimate);
        self.target = cmd;
        let drive_result = self.drive.set_motion(cmd).map(|_| ());
        let horn_result = self.set_horn(horn);
        drive_result.and(horn_result)
    }

    pub fn on_connect(&mut self, link: &str) {
        if self.links.insert(link.to_string()) {
            info!("Link up: {} ({} active)", link, self.links.len());
        }
    }

    /// Safety stop for a lost link
    ///
    /// Wheels are zeroed first, then every servo is stopped once, then light and
    /// horn go off. Never fails: write errors are logged. The returned notice must
    /// be broadcast only after this returns.
    pub fn on_disconnect(&mut self, link: &str) -> StatusReset {
        if let Err(e) = self.drive.stop() {
            error!("Motor stop failed during link loss: {}", e);
        }
        if let Err(e) = self.servos.lock().stop_all() {
            error!("Servo stop failed during link loss: {}", e);
        }

        self.target = MotionCommand::zero();
        self.halted = true;
        self.links.remove(link);

        if let Err(e) = self.set_light(false) {
            warn!("Failed to turn light off: {}", e);
        }
        if let Err(e) = self.set_horn(false) {
            warn!("Failed to turn horn off: {}", e);
        }

        warn!(
            "Link lost: {}, vehicle stopped ({} links remain)",
            link,
            self.links.len()
        );
        StatusReset::client_disconnected()
    }
}
