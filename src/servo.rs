// Servo angle mapping and continuous-servo helpers for the PCA9685 expander
//
// 50 Hz frame, 4096 ticks per frame. Positional servos get a pulse between
// MIN_PULSE and MAX_PULSE ticks. Continuous servos are "stopped" by setting the
// full-OFF bit, which holds the output low instead of sending a centre pulse.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{
    MAX_PULSE, MIN_PULSE, SERVO_CHANNELS, STEP_ANGLE_NEGATIVE, STEP_ANGLE_POSITIVE, STEP_MAX,
    STEP_MS_PER_UNIT,
};
use crate::hw::{Result, ServoPort};

/// Bit 12 of the OFF register forces the channel fully off
pub const FULL_OFF: u16 = 0x1000;

/// Map an angle in degrees to an OFF tick count; out of range angles are clamped
pub fn angle_to_ticks(angle_deg: f32) -> u16 {
    let angle = angle_deg.clamp(0.0, 180.0);
    let span = (MAX_PULSE - MIN_PULSE) as f32;
    MIN_PULSE + ((angle / 180.0) * span).round() as u16
}

/// Validate a channel id coming off the wire
pub fn channel_id(id: i32) -> Option<u8> {
    u8::try_from(id).ok().filter(|&id| (id as usize) < SERVO_CHANNELS)
}

/// Bias angle and drive time for a simulated step, `None` for a zero step
pub fn plan_step(magnitude: f32) -> Option<(f32, Duration)> {
    let units = magnitude.abs().trunc();
    if !units.is_finite() || units < 1.0 {
        return None;
    }
    let angle = if magnitude > 0.0 {
        STEP_ANGLE_POSITIVE
    } else {
        STEP_ANGLE_NEGATIVE
    };
    let duration = Duration::from_millis(units as u64 * STEP_MS_PER_UNIT).min(STEP_MAX);
    Some((angle, duration))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServoChannel {
    pub id: u8,
    /// `None` while the output is held low
    pub angle_deg: Option<f32>,
}

pub struct ServoBank<S: ServoPort> {
    port: S,
    channels: [ServoChannel; SERVO_CHANNELS],
    // Per channel, bumped by every explicit command and every planned step.
    // A step only writes while its generation is still current.
    generations: [u64; SERVO_CHANNELS],
}

pub type SharedServos<S> = Arc<Mutex<ServoBank<S>>>;

impl<S: ServoPort> ServoBank<S> {
    pub fn new(port: S) -> Self {
        Self {
            port,
            channels: std::array::from_fn(|i| ServoChannel {
                id: i as u8,
                angle_deg: None,
            }),
            generations: [0; SERVO_CHANNELS],
        }
    }

    pub fn shared(self) -> SharedServos<S> {
        Arc::new(Mutex::new(self))
    }

    pub fn channel(&self, id: u8) -> Option<ServoChannel> {
        self.channels.get(id as usize).copied()
    }

    pub fn generation(&self, id: u8) -> u64 {
        self.generations.get(id as usize).copied().unwrap_or(0)
    }

    fn bump(&mut self, id: u8) -> u64 {
        match self.generations.get_mut(id as usize) {
            Some(generation) => {
                *generation = generation.wrapping_add(1);
                *generation
            }
            None => 0,
        }
    }

    /// Take ownership of a channel for a new step, superseding whatever ran before
    pub fn plan_step(&mut self, id: u8, magnitude: f32) -> Option<StepRequest> {
        let (bias_angle, duration) = plan_step(magnitude)?;
        Some(StepRequest {
            channel: id,
            bias_angle,
            duration,
            generation: self.bump(id),
        })
    }

    /// Returns the OFF tick count written
    pub fn set_angle(&mut self, id: u8, angle_deg: f32) -> Result<u16> {
        self.bump(id);
        self.write_angle(id, angle_deg)
    }

    pub fn stop(&mut self, id: u8) -> Result<()> {
        self.bump(id);
        self.write_stop(id)
    }

    fn write_angle(&mut self, id: u8, angle_deg: f32) -> Result<u16> {
        let angle = angle_deg.clamp(0.0, 180.0);
        let ticks = angle_to_ticks(angle);
        self.port.set_pwm(id, 0, ticks)?;
        if let Some(ch) = self.channels.get_mut(id as usize) {
            ch.angle_deg = Some(angle);
        }
        debug!("Servo {} -> {:.1} deg ({} ticks)", id, angle, ticks);
        Ok(ticks)
    }

    fn write_stop(&mut self, id: u8) -> Result<()> {
        self.port.set_pwm(id, 0, FULL_OFF)?;
        if let Some(ch) = self.channels.get_mut(id as usize) {
            ch.angle_deg = None;
        }
        Ok(())
    }

    /// Stop every channel once, attempting all of them even if one write fails
    pub fn stop_all(&mut self) -> Result<()> {
        let mut first_err = None;
        for id in 0..SERVO_CHANNELS as u8 {
            if let Err(e) = self.stop(id) {
                warn!("Failed to stop servo {}: {}", id, e);
                self.channels[id as usize].angle_deg = None;
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// A continuous-servo step handed off to its own task
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepRequest {
    pub channel: u8,
    pub bias_angle: f32,
    pub duration: Duration,
    pub generation: u64,
}

/// Drive the bias angle, wait, then stop
///
/// The lock is only held around the two writes, so a disconnect can stop the bank
/// while the step is sleeping. Once anything else touches the channel (a stop, an
/// angle, a newer step) this step writes nothing more.
pub async fn run_step<S: ServoPort>(servos: SharedServos<S>, req: StepRequest) -> Result<()> {
    {
        let mut bank = servos.lock();
        if bank.generation(req.channel) != req.generation {
            debug!("Servo {} step dropped, channel was superseded", req.channel);
            return Ok(());
        }
        bank.write_angle(req.channel, req.bias_angle)?;
    }

    tokio::time::sleep(req.duration).await;

    let mut bank = servos.lock();
    if bank.generation(req.channel) != req.generation {
        debug!("Servo {} step superseded, skipping stop", req.channel);
        return Ok(());
    }
    info!("Servo {} step done ({:?})", req.channel, req.duration);
    bank.write_stop(req.channel)
}
