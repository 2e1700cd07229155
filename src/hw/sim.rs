// In-memory board for --sim runs and tests
//
// Records the most recent writes in order and serves scripted echo widths.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use super::{BatteryPort, HwError, IoPort, RangeTransducer, Result, ServoPort};

/// Writes kept in the log, older ones are dropped
pub const WRITE_LOG_CAPACITY: usize = 4096;

/// One recorded peripheral write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimWrite {
    Duty { channel: u8, duty: u16 },
    Level { pin: u8, high: bool },
    ServoPwm { channel: u8, on: u16, off: u16 },
}

#[derive(Debug, Default)]
struct SimState {
    writes: VecDeque<SimWrite>,
    duty: HashMap<u8, u16>,
    levels: HashMap<u8, bool>,
    servo: HashMap<u8, (u16, u16)>,
    echoes: VecDeque<Option<f32>>,
    fallback_echo: Option<f32>,
    battery_raw: u16,
    fail_writes: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SimBoard {
    state: Arc<Mutex<SimState>>,
}

impl SimBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue echo widths (microseconds) returned by subsequent measurements
    pub fn push_echoes<I: IntoIterator<Item = Option<f32>>>(&self, echoes: I) {
        self.state.lock().echoes.extend(echoes);
    }

    /// Echo width returned once the scripted queue is empty
    pub fn set_fallback_echo(&self, echo_us: Option<f32>) {
        self.state.lock().fallback_echo = echo_us;
    }

    pub fn set_battery_raw(&self, raw: u16) {
        self.state.lock().battery_raw = raw;
    }

    /// Make every subsequent write fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Logged writes, oldest first
    pub fn writes(&self) -> Vec<SimWrite> {
        self.state.lock().writes.iter().copied().collect()
    }

    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    pub fn duty(&self, channel: u8) -> u16 {
        self.state.lock().duty.get(&channel).copied().unwrap_or(0)
    }

    pub fn level(&self, pin: u8) -> bool {
        self.state.lock().levels.get(&pin).copied().unwrap_or(false)
    }

    pub fn servo_pwm(&self, channel: u8) -> Option<(u16, u16)> {
        self.state.lock().servo.get(&channel).copied()
    }

    fn record(&self, write: SimWrite, what: &'static str) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(HwError::Injected(what));
        }
        if state.writes.len() == WRITE_LOG_CAPACITY {
            state.writes.pop_front();
        }
        state.writes.push_back(write);
        match write {
            SimWrite::Duty { channel, duty } => {
                state.duty.insert(channel, duty);
            }
            SimWrite::Level { pin, high } => {
                state.levels.insert(pin, high);
            }
            SimWrite::ServoPwm { channel, on, off } => {
                state.servo.insert(channel, (on, off));
            }
        }
        Ok(())
    }
}

impl IoPort for SimBoard {
    fn set_duty(&mut self, channel: u8, duty: u16) -> Result<()> {
        self.record(SimWrite::Duty { channel, duty }, "duty")
    }

    fn set_level(&mut self, pin: u8, high: bool) -> Result<()> {
        self.record(SimWrite::Level { pin, high }, "gpio")
    }
}

impl ServoPort for SimBoard {
    fn set_pwm(&mut self, channel: u8, on: u16, off: u16) -> Result<()> {
        self.record(SimWrite::ServoPwm { channel, on, off }, "servo")
    }
}

impl RangeTransducer for SimBoard {
    fn measure_once(&mut self, timeout: Duration) -> Option<f32> {
        let mut state = self.state.lock();
        let echo = match state.echoes.pop_front() {
            Some(echo) => echo,
            None => state.fallback_echo,
        };
        // An echo longer than the wait window is a missed fall
        echo.filter(|&us| us <= timeout.as_micros() as f32)
    }
}

impl BatteryPort for SimBoard {
    fn read_battery_raw(&mut self) -> Result<u16> {
        Ok(self.state.lock().battery_raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_log_is_bounded() {
        let mut board = SimBoard::new();
        for i in 0..(WRITE_LOG_CAPACITY as u32 * 3) {
            board.set_duty(0, (i % 1024) as u16).unwrap();
        }
        board.set_level(7, true).unwrap();

        let writes = board.writes();
        assert_eq!(writes.len(), WRITE_LOG_CAPACITY);
        assert_eq!(writes.last(), Some(&SimWrite::Level { pin: 7, high: true }));
        // Latest state is still tracked past the log
        assert_eq!(board.duty(0), ((WRITE_LOG_CAPACITY as u32 * 3 - 1) % 1024) as u16);
        assert!(board.level(7));
    }

    #[test]
    fn test_failed_write_not_logged() {
        let mut board = SimBoard::new();
        board.set_fail_writes(true);
        assert!(board.set_pwm(1, 0, 300).is_err());
        assert!(board.writes().is_empty());
        assert_eq!(board.servo_pwm(1), None);
    }

    #[test]
    fn test_echo_longer_than_window_is_a_miss() {
        let mut board = SimBoard::new();
        board.push_echoes([Some(500.0), Some(40_000.0)]);
        let window = Duration::from_millis(30);
        assert_eq!(board.measure_once(window), Some(500.0));
        assert_eq!(board.measure_once(window), None);
    }
}
