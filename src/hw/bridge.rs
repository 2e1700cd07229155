// Serial peripheral bridge
//
// The bridge board owns the motor PWM timers, direction GPIOs, the PCA9685 on its
// I2C bus, the ultrasonic pins and the battery ADC. The host talks to it over a
// framed serial protocol:
// Request:  [0xFF, 0xFF, ID, Length, Instruction, Params..., Checksum]
// Response: [0xFF, 0xFF, ID, Length, Status, Params..., Checksum]

use parking_lot::Mutex;
use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{BatteryPort, HwError, IoPort, RangeTransducer, Result, ServoPort};

pub const DEFAULT_BAUDRATE: u32 = 921_600;

pub const DEFAULT_TIMEOUT_MS: u64 = 100;

// Added to the echo window when waiting for a MeasureEcho response
pub const ECHO_FRAME_MARGIN: Duration = Duration::from_millis(10);

// Longest a measurement defers to pending actuator writes before taking the bus
pub const ECHO_YIELD_LIMIT: Duration = Duration::from_millis(20);

/// Bridge board address on the serial link
pub const BRIDGE_ID: u8 = 0x01;

const HEADER: [u8; 2] = [0xFF, 0xFF];

/// Instruction set
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Instruction {
    Ping = 0x01,
    SetDuty = 0x10,
    SetLevel = 0x11,
    SetServoPwm = 0x12,
    MeasureEcho = 0x13,
    ReadAdc = 0x14,
}

/// Echo outcome byte returned by `MeasureEcho`
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EchoStatus {
    Ok = 0,
    NoRise = 1,
    NoFall = 2,
}

/// Low level framing over the serial port
pub struct BridgeBus {
    port: Box<dyn SerialPort>,
}

impl BridgeBus {
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self { port })
    }

    /// Inverted byte sum over everything after the header
    fn checksum(data: &[u8]) -> u8 {
        let sum: u16 = data.iter().map(|&b| b as u16).sum();
        (!sum & 0xFF) as u8
    }

    fn build_packet(instruction: Instruction, params: &[u8]) -> Vec<u8> {
        let length = (params.len() + 2) as u8; // instruction + params + checksum
        let mut packet = Vec::with_capacity(6 + params.len());

        packet.extend_from_slice(&HEADER);
        packet.push(BRIDGE_ID);
        packet.push(length);
        packet.push(instruction as u8);
        packet.extend_from_slice(params);
        packet.push(Self::checksum(&packet[2..]));

        packet
    }

    fn read_response(&mut self) -> Result<Vec<u8>> {
        let mut header = [0u8; 2];
        self.port.read_exact(&mut header).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                HwError::Timeout
            } else {
                HwError::Io(e)
            }
        })?;

        if header != HEADER {
            return Err(HwError::InvalidResponse {
                reason: format!("Invalid header: {:02X?}", header),
            });
        }

        let mut id_length = [0u8; 2];
        self.port.read_exact(&mut id_length)?;
        let id = id_length[0];
        let length = id_length[1] as usize;

        if id != BRIDGE_ID {
            return Err(HwError::InvalidResponse {
                reason: format!("ID mismatch: expected {}, got {}", BRIDGE_ID, id),
            });
        }
        if length < 2 {
            return Err(HwError::InvalidResponse {
                reason: format!("Length {} too short", length),
            });
        }

        // status + params + checksum
        let mut remaining = vec![0u8; length];
        self.port.read_exact(&mut remaining)?;

        let mut checksum_data = vec![id, length as u8];
        checksum_data.extend_from_slice(&remaining[..length - 1]);
        if Self::checksum(&checksum_data) != remaining[length - 1] {
            return Err(HwError::ChecksumMismatch);
        }

        let status = remaining[0];
        if status != 0 {
            return Err(HwError::Device { status });
        }

        Ok(remaining[1..length - 1].to_vec())
    }

    /// Send one instruction and wait for its response parameters
    pub fn transact(&mut self, instruction: Instruction, params: &[u8]) -> Result<Vec<u8>> {
        let packet = Self::build_packet(instruction, params);
        self.port.write_all(&packet)?;
        self.port.flush()?;
        self.read_response()
    }

    /// Same as `transact` with a one-off response timeout
    pub fn transact_within(
        &mut self,
        instruction: Instruction,
        params: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        self.port.set_timeout(timeout)?;
        let result = self.transact(instruction, params);
        self.port
            .set_timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))?;
        result
    }

    pub fn ping(&mut self) -> Result<bool> {
        match self.transact(Instruction::Ping, &[]) {
            Ok(_) => Ok(true),
            Err(HwError::Timeout) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Count of actuator writes waiting for or holding the bus
///
/// Echo measurements hold the bus for up to the echo window, so they step aside
/// while any write is pending.
#[derive(Debug, Clone, Default)]
pub struct WritePriority {
    pending: Arc<AtomicUsize>,
}

/// Held for the duration of one actuator write
pub struct WriteTicket {
    pending: Arc<AtomicUsize>,
}

impl Drop for WriteTicket {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

impl WritePriority {
    pub fn begin_write(&self) -> WriteTicket {
        self.pending.fetch_add(1, Ordering::AcqRel);
        WriteTicket {
            pending: self.pending.clone(),
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Block until no write is pending or `limit` has passed; true when clear
    pub fn wait_for_writers(&self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        while self.pending() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }
}

/// Serial timeout for a MeasureEcho round trip with the given echo window
pub fn echo_response_timeout(window: Duration) -> Duration {
    window + ECHO_FRAME_MARGIN
}

/// Shared handle to the bridge, cloned into the control task, the servo helpers
/// and the sensor thread
#[derive(Clone)]
pub struct Bridge {
    bus: Arc<Mutex<BridgeBus>>,
    writes: WritePriority,
}

impl Bridge {
    pub fn open(port_name: &str) -> Result<Self> {
        Ok(Self {
            bus: Arc::new(Mutex::new(BridgeBus::open(port_name)?)),
            writes: WritePriority::default(),
        })
    }

    pub fn ping(&self) -> Result<bool> {
        self.bus.lock().ping()
    }

    fn write(&self, instruction: Instruction, params: &[u8]) -> Result<()> {
        let _ticket = self.writes.begin_write();
        self.bus.lock().transact(instruction, params).map(|_| ())
    }
}

impl IoPort for Bridge {
    fn set_duty(&mut self, channel: u8, duty: u16) -> Result<()> {
        let [lo, hi] = duty.to_le_bytes();
        debug!("Bridge duty: ch={}, duty={}", channel, duty);
        self.write(Instruction::SetDuty, &[channel, lo, hi])
    }

    fn set_level(&mut self, pin: u8, high: bool) -> Result<()> {
        self.write(Instruction::SetLevel, &[pin, high as u8])
    }
}

impl ServoPort for Bridge {
    fn set_pwm(&mut self, channel: u8, on: u16, off: u16) -> Result<()> {
        let [on_lo, on_hi] = on.to_le_bytes();
        let [off_lo, off_hi] = off.to_le_bytes();
        debug!("Bridge servo pwm: ch={}, on={}, off=0x{:04X}", channel, on, off);
        self.write(
            Instruction::SetServoPwm,
            &[channel, on_lo, on_hi, off_lo, off_hi],
        )
    }
}

impl RangeTransducer for Bridge {
    fn measure_once(&mut self, timeout: Duration) -> Option<f32> {
        let timeout_us = timeout.as_micros().min(u16::MAX as u128) as u16;
        let [lo, hi] = timeout_us.to_le_bytes();
        if !self.writes.wait_for_writers(ECHO_YIELD_LIMIT) {
            debug!("Writes still pending, measuring anyway");
        }
        let response = match self.bus.lock().transact_within(
            Instruction::MeasureEcho,
            &[lo, hi],
            echo_response_timeout(timeout),
        ) {
            Ok(response) => response,
            Err(e) => {
                warn!("Echo measurement failed: {}", e);
                return None;
            }
        };
        decode_echo(&response)
    }
}

impl BatteryPort for Bridge {
    fn read_battery_raw(&mut self) -> Result<u16> {
        let response = self.bus.lock().transact(Instruction::ReadAdc, &[])?;
        if response.len() < 2 {
            return Err(HwError::InvalidResponse {
                reason: format!("Expected 2 ADC bytes, got {}", response.len()),
            });
        }
        Ok(u16::from_le_bytes([response[0], response[1]]))
    }
}

/// [status, width_lo, width_hi] -> echo width in microseconds
fn decode_echo(response: &[u8]) -> Option<f32> {
    match response {
        [status, lo, hi] if *status == EchoStatus::Ok as u8 => {
            Some(u16::from_le_bytes([*lo, *hi]) as f32)
        }
        [status, ..] => {
            debug!("No echo (status {})", status);
            None
        }
        [] => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum() {
        // ID=1, Length=5, SET_DUTY, ch=2, duty=0x01F4
        let data = [1u8, 5, 0x10, 2, 0xF4, 0x01];
        // ~(1+5+16+2+244+1) = ~269 -> low byte of !0x010D = 0xF2
        assert_eq!(BridgeBus::checksum(&data), 0xF2);
    }

    #[test]
    fn test_build_packet() {
        let packet = BridgeBus::build_packet(Instruction::SetLevel, &[21, 1]);
        assert_eq!(packet.len(), 8);
        assert_eq!(&packet[..2], &HEADER);
        assert_eq!(packet[2], BRIDGE_ID);
        assert_eq!(packet[3], 4); // instruction + 2 params + checksum
        assert_eq!(packet[4], Instruction::SetLevel as u8);
        assert_eq!(packet[7], BridgeBus::checksum(&packet[2..7]));
    }

    #[test]
    fn test_echo_timeout_tracks_window() {
        let window = Duration::from_micros(30_000);
        assert_eq!(echo_response_timeout(window), Duration::from_millis(40));
        assert!(echo_response_timeout(window) < Duration::from_millis(DEFAULT_TIMEOUT_MS));
    }

    #[test]
    fn test_write_ticket_released_on_drop() {
        let writes = WritePriority::default();
        let a = writes.begin_write();
        let b = writes.clone().begin_write();
        assert_eq!(writes.pending(), 2);
        drop(a);
        drop(b);
        assert_eq!(writes.pending(), 0);
        assert!(writes.wait_for_writers(Duration::ZERO));
    }

    #[test]
    fn test_measurement_waits_for_pending_write() {
        let writes = WritePriority::default();
        let ticket = writes.begin_write();

        let waiter = {
            let writes = writes.clone();
            std::thread::spawn(move || {
                let start = Instant::now();
                let clear = writes.wait_for_writers(Duration::from_secs(1));
                (clear, start.elapsed())
            })
        };
        std::thread::sleep(Duration::from_millis(30));
        drop(ticket);

        let (clear, waited) = waiter.join().unwrap();
        assert!(clear);
        assert!(waited >= Duration::from_millis(20));
    }

    #[test]
    fn test_measurement_gives_up_after_limit() {
        let writes = WritePriority::default();
        let _ticket = writes.begin_write();
        assert!(!writes.wait_for_writers(Duration::from_millis(5)));
    }

    #[test]
    fn test_decode_echo() {
        assert_eq!(decode_echo(&[0, 0x2C, 0x01]), Some(300.0));
        assert_eq!(decode_echo(&[EchoStatus::NoRise as u8, 0, 0]), None);
        assert_eq!(decode_echo(&[EchoStatus::NoFall as u8, 0xFF, 0xFF]), None);
        assert_eq!(decode_echo(&[]), None);
    }
}
