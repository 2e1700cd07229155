// Message types exchanged with the transport layer

use serde::{Deserialize, Serialize};

/// Manual teleoperation or the internal obstacle-avoidance law
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    #[default]
    Manual,
    Auto,
}

impl OperatingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatingMode::Manual => "manual",
            OperatingMode::Auto => "auto",
        }
    }
}

impl std::fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Command from teleop clients -> runtime
// Missing numeric fields default to zero, anything that does not decode is dropped by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    Move {
        #[serde(default)]
        vx: f32,
        #[serde(default)]
        vy: f32,
        #[serde(default)]
        vw: f32,
    },
    Mode {
        value: OperatingMode,
    },
    Speed {
        #[serde(default)]
        value: i32,
    },
    Servo {
        #[serde(default, alias = "channel")]
        id: i32,
        #[serde(default)]
        angle: f32,
    },
    ServoStep {
        #[serde(default, alias = "channel")]
        id: i32,
        #[serde(default)]
        step: f32,
    },
    ServoStop {
        #[serde(default, alias = "channel")]
        id: i32,
    },
    /// Bench check of one wheel, `id` 1..=4 and a signed duty
    MotorTest {
        #[serde(default)]
        id: i32,
        #[serde(default)]
        speed: i32,
    },
    Light {
        #[serde(default)]
        val: i32,
    },
    Horn {
        #[serde(default)]
        val: i32,
    },
    /// Keep-alive, no effect on the vehicle
    Ping,
}

impl Command {
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

/// Planar motion request, nominally in [-1, 1] per axis
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotionCommand {
    pub vx: f32,
    pub vy: f32,
    pub vw: f32,
}

impl MotionCommand {
    pub fn new(vx: f32, vy: f32, vw: f32) -> Self {
        Self { vx, vy, vw }
    }

    pub fn zero() -> Self {
        Self::default()
    }
}

/// Periodic telemetry snapshot published once per loop tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "status")]
pub struct Status {
    /// Filtered distance in cm, -1 when the last sensor cycle had no valid sample
    pub dist: f32,
    pub mode: OperatingMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v_car: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,
}

/// Broadcast to the remaining observers after a link loss has stopped the vehicle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "status_reset")]
pub struct StatusReset {
    pub reason: String,
}

impl StatusReset {
    pub fn client_disconnected() -> Self {
        Self {
            reason: "client_disconnected".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_move() {
        let cmd = Command::parse(br#"{"cmd":"move","vx":0.5,"vy":-0.25,"vw":0}"#).unwrap();
        assert_eq!(
            cmd,
            Command::Move {
                vx: 0.5,
                vy: -0.25,
                vw: 0.0
            }
        );
    }

    #[test]
    fn test_missing_fields_default_to_zero() {
        let cmd = Command::parse(br#"{"cmd":"move","vx":1}"#).unwrap();
        assert_eq!(
            cmd,
            Command::Move {
                vx: 1.0,
                vy: 0.0,
                vw: 0.0
            }
        );

        let cmd = Command::parse(br#"{"cmd":"horn"}"#).unwrap();
        assert_eq!(cmd, Command::Horn { val: 0 });
    }

    #[test]
    fn test_channel_alias() {
        let cmd = Command::parse(br#"{"cmd":"servo_step","channel":1,"step":-3}"#).unwrap();
        assert_eq!(cmd, Command::ServoStep { id: 1, step: -3.0 });

        let cmd = Command::parse(br#"{"cmd":"servo","id":0,"angle":45}"#).unwrap();
        assert_eq!(cmd, Command::Servo { id: 0, angle: 45.0 });
    }

    #[test]
    fn test_parse_motor_test() {
        let cmd = Command::parse(br#"{"cmd":"motor_test","id":3,"speed":-600}"#).unwrap();
        assert_eq!(cmd, Command::MotorTest { id: 3, speed: -600 });
    }

    #[test]
    fn test_mode_values() {
        let cmd = Command::parse(br#"{"cmd":"mode","value":"auto"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::Mode {
                value: OperatingMode::Auto
            }
        );
        assert!(Command::parse(br#"{"cmd":"mode","value":"turbo"}"#).is_err());
        assert!(Command::parse(br#"{"cmd":"mode"}"#).is_err());
    }

    #[test]
    fn test_malformed_rejected() {
        assert!(Command::parse(b"not json").is_err());
        assert!(Command::parse(br#"{"vx":1}"#).is_err());
        assert!(Command::parse(br#"{"cmd":"warp"}"#).is_err());
        assert!(Command::parse(br#"{"cmd":"move","vx":"fast"}"#).is_err());
    }

    #[test]
    fn test_status_wire_format() {
        let status = Status {
            dist: -1.0,
            mode: OperatingMode::Manual,
            v_car: None,
            rssi: None,
        };
        let json: serde_json::Value = serde_json::to_value(&status).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["dist"], -1.0);
        assert_eq!(json["mode"], "manual");
        assert!(json.get("v_car").is_none());
        assert!(json.get("rssi").is_none());
    }

    #[test]
    fn test_status_reset_wire_format() {
        let json = serde_json::to_value(StatusReset::client_disconnected()).unwrap();
        assert_eq!(json["type"], "status_reset");
        assert_eq!(json["reason"], "client_disconnected");
    }
}
