// Status snapshot published once per control tick

use tracing::debug;

use crate::config::{ADC_FULL_SCALE, ADC_VREF, BATTERY_DIVIDER};
use crate::hw::BatteryPort;
use crate::messages::{OperatingMode, Status};
use crate::sensor::RangeEstimate;

pub fn battery_volts(raw: u16) -> f32 {
    (raw as f32 * ADC_VREF / ADC_FULL_SCALE) * BATTERY_DIVIDER
}

pub struct Telemetry<B: BatteryPort> {
    battery: Option<B>,
}

impl<B: BatteryPort> Telemetry<B> {
    pub fn new(battery: Option<B>) -> Self {
        Self { battery }
    }

    /// `dist` carries the sentinel honestly; the auto law makes its own call on it
    pub fn snapshot(
        &mut self,
        mode: OperatingMode,
        estimate: &RangeEstimate,
        rssi: Option<i32>,
    ) -> Status {
        let v_car = self.battery.as_mut().and_then(|b| match b.read_battery_raw() {
            Ok(raw) => Some(battery_volts(raw)),
            Err(e) => {
                debug!("Battery read failed: {}", e);
                None
            }
        });

        Status {
            dist: estimate.sentinel_cm(),
            mode,
            v_car,
            rssi,
        }
    }
}
