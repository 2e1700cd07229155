// Bridge diagnostic: READ-ONLY check of the peripheral bridge board
//
// Pings the bridge, takes a few range cycles and reads the battery. Nothing moves.
//
// Usage: cargo run --example bridge_diagnostic -- [port]

use mecanum_car_runtime::config::BRIDGE_PORT;
use mecanum_car_runtime::hw::{BatteryPort, Bridge};
use mecanum_car_runtime::sensor::RangeSensor;
use mecanum_car_runtime::telemetry::battery_volts;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("debug".parse().unwrap()),
        )
        .init();

    let port = std::env::args()
        .nth(1)
        .unwrap_or_else(|| BRIDGE_PORT.to_string());

    println!("Bridge diagnostic (read-only)");
    println!("Serial port: {}", port);
    println!();

    println!("Step 1: Opening serial port...");
    let mut bridge = match Bridge::open(&port) {
        Ok(bridge) => {
            println!("  ✓ Serial port opened");
            bridge
        }
        Err(e) => {
            println!("  ✗ Failed to open serial port: {}", e);
            println!("  - Check the port path and USB cable");
            return Err(e.into());
        }
    };

    println!("Step 2: Pinging bridge...");
    match bridge.ping() {
        Ok(true) => println!("  ✓ RESPONDING"),
        Ok(false) => {
            println!("  ✗ NO RESPONSE (check bridge power and baud rate)");
            return Ok(());
        }
        Err(e) => {
            println!("  ✗ ERROR: {}", e);
            return Err(e.into());
        }
    }

    println!("Step 3: Range sensor (5 cycles)...");
    let mut sensor = RangeSensor::new(bridge.clone());
    for i in 0..5 {
        let estimate = sensor.read();
        match estimate.distance_cm {
            Some(cm) => println!(
                "  cycle {}: {:.1} cm ({} valid samples)",
                i, cm, estimate.valid_samples
            ),
            None => println!("  cycle {}: no reading", i),
        }
    }

    println!("Step 4: Battery...");
    match bridge.read_battery_raw() {
        Ok(raw) => println!("  raw={} -> {:.2} V", raw, battery_volts(raw)),
        Err(e) => println!("  ✗ ERROR: {}", e),
    }

    println!();
    println!("Done.");
    Ok(())
}
