use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mecanum_car_runtime::config::{BRIDGE_PORT, LOOP_PERIOD};
use mecanum_car_runtime::hw::{Bridge, SimBoard};
use mecanum_car_runtime::runtime::{self, RunOptions};

/// Motion and telemetry runtime for the mecanum car
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Serial port of the peripheral bridge board
    #[arg(long, default_value = BRIDGE_PORT)]
    port: String,

    /// Run against the in-memory board instead of hardware
    #[arg(long)]
    sim: bool,

    /// Control/telemetry loop period in milliseconds
    #[arg(long, default_value_t = LOOP_PERIOD.as_millis() as u64)]
    loop_ms: u64,

    /// Exercise the range sensor and servos before starting
    #[arg(long)]
    self_test: bool,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let args = Args::parse();
    let opts = RunOptions {
        loop_period: Duration::from_millis(args.loop_ms.max(1)),
        self_test: args.self_test,
    };

    let result = if args.sim {
        info!("Using simulated board");
        runtime::run(SimBoard::new(), opts).await
    } else {
        match Bridge::open(&args.port) {
            Ok(bridge) => {
                info!("Bridge opened on {}", args.port);
                runtime::run(bridge, opts).await
            }
            Err(e) => Err(e.into()),
        }
    };

    if let Err(e) = result {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
