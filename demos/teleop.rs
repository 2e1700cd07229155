// Keyboard teleop: WASD move, Z/X rotate, R/F speed, M mode, L light, H horn,
// J/K step camera servo, Q quit
//
// Usage: cargo run --example teleop -- [link-name]
//
// Holds a liveliness token for the whole session; quitting (or crashing) drops it
// and the runtime stops the car.
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::info;

const SPEEDS: [f64; 3] = [0.3, 0.6, 1.0]; // fraction of max duty
const SPEED_VALUES: [i64; 3] = [100, 180, 255]; // app-scale max duty
const INPUT_TIMEOUT_MS: u64 = 150; // Reset velocities after this much time with no input

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let link = std::env::args().nth(1).unwrap_or_else(|| "teleop".to_string());

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let _token = session
        .liveliness()
        .declare_token(format!("car/link/{}", link))
        .await?;
    let publisher = session.declare_publisher(format!("car/cmd/{}", link)).await?;

    info!("Controls: WASD=move, Z/X=rotate, R/F=speed, M=mode, L=light, H=horn, J/K=camera, Q=quit");

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    result
}

async fn send(
    publisher: &zenoh::pubsub::Publisher<'_>,
    cmd: Value,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    publisher.put(cmd.to_string()).await
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut speed_idx: usize = 0;
    let mut auto = false;
    let mut light = false;
    let mut horn = false;

    let mut vx = 0.0;
    let mut vy = 0.0;
    let mut vw = 0.0;
    let mut last_movement_input = Instant::now();
    let mut was_moving = false;

    send(publisher, json!({"cmd": "speed", "value": SPEED_VALUES[speed_idx]})).await?;

    loop {
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;
                let s = SPEEDS[speed_idx];

                match code {
                    KeyCode::Char('w') if pressed => {
                        vx = s;
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        vx = -s;
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('a') if pressed => {
                        vy = -s;
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('d') if pressed => {
                        vy = s;
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('z') if pressed => {
                        vw = -s;
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('x') if pressed => {
                        vw = s;
                        last_movement_input = Instant::now();
                    }

                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(2);
                        send(publisher, json!({"cmd": "speed", "value": SPEED_VALUES[speed_idx]}))
                            .await?;
                        info!("Speed: {}", SPEED_VALUES[speed_idx]);
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        send(publisher, json!({"cmd": "speed", "value": SPEED_VALUES[speed_idx]}))
                            .await?;
                        info!("Speed: {}", SPEED_VALUES[speed_idx]);
                    }

                    KeyCode::Char('m') if pressed => {
                        auto = !auto;
                        let mode = if auto { "auto" } else { "manual" };
                        send(publisher, json!({"cmd": "mode", "value": mode})).await?;
                        info!("Mode: {}", mode);
                    }
                    KeyCode::Char('l') if pressed => {
                        light = !light;
                        send(publisher, json!({"cmd": "light", "val": light as i32})).await?;
                    }
                    KeyCode::Char('h') if pressed => {
                        horn = !horn;
                        send(publisher, json!({"cmd": "horn", "val": horn as i32})).await?;
                    }
                    KeyCode::Char('j') if pressed => {
                        send(publisher, json!({"cmd": "servo_step", "id": 1, "step": -5})).await?;
                    }
                    KeyCode::Char('k') if pressed => {
                        send(publisher, json!({"cmd": "servo_step", "id": 1, "step": 5})).await?;
                    }

                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            vx = 0.0;
            vy = 0.0;
            vw = 0.0;
        }

        // Moves are only sent while moving, plus one zero when keys are released
        let moving = vx != 0.0 || vy != 0.0 || vw != 0.0;
        if moving || was_moving {
            send(publisher, json!({"cmd": "move", "vx": vx, "vy": vy, "vw": vw})).await?;
        }
        was_moving = moving;
    }

    Ok(())
}
