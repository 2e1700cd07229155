// Control loop with zenoh transport
//
// Transport handlers (command subscriber, liveliness subscriber) only decode and
// queue events. A single consumer owns the Controller, so a link-loss stop is
// applied before any command queued after it, whichever link that command came from.
// Blocking work (range sampling, servo steps) runs outside the consumer.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep};
use tracing::{error, info, warn};
use zenoh::sample::SampleKind;

use crate::config::{
    EVENT_QUEUE_DEPTH, LOOP_PERIOD, SENSOR_PERIOD, SERVO_CAMERA, SERVO_PAN, SERVO_RESERVE,
    TOPIC_CMD, TOPIC_EVENTS, TOPIC_LINK, TOPIC_STATUS,
};
use crate::controller::{Controller, Outcome};
use crate::hw::{Board, IoPort, ServoPort};
use crate::messages::{Command, StatusReset};
use crate::sensor::{self, RangeSensor};
use crate::servo::{self, ServoBank, SharedServos};
use crate::telemetry::Telemetry;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub loop_period: Duration,
    pub self_test: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            loop_period: LOOP_PERIOD,
            self_test: false,
        }
    }
}

/// Everything the transport can hand to the control task
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    Command { link: String, cmd: Command },
    LinkUp(String),
    LinkDown(String),
}

/// "car/cmd/teleop" -> "teleop"
fn link_name(key: &str) -> String {
    key.splitn(3, '/').nth(2).unwrap_or(key).to_string()
}

/// Apply one event to the controller
///
/// Returns the reset notice to broadcast when the event was a link loss. The stop
/// has already been written by the time this returns.
pub fn apply_event<P, S>(controller: &mut Controller<P, S>, event: ControlEvent) -> Option<StatusReset>
where
    P: IoPort,
    S: ServoPort + 'static,
{
    match event {
        ControlEvent::Command { link, cmd } => {
            match controller.handle_command(cmd) {
                Ok(Outcome::Step(req)) => {
                    let servos = controller.servos();
                    tokio::spawn(async move {
                        if let Err(e) = servo::run_step(servos, req).await {
                            warn!("Servo {} step failed: {}", req.channel, e);
                        }
                    });
                }
                Ok(_) => {}
                Err(e) => warn!("Command from {} failed: {}", link, e),
            }
            None
        }
        ControlEvent::LinkUp(link) => {
            controller.on_connect(&link);
            None
        }
        ControlEvent::LinkDown(link) => Some(controller.on_disconnect(&link)),
    }
}

/// Startup check: range sensor, pan sweep, camera wiggle
pub async fn self_test<B: Board>(board: &B, servos: &SharedServos<B>) {
    info!("=== Hardware self test ===");

    let transducer = board.clone();
    let reading = tokio::task::spawn_blocking(move || {
        let mut sensor = RangeSensor::new(transducer);
        for _ in 0..3 {
            let cm = sensor.read_distance_cm();
            if cm >= 0.0 {
                return Some(cm);
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        None
    })
    .await
    .ok()
    .flatten();
    match reading {
        Some(cm) => info!("[PASS] Ultrasonic: {:.2} cm", cm),
        None => error!("[FAIL] Ultrasonic: timeout or not connected"),
    }

    let steps: [(u8, Option<f32>, u64); 7] = [
        (SERVO_PAN, Some(45.0), 300),
        (SERVO_PAN, Some(135.0), 300),
        (SERVO_PAN, Some(90.0), 0),
        (SERVO_CAMERA, Some(85.0), 200),
        (SERVO_CAMERA, Some(95.0), 200),
        (SERVO_CAMERA, None, 0),
        (SERVO_RESERVE, None, 0),
    ];
    for (channel, angle, dwell_ms) in steps {
        let result = match angle {
            Some(angle) => servos.lock().set_angle(channel, angle).map(|_| ()),
            None => servos.lock().stop(channel),
        };
        if let Err(e) = result {
            error!("[FAIL] Servo {}: {}", channel, e);
        }
        if dwell_ms > 0 {
            sleep(Duration::from_millis(dwell_ms)).await;
        }
    }

    info!("=== Self test complete ===");
}

pub async fn run<B: Board>(board: B, opts: RunOptions) -> Result<(), BoxError> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let commands = session.declare_subscriber(TOPIC_CMD).await?;
    let links = session.liveliness().declare_subscriber(TOPIC_LINK).await?;
    let pub_status = session.declare_publisher(TOPIC_STATUS).await?;
    let pub_events = session.declare_publisher(TOPIC_EVENTS).await?;

    let servos = ServoBank::new(board.clone()).shared();
    if opts.self_test {
        self_test(&board, &servos).await;
    }
    for channel in [SERVO_PAN, SERVO_CAMERA] {
        if let Err(e) = servos.lock().set_angle(channel, 90.0) {
            warn!("Failed to center servo {}: {}", channel, e);
        }
    }

    let mut controller = Controller::new(board.clone(), servos);
    let mut telemetry = Telemetry::new(Some(board.clone()));
    let estimates = sensor::spawn_sampler(RangeSensor::new(board), SENSOR_PERIOD)?;

    let (tx, mut rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

    let cmd_tx = tx.clone();
    tokio::spawn(async move {
        while let Ok(sample) = commands.recv_async().await {
            let link = link_name(sample.key_expr().as_str());
            match Command::parse(&sample.payload().to_bytes()) {
                Ok(cmd) => {
                    if cmd_tx.send(ControlEvent::Command { link, cmd }).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Dropping malformed command from {}: {}", link, e),
            }
        }
    });

    tokio::spawn(async move {
        while let Ok(sample) = links.recv_async().await {
            let link = link_name(sample.key_expr().as_str());
            let event = match sample.kind() {
                SampleKind::Put => ControlEvent::LinkUp(link),
                SampleKind::Delete => ControlEvent::LinkDown(link),
            };
            if tx.send(event).await.is_err() {
                break;
            }
        }
    });

    let mut tick = interval(opts.loop_period);

    info!(
        "Runtime started: {}ms loop, mode {}",
        opts.loop_period.as_millis(),
        controller.mode()
    );
    info!("Subscribed to: {}, {}", TOPIC_CMD, TOPIC_LINK);
    info!("Publishing to: {}, {}", TOPIC_STATUS, TOPIC_EVENTS);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let estimate = *estimates.borrow();
                if let Err(e) = controller.tick(&estimate) {
                    warn!("Auto-mode actuation failed: {}", e);
                }

                let status = telemetry.snapshot(controller.mode(), &estimate, None);
                let status_json = serde_json::to_string(&status)?;
                if let Err(e) = pub_status.put(status_json).await {
                    warn!("Failed to publish status: {}", e);
                }
            }
            event = rx.recv() => {
                let Some(event) = event else {
                    warn!("Transport handlers exited");
                    break;
                };
                if let Some(notice) = apply_event(&mut controller, event) {
                    let notice_json = serde_json::to_string(&notice)?;
                    if let Err(e) = pub_events.put(notice_json).await {
                        warn!("Failed to publish reset notice: {}", e);
                    }
                }
            }
        }
    }

    Ok(())
}
