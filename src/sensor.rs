// Ultrasonic range filter
//
// Each cycle takes RANGE_SAMPLES pings, keeps the ones inside the sensor's working
// range and reduces them with a trimmed mean. Sampling blocks for a bounded time
// (RANGE_SAMPLES * (2 * ECHO_TIMEOUT + INTER_SAMPLE_DELAY) at worst), so it runs
// on its own thread and publishes the latest estimate through a watch channel.

use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::{
    ECHO_TIMEOUT, INTER_SAMPLE_DELAY, RANGE_MAX_CM, RANGE_MIN_CM, RANGE_SAMPLES,
    SPEED_OF_SOUND_CM_PER_US,
};
use crate::hw::RangeTransducer;

/// Filtered distance for one sensor cycle
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RangeEstimate {
    /// `None` when no sample of the cycle was usable
    pub distance_cm: Option<f32>,
    pub valid_samples: usize,
}

impl RangeEstimate {
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Wire form: -1 for "no reading"
    pub fn sentinel_cm(&self) -> f32 {
        self.distance_cm.unwrap_or(-1.0)
    }
}

/// Round-trip echo width to one-way distance
pub fn echo_to_cm(echo_us: f32) -> f32 {
    echo_us * SPEED_OF_SOUND_CM_PER_US / 2.0
}

pub fn in_range(cm: f32) -> bool {
    (RANGE_MIN_CM..=RANGE_MAX_CM).contains(&cm)
}

/// Reduce raw distances (cm) to one estimate
///
/// Out of range samples are discarded. With three or more left the smallest and
/// largest are dropped before averaging, two are averaged, one is returned as is.
pub fn filter_samples(samples_cm: &[f32]) -> RangeEstimate {
    let mut valid: Vec<f32> = samples_cm.iter().copied().filter(|&cm| in_range(cm)).collect();
    valid.sort_by(|a, b| a.total_cmp(b));

    let kept = match valid.len() {
        n if n >= 3 => &valid[1..n - 1],
        _ => &valid[..],
    };
    let distance_cm = if kept.is_empty() {
        None
    } else {
        Some(kept.iter().sum::<f32>() / kept.len() as f32)
    };

    RangeEstimate {
        distance_cm,
        valid_samples: valid.len(),
    }
}

pub struct RangeSensor<T: RangeTransducer> {
    transducer: T,
    samples: usize,
    echo_timeout: Duration,
    inter_sample_delay: Duration,
}

impl<T: RangeTransducer> RangeSensor<T> {
    pub fn new(transducer: T) -> Self {
        Self::with_timing(transducer, RANGE_SAMPLES, ECHO_TIMEOUT, INTER_SAMPLE_DELAY)
    }

    pub fn with_timing(
        transducer: T,
        samples: usize,
        echo_timeout: Duration,
        inter_sample_delay: Duration,
    ) -> Self {
        Self {
            transducer,
            samples,
            echo_timeout,
            inter_sample_delay,
        }
    }

    /// One full sensor cycle. Blocks, never fails: misses only lower the sample count.
    pub fn read(&mut self) -> RangeEstimate {
        let mut raw = Vec::with_capacity(self.samples);
        for i in 0..self.samples {
            if let Some(echo_us) = self.transducer.measure_once(self.echo_timeout) {
                raw.push(echo_to_cm(echo_us));
            }
            // Let the previous ping die out before the next one
            if i + 1 < self.samples && !self.inter_sample_delay.is_zero() {
                std::thread::sleep(self.inter_sample_delay);
            }
        }

        let estimate = filter_samples(&raw);
        if estimate.distance_cm.is_none() {
            debug!("No valid range sample this cycle ({} echoes)", raw.len());
        }
        estimate
    }

    /// Distance in cm, or -1 when the cycle had no valid sample
    pub fn read_distance_cm(&mut self) -> f32 {
        self.read().sentinel_cm()
    }
}

/// Sample forever on a dedicated thread; stops once every receiver is dropped
pub fn spawn_sampler<T: RangeTransducer + 'static>(
    mut sensor: RangeSensor<T>,
    period: Duration,
) -> std::io::Result<watch::Receiver<RangeEstimate>> {
    let (tx, rx) = watch::channel(RangeEstimate::unknown());
    std::thread::Builder::new()
        .name("range-sensor".into())
        .spawn(move || {
            info!("Range sampler started ({:?} period)", period);
            loop {
                let estimate = sensor.read();
                if tx.send(estimate).is_err() {
                    break;
                }
                std::thread::sleep(period);
            }
            info!("Range sampler stopped");
        })?;
    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::SimBoard;

    fn cm_to_echo(cm: f32) -> f32 {
        cm * 2.0 / SPEED_OF_SOUND_CM_PER_US
    }

    fn fast_sensor(board: SimBoard) -> RangeSensor<SimBoard> {
        RangeSensor::with_timing(board, RANGE_SAMPLES, ECHO_TIMEOUT, Duration::ZERO)
    }

    #[test]
    fn test_trimmed_mean_with_outlier() {
        // 450 is out of range -> 4 valid -> drop 9.8 and 10.2
        let est = filter_samples(&[10.0, 10.2, 9.8, 450.0, 10.1]);
        assert_eq!(est.valid_samples, 4);
        let d = est.distance_cm.unwrap();
        assert!((d - 10.05).abs() < 1e-4, "got {}", d);
    }

    #[test]
    fn test_no_valid_samples() {
        let est = filter_samples(&[]);
        assert_eq!(est.distance_cm, None);
        assert_eq!(est.sentinel_cm(), -1.0);

        let est = filter_samples(&[1.0, 500.0, f32::NAN]);
        assert_eq!(est.distance_cm, None);
        assert_eq!(est.valid_samples, 0);
    }

    #[test]
    fn test_one_and_two_samples() {
        assert_eq!(filter_samples(&[42.0]).distance_cm, Some(42.0));
        assert_eq!(filter_samples(&[40.0, 50.0]).distance_cm, Some(45.0));
    }

    #[test]
    fn test_three_samples_keeps_median() {
        assert_eq!(filter_samples(&[100.0, 20.0, 21.0]).distance_cm, Some(21.0));
    }

    #[test]
    fn test_range_limits_inclusive() {
        assert!(in_range(2.0));
        assert!(in_range(400.0));
        assert!(!in_range(1.99));
        assert!(!in_range(400.1));
    }

    #[test]
    fn test_echo_conversion() {
        // 1000us round trip ~ 17.15 cm
        assert!((echo_to_cm(1000.0) - 17.15).abs() < 1e-3);
    }

    #[test]
    fn test_read_with_misses() {
        let board = SimBoard::new();
        board.push_echoes([
            Some(cm_to_echo(25.0)),
            None,
            Some(cm_to_echo(24.0)),
            Some(cm_to_echo(26.0)),
            None,
        ]);
        let est = fast_sensor(board).read();
        assert_eq!(est.valid_samples, 3);
        assert!((est.distance_cm.unwrap() - 25.0).abs() < 1e-2);
    }

    #[test]
    fn test_read_all_misses_gives_sentinel() {
        let board = SimBoard::new();
        let mut sensor = fast_sensor(board);
        assert_eq!(sensor.read_distance_cm(), -1.0);
    }

    #[test]
    fn test_echo_past_timeout_is_a_miss() {
        let board = SimBoard::new();
        board.set_fallback_echo(Some(ECHO_TIMEOUT.as_micros() as f32 + 1.0));
        assert_eq!(fast_sensor(board).read().distance_cm, None);
    }

    #[test]
    fn test_takes_exactly_n_samples() {
        let board = SimBoard::new();
        board.push_echoes((0..RANGE_SAMPLES + 2).map(|_| Some(cm_to_echo(50.0))));
        let mut sensor = fast_sensor(board.clone());
        assert_eq!(sensor.read().valid_samples, RANGE_SAMPLES);
        // The two extra echoes are left for the next cycle
        assert_eq!(
            RangeSensor::with_timing(board, 2, ECHO_TIMEOUT, Duration::ZERO)
                .read()
                .valid_samples,
            2
        );
    }
}
