//! High-rate extrapolation between corrections.
//!
//! Runs synchronously inside the inertial ingestion context, once per raw
//! sample; it must never block. Keeps a rolling buffer of samples so the
//! continuous integrator can be rebuilt whenever the smoother commits a new
//! correction (the bias the prediction depends on changes with it); between
//! corrections each tick folds only the newest sample, O(1).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::axes::AxisSigns;
use crate::broker::StateBroker;
use crate::config::EstimatorConfig;
use crate::factors::Preintegrator;
use crate::types::{quat_to_wxyz, FastOutput, FusedPose, ImuSample, LatencyInfo};

pub struct FastPredictor {
    signs: AxisSigns,
    integrator: Preintegrator,
    buffer: VecDeque<ImuSample>,
    broker: Arc<StateBroker>,
    nominal_dt: f64,
    /// Timestamp of the previous raw sample; 0 until the first tick.
    last_sample_time: f64,
    /// Broker timestamp the integrator is currently anchored to.
    last_correction_time: f64,
    /// Timestamp of the last sample consumed out of the rolling buffer.
    buffer_cursor: f64,
}

impl FastPredictor {
    pub(crate) fn new(cfg: &EstimatorConfig, broker: Arc<StateBroker>) -> Self {
        Self {
            signs: cfg.axis_signs(),
            integrator: Preintegrator::new(cfg.gravity),
            buffer: VecDeque::new(),
            broker,
            nominal_dt: cfg.imu_dt,
            last_sample_time: 0.0,
            last_correction_time: 0.0,
            buffer_cursor: 0.0,
        }
    }

    /// One fast-path tick. Returns nothing until the first correction has
    /// been produced.
    pub fn process(&mut self, raw: ImuSample) -> Option<FastOutput> {
        let dt = if self.last_sample_time == 0.0 {
            self.nominal_dt
        } else {
            raw.timestamp - self.last_sample_time
        };
        self.last_sample_time = raw.timestamp;
        self.buffer.push_back(raw);

        let correction = self.broker.snapshot();
        if correction.timestamp == 0.0 {
            return None;
        }

        let (accel, gyro) = self.signs.correct(&raw);

        if correction.timestamp != self.last_correction_time {
            self.last_correction_time = correction.timestamp;
            self.reanchor(correction.timestamp, correction.bias);
        } else {
            self.integrator.integrate(accel, gyro, dt);
        }

        let predicted = self.integrator.predict(&correction.state);
        let unbiased_gyro = gyro - correction.bias.gyro;
        let now = wall_clock();

        Some(FastOutput {
            pose: FusedPose {
                timestamp: raw.timestamp,
                orientation: quat_to_wxyz(&predicted.orientation),
                position: predicted.position.into(),
                velocity: predicted.velocity.into(),
                angular_velocity: unbiased_gyro.into(),
            },
            latency: LatencyInfo {
                sample_time: raw.timestamp,
                ingest_delay: now - raw.timestamp,
                correction_age: raw.timestamp - correction.timestamp,
            },
        })
    }

    /// The corrected state changed: discard buffered samples the smoother has
    /// already folded in, rebind the integrator to the new bias, and replay
    /// the surviving window. The replay is a full re-integration; the bias
    /// used for every buffered sample changed with the correction.
    fn reanchor(&mut self, correction_time: f64, bias: crate::types::ImuBias) {
        let mut dropped_any = false;
        while self
            .buffer
            .front()
            .is_some_and(|s| s.timestamp < correction_time)
        {
            if let Some(s) = self.buffer.pop_front() {
                self.buffer_cursor = s.timestamp;
                dropped_any = true;
            }
        }
        if !dropped_any && self.buffer_cursor == 0.0 {
            // Nothing older than the correction was ever buffered; the
            // integration window starts at the correction itself.
            self.buffer_cursor = correction_time;
        }

        self.integrator.reset(bias);
        let mut cursor = self.buffer_cursor;
        for sample in &self.buffer {
            let (accel, gyro) = self.signs.correct(sample);
            let dt = sample.timestamp - cursor;
            cursor = sample.timestamp;
            self.integrator.integrate(accel, gyro, dt);
        }
        self.buffer_cursor = cursor;
    }

    #[cfg(test)]
    fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

fn wall_clock() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ImuBias, NavState};
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    const G: f64 = 9.8;

    fn predictor_with(cfg: EstimatorConfig) -> (FastPredictor, Arc<StateBroker>) {
        let broker = Arc::new(StateBroker::new());
        (FastPredictor::new(&cfg, Arc::clone(&broker)), broker)
    }

    fn predictor() -> (FastPredictor, Arc<StateBroker>) {
        predictor_with(EstimatorConfig::default())
    }

    fn stationary(t: f64) -> ImuSample {
        ImuSample {
            timestamp: t,
            accel: [0.0, 0.0, G],
            gyro: [0.0, 0.0, 0.0],
        }
    }

    fn anchored_state(x: f64) -> NavState {
        let mut state = NavState::identity();
        state.position = Vector3::new(x, 0.0, 0.0);
        state
    }

    #[test]
    fn test_no_output_before_first_correction() {
        let (mut pred, _broker) = predictor();
        for i in 0..10 {
            assert!(pred.process(stationary(1.0 + i as f64 * 0.005)).is_none());
        }
    }

    #[test]
    fn test_prediction_anchors_at_corrected_state() {
        let (mut pred, broker) = predictor();
        broker.publish(anchored_state(5.0), ImuBias::zeros(), 1.0);

        let mut out = None;
        for i in 1..=20 {
            out = pred.process(stationary(1.0 + i as f64 * 0.005));
        }
        let out = out.unwrap();
        assert_relative_eq!(out.pose.position[0], 5.0, epsilon = 1e-6);
        assert_relative_eq!(out.pose.position[2], 0.0, epsilon = 1e-6);
    }

    /// With the Y axis inverted, the published angular rate flips Y while X
    /// and Z match the raw input exactly.
    #[test]
    fn test_axis_inversion_flips_only_y() {
        let cfg: EstimatorConfig = serde_json::from_str(r#"{"invert_y": true}"#).unwrap();
        let (mut pred, broker) = predictor_with(cfg);
        broker.publish(NavState::identity(), ImuBias::zeros(), 1.0);

        let sample = ImuSample {
            timestamp: 1.005,
            accel: [0.0, 0.0, G],
            gyro: [0.011, 0.022, 0.033],
        };
        let out = pred.process(sample).unwrap();
        assert_eq!(out.pose.angular_velocity[0], 0.011);
        assert_eq!(out.pose.angular_velocity[1], -0.022);
        assert_eq!(out.pose.angular_velocity[2], 0.033);
    }

    #[test]
    fn test_gyro_bias_removed_from_output_rate() {
        let (mut pred, broker) = predictor();
        let bias = ImuBias::new(Vector3::zeros(), Vector3::new(0.01, 0.0, -0.005));
        broker.publish(NavState::identity(), bias, 1.0);

        let mut sample = stationary(1.005);
        sample.gyro = [0.02, 0.0, 0.0];
        let out = pred.process(sample).unwrap();
        assert_relative_eq!(out.pose.angular_velocity[0], 0.01, epsilon = 1e-12);
        assert_relative_eq!(out.pose.angular_velocity[2], 0.005, epsilon = 1e-12);
    }

    #[test]
    fn test_new_correction_drops_stale_buffer_and_reanchors() {
        let (mut pred, broker) = predictor();
        broker.publish(anchored_state(0.0), ImuBias::zeros(), 1.0);
        for i in 1..=40 {
            pred.process(stationary(1.0 + i as f64 * 0.005));
        }
        assert_eq!(pred.buffered(), 40);

        // A newer correction supersedes everything buffered before t=1.1475
        // (off the sample grid so the cut is unambiguous).
        broker.publish(anchored_state(10.0), ImuBias::zeros(), 1.1475);
        let out = pred.process(stationary(1.21)).unwrap();

        // Samples after the correction time survive: 1.150..=1.200 plus the
        // new one.
        assert_eq!(pred.buffered(), 12);
        assert_relative_eq!(out.pose.position[0], 10.0, epsilon = 1e-6);
        assert_relative_eq!(out.latency.correction_age, 0.0625, epsilon = 1e-9);
    }

    #[test]
    fn test_correction_age_reported() {
        let (mut pred, broker) = predictor();
        broker.publish(NavState::identity(), ImuBias::zeros(), 2.0);
        let out = pred.process(stationary(2.05)).unwrap();
        assert_relative_eq!(out.latency.correction_age, 0.05, epsilon = 1e-12);
        assert_eq!(out.latency.sample_time, 2.05);
    }
}
