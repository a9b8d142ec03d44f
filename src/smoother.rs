//! Lower-rate incremental smoother loop.
//!
//! Consumes the buffered sensor queues at ~10 Hz, builds the factor-graph
//! increment for one correction window, hands it to the estimation backend,
//! and publishes the corrected state to the broker. Runs on its own dedicated
//! thread and is the only context allowed to block indefinitely.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use log::{debug, info, warn};
use nalgebra::{UnitQuaternion, Vector3};

use crate::axes::AxisSigns;
use crate::backend::{BackendError, EstimationBackend};
use crate::broker::StateBroker;
use crate::config::EstimatorConfig;
use crate::error::{EstimatorError, Result};
use crate::factors::constraints::{
    bias_walk_sigmas, gps_position_sigmas, pose_prior_sigmas, ANTENNA_OFFSET_SIGMAS, ODOM_SIGMAS,
};
use crate::factors::{Constraint, Preintegrator};
use crate::geodesy::EnuProjector;
use crate::queue::BoundedQueue;
use crate::types::{
    quat_to_wxyz, CorrectedEstimate, GpsFix, ImuBias, ImuSample, NavState, OdomSample, Pose3,
};

/// Reference attitude used to seed the very first pose and bias priors.
///
/// Supplied externally (e.g. from an attitude filter observed before startup)
/// or derived from the configured fixed initial pose.
#[derive(Clone, Copy, Debug)]
pub struct InitialAttitude {
    pub orientation: UnitQuaternion<f64>,
    pub bias: ImuBias,
}

impl InitialAttitude {
    pub fn level() -> Self {
        Self {
            orientation: UnitQuaternion::identity(),
            bias: ImuBias::zeros(),
        }
    }

    /// Attitude from the configured fixed initial roll/pitch/yaw.
    pub fn from_config(cfg: &EstimatorConfig) -> Self {
        Self {
            orientation: UnitQuaternion::from_euler_angles(
                cfg.initial_roll,
                cfg.initial_pitch,
                cfg.initial_yaw,
            ),
            bias: ImuBias::zeros(),
        }
    }
}

pub struct Smoother<B: EstimationBackend> {
    backend: B,
    cfg: EstimatorConfig,
    signs: AxisSigns,
    sensor_pose: Pose3,
    vehicle_rotation: Pose3,
    antenna_offset: Pose3,
    initial: InitialAttitude,
    projector: EnuProjector,
    window: Preintegrator,

    gps_queue: Arc<BoundedQueue<GpsFix>>,
    imu_queue: Arc<BoundedQueue<ImuSample>>,
    odom_queue: Arc<BoundedQueue<OdomSample>>,
    broker: Arc<StateBroker>,
    corrections: Sender<CorrectedEstimate>,

    odom_window: VecDeque<OdomSample>,
    initialized: bool,
    index: u64,
    prev_state: NavState,
    prev_bias: ImuBias,
    prev_time: f64,
    /// Newest inertial sample popped but not yet integrated.
    pending_imu: Option<ImuSample>,
    /// Timestamp of the last sample folded into a window.
    window_cursor: f64,
}

impl<B: EstimationBackend> Smoother<B> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        cfg: EstimatorConfig,
        initial: InitialAttitude,
        backend: B,
        gps_queue: Arc<BoundedQueue<GpsFix>>,
        imu_queue: Arc<BoundedQueue<ImuSample>>,
        odom_queue: Arc<BoundedQueue<OdomSample>>,
        broker: Arc<StateBroker>,
        corrections: Sender<CorrectedEstimate>,
    ) -> Self {
        let projector = if cfg.fixed_origin {
            EnuProjector::with_origin(cfg.origin_latitude, cfg.origin_longitude, cfg.origin_altitude)
        } else {
            EnuProjector::new()
        };
        Self {
            signs: cfg.axis_signs(),
            sensor_pose: cfg.sensor_pose(),
            vehicle_rotation: cfg.vehicle_rotation(),
            antenna_offset: cfg.antenna_offset(),
            window: Preintegrator::new(cfg.gravity),
            projector,
            cfg,
            initial,
            backend,
            gps_queue,
            imu_queue,
            odom_queue,
            broker,
            corrections,
            odom_window: VecDeque::new(),
            initialized: false,
            index: 0,
            prev_state: NavState::identity(),
            prev_bias: ImuBias::zeros(),
            prev_time: 0.0,
            pending_imu: None,
            window_cursor: 0.0,
        }
    }

    /// Runs the correction loop until the process is externally terminated.
    /// Returns only on a fatal estimator error.
    pub fn run(&mut self) -> Result<()> {
        let period = Duration::from_secs_f64(self.cfg.smoother_period);
        loop {
            let started = Instant::now();
            self.cycle()?;
            if let Some(remaining) = period.checked_sub(started.elapsed()) {
                thread::sleep(remaining);
            }
        }
    }

    /// One smoother iteration: select a correction source, build the graph
    /// increment, update the backend, publish.
    fn cycle(&mut self) -> Result<()> {
        if !self.initialized {
            // Uninitialized: block until the first usable fix arrives, then
            // drain the GPS queue to its latest element.
            let fix = self.drain_gps_to_latest();
            return self.initialize(fix);
        }

        while let Some(sample) = self.odom_queue.try_pop() {
            self.odom_window.push_back(sample);
        }

        let mut fix = None;
        let cycle_time = if !self.gps_queue.is_empty() {
            let latest = self.drain_gps_to_latest();
            let t = latest.timestamp;
            fix = Some(latest);
            t
        } else if let Some(last) = self.odom_window.back() {
            last.timestamp
        } else {
            // Neither source has data; wait out the cycle.
            return Ok(());
        };

        self.steady_cycle(cycle_time, fix)
    }

    fn drain_gps_to_latest(&mut self) -> GpsFix {
        let mut latest = self.gps_queue.pop();
        while let Some(newer) = self.gps_queue.try_pop() {
            latest = newer;
        }
        latest
    }

    /// Uninitialized -> SteadyState. Happens exactly once, on the first fix.
    fn initialize(&mut self, fix: GpsFix) -> Result<()> {
        let enu = if self.cfg.fixed_origin {
            self.projector.forward(fix.latitude, fix.longitude, fix.altitude)
        } else {
            self.projector.set_origin(fix.latitude, fix.longitude, fix.altitude);
            Vector3::zeros()
        };

        let rotation =
            self.sensor_pose.rotation * self.initial.orientation * self.vehicle_rotation.rotation;
        let x0 = Pose3::new(rotation, enu);
        let antenna0 = x0.compose(&self.antenna_offset);

        self.backend
            .add_variables(0, x0, Vector3::zeros(), self.initial.bias, antenna0);
        self.backend.add_factors(vec![
            Constraint::PriorPose {
                index: 0,
                pose: x0,
                sigmas: pose_prior_sigmas(self.cfg.initial_rotation_noise, self.cfg.gps_sigma),
            },
            Constraint::PriorVelocity {
                index: 0,
                velocity: Vector3::zeros(),
                sigma: self.cfg.initial_velocity_noise,
            },
            Constraint::PriorBias {
                index: 0,
                bias: self.initial.bias,
                accel_sigma: self.cfg.initial_bias_noise_accel,
                gyro_sigma: self.cfg.initial_bias_noise_gyro,
            },
            Constraint::AntennaOffset {
                index: 0,
                offset: self.antenna_offset,
                sigmas: ANTENNA_OFFSET_SIGMAS,
            },
        ]);
        self.backend.update()?;

        // Establish the integration starting point: consume inertial samples
        // strictly older than the fix.
        let mut sample = self.imu_queue.pop();
        // A lone sample still needs a dt on the next cycle.
        self.window_cursor = sample.timestamp - self.cfg.imu_dt;
        while sample.timestamp < fix.timestamp {
            self.window_cursor = sample.timestamp;
            sample = self.imu_queue.pop();
        }
        self.pending_imu = Some(sample);

        self.prev_state = NavState {
            orientation: x0.rotation,
            position: x0.translation,
            velocity: Vector3::zeros(),
        };
        self.prev_bias = self.initial.bias;
        self.prev_time = fix.timestamp;
        self.initialized = true;
        info!(
            "first fix anchored at ({:.6}, {:.6}, {:.1})",
            fix.latitude, fix.longitude, fix.altitude
        );
        Ok(())
    }

    fn steady_cycle(&mut self, cycle_time: f64, fix: Option<GpsFix>) -> Result<()> {
        let mut constraints = Vec::new();

        // Odometry from before the previous correction is stale.
        while self
            .odom_window
            .front()
            .is_some_and(|s| s.timestamp < self.prev_time)
        {
            self.odom_window.pop_front();
        }

        if fix.is_none() && self.odom_window.is_empty() {
            warn!("odometry-selected cycle has no usable odometry; skipping");
            return Ok(());
        }

        if let Some(c) = self.odometry_constraint(cycle_time, fix.is_some()) {
            constraints.push(c);
        }

        // Integrate every buffered inertial sample older than this cycle.
        self.window.reset(self.prev_bias);
        let mut sample = match self.pending_imu.take() {
            Some(s) => s,
            None => self.imu_queue.pop(),
        };
        while sample.timestamp < cycle_time {
            let (accel, gyro) = self.signs.correct(&sample);
            let dt = sample.timestamp - self.window_cursor;
            self.window_cursor = sample.timestamp;
            self.window.integrate(accel, gyro, dt);
            sample = self.imu_queue.pop();
        }
        self.pending_imu = Some(sample);

        let delta = self.window.delta();
        let next = self.index + 1;
        constraints.push(Constraint::RelativeMotion {
            from: self.index,
            to: next,
            delta,
        });
        let (accel_sigma, gyro_sigma) = bias_walk_sigmas(
            self.cfg.accel_bias_sigma,
            self.cfg.gyro_bias_sigma,
            delta.elapsed,
        );
        constraints.push(Constraint::BiasWalk {
            from: self.index,
            to: next,
            accel_sigma,
            gyro_sigma,
        });

        // Initial value for the new variables only; never the output.
        let predicted = self.window.predict(&self.prev_state);

        if let Some(fix) = fix {
            let enu = self.projector.forward(fix.latitude, fix.longitude, fix.altitude);
            constraints.push(Constraint::AbsolutePosition {
                index: next,
                position: enu,
                sigmas: gps_position_sigmas(self.cfg.gps_sigma),
            });
            constraints.push(Constraint::AntennaOffset {
                index: next,
                offset: self.antenna_offset,
                sigmas: ANTENNA_OFFSET_SIGMAS,
            });
        }

        self.backend.add_variables(
            next,
            predicted.pose(),
            predicted.velocity,
            self.prev_bias,
            predicted.pose().compose(&self.antenna_offset),
        );
        self.backend.add_factors(constraints);
        self.backend.update()?;

        let pose = self
            .backend
            .pose(next)
            .ok_or(BackendError::UnknownVariable(next))?;
        let velocity = self
            .backend
            .velocity(next)
            .ok_or(BackendError::UnknownVariable(next))?;
        let bias = self
            .backend
            .bias(next)
            .ok_or(BackendError::UnknownVariable(next))?;
        self.check_finite(&pose, &velocity, next)?;

        self.prev_state = NavState {
            orientation: pose.rotation,
            position: pose.translation,
            velocity,
        };
        self.prev_bias = bias;
        self.broker.publish(self.prev_state, bias, cycle_time);

        let estimate = CorrectedEstimate {
            index: next,
            timestamp: cycle_time,
            orientation: quat_to_wxyz(&pose.rotation),
            position: pose.translation.into(),
            velocity: velocity.into(),
            accel_bias: bias.accel.into(),
            gyro_bias: bias.gyro.into(),
        };
        if self.corrections.try_send(estimate).is_err() {
            debug!("corrections channel full; dropping estimate {next}");
        }

        self.index = next;
        self.prev_time = cycle_time;
        Ok(())
    }

    /// Relative-pose constraint over the buffered odometry window, skipped
    /// when a newer GPS correction supersedes the window. Links the current
    /// index to itself: no state index is allocated for odometry corrections.
    fn odometry_constraint(&mut self, cycle_time: f64, using_gps: bool) -> Option<Constraint> {
        let usable = if using_gps {
            self.odom_window
                .iter()
                .take_while(|s| s.timestamp < cycle_time)
                .count()
        } else {
            self.odom_window.len()
        };
        if usable < 2 {
            return None;
        }

        let first = self.odom_window[0];
        let last = self.odom_window[usable - 1];
        let delta = first.pose().between(&last.pose());
        self.odom_window.drain(..usable);

        Some(Constraint::RelativePose {
            from: self.index,
            to: self.index,
            delta,
            sigmas: ODOM_SIGMAS,
        })
    }

    fn check_finite(&self, pose: &Pose3, velocity: &Vector3<f64>, index: u64) -> Result<()> {
        if !pose.translation.iter().all(|v| v.is_finite())
            || !pose.rotation.coords.iter().all(|v| v.is_finite())
        {
            return Err(EstimatorError::NonFinite {
                quantity: "pose",
                index,
            });
        }
        if !velocity.iter().all(|v| v.is_finite()) {
            return Err(EstimatorError::NonFinite {
                quantity: "velocity",
                index,
            });
        }
        Ok(())
    }

    #[cfg(test)]
    fn backend(&self) -> &B {
        &self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::RecordingBackend;
    use crossbeam_channel::bounded;

    struct Fixture {
        smoother: Smoother<RecordingBackend>,
        gps: Arc<BoundedQueue<GpsFix>>,
        imu: Arc<BoundedQueue<ImuSample>>,
        odom: Arc<BoundedQueue<OdomSample>>,
        broker: Arc<StateBroker>,
        _corrections: crossbeam_channel::Receiver<CorrectedEstimate>,
    }

    fn fixture() -> Fixture {
        let cfg = EstimatorConfig::default();
        let gps = Arc::new(BoundedQueue::new(cfg.gps_queue_capacity));
        let imu = Arc::new(BoundedQueue::new(cfg.imu_queue_capacity));
        let odom = Arc::new(BoundedQueue::new(cfg.odom_queue_capacity));
        let broker = Arc::new(StateBroker::new());
        let (tx, rx) = bounded(64);
        let smoother = Smoother::new(
            cfg,
            InitialAttitude::level(),
            RecordingBackend::new(),
            Arc::clone(&gps),
            Arc::clone(&imu),
            Arc::clone(&odom),
            Arc::clone(&broker),
            tx,
        );
        Fixture {
            smoother,
            gps,
            imu,
            odom,
            broker,
            _corrections: rx,
        }
    }

    fn fix_at(t: f64) -> GpsFix {
        GpsFix {
            timestamp: t,
            latitude: 33.7756,
            longitude: -84.3963,
            altitude: 290.0,
        }
    }

    fn stationary_imu(t: f64) -> ImuSample {
        ImuSample {
            timestamp: t,
            accel: [0.0, 0.0, 9.8],
            gyro: [0.0, 0.0, 0.0],
        }
    }

    fn odom_at(t: f64, x: f64) -> OdomSample {
        OdomSample {
            timestamp: t,
            orientation: [1.0, 0.0, 0.0, 0.0],
            position: [x, 0.0, 0.0],
        }
    }

    /// One fix at t=0 plus 50 inertial samples at 200 Hz drives exactly one
    /// Uninitialized -> SteadyState transition with index-0 priors at zero
    /// velocity.
    #[test]
    fn test_first_fix_initializes_exactly_once() {
        let mut f = fixture();
        f.gps.try_push(fix_at(0.0));
        for i in 1..=50 {
            f.imu.try_push(stationary_imu(i as f64 * 0.005));
        }

        f.smoother.cycle().unwrap();
        assert!(f.smoother.initialized);
        assert_eq!(f.smoother.index, 0);

        let backend = f.smoother.backend();
        assert_eq!(backend.variables.len(), 1);
        assert_eq!(backend.variables[0].index, 0);
        assert_eq!(backend.variables[0].velocity, Vector3::zeros());
        let priors = backend
            .constraints
            .iter()
            .filter(|c| matches!(c, Constraint::PriorPose { .. }))
            .count();
        assert_eq!(priors, 1);

        // A second fix runs a steady cycle, not another initialization.
        f.gps.try_push(fix_at(0.2));
        f.smoother.cycle().unwrap();
        let backend = f.smoother.backend();
        let priors = backend
            .constraints
            .iter()
            .filter(|c| matches!(c, Constraint::PriorPose { .. }))
            .count();
        assert_eq!(priors, 1);
        assert_eq!(f.smoother.index, 1);
    }

    #[test]
    fn test_index_advances_by_one_per_cycle() {
        let mut f = fixture();
        f.gps.try_push(fix_at(0.0));
        for i in 1..=200 {
            f.imu.try_push(stationary_imu(i as f64 * 0.005));
        }
        f.smoother.cycle().unwrap();

        for (cycle, expected_index) in [(0.2, 1u64), (0.4, 2), (0.6, 3)] {
            f.gps.try_push(fix_at(cycle));
            f.smoother.cycle().unwrap();
            assert_eq!(f.smoother.index, expected_index);
        }
        // One add_variables per committed index, in order.
        let indices: Vec<u64> = f.smoother.backend().variables.iter().map(|v| v.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    /// GPS queue empty with odometry buffered: the cycle takes the
    /// odometry-only path.
    #[test]
    fn test_odometry_only_path_selected_without_gps() {
        let mut f = fixture();
        f.gps.try_push(fix_at(0.0));
        for i in 1..=100 {
            f.imu.try_push(stationary_imu(i as f64 * 0.005));
        }
        f.smoother.cycle().unwrap();

        f.odom.try_push(odom_at(0.05, 0.0));
        f.odom.try_push(odom_at(0.15, 0.3));
        f.smoother.cycle().unwrap();

        let backend = f.smoother.backend();
        let odom_factors = backend
            .constraints
            .iter()
            .filter(|c| matches!(c, Constraint::RelativePose { .. }))
            .count();
        let gps_factors = backend
            .constraints
            .iter()
            .filter(|c| matches!(c, Constraint::AbsolutePosition { .. }))
            .count();
        assert_eq!(odom_factors, 1);
        assert_eq!(gps_factors, 0);
        assert_eq!(f.smoother.index, 1);

        // The self-link carries the measured relative displacement.
        let delta = backend.constraints.iter().find_map(|c| match c {
            Constraint::RelativePose { from, to, delta, .. } => {
                assert_eq!(from, to);
                Some(*delta)
            }
            _ => None,
        });
        assert!((delta.unwrap().translation.x - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_stale_odometry_cycle_is_noop() {
        let mut f = fixture();
        f.gps.try_push(fix_at(1.0));
        for i in 0..=100 {
            f.imu.try_push(stationary_imu(1.0 + i as f64 * 0.005));
        }
        f.smoother.cycle().unwrap();

        // All buffered odometry predates the first correction.
        f.odom.try_push(odom_at(0.2, 0.0));
        f.odom.try_push(odom_at(0.3, 0.1));
        f.smoother.cycle().unwrap();

        assert_eq!(f.smoother.index, 0);
        assert_eq!(f.smoother.backend().variables.len(), 1);
    }

    #[test]
    fn test_bias_walk_sigma_tracks_window_length() {
        let mut f = fixture();
        f.gps.try_push(fix_at(0.0));
        for i in 1..=400 {
            f.imu.try_push(stationary_imu(i as f64 * 0.005));
        }
        f.smoother.cycle().unwrap();

        // Samples land on a 5 ms grid starting at 0.005. Cycle stamps sit
        // between grid points so the first window integrates 0.195 s (through
        // the sample at 0.195) and the second exactly twice that, 0.390 s
        // (0.200 through 0.585).
        f.gps.try_push(fix_at(0.1975));
        f.smoother.cycle().unwrap();
        f.gps.try_push(fix_at(0.5875));
        f.smoother.cycle().unwrap();

        let sigmas: Vec<f64> = f
            .smoother
            .backend()
            .constraints
            .iter()
            .filter_map(|c| match c {
                Constraint::BiasWalk { accel_sigma, .. } => Some(*accel_sigma),
                _ => None,
            })
            .collect();
        assert_eq!(sigmas.len(), 2);
        let ratio = sigmas[1] / sigmas[0];
        assert!((ratio - 2.0_f64.sqrt()).abs() < 1e-6, "ratio {ratio}");
    }

    #[test]
    fn test_correction_published_to_broker() {
        let mut f = fixture();
        f.gps.try_push(fix_at(0.0));
        for i in 1..=100 {
            f.imu.try_push(stationary_imu(i as f64 * 0.005));
        }
        f.smoother.cycle().unwrap();
        assert_eq!(f.broker.snapshot().timestamp, 0.0);

        f.gps.try_push(fix_at(0.2));
        f.smoother.cycle().unwrap();
        let snap = f.broker.snapshot();
        assert_eq!(snap.timestamp, 0.2);
    }
}
