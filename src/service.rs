//! Top-level estimator service.
//!
//! Owns the ingestion queues, the shared broker, and the smoother thread.
//! Sensor callbacks hand raw samples to the `push_*` entry points; these only
//! ever perform a non-blocking push and return. The fast predictor runs
//! inline in the inertial ingestion context and produces the high-rate
//! output; corrected estimates stream out of the smoother handle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver};
use log::{error, info, warn};

use crate::backend::EstimationBackend;
use crate::broker::StateBroker;
use crate::config::EstimatorConfig;
use crate::error::{EstimatorError, Result};
use crate::predictor::FastPredictor;
use crate::queue::BoundedQueue;
use crate::smoother::{InitialAttitude, Smoother};
use crate::types::{CorrectedEstimate, FastOutput, GpsFix, ImuSample, OdomSample};

const CORRECTIONS_DEPTH: usize = 32;

/// Handle to the running smoother thread.
pub struct SmootherHandle {
    handle: JoinHandle<Result<()>>,
    corrections: Receiver<CorrectedEstimate>,
}

impl SmootherHandle {
    /// Stream of per-cycle corrected states and bias estimates.
    pub fn corrections(&self) -> &Receiver<CorrectedEstimate> {
        &self.corrections
    }

    /// Waits for the smoother thread; it only returns on a fatal estimator
    /// error, so joining is primarily useful to surface that error.
    pub fn join(self) -> Result<()> {
        self.handle
            .join()
            .map_err(|_| EstimatorError::Thread("smoother thread panicked".into()))?
    }
}

pub struct StateEstimator {
    gps_queue: Arc<BoundedQueue<GpsFix>>,
    imu_queue: Arc<BoundedQueue<ImuSample>>,
    odom_queue: Arc<BoundedQueue<OdomSample>>,
    broker: Arc<StateBroker>,
    // Only the inertial ingestion context takes this lock.
    predictor: Mutex<FastPredictor>,
    imu_high_water: AtomicUsize,
}

impl StateEstimator {
    /// Builds the component graph and spawns the smoother thread.
    pub fn spawn<B>(
        cfg: EstimatorConfig,
        initial: InitialAttitude,
        backend: B,
    ) -> Result<(Arc<Self>, SmootherHandle)>
    where
        B: EstimationBackend + 'static,
    {
        cfg.validate()?;
        log_config(&cfg);

        let gps_queue = Arc::new(BoundedQueue::new(cfg.gps_queue_capacity));
        let imu_queue = Arc::new(BoundedQueue::new(cfg.imu_queue_capacity));
        let odom_queue = Arc::new(BoundedQueue::new(cfg.odom_queue_capacity));
        let broker = Arc::new(StateBroker::new());
        let (corrections_tx, corrections_rx) = bounded(CORRECTIONS_DEPTH);

        let mut smoother = Smoother::new(
            cfg.clone(),
            initial,
            backend,
            Arc::clone(&gps_queue),
            Arc::clone(&imu_queue),
            Arc::clone(&odom_queue),
            Arc::clone(&broker),
            corrections_tx,
        );
        let handle = thread::Builder::new()
            .name("smoother".into())
            .spawn(move || {
                let result = smoother.run();
                if let Err(ref e) = result {
                    error!("smoother stopped: {e}");
                }
                result
            })
            .map_err(|e| EstimatorError::Thread(e.to_string()))?;

        let service = Arc::new(Self {
            predictor: Mutex::new(FastPredictor::new(&cfg, Arc::clone(&broker))),
            gps_queue,
            imu_queue,
            odom_queue,
            broker,
            imu_high_water: AtomicUsize::new(0),
        });
        Ok((service, SmootherHandle { handle, corrections: corrections_rx }))
    }

    /// Inertial ingestion: buffers the sample for the smoother, then runs the
    /// fast predictor inline. Never blocks.
    pub fn push_imu(&self, sample: ImuSample) -> Option<FastOutput> {
        let depth = self.imu_queue.len();
        let previous = self.imu_high_water.fetch_max(depth, Ordering::Relaxed);
        if depth > previous && depth > 20 {
            warn!("inertial queue depth high-water mark now {depth}");
        }
        if !self.imu_queue.try_push(sample) {
            warn!("dropping inertial sample at t={:.3}: queue full", sample.timestamp);
        }
        self.predictor.lock().unwrap().process(sample)
    }

    pub fn push_gps(&self, fix: GpsFix) {
        if !self.gps_queue.try_push(fix) {
            warn!("dropping GPS fix at t={:.3}: queue full", fix.timestamp);
        }
    }

    pub fn push_odom(&self, sample: OdomSample) {
        if !self.odom_queue.try_push(sample) {
            warn!("dropping odometry sample at t={:.3}: queue full", sample.timestamp);
        }
    }

    /// Latest corrected state, bias, and timestamp.
    pub fn latest_correction(&self) -> crate::broker::Correction {
        self.broker.snapshot()
    }
}

fn log_config(cfg: &EstimatorConfig) {
    info!(
        "noise: accel {} gyro {} accel-bias {} gyro-bias {} gps {}",
        cfg.accel_sigma, cfg.gyro_sigma, cfg.accel_bias_sigma, cfg.gyro_bias_sigma, cfg.gps_sigma
    );
    info!(
        "queues: imu {} gps {} odom {}; smoother period {}s",
        cfg.imu_queue_capacity, cfg.gps_queue_capacity, cfg.odom_queue_capacity, cfg.smoother_period
    );
    info!(
        "frames: sensor ({}, {}, {}) rpy ({}, {}, {}); antenna ({}, {}, {}); invert ({}, {}, {})",
        cfg.sensor_x,
        cfg.sensor_y,
        cfg.sensor_z,
        cfg.sensor_x_angle,
        cfg.sensor_y_angle,
        cfg.sensor_z_angle,
        cfg.antenna_x,
        cfg.antenna_y,
        cfg.antenna_z,
        cfg.invert_x,
        cfg.invert_y,
        cfg.invert_z
    );
    if cfg.fixed_origin {
        info!(
            "fixed origin ({:.6}, {:.6}, {:.1})",
            cfg.origin_latitude, cfg.origin_longitude, cfg.origin_altitude
        );
    }
}
