pub mod geometry;

pub use geometry::{quat_from_wxyz, quat_to_wxyz, ImuBias, NavState, Pose3};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ImuSample {
    pub timestamp: f64,
    pub accel: [f64; 3],
    pub gyro: [f64; 3],
}

impl ImuSample {
    pub fn accel_vec(&self) -> Vector3<f64> {
        Vector3::from(self.accel)
    }

    pub fn gyro_vec(&self) -> Vector3<f64> {
        Vector3::from(self.gyro)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct GpsFix {
    pub timestamp: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct OdomSample {
    pub timestamp: f64,
    /// Orientation quaternion as [w, x, y, z].
    pub orientation: [f64; 4],
    pub position: [f64; 3],
}

impl OdomSample {
    pub fn pose(&self) -> Pose3 {
        Pose3::new(quat_from_wxyz(self.orientation), Vector3::from(self.position))
    }
}

/// High-rate fused output, one per inertial sample.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct FusedPose {
    pub timestamp: f64,
    /// Orientation quaternion as [w, x, y, z].
    pub orientation: [f64; 4],
    pub position: [f64; 3],
    pub velocity: [f64; 3],
    /// Body angular rate with the current gyro bias removed.
    pub angular_velocity: [f64; 3],
}

/// Latency diagnostics published alongside every fused pose.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LatencyInfo {
    pub sample_time: f64,
    /// Wall-clock delay between the sample timestamp and publication.
    pub ingest_delay: f64,
    /// Age of the correction the prediction is anchored to.
    pub correction_age: f64,
}

#[derive(Clone, Copy, Debug)]
pub struct FastOutput {
    pub pose: FusedPose,
    pub latency: LatencyInfo,
}

/// One smoother cycle's corrected state, published per completed cycle.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CorrectedEstimate {
    pub index: u64,
    pub timestamp: f64,
    pub orientation: [f64; 4],
    pub position: [f64; 3],
    pub velocity: [f64; 3],
    pub accel_bias: [f64; 3],
    pub gyro_bias: [f64; 3],
}
