//! Constraints submitted to the estimation backend.
//!
//! One variant per factor kind the smoother emits. Variables are addressed by
//! their state index; six-element sigma vectors are ordered rotation first,
//! translation second.

use nalgebra::Vector3;

use crate::factors::preintegration::PreintegratedDelta;
use crate::types::{ImuBias, Pose3};

#[derive(Clone, Debug)]
pub enum Constraint {
    /// Pose prior at the given index.
    PriorPose {
        index: u64,
        pose: Pose3,
        sigmas: [f64; 6],
    },

    /// Velocity prior at the given index.
    PriorVelocity {
        index: u64,
        velocity: Vector3<f64>,
        sigma: f64,
    },

    /// Bias prior at the given index.
    PriorBias {
        index: u64,
        bias: ImuBias,
        accel_sigma: f64,
        gyro_sigma: f64,
    },

    /// Preintegrated inertial window linking pose and velocity at `from` to
    /// pose and velocity at `to`.
    RelativeMotion {
        from: u64,
        to: u64,
        delta: PreintegratedDelta,
    },

    /// Bias random walk between consecutive bias variables; sigmas are
    /// pre-scaled by the square root of the window length.
    BiasWalk {
        from: u64,
        to: u64,
        accel_sigma: f64,
        gyro_sigma: f64,
    },

    /// Projected GPS fix pinning the antenna-pose variable at `index`.
    AbsolutePosition {
        index: u64,
        position: Vector3<f64>,
        sigmas: [f64; 3],
    },

    /// Odometry-derived relative pose between two pose variables.
    RelativePose {
        from: u64,
        to: u64,
        delta: Pose3,
        sigmas: [f64; 6],
    },

    /// Fixed rigid transform linking the body pose at `index` to its
    /// antenna-pose variable.
    AntennaOffset {
        index: u64,
        offset: Pose3,
        sigmas: [f64; 6],
    },
}

/// Odometry relative-pose sigmas: tight roll/pitch, loose yaw and position.
pub const ODOM_SIGMAS: [f64; 6] = [0.1, 0.1, 100.0, 100.0, 100.0, 0.3];

/// Antenna lever-arm sigmas: the offset is a rigid, surveyed quantity.
pub const ANTENNA_OFFSET_SIGMAS: [f64; 6] = [0.001, 0.001, 0.001, 0.03, 0.03, 0.03];

/// Bias random-walk sigmas for a window of `elapsed` seconds. Uncertainty
/// grows with the square root of the integrated time.
pub fn bias_walk_sigmas(accel_sigma: f64, gyro_sigma: f64, elapsed: f64) -> (f64, f64) {
    let scale = elapsed.sqrt();
    (accel_sigma * scale, gyro_sigma * scale)
}

/// Horizontal sigma as configured, vertical relaxed 3x.
pub fn gps_position_sigmas(gps_sigma: f64) -> [f64; 3] {
    [gps_sigma, gps_sigma, 3.0 * gps_sigma]
}

/// Initial pose prior sigmas: roll/pitch as configured, yaw relaxed 3x,
/// position at GPS accuracy.
pub fn pose_prior_sigmas(rotation_noise: f64, gps_sigma: f64) -> [f64; 6] {
    [
        rotation_noise,
        rotation_noise,
        3.0 * rotation_noise,
        gps_sigma,
        gps_sigma,
        gps_sigma,
    ]
}
