//! Estimator configuration.
//!
//! Every recognized option of the estimator with its default value. Defaults
//! follow the tuning the system ships with; a config file only needs to name
//! the fields it overrides.

use nalgebra::Vector3;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::axes::AxisSigns;
use crate::error::{EstimatorError, Result};
use crate::types::Pose3;

#[derive(Clone, Debug, Deserialize)]
pub struct EstimatorConfig {
    /// Sigma on the initial orientation prior (rad); yaw gets 3x.
    #[serde(default = "default_initial_rotation_noise")]
    pub initial_rotation_noise: f64,

    /// Sigma on the initial velocity prior (m/s).
    #[serde(default = "default_initial_velocity_noise")]
    pub initial_velocity_noise: f64,

    /// Sigma on the initial accelerometer bias prior (m/s^2).
    #[serde(default = "default_initial_bias_noise_accel")]
    pub initial_bias_noise_accel: f64,

    /// Sigma on the initial gyroscope bias prior (rad/s).
    #[serde(default = "default_initial_bias_noise_gyro")]
    pub initial_bias_noise_gyro: f64,

    /// Accelerometer white-noise sigma (m/s^2).
    #[serde(default = "default_accel_sigma")]
    pub accel_sigma: f64,

    /// Gyroscope white-noise sigma (rad/s).
    #[serde(default = "default_gyro_sigma")]
    pub gyro_sigma: f64,

    /// Accelerometer bias random-walk sigma (m/s^2 per sqrt-second).
    #[serde(default = "default_accel_bias_sigma")]
    pub accel_bias_sigma: f64,

    /// Gyroscope bias random-walk sigma (rad/s per sqrt-second).
    #[serde(default = "default_gyro_bias_sigma")]
    pub gyro_bias_sigma: f64,

    /// GPS position sigma (m); vertical gets 3x.
    #[serde(default = "default_gps_sigma")]
    pub gps_sigma: f64,

    /// Inertial-sensor-to-body translation (m).
    #[serde(default)]
    pub sensor_x: f64,
    #[serde(default)]
    pub sensor_y: f64,
    #[serde(default)]
    pub sensor_z: f64,

    /// Inertial-sensor-to-body rotation (rad, about fixed x/y/z).
    #[serde(default)]
    pub sensor_x_angle: f64,
    #[serde(default)]
    pub sensor_y_angle: f64,
    #[serde(default)]
    pub sensor_z_angle: f64,

    /// Vehicle body-frame rotation offset (rad, about fixed x/y/z).
    #[serde(default)]
    pub vehicle_x_angle: f64,
    #[serde(default)]
    pub vehicle_y_angle: f64,
    #[serde(default)]
    pub vehicle_z_angle: f64,

    /// Body-to-antenna lever arm (m).
    #[serde(default)]
    pub antenna_x: f64,
    #[serde(default)]
    pub antenna_y: f64,
    #[serde(default)]
    pub antenna_z: f64,

    /// Accepted for compatibility; the correction-selection logic does not
    /// consult it.
    #[serde(default = "default_gps_skip")]
    pub gps_skip: u32,

    /// Gravity magnitude (m/s^2).
    #[serde(default = "default_gravity")]
    pub gravity: f64,

    /// Per-axis sign inversion, shared by accel and gyro.
    #[serde(default)]
    pub invert_x: bool,
    #[serde(default)]
    pub invert_y: bool,
    #[serde(default)]
    pub invert_z: bool,

    /// Nominal inertial sample period (s); only used when the first sample's
    /// delta-time cannot be computed.
    #[serde(default = "default_imu_dt")]
    pub imu_dt: f64,

    #[serde(default)]
    pub fixed_initial_pose: bool,
    #[serde(default)]
    pub initial_roll: f64,
    #[serde(default)]
    pub initial_pitch: f64,
    #[serde(default)]
    pub initial_yaw: f64,

    #[serde(default)]
    pub fixed_origin: bool,
    #[serde(default)]
    pub origin_latitude: f64,
    #[serde(default)]
    pub origin_longitude: f64,
    #[serde(default)]
    pub origin_altitude: f64,

    #[serde(default = "default_imu_queue_capacity")]
    pub imu_queue_capacity: usize,
    #[serde(default = "default_gps_queue_capacity")]
    pub gps_queue_capacity: usize,
    #[serde(default = "default_odom_queue_capacity")]
    pub odom_queue_capacity: usize,

    /// Target smoother cycle period (s).
    #[serde(default = "default_smoother_period")]
    pub smoother_period: f64,
}

fn default_initial_rotation_noise() -> f64 {
    1.0
}

fn default_initial_velocity_noise() -> f64 {
    0.1
}

fn default_initial_bias_noise_accel() -> f64 {
    1e-1
}

fn default_initial_bias_noise_gyro() -> f64 {
    1e-2
}

fn default_accel_sigma() -> f64 {
    6.0e-2
}

fn default_gyro_sigma() -> f64 {
    2.0e-2
}

fn default_accel_bias_sigma() -> f64 {
    2.0e-4
}

fn default_gyro_bias_sigma() -> f64 {
    3.0e-5
}

fn default_gps_sigma() -> f64 {
    0.07
}

fn default_gps_skip() -> u32 {
    5
}

fn default_gravity() -> f64 {
    9.8
}

fn default_imu_dt() -> f64 {
    1.0 / 200.0
}

fn default_imu_queue_capacity() -> usize {
    400
}

fn default_gps_queue_capacity() -> usize {
    40
}

fn default_odom_queue_capacity() -> usize {
    100
}

fn default_smoother_period() -> f64 {
    0.1
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("empty config deserializes via field defaults")
    }
}

impl EstimatorConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| EstimatorError::Config(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| EstimatorError::Config(format!("{}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<()> {
        if self.imu_queue_capacity == 0
            || self.gps_queue_capacity == 0
            || self.odom_queue_capacity == 0
        {
            return Err(EstimatorError::Config("queue capacities must be > 0".into()));
        }
        if self.imu_dt <= 0.0 {
            return Err(EstimatorError::Config("imu_dt must be > 0".into()));
        }
        if self.smoother_period <= 0.0 {
            return Err(EstimatorError::Config("smoother_period must be > 0".into()));
        }
        if self.gravity <= 0.0 {
            return Err(EstimatorError::Config("gravity must be > 0".into()));
        }
        Ok(())
    }

    /// Inertial-sensor-to-body extrinsic transform.
    pub fn sensor_pose(&self) -> Pose3 {
        Pose3::from_rpy(
            self.sensor_x_angle,
            self.sensor_y_angle,
            self.sensor_z_angle,
            Vector3::new(self.sensor_x, self.sensor_y, self.sensor_z),
        )
    }

    /// Vehicle body-frame rotation offset.
    pub fn vehicle_rotation(&self) -> Pose3 {
        Pose3::from_rpy(
            self.vehicle_x_angle,
            self.vehicle_y_angle,
            self.vehicle_z_angle,
            Vector3::zeros(),
        )
    }

    /// Fixed rigid transform from the body pose to the antenna pose.
    pub fn antenna_offset(&self) -> Pose3 {
        Pose3::new(
            nalgebra::UnitQuaternion::identity(),
            Vector3::new(self.antenna_x, self.antenna_y, self.antenna_z),
        )
    }

    pub fn axis_signs(&self) -> AxisSigns {
        AxisSigns::new(self.invert_x, self.invert_y, self.invert_z)
    }
}
