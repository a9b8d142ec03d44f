//! Per-axis sign correction for raw inertial samples.

use nalgebra::Vector3;

use crate::types::ImuSample;

/// Sign-inversion flags, one per axis, shared by accel and gyro.
#[derive(Clone, Copy, Debug, Default)]
pub struct AxisSigns {
    invert_x: bool,
    invert_y: bool,
    invert_z: bool,
}

impl AxisSigns {
    pub fn new(invert_x: bool, invert_y: bool, invert_z: bool) -> Self {
        Self {
            invert_x,
            invert_y,
            invert_z,
        }
    }

    pub fn apply(&self, v: Vector3<f64>) -> Vector3<f64> {
        Vector3::new(
            if self.invert_x { -v.x } else { v.x },
            if self.invert_y { -v.y } else { v.y },
            if self.invert_z { -v.z } else { v.z },
        )
    }

    /// Corrected (accel, gyro) pair for one raw sample.
    pub fn correct(&self, sample: &ImuSample) -> (Vector3<f64>, Vector3<f64>) {
        (self.apply(sample.accel_vec()), self.apply(sample.gyro_vec()))
    }
}
