//! Geometric state types shared by the smoother and the fast predictor.

use nalgebra::{UnitQuaternion, Vector3};

/// Rigid transform: rotation followed by translation.
#[derive(Clone, Copy, Debug)]
pub struct Pose3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl Pose3 {
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn new(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self { rotation, translation }
    }

    /// Roll/pitch/yaw about the fixed x, y, z axes (applied in that order).
    pub fn from_rpy(roll: f64, pitch: f64, yaw: f64, translation: Vector3<f64>) -> Self {
        Self {
            rotation: UnitQuaternion::from_euler_angles(roll, pitch, yaw),
            translation,
        }
    }

    /// `self * other`: apply `other` in the frame of `self`.
    pub fn compose(&self, other: &Pose3) -> Pose3 {
        Pose3 {
            rotation: self.rotation * other.rotation,
            translation: self.translation + self.rotation * other.translation,
        }
    }

    pub fn inverse(&self) -> Pose3 {
        let inv_rot = self.rotation.inverse();
        Pose3 {
            rotation: inv_rot,
            translation: -(inv_rot * self.translation),
        }
    }

    /// Relative transform taking `self` to `other`.
    pub fn between(&self, other: &Pose3) -> Pose3 {
        self.inverse().compose(other)
    }
}

/// Pose plus linear velocity, all in the local tangent frame.
#[derive(Clone, Copy, Debug)]
pub struct NavState {
    pub orientation: UnitQuaternion<f64>,
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
}

impl NavState {
    pub fn identity() -> Self {
        Self {
            orientation: UnitQuaternion::identity(),
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
        }
    }

    pub fn pose(&self) -> Pose3 {
        Pose3::new(self.orientation, self.position)
    }
}

/// Accelerometer and gyroscope bias pair.
#[derive(Clone, Copy, Debug)]
pub struct ImuBias {
    pub accel: Vector3<f64>,
    pub gyro: Vector3<f64>,
}

impl ImuBias {
    pub fn zeros() -> Self {
        Self {
            accel: Vector3::zeros(),
            gyro: Vector3::zeros(),
        }
    }

    pub fn new(accel: Vector3<f64>, gyro: Vector3<f64>) -> Self {
        Self { accel, gyro }
    }
}

pub fn quat_to_wxyz(q: &UnitQuaternion<f64>) -> [f64; 4] {
    [q.w, q.i, q.j, q.k]
}

pub fn quat_from_wxyz(q: [f64; 4]) -> UnitQuaternion<f64> {
    UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(q[0], q[1], q[2], q[3]))
}
