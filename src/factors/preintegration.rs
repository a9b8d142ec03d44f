//! Inertial preintegration.
//!
//! Folds a sequence of normalized inertial samples into one compact
//! relative-motion delta so a correction window adds a single constraint
//! instead of one variable per raw sample. Two long-lived instances exist in
//! the system: the smoother's window integrator (reset every cycle with the
//! bias committed by the previous cycle) and the fast predictor's continuous
//! integrator (reset only when the broker's corrected state changes).

use log::warn;
use nalgebra::{UnitQuaternion, Vector3};

use crate::types::{ImuBias, NavState};

/// Accumulated relative motion over one integration window, expressed in the
/// body frame at the start of the window.
#[derive(Clone, Copy, Debug)]
pub struct PreintegratedDelta {
    pub rotation: UnitQuaternion<f64>,
    pub velocity: Vector3<f64>,
    pub position: Vector3<f64>,
    pub elapsed: f64,
}

impl PreintegratedDelta {
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            velocity: Vector3::zeros(),
            position: Vector3::zeros(),
            elapsed: 0.0,
        }
    }
}

pub struct Preintegrator {
    delta: PreintegratedDelta,
    bias: ImuBias,
    gravity: Vector3<f64>,
}

impl Preintegrator {
    /// `gravity_magnitude` is positive; gravity points down the Up axis.
    pub fn new(gravity_magnitude: f64) -> Self {
        Self {
            delta: PreintegratedDelta::identity(),
            bias: ImuBias::zeros(),
            gravity: Vector3::new(0.0, 0.0, -gravity_magnitude),
        }
    }

    /// Clears the accumulator and binds the bias used for all subsequent
    /// integration until the next reset.
    pub fn reset(&mut self, bias: ImuBias) {
        self.delta = PreintegratedDelta::identity();
        self.bias = bias;
    }

    pub fn bias(&self) -> ImuBias {
        self.bias
    }

    /// Folds one normalized sample into the running delta. Only valid for
    /// `dt > 0`; non-positive steps are dropped.
    pub fn integrate(&mut self, accel: Vector3<f64>, gyro: Vector3<f64>, dt: f64) {
        if dt <= 0.0 {
            warn!("dropping inertial sample with non-positive dt {dt:.6}");
            return;
        }
        let accel = accel - self.bias.accel;
        let gyro = gyro - self.bias.gyro;

        // Specific force rotated into the window's start frame.
        let accel_nav = self.delta.rotation * accel;
        self.delta.position += self.delta.velocity * dt + 0.5 * accel_nav * dt * dt;
        self.delta.velocity += accel_nav * dt;
        self.delta.rotation = self.delta.rotation * UnitQuaternion::from_scaled_axis(gyro * dt);
        self.delta.elapsed += dt;
    }

    pub fn delta(&self) -> PreintegratedDelta {
        self.delta
    }

    pub fn elapsed(&self) -> f64 {
        self.delta.elapsed
    }

    /// Composes the accumulated delta onto `base` to produce an extrapolated
    /// state, restoring the gravity the measured specific force excludes.
    pub fn predict(&self, base: &NavState) -> NavState {
        let dt = self.delta.elapsed;
        let rot = base.orientation;
        NavState {
            orientation: rot * self.delta.rotation,
            position: base.position
                + base.velocity * dt
                + 0.5 * self.gravity * dt * dt
                + rot * self.delta.position,
            velocity: base.velocity + self.gravity * dt + rot * self.delta.velocity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const G: f64 = 9.8;

    fn stationary_sample() -> (Vector3<f64>, Vector3<f64>) {
        // Level and motionless: accelerometer reads +g up, gyro reads zero.
        (Vector3::new(0.0, 0.0, G), Vector3::zeros())
    }

    #[test]
    fn test_stationary_vehicle_stays_put() {
        let mut pre = Preintegrator::new(G);
        let (accel, gyro) = stationary_sample();
        for _ in 0..200 {
            pre.integrate(accel, gyro, 0.005);
        }
        let out = pre.predict(&NavState::identity());
        assert_relative_eq!(out.position.norm(), 0.0, epsilon = 1e-9);
        assert_relative_eq!(out.velocity.norm(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_constant_forward_accel() {
        let mut pre = Preintegrator::new(G);
        let accel = Vector3::new(1.0, 0.0, G);
        for _ in 0..1000 {
            pre.integrate(accel, Vector3::zeros(), 0.001);
        }
        let out = pre.predict(&NavState::identity());
        assert_relative_eq!(out.velocity.x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(out.position.x, 0.5, epsilon = 1e-3);
        assert_relative_eq!(out.velocity.z, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_yaw_rate_accumulates_rotation() {
        let mut pre = Preintegrator::new(G);
        let rate = std::f64::consts::FRAC_PI_2;
        for _ in 0..1000 {
            pre.integrate(Vector3::zeros(), Vector3::new(0.0, 0.0, rate), 0.001);
        }
        let (_, _, yaw) = pre.delta().rotation.euler_angles();
        assert_relative_eq!(yaw, rate, epsilon = 1e-6);
    }

    #[test]
    fn test_reset_binds_bias() {
        let mut pre = Preintegrator::new(G);
        let bias = ImuBias::new(Vector3::new(0.2, 0.0, 0.0), Vector3::zeros());
        pre.reset(bias);
        // Measured accel equal to the bias integrates to no motion.
        for _ in 0..100 {
            pre.integrate(Vector3::new(0.2, 0.0, G), Vector3::zeros(), 0.005);
        }
        assert_relative_eq!(pre.delta().velocity.norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_non_positive_dt_dropped() {
        let mut pre = Preintegrator::new(G);
        pre.integrate(Vector3::new(1.0, 0.0, 0.0), Vector3::zeros(), 0.0);
        pre.integrate(Vector3::new(1.0, 0.0, 0.0), Vector3::zeros(), -0.01);
        assert_eq!(pre.elapsed(), 0.0);
        assert_relative_eq!(pre.delta().velocity.norm(), 0.0);
    }

    #[test]
    fn test_replay_matches_incremental() {
        // Re-integrating the same samples from scratch must reproduce the
        // incrementally built delta exactly.
        let samples: Vec<(Vector3<f64>, Vector3<f64>, f64)> = (0..50)
            .map(|i| {
                let t = i as f64 * 0.005;
                (
                    Vector3::new((t * 3.0).sin() * 0.4, 0.1, G + 0.05 * t.cos()),
                    Vector3::new(0.01, -0.02, 0.3 * (t * 2.0).cos()),
                    0.005,
                )
            })
            .collect();

        let bias = ImuBias::new(Vector3::new(0.01, -0.02, 0.0), Vector3::new(0.0, 0.001, 0.0));

        let mut incremental = Preintegrator::new(G);
        incremental.reset(bias);
        for (a, w, dt) in &samples {
            incremental.integrate(*a, *w, *dt);
        }

        let mut replay = Preintegrator::new(G);
        replay.reset(bias);
        for (a, w, dt) in &samples {
            replay.integrate(*a, *w, *dt);
        }

        let a = incremental.predict(&NavState::identity());
        let b = replay.predict(&NavState::identity());
        assert_eq!(a.position, b.position);
        assert_eq!(a.velocity, b.velocity);
        assert_eq!(a.orientation, b.orientation);
    }
}
