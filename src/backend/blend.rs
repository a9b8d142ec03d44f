//! Reference backend: incremental position blending.
//!
//! Keeps every registered variable in an index-keyed arena and, on update,
//! folds absolute-position constraints into the addressed antenna pose with a
//! variance-ratio gain, then re-derives the body pose through the rigid
//! antenna offset. Relative-motion information enters through the initial
//! values the smoother supplies (the preintegrated prediction), so the blend
//! reduces to a per-axis correction toward the measurement.
//!
//! This is deliberately not a nonlinear least-squares smoother; it honors the
//! backend contract so the estimator runs closed-loop, and a real incremental
//! solver drops in behind the same trait.

use std::collections::HashMap;

use nalgebra::Vector3;

use super::{BackendError, EstimationBackend};
use crate::factors::Constraint;
use crate::types::{ImuBias, Pose3};

#[derive(Clone, Debug)]
struct Entry {
    pose: Pose3,
    velocity: Vector3<f64>,
    bias: ImuBias,
    antenna_pose: Pose3,
}

pub struct BlendBackend {
    variables: HashMap<u64, Entry>,
    pending: Vec<Constraint>,
    /// Assumed per-axis sigma of the dead-reckoned position at correction
    /// time; sets the gain against the measurement sigma.
    prediction_sigma: f64,
}

impl Default for BlendBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl BlendBackend {
    pub fn new() -> Self {
        Self::with_prediction_sigma(1.0)
    }

    pub fn with_prediction_sigma(prediction_sigma: f64) -> Self {
        Self {
            variables: HashMap::new(),
            pending: Vec::new(),
            prediction_sigma,
        }
    }

    fn entry_mut(&mut self, index: u64) -> Result<&mut Entry, BackendError> {
        self.variables
            .get_mut(&index)
            .ok_or(BackendError::UnknownVariable(index))
    }

    fn check_finite(entry: &Entry, index: u64) -> Result<(), BackendError> {
        let finite = entry.pose.translation.iter().all(|v| v.is_finite())
            && entry.velocity.iter().all(|v| v.is_finite())
            && entry.pose.rotation.coords.iter().all(|v| v.is_finite());
        if finite {
            Ok(())
        } else {
            Err(BackendError::Degenerate(format!(
                "non-finite estimate at index {index}"
            )))
        }
    }
}

impl EstimationBackend for BlendBackend {
    fn add_variables(
        &mut self,
        index: u64,
        pose: Pose3,
        velocity: Vector3<f64>,
        bias: ImuBias,
        antenna_pose: Pose3,
    ) {
        self.variables.insert(
            index,
            Entry {
                pose,
                velocity,
                bias,
                antenna_pose,
            },
        );
    }

    fn add_factors(&mut self, constraints: Vec<Constraint>) {
        self.pending.extend(constraints);
    }

    fn update(&mut self) -> Result<(), BackendError> {
        let pending = std::mem::take(&mut self.pending);
        let pred_var = self.prediction_sigma * self.prediction_sigma;

        // Offset constraints re-derive the body pose after position blending,
        // so they are applied last.
        let mut offsets: Vec<(u64, Pose3)> = Vec::new();

        for constraint in &pending {
            match constraint {
                Constraint::PriorPose { index, pose, .. } => {
                    self.entry_mut(*index)?.pose = *pose;
                }
                Constraint::PriorVelocity { index, velocity, .. } => {
                    self.entry_mut(*index)?.velocity = *velocity;
                }
                Constraint::PriorBias { index, bias, .. } => {
                    self.entry_mut(*index)?.bias = *bias;
                }
                Constraint::RelativeMotion { from, to, .. } => {
                    // The prediction is already the `to` variable's initial
                    // value; the link only needs both ends to exist.
                    self.entry_mut(*from)?;
                    self.entry_mut(*to)?;
                }
                Constraint::BiasWalk { from, to, .. } => {
                    let carried = self.entry_mut(*from)?.bias;
                    self.entry_mut(*to)?.bias = carried;
                }
                Constraint::AbsolutePosition {
                    index,
                    position,
                    sigmas,
                } => {
                    let entry = self.entry_mut(*index)?;
                    for axis in 0..3 {
                        let meas_var = sigmas[axis] * sigmas[axis];
                        let gain = pred_var / (pred_var + meas_var);
                        let innovation = position[axis] - entry.antenna_pose.translation[axis];
                        entry.antenna_pose.translation[axis] += gain * innovation;
                    }
                }
                Constraint::RelativePose { from, to, .. } => {
                    // Consistency information only; the reference backend does
                    // not weight it against the inertial prediction.
                    self.entry_mut(*from)?;
                    self.entry_mut(*to)?;
                }
                Constraint::AntennaOffset { index, offset, .. } => {
                    offsets.push((*index, *offset));
                }
            }
        }

        for (index, offset) in offsets {
            let entry = self.entry_mut(index)?;
            entry.pose = entry.antenna_pose.compose(&offset.inverse());
        }

        for constraint in &pending {
            if let Constraint::AbsolutePosition { index, .. } = constraint {
                let entry = self
                    .variables
                    .get(index)
                    .ok_or(BackendError::UnknownVariable(*index))?;
                Self::check_finite(entry, *index)?;
            }
        }

        Ok(())
    }

    fn pose(&self, index: u64) -> Option<Pose3> {
        self.variables.get(&index).map(|e| e.pose)
    }

    fn velocity(&self, index: u64) -> Option<Vector3<f64>> {
        self.variables.get(&index).map(|e| e.velocity)
    }

    fn bias(&self, index: u64) -> Option<ImuBias> {
        self.variables.get(&index).map(|e| e.bias)
    }

    fn antenna_pose(&self, index: u64) -> Option<Pose3> {
        self.variables.get(&index).map(|e| e.antenna_pose)
    }
}
