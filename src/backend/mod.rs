//! Seam to the incremental estimation backend.
//!
//! The smoother treats the backend as a black box: it submits variables and
//! constraints keyed by small integer indices, asks for an update, and reads
//! back point estimates. The internal linearization/optimization strategy is
//! the backend's business; any implementation honoring this contract can be
//! dropped in.

pub mod blend;

pub use blend::BlendBackend;

use nalgebra::Vector3;
use thiserror::Error;

use crate::factors::Constraint;
use crate::types::{ImuBias, Pose3};

#[derive(Error, Debug)]
pub enum BackendError {
    /// The update produced a numerically unusable solution. Fatal to the
    /// running estimate.
    #[error("degenerate update: {0}")]
    Degenerate(String),

    #[error("constraint references unknown variable index {0}")]
    UnknownVariable(u64),
}

pub trait EstimationBackend: Send {
    /// Registers the variables for one state index with their initial values.
    fn add_variables(
        &mut self,
        index: u64,
        pose: Pose3,
        velocity: Vector3<f64>,
        bias: ImuBias,
        antenna_pose: Pose3,
    );

    /// Queues constraints for the next update.
    fn add_factors(&mut self, constraints: Vec<Constraint>);

    /// Revises the internal estimate using all pending variables and factors.
    fn update(&mut self) -> Result<(), BackendError>;

    fn pose(&self, index: u64) -> Option<Pose3>;

    fn velocity(&self, index: u64) -> Option<Vector3<f64>>;

    fn bias(&self, index: u64) -> Option<ImuBias>;

    fn antenna_pose(&self, index: u64) -> Option<Pose3>;
}
