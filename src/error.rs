//! Error types for the state estimator.

use thiserror::Error;

use crate::backend::BackendError;

#[derive(Error, Debug)]
pub enum EstimatorError {
    #[error("configuration error: {0}")]
    Config(String),

    /// A backend update produced a degenerate or unusable solution. Fatal to
    /// the running estimate; no fallback is attempted.
    #[error("backend update failed: {0}")]
    Backend(#[from] BackendError),

    #[error("non-finite {quantity} in corrected state at index {index}")]
    NonFinite { quantity: &'static str, index: u64 },

    #[error("smoother thread error: {0}")]
    Thread(String),
}

pub type Result<T> = std::result::Result<T, EstimatorError>;
