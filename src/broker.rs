//! Shared holder for the latest corrected state.
//!
//! The single piece of mutable state shared between the smoother and the fast
//! path. The lock is held only for the duration of a copy; no computation
//! happens under it.

use std::sync::Mutex;

use crate::types::{ImuBias, NavState};

/// A corrected state together with the bias and cycle timestamp it was
/// committed with. `timestamp == 0.0` is the never-corrected sentinel.
#[derive(Clone, Copy, Debug)]
pub struct Correction {
    pub state: NavState,
    pub bias: ImuBias,
    pub timestamp: f64,
}

#[derive(Debug)]
pub struct StateBroker {
    inner: Mutex<Correction>,
}

impl Default for StateBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl StateBroker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Correction {
                state: NavState::identity(),
                bias: ImuBias::zeros(),
                timestamp: 0.0,
            }),
        }
    }

    /// Written once per smoother cycle.
    pub fn publish(&self, state: NavState, bias: ImuBias, timestamp: f64) {
        let mut guard = self.inner.lock().unwrap();
        *guard = Correction {
            state,
            bias,
            timestamp,
        };
    }

    /// Read-and-copy on every fast-path tick.
    pub fn snapshot(&self) -> Correction {
        *self.inner.lock().unwrap()
    }
}
