pub mod constraints;
pub mod preintegration;

pub use constraints::Constraint;
pub use preintegration::{PreintegratedDelta, Preintegrator};
