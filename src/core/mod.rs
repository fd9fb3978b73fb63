pub mod active_set;
pub mod error;
pub mod model;

pub use active_set::ActiveBounds;
pub use error::{Error, Result};
pub use model::{evaluate_criterion, norm, Bounds, QuadraticModel};
