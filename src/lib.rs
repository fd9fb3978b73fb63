//! Bounded Newton trust-region solver for box-constrained quadratic models
//!
//! ```no_run
//! use bntr::prelude::*;
//! use ndarray::{arr1, arr2};
//!
//! let model = QuadraticModel::new(arr1(&[1.0, -2.0]), arr2(&[[2.0, 0.0], [0.0, 1.0]]))?;
//! let bounds = Bounds::new(arr1(&[-1.0, -1.0]), arr1(&[1.0, 1.0]))?;
//!
//! let result = Bntr::new().minimize(&model, &bounds, &arr1(&[0.0, 0.0]))?;
//! assert!(result.converged);
//! # Ok::<(), bntr::Error>(())
//! ```

pub mod algorithms;
pub mod core;

// Flat re-exports for convenience
pub use core::{Bounds, Error, QuadraticModel, Result};

pub use algorithms::{
    solve_bntr, Bntr, BntrResult, ConjugateGradientMethod, ConjugateGradientOptions,
    ConjugateGradientRadiusOptions, ConvergenceCriteria, ConvergenceReason,
    SteepestDescentRadiusOptions,
};

/// Convenience re-exports for common use cases
pub mod prelude {
    pub use crate::algorithms::{
        solve_bntr, Bntr, BntrResult, ConjugateGradientMethod, ConvergenceCriteria,
        ConvergenceReason,
    };
    pub use crate::core::{Bounds, Error, QuadraticModel, Result};
}
