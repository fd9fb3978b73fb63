use thiserror::Error;

/// Errors that can occur while setting up or solving a bounded trust-region subproblem
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// Vector or matrix has the wrong length for the problem dimension
    #[error("dimension mismatch for {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// Lower and upper bounds are inconsistent
    #[error("invalid bounds: {0}")]
    InvalidBounds(String),

    /// Invalid option or tolerance value
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// NaN or infinity where a finite value is required
    #[error("non-finite input: {0}")]
    NonFiniteInput(String),

    /// The conjugate gradient re-solve at the default radius produced no step.
    /// The quadratic model has no admissible descent direction.
    #[error("Initial direction is zero")]
    ZeroDirection,
}

/// Result type for solver operations
pub type Result<T> = std::result::Result<T, Error>;
