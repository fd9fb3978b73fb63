//! Bound-constrained stationarity and termination tests
//!
//! Stationarity is measured with the Fischer-Burmeister function φ, whose zero set
//! is exactly the complementarity condition a ≥ 0, b ≥ 0, ab = 0. Per coordinate the
//! measure is φ(φ(u - x, -g), x - l), and l - x for fixed coordinates.

use std::fmt;

use ndarray::Array1;
use num_traits::Float;
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};
use crate::core::{norm, Bounds, QuadraticModel};

/// Why the solver stopped (or that it has not stopped yet)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceReason {
    ContinueIterating,
    AbsoluteGradientTolerance,
    RelativeGradientTolerance,
    ScaledGradientTolerance,
    CriterionNegativeInfinity,
    TrustRegionRadiusStalled,
    MaxIterationsReached,
}

impl ConvergenceReason {
    pub fn message(&self) -> &'static str {
        match self {
            ConvergenceReason::ContinueIterating => "Continue iterating.",
            ConvergenceReason::AbsoluteGradientTolerance => {
                "Norm of the gradient is less than absolute_gradient_tolerance."
            }
            ConvergenceReason::RelativeGradientTolerance => {
                "Norm of the gradient relative to the criterion value is less than \
                 relative_gradient_tolerance."
            }
            ConvergenceReason::ScaledGradientTolerance => {
                "Norm of the gradient divided by norm of the gradient at the initial \
                 parameters is less than scaled_gradient_tolerance."
            }
            ConvergenceReason::CriterionNegativeInfinity => "Criterion value is negative infinity.",
            ConvergenceReason::TrustRegionRadiusStalled => {
                "Trust-region radius cannot be reduced further."
            }
            ConvergenceReason::MaxIterationsReached => "Maximum number of iterations reached.",
        }
    }
}

impl fmt::Display for ConvergenceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Gradient tolerances for the stationarity measure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceCriteria {
    /// Stationarity norm < gtol_abs
    pub gtol_abs: f64,
    /// Stationarity norm / |f| < gtol_rel
    pub gtol_rel: f64,
    /// Stationarity norm / ||linear_terms|| < gtol_scaled
    pub gtol_scaled: f64,
}

impl Default for ConvergenceCriteria {
    fn default() -> Self {
        Self {
            gtol_abs: 1e-8,
            gtol_rel: 1e-8,
            gtol_scaled: 0.0,
        }
    }
}

impl ConvergenceCriteria {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("gtol_abs", self.gtol_abs),
            ("gtol_rel", self.gtol_rel),
            ("gtol_scaled", self.gtol_scaled),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidParameter(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Fischer-Burmeister function φ(a, b) = √(a² + b²) - (a + b)
///
/// For a + b > 0 the algebraically equal form -2ab / (√(a² + b²) + a + b) is used
/// to avoid cancellation. A +∞ argument returns the limit -(other argument).
pub fn fischer_burmeister<F: Float>(a: F, b: F) -> F {
    if a == F::infinity() {
        return -b;
    }
    if b == F::infinity() {
        return -a;
    }

    let sum = a + b;
    if sum <= F::zero() {
        a.hypot(b) - sum
    } else {
        let two = F::one() + F::one();
        -(two * a * b) / (a.hypot(b) + sum)
    }
}

/// Coordinate-wise Fischer-Burmeister stationarity vector
pub fn fischer_burmeister_direction(x: &Array1<f64>, gradient: &Array1<f64>, bounds: &Bounds) -> Array1<f64> {
    let (lower, upper) = (bounds.lower(), bounds.upper());
    Array1::from_shape_fn(x.len(), |i| {
        if bounds.is_fixed(i) {
            lower[i] - x[i]
        } else {
            let inner = fischer_burmeister(upper[i] - x[i], -gradient[i]);
            fischer_burmeister(inner, x[i] - lower[i])
        }
    })
}

/// Decide whether the candidate is stationary enough to stop
///
/// Criteria are tried in order: absolute, relative to |f|, scaled by the norm of
/// the model's linear terms, f = -∞, and a zero stationarity norm with
/// `gtol_scaled == 0` for a model whose linear terms are nonzero. With no criterion met, `niter == Some(maxiter)` reports
/// [`ConvergenceReason::MaxIterationsReached`] without converging.
#[allow(clippy::too_many_arguments)]
pub fn check_for_convergence(
    x: &Array1<f64>,
    f_candidate: f64,
    gradient: &Array1<f64>,
    model: &QuadraticModel,
    bounds: &Bounds,
    niter: Option<usize>,
    maxiter: usize,
    criteria: &ConvergenceCriteria,
) -> (bool, ConvergenceReason) {
    let direction = fischer_burmeister_direction(x, gradient, bounds);
    let gradient_norm = norm(&direction);
    let gradient_norm_initial = norm(model.linear_terms());

    if gradient_norm < criteria.gtol_abs {
        (true, ConvergenceReason::AbsoluteGradientTolerance)
    } else if f_candidate != 0.0 && (gradient_norm / f_candidate).abs() < criteria.gtol_rel {
        (true, ConvergenceReason::RelativeGradientTolerance)
    } else if gradient_norm_initial != 0.0 && gradient_norm / gradient_norm_initial < criteria.gtol_scaled {
        (true, ConvergenceReason::ScaledGradientTolerance)
    } else if f_candidate == f64::NEG_INFINITY {
        (true, ConvergenceReason::CriterionNegativeInfinity)
    } else if gradient_norm_initial != 0.0 && gradient_norm == 0.0 && criteria.gtol_scaled == 0.0 {
        (true, ConvergenceReason::ScaledGradientTolerance)
    } else if niter == Some(maxiter) {
        (false, ConvergenceReason::MaxIterationsReached)
    } else {
        (false, ConvergenceReason::ContinueIterating)
    }
}
