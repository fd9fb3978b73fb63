//! Trust-region radius management
//!
//! Two rules: one for the projected steepest-descent phase, which interpolates a
//! scaling factor from the reduction mismatch, and one for the conjugate gradient
//! phase, which accepts or rejects a step and scales the radius by fixed factors.
//! Both compare actual against predicted reduction but treat near-zero reductions
//! differently, so they are kept separate.

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};

/// eps^(2/3) for f64, the threshold below which reductions count as zero
pub const REDUCTION_EPSILON: f64 = 3.666852862501036e-11;

/// Radius scaling constants for the steepest-descent phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SteepestDescentRadiusOptions {
    /// |κ - 1| ≤ mu1 counts as great agreement
    pub mu1: f64,
    /// |κ - 1| ≤ mu2 counts as good agreement
    pub mu2: f64,
    pub gamma1: f64,
    pub gamma2: f64,
    pub gamma3: f64,
    pub gamma4: f64,
    pub theta: f64,
    pub min_radius: f64,
    pub max_radius: f64,
    pub default_radius: f64,
}

impl Default for SteepestDescentRadiusOptions {
    fn default() -> Self {
        Self {
            mu1: 0.35,
            mu2: 0.50,
            gamma1: 0.0625,
            gamma2: 0.5,
            gamma3: 2.0,
            gamma4: 5.0,
            theta: 0.25,
            min_radius: 1e-10,
            max_radius: 1e10,
            default_radius: 100.0,
        }
    }
}

impl SteepestDescentRadiusOptions {
    pub fn validate(&self) -> Result<()> {
        if !(0.0 < self.mu1 && self.mu1 <= self.mu2) {
            return Err(Error::InvalidParameter(format!(
                "steepest descent radius options need 0 < mu1 <= mu2, got mu1={}, mu2={}",
                self.mu1, self.mu2
            )));
        }
        if !(0.0 < self.gamma1
            && self.gamma1 <= self.gamma2
            && self.gamma2 < 1.0
            && 1.0 < self.gamma3
            && self.gamma3 <= self.gamma4)
        {
            return Err(Error::InvalidParameter(format!(
                "steepest descent radius options need 0 < gamma1 <= gamma2 < 1 < gamma3 <= gamma4, \
                 got {}, {}, {}, {}",
                self.gamma1, self.gamma2, self.gamma3, self.gamma4
            )));
        }
        if !(0.0 < self.theta && self.theta < 1.0) {
            return Err(Error::InvalidParameter(format!(
                "theta must lie in (0, 1), got {}",
                self.theta
            )));
        }
        validate_radius_range(self.min_radius, self.default_radius, self.max_radius)
    }

    pub fn clamp(&self, radius: f64) -> f64 {
        radius.max(self.min_radius).min(self.max_radius)
    }
}

/// Acceptance thresholds and scaling factors for the conjugate gradient phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConjugateGradientRadiusOptions {
    /// Steps with κ < eta1 are rejected
    pub eta1: f64,
    pub eta2: f64,
    pub eta3: f64,
    pub eta4: f64,
    /// Shrink factor on rejection
    pub alpha1: f64,
    pub alpha2: f64,
    pub alpha3: f64,
    pub alpha4: f64,
    pub alpha5: f64,
    pub min_radius: f64,
    pub max_radius: f64,
    pub default_radius: f64,
}

impl Default for ConjugateGradientRadiusOptions {
    fn default() -> Self {
        Self {
            eta1: 1.0e-4,
            eta2: 0.25,
            eta3: 0.50,
            eta4: 0.90,
            alpha1: 0.25,
            alpha2: 0.50,
            alpha3: 1.00,
            alpha4: 2.00,
            alpha5: 4.00,
            min_radius: 1e-10,
            max_radius: 1e10,
            default_radius: 100.0,
        }
    }
}

impl ConjugateGradientRadiusOptions {
    pub fn validate(&self) -> Result<()> {
        if !(0.0 <= self.eta1 && self.eta1 <= self.eta2 && self.eta2 <= self.eta3 && self.eta3 <= self.eta4) {
            return Err(Error::InvalidParameter(format!(
                "conjugate gradient radius options need 0 <= eta1 <= eta2 <= eta3 <= eta4, \
                 got {}, {}, {}, {}",
                self.eta1, self.eta2, self.eta3, self.eta4
            )));
        }
        if !(0.0 < self.alpha1 && self.alpha1 < 1.0) {
            return Err(Error::InvalidParameter(format!(
                "alpha1 must lie in (0, 1), got {}",
                self.alpha1
            )));
        }
        if !(self.alpha1 <= self.alpha2
            && self.alpha2 <= self.alpha3
            && self.alpha3 <= self.alpha4
            && self.alpha4 <= self.alpha5)
        {
            return Err(Error::InvalidParameter(format!(
                "conjugate gradient radius options need alpha1 <= ... <= alpha5, got {}, {}, {}, {}, {}",
                self.alpha1, self.alpha2, self.alpha3, self.alpha4, self.alpha5
            )));
        }
        validate_radius_range(self.min_radius, self.default_radius, self.max_radius)
    }

    pub fn clamp(&self, radius: f64) -> f64 {
        radius.max(self.min_radius).min(self.max_radius)
    }
}

fn validate_radius_range(min_radius: f64, default_radius: f64, max_radius: f64) -> Result<()> {
    if !(0.0 < min_radius && min_radius <= default_radius && default_radius <= max_radius)
        || !max_radius.is_finite()
    {
        return Err(Error::InvalidParameter(format!(
            "radii need 0 < min_radius <= default_radius <= max_radius < inf, \
             got {min_radius}, {default_radius}, {max_radius}"
        )));
    }
    Ok(())
}

/// Radius update after one trial step of the steepest-descent phase
///
/// Returns the new radius and the new upper bound on radii that produced good
/// agreement. The radius is not clamped here.
pub fn update_radius_steepest_descent(
    radius: f64,
    radius_upper_bound: f64,
    predicted_reduction: f64,
    actual_reduction: f64,
    gradient_norm: f64,
    options: &SteepestDescentRadiusOptions,
) -> (f64, f64) {
    let kappa = if actual_reduction.abs() <= REDUCTION_EPSILON
        && predicted_reduction.abs() <= REDUCTION_EPSILON
    {
        1.0
    } else {
        actual_reduction / predicted_reduction
    };

    let theta = options.theta;
    let linear_decrease = theta * gradient_norm * radius;
    let tau_1 = linear_decrease
        / (linear_decrease + (1.0 - theta) * predicted_reduction - actual_reduction);
    let tau_2 = linear_decrease
        / (linear_decrease - (1.0 + theta) * predicted_reduction + actual_reduction);

    let tau_min = tau_1.min(tau_2);
    let tau_max = tau_1.max(tau_2);

    let mut upper = radius_upper_bound;
    let in_unit_range = |tau: f64| tau >= options.gamma1 && tau < 1.0;
    let outside_unit_range = |tau: f64| tau < options.gamma1 || tau >= 1.0;

    let tau = if (kappa - 1.0).abs() <= options.mu1 {
        // great agreement
        upper = upper.max(radius);
        if tau_max < 1.0 {
            options.gamma3
        } else if tau_max > options.gamma4 {
            options.gamma4
        } else {
            tau_max
        }
    } else if (kappa - 1.0).abs() <= options.mu2 {
        // good agreement
        upper = upper.max(radius);
        if tau_max < options.gamma2 {
            options.gamma2
        } else if tau_max > options.gamma3 {
            options.gamma3
        } else {
            tau_max
        }
    } else if tau_min > 1.0 {
        options.gamma2
    } else if tau_max < options.gamma1 || (tau_min < options.gamma1 && tau_max >= 1.0) {
        options.gamma1
    } else if in_unit_range(tau_1) && outside_unit_range(tau_2) {
        tau_1
    } else if in_unit_range(tau_2) && outside_unit_range(tau_1) {
        tau_2
    } else {
        tau_max
    };

    // NaN reductions fall through every comparison above
    let tau = if tau.is_nan() { options.gamma1 } else { tau };

    (radius * tau, upper)
}

/// Radius update after a conjugate gradient step
///
/// Returns the new (clamped) radius and whether the step is accepted. The radius
/// only grows or shrinks on acceptance when the step reached the trust-region
/// boundary.
pub fn update_radius_conjugate_gradient(
    f_candidate: f64,
    predicted_reduction: f64,
    actual_reduction: f64,
    step_norm: f64,
    radius: f64,
    options: &ConjugateGradientRadiusOptions,
) -> (f64, bool) {
    let shrunk = options.alpha1 * radius.min(step_norm);

    let (new_radius, accept) = if predicted_reduction < 0.0
        || !predicted_reduction.is_finite()
        || !actual_reduction.is_finite()
    {
        (shrunk, false)
    } else {
        let threshold = 1.0_f64.max(f_candidate.abs()) * REDUCTION_EPSILON;
        let kappa = if actual_reduction.abs() <= threshold && predicted_reduction.abs() <= threshold {
            1.0
        } else {
            actual_reduction / predicted_reduction
        };

        if kappa < options.eta1 {
            (shrunk, false)
        } else if step_norm == radius {
            let factor = if kappa < options.eta2 {
                options.alpha2
            } else if kappa < options.eta3 {
                options.alpha3
            } else if kappa < options.eta4 {
                options.alpha4
            } else {
                options.alpha5
            };
            (factor * radius, true)
        } else {
            (radius, true)
        }
    };

    (options.clamp(new_radius), accept)
}
