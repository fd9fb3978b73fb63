//! Trust-region conjugate gradient routines for the unconstrained subproblem
//!
//!   min  gᵀs + ½ sᵀHs   subject to  ||s|| ≤ Δ
//!
//! Both routines start at s = 0 and stop on the trust-region boundary as soon as
//! they meet non-positive curvature or would leave the ball, so indefinite H is
//! handled without any factorization. The box-aware variant lives in
//! [`super::trsbox`].

use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};
use crate::core::norm;

use super::trsbox::minimize_trust_trsbox;

const STEIHAUG_TOINT_RTOL: f64 = 1e-5;
const STEIHAUG_TOINT_ATOL: f64 = 1e-50;

/// Which conjugate gradient routine computes the inactive-coordinate step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConjugateGradientMethod {
    /// Truncated CG with absolute/relative residual tolerances
    #[default]
    Cg,
    /// Steihaug-Toint CG with a fixed relative residual tolerance
    SteihaugToint,
    /// Powell's TRSBOX, which also keeps the step inside the box
    Trsbox,
}

impl ConjugateGradientMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConjugateGradientMethod::Cg => "cg",
            ConjugateGradientMethod::SteihaugToint => "steihaug_toint",
            ConjugateGradientMethod::Trsbox => "trsbox",
        }
    }
}

impl fmt::Display for ConjugateGradientMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConjugateGradientMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cg" => Ok(ConjugateGradientMethod::Cg),
            "steihaug_toint" => Ok(ConjugateGradientMethod::SteihaugToint),
            "trsbox" => Ok(ConjugateGradientMethod::Trsbox),
            other => Err(Error::InvalidParameter(format!(
                "unknown conjugate gradient method '{other}', expected 'cg', 'steihaug_toint' or 'trsbox'"
            ))),
        }
    }
}

/// Settings for the inner conjugate gradient solve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConjugateGradientOptions {
    pub method: ConjugateGradientMethod,
    /// Absolute tolerance on the residual norm (`Cg` only)
    pub gtol_abs: f64,
    /// Tolerance on the residual norm relative to ||g|| (`Cg` only)
    pub gtol_rel: f64,
}

impl Default for ConjugateGradientOptions {
    fn default() -> Self {
        Self {
            method: ConjugateGradientMethod::Cg,
            gtol_abs: 1e-8,
            gtol_rel: 1e-6,
        }
    }
}

impl ConjugateGradientOptions {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("gtol_abs_cg", self.gtol_abs), ("gtol_rel_cg", self.gtol_rel)] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidParameter(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Approximately minimize the quadratic inside the ball of radius `radius`
    ///
    /// `step_lower` and `step_upper` bound the step itself. Only `Trsbox` reads
    /// them; the other routines may leave the box and rely on the caller to clip.
    pub fn solve(
        &self,
        gradient: &Array1<f64>,
        hessian: &Array2<f64>,
        radius: f64,
        step_lower: &Array1<f64>,
        step_upper: &Array1<f64>,
    ) -> Array1<f64> {
        match self.method {
            ConjugateGradientMethod::Cg => {
                minimize_trust_cg(gradient, hessian, radius, self.gtol_abs, self.gtol_rel)
            }
            ConjugateGradientMethod::SteihaugToint => minimize_trust_stcg(gradient, hessian, radius),
            ConjugateGradientMethod::Trsbox => {
                minimize_trust_trsbox(gradient, hessian, radius, step_lower, step_upper)
            }
        }
    }
}

/// Truncated conjugate gradient
///
/// Runs at most 2n iterations and stops once ||r|| ≤ max(gtol_abs, gtol_rel·||g||).
pub fn minimize_trust_cg(
    gradient: &Array1<f64>,
    hessian: &Array2<f64>,
    radius: f64,
    gtol_abs: f64,
    gtol_rel: f64,
) -> Array1<f64> {
    let n = gradient.len();
    let mut x = Array1::zeros(n);
    if n == 0 {
        return x;
    }

    let mut residual = gradient.clone();
    let mut direction = -gradient;

    let mut residual_norm = norm(&residual);
    let stop_tol = gtol_abs.max(gtol_rel * residual_norm);

    for _ in 0..2 * n {
        if residual_norm <= stop_tol {
            break;
        }

        let hessian_direction = hessian.dot(&direction);
        let curvature = direction.dot(&hessian_direction);
        let boundary = distance_to_boundary(&x, &direction, radius);

        if curvature <= 0.0 {
            x.scaled_add(boundary, &direction);
            break;
        }

        let residual_sq = residual.dot(&residual);
        let step_size = residual_sq / curvature;
        if step_size > boundary {
            x.scaled_add(boundary, &direction);
            break;
        }

        x.scaled_add(step_size, &direction);
        residual.scaled_add(step_size, &hessian_direction);

        let residual_sq_new = residual.dot(&residual);
        let beta = residual_sq_new / residual_sq;
        direction = &direction * beta - &residual;
        residual_norm = residual_sq_new.sqrt();
    }

    x
}

/// Steihaug-Toint conjugate gradient
///
/// At most n iterations; converged once ||r|| ≤ max(1e-50, 1e-5·||g||).
pub fn minimize_trust_stcg(gradient: &Array1<f64>, hessian: &Array2<f64>, radius: f64) -> Array1<f64> {
    let n = gradient.len();
    let mut x = Array1::zeros(n);
    if n == 0 {
        return x;
    }

    let mut residual = -gradient;
    let mut residual_sq = residual.dot(&residual);
    let tol = STEIHAUG_TOINT_ATOL.max(STEIHAUG_TOINT_RTOL * residual_sq.sqrt());
    if residual_sq.sqrt() <= tol {
        return x;
    }

    let mut direction = residual.clone();

    for _ in 0..n {
        let hessian_direction = hessian.dot(&direction);
        let curvature = direction.dot(&hessian_direction);

        if curvature <= 0.0 || !curvature.is_finite() {
            let boundary = distance_to_boundary(&x, &direction, radius);
            x.scaled_add(boundary, &direction);
            return x;
        }

        let alpha = residual_sq / curvature;
        let x_next = &x + &(&direction * alpha);
        if norm(&x_next) >= radius {
            let boundary = distance_to_boundary(&x, &direction, radius);
            x.scaled_add(boundary, &direction);
            return x;
        }
        x = x_next;

        residual.scaled_add(-alpha, &hessian_direction);
        let residual_sq_new = residual.dot(&residual);
        if residual_sq_new.sqrt() <= tol {
            break;
        }

        let beta = residual_sq_new / residual_sq;
        direction = &residual + &(&direction * beta);
        residual_sq = residual_sq_new;
    }

    x
}

/// Positive τ with ||x + τ·direction|| = radius
///
/// Assumes ||x|| ≤ radius. A zero direction gives 0.
pub fn distance_to_boundary(x: &Array1<f64>, direction: &Array1<f64>, radius: f64) -> f64 {
    let aa = direction.dot(direction);
    if aa == 0.0 {
        return 0.0;
    }
    let bb = x.dot(direction);
    let cc = x.dot(x) - radius * radius;

    let discriminant = (bb * bb - aa * cc).max(0.0);
    ((discriminant.sqrt() - bb) / aa).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2};

    const ALL_METHODS: [ConjugateGradientMethod; 3] = [
        ConjugateGradientMethod::Cg,
        ConjugateGradientMethod::SteihaugToint,
        ConjugateGradientMethod::Trsbox,
    ];

    fn solve_unbounded(
        method: ConjugateGradientMethod,
        g: &Array1<f64>,
        h: &Array2<f64>,
        radius: f64,
    ) -> Array1<f64> {
        let opts = ConjugateGradientOptions {
            method,
            ..Default::default()
        };
        let lower = Array1::from_elem(g.len(), f64::NEG_INFINITY);
        let upper = Array1::from_elem(g.len(), f64::INFINITY);
        opts.solve(g, h, radius, &lower, &upper)
    }

    #[test]
    fn test_interior_solution_is_newton_step() {
        let g = arr1(&[1.0, 0.0, 1.0]);
        let h = arr2(&[[1.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 2.0]]);

        for method in ALL_METHODS {
            let s = solve_unbounded(method, &g, &h, 2.0);
            assert_abs_diff_eq!(s[0], -1.0, epsilon = 1e-10);
            assert_abs_diff_eq!(s[1], 0.0, epsilon = 1e-10);
            assert_abs_diff_eq!(s[2], -0.5, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_negative_curvature_goes_to_boundary() {
        let g = arr1(&[1.0, 0.0, 1.0]);
        let h = arr2(&[[-2.0, 0.0, 0.0], [0.0, -1.0, 0.0], [0.0, 0.0, -1.0]]);
        let radius = 5.0 / 12.0;

        let s = minimize_trust_cg(&g, &h, radius, 1e-8, 1e-6);
        assert_abs_diff_eq!(norm(&s), radius, epsilon = 1e-12);
        assert!(s[0] < 0.0 && s[2] < 0.0);

        let s = minimize_trust_stcg(&g, &h, radius);
        assert_abs_diff_eq!(norm(&s), radius, epsilon = 1e-12);
    }

    #[test]
    fn test_ill_conditioned_reference_case() {
        let g = arr1(&[79579.8, 35973.7]);
        let h = arr2(&[
            [2.2267942225630835e08, 1.3303758212303287e08],
            [1.3303758212303287e08, 7.9554367206848219e07],
        ]);
        let radius = 0.2393319731158;

        for method in ALL_METHODS {
            let s = solve_unbounded(method, &g, &h, radius);
            assert_abs_diff_eq!(s[0], -0.0958339, epsilon = 1e-5);
            assert_abs_diff_eq!(s[1], 0.159809, epsilon = 1e-5);
            assert!(norm(&s) <= radius * (1.0 + 1e-12));
        }
    }

    #[test]
    fn test_step_hits_small_radius() {
        let g = arr1(&[0.00028774, 0.00763968, 0.01217268]);
        let h = arr2(&[
            [4.00803604e00, 1.65790911e02, 1.73222977e02],
            [1.65790911e02, 1.60880163e04, 1.10414034e04],
            [1.73222977e02, 1.10414034e04, 9.29926257e03],
        ]);
        let radius = 9.5367431640625e-05;

        let s = minimize_trust_cg(&g, &h, radius, 1e-8, 1e-6);
        assert_abs_diff_eq!(s[0], 9.50204689e-05, epsilon = 1e-9);
        assert_abs_diff_eq!(s[1], 3.56030822e-06, epsilon = 1e-9);
        assert_abs_diff_eq!(s[2], -7.30627902e-06, epsilon = 1e-9);
        assert_abs_diff_eq!(norm(&s), radius, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_radius_and_zero_gradient() {
        let h = Array2::eye(2);

        let s = minimize_trust_cg(&arr1(&[1.0, -1.0]), &h, 0.0, 1e-8, 1e-6);
        assert_eq!(s, arr1(&[0.0, 0.0]));

        let s = minimize_trust_cg(&arr1(&[0.0, 0.0]), &h, 1.0, 0.0, 0.0);
        assert_eq!(s, arr1(&[0.0, 0.0]));

        let s = minimize_trust_stcg(&arr1(&[0.0, 0.0]), &h, 1.0);
        assert_eq!(s, arr1(&[0.0, 0.0]));
    }

    #[test]
    fn test_empty_problem() {
        let g = Array1::<f64>::zeros(0);
        let h = Array2::<f64>::zeros((0, 0));
        assert_eq!(minimize_trust_cg(&g, &h, 1.0, 1e-8, 1e-6).len(), 0);
        assert_eq!(minimize_trust_stcg(&g, &h, 1.0).len(), 0);
    }

    #[test]
    fn test_distance_to_boundary() {
        let x = arr1(&[0.0, 0.0]);
        let d = arr1(&[3.0, 4.0]);
        assert_abs_diff_eq!(distance_to_boundary(&x, &d, 10.0), 2.0, epsilon = 1e-14);

        let x = arr1(&[1.0, 0.0]);
        let d = arr1(&[1.0, 0.0]);
        assert_abs_diff_eq!(distance_to_boundary(&x, &d, 2.0), 1.0, epsilon = 1e-14);

        assert_eq!(distance_to_boundary(&x, &arr1(&[0.0, 0.0]), 2.0), 0.0);
    }

    #[test]
    fn test_method_names() {
        assert_eq!("cg".parse::<ConjugateGradientMethod>().unwrap(), ConjugateGradientMethod::Cg);
        assert_eq!(
            "steihaug_toint".parse::<ConjugateGradientMethod>().unwrap(),
            ConjugateGradientMethod::SteihaugToint
        );
        assert_eq!(
            "trsbox".parse::<ConjugateGradientMethod>().unwrap(),
            ConjugateGradientMethod::Trsbox
        );
        assert!("newton".parse::<ConjugateGradientMethod>().is_err());
        assert_eq!(ConjugateGradientMethod::SteihaugToint.to_string(), "steihaug_toint");
    }

    #[test]
    fn test_method_serializes_as_snake_case() {
        for method in ALL_METHODS {
            let json = serde_json::to_string(&method).unwrap();
            assert_eq!(json, format!("\"{}\"", method.as_str()));
            assert_eq!(serde_json::from_str::<ConjugateGradientMethod>(&json).unwrap(), method);
        }
        assert_eq!(
            serde_json::to_string(&ConjugateGradientMethod::SteihaugToint).unwrap(),
            "\"steihaug_toint\""
        );
        assert!(serde_json::from_str::<ConjugateGradientMethod>("\"SteihaugToint\"").is_err());
    }

    #[test]
    fn test_only_trsbox_reads_step_bounds() {
        let g = arr1(&[1.0, 0.0, 1.0]);
        let h = arr2(&[[1.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 2.0]]);
        let lower = arr1(&[-0.5, -1.0, -1.0]);
        let upper = arr1(&[1.0, 1.0, 1.0]);

        for method in ALL_METHODS {
            let opts = ConjugateGradientOptions {
                method,
                ..Default::default()
            };
            let s = opts.solve(&g, &h, 2.0, &lower, &upper);
            let expected_first = if method == ConjugateGradientMethod::Trsbox { -0.5 } else { -1.0 };
            assert_abs_diff_eq!(s[0], expected_first, epsilon = 1e-10);
            assert_abs_diff_eq!(s[2], -0.5, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_options_validation() {
        assert!(ConjugateGradientOptions::default().validate().is_ok());
        let bad = ConjugateGradientOptions {
            gtol_rel: -1.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
