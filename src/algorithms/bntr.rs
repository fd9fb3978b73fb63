//! Bounded Newton trust-region (BNTR) solver for box-constrained quadratic models
//!
//! Approximately minimizes m(x) = gᵀx + ½ xᵀHx subject to l ≤ x ≤ u:
//! 1. A few projected steepest-descent steps repair the initial active set and
//!    choose a starting trust-region radius
//! 2. Each outer iteration solves the trust-region subproblem on the inactive
//!    coordinates with conjugate gradients, projects the step into the box and
//!    accepts or rejects it from the ratio of actual to predicted reduction
//! 3. Termination uses the Fischer-Burmeister stationarity measure

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::algorithms::conjugate_gradient::{ConjugateGradientMethod, ConjugateGradientOptions};
use crate::algorithms::convergence::{check_for_convergence, ConvergenceCriteria, ConvergenceReason};
use crate::algorithms::radius::{
    update_radius_conjugate_gradient, ConjugateGradientRadiusOptions, SteepestDescentRadiusOptions,
};
use crate::algorithms::steepest_descent::projected_steepest_descent;
use crate::core::error::{Error, Result};
use crate::core::{evaluate_criterion, norm, ActiveBounds, Bounds, QuadraticModel};

/// Solution of one bounded trust-region subproblem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BntrResult {
    /// Final feasible point
    pub x: Array1<f64>,
    /// Model value at `x`
    pub criterion: f64,
    /// Number of outer iterations
    pub n_iterations: usize,
    pub converged: bool,
    pub convergence_reason: ConvergenceReason,
}

/// Step produced by the bounded conjugate gradient subsolver
#[derive(Debug, Clone)]
pub struct ConjugateGradientStep {
    /// Full-length step, exact on active and fixed coordinates
    pub step: Array1<f64>,
    /// Step on the inactive coordinates as returned by the CG routine
    pub step_inactive: Array1<f64>,
    /// Euclidean norm of `step_inactive`
    pub step_norm: f64,
    /// Radius after a possible reset from zero
    pub radius: f64,
}

/// Bounded Newton trust-region solver
///
/// Options are validated once per call to [`Bntr::minimize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bntr {
    /// Maximum number of outer iterations
    pub max_iterations: usize,
    /// Number of projected steepest-descent trials before the CG phase
    pub max_iterations_gradient_descent: usize,
    pub convergence: ConvergenceCriteria,
    pub conjugate_gradient: ConjugateGradientOptions,
    pub steepest_descent_radius: SteepestDescentRadiusOptions,
    pub conjugate_gradient_radius: ConjugateGradientRadiusOptions,
}

impl Default for Bntr {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            max_iterations_gradient_descent: 5,
            convergence: ConvergenceCriteria::default(),
            conjugate_gradient: ConjugateGradientOptions::default(),
            steepest_descent_radius: SteepestDescentRadiusOptions::default(),
            conjugate_gradient_radius: ConjugateGradientRadiusOptions::default(),
        }
    }
}

/// Mutable state of one solve
#[derive(Debug, Clone)]
struct IterateState {
    x: Array1<f64>,
    f: f64,
    gradient: Array1<f64>,
    gradient_projected: Array1<f64>,
    active: ActiveBounds,
    hessian_inactive: Array2<f64>,
    radius: f64,
    converged: bool,
    reason: ConvergenceReason,
}

impl IterateState {
    fn new(model: &QuadraticModel, bounds: &Bounds, x: Array1<f64>, radius: f64) -> Self {
        let f = model.criterion(&x);
        let gradient = model.gradient(&x);
        let active = ActiveBounds::classify(&x, &gradient, bounds);
        let gradient_projected = active.project_gradient(&gradient);
        let hessian_inactive = active.restrict_hessian(model.square_terms());
        Self {
            x,
            f,
            gradient,
            gradient_projected,
            active,
            hessian_inactive,
            radius,
            converged: false,
            reason: ConvergenceReason::ContinueIterating,
        }
    }

    /// Recompute gradient, active set and restricted Hessian at the current point
    fn refresh(&mut self, model: &QuadraticModel, bounds: &Bounds) {
        self.gradient = model.gradient(&self.x);
        self.active = ActiveBounds::classify(&self.x, &self.gradient, bounds);
        self.gradient_projected = self.active.project_gradient(&self.gradient);
        self.hessian_inactive = self.active.restrict_hessian(model.square_terms());
    }
}

impl Bntr {
    /// Create a solver with default settings
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_max_iterations_gradient_descent(mut self, max_iterations: usize) -> Self {
        self.max_iterations_gradient_descent = max_iterations;
        self
    }

    /// Set the stationarity tolerances
    pub fn with_convergence(mut self, convergence: ConvergenceCriteria) -> Self {
        self.convergence = convergence;
        self
    }

    pub fn with_conjugate_gradient_method(mut self, method: ConjugateGradientMethod) -> Self {
        self.conjugate_gradient.method = method;
        self
    }

    /// Set the residual tolerances of the inner CG routine
    pub fn with_conjugate_gradient_tolerances(mut self, gtol_abs: f64, gtol_rel: f64) -> Self {
        self.conjugate_gradient.gtol_abs = gtol_abs;
        self.conjugate_gradient.gtol_rel = gtol_rel;
        self
    }

    pub fn with_steepest_descent_radius(mut self, options: SteepestDescentRadiusOptions) -> Self {
        self.steepest_descent_radius = options;
        self
    }

    pub fn with_conjugate_gradient_radius(mut self, options: ConjugateGradientRadiusOptions) -> Self {
        self.conjugate_gradient_radius = options;
        self
    }

    /// Check every option record
    pub fn validate(&self) -> Result<()> {
        self.convergence.validate()?;
        self.conjugate_gradient.validate()?;
        self.steepest_descent_radius.validate()?;
        self.conjugate_gradient_radius.validate()
    }

    /// Approximately minimize `model` over `bounds` starting from `x_start`
    ///
    /// A start outside the box is projected onto it first. Reaching
    /// `max_iterations` is not an error: the result reports `converged == false`.
    ///
    /// # Errors
    /// Invalid options, mismatched dimensions, a non-finite start, or
    /// [`Error::ZeroDirection`] when the subproblem admits no step at all.
    pub fn minimize(
        &self,
        model: &QuadraticModel,
        bounds: &Bounds,
        x_start: &Array1<f64>,
    ) -> Result<BntrResult> {
        self.validate()?;

        let n = model.dim();
        if bounds.dim() != n {
            return Err(Error::DimensionMismatch {
                what: "bounds",
                expected: n,
                got: bounds.dim(),
            });
        }
        if x_start.len() != n {
            return Err(Error::DimensionMismatch {
                what: "x_start",
                expected: n,
                got: x_start.len(),
            });
        }
        if x_start.iter().any(|v| !v.is_finite()) {
            return Err(Error::NonFiniteInput(
                "x_start contains NaN or infinity".to_string(),
            ));
        }

        let x = bounds.clip(x_start);
        if x != *x_start {
            log::warn!("x_start lies outside the bounds and was projected onto them");
        }

        log::debug!(
            "Starting BNTR: n={}, conjugate_gradient_method={}, max_iterations={}",
            n,
            self.conjugate_gradient.method,
            self.max_iterations
        );

        let mut state = self.preliminary_step(model, bounds, x);

        let mut n_iterations = 0;
        for iter in 0..=self.max_iterations {
            n_iterations = iter;
            if state.converged {
                break;
            }
            self.outer_iteration(model, bounds, &mut state, iter)?;
        }

        if state.converged {
            log::debug!(
                "BNTR converged after {} iterations: f={:.6e} ({})",
                n_iterations,
                state.f,
                state.reason
            );
        } else {
            log::warn!(
                "BNTR stopped without converging after {} iterations: {}",
                n_iterations,
                state.reason
            );
        }

        Ok(BntrResult {
            x: state.x,
            criterion: state.f,
            n_iterations,
            converged: state.converged,
            convergence_reason: state.reason,
        })
    }

    /// Check the start for stationarity, then run the steepest-descent phase and
    /// pick the radius for the conjugate gradient phase
    fn preliminary_step(&self, model: &QuadraticModel, bounds: &Bounds, x: Array1<f64>) -> IterateState {
        let sd_options = &self.steepest_descent_radius;
        let mut state = IterateState::new(model, bounds, x, sd_options.default_radius);

        (state.converged, state.reason) = check_for_convergence(
            &state.x,
            state.f,
            &state.gradient,
            model,
            bounds,
            None,
            self.max_iterations,
            &self.convergence,
        );
        if state.converged {
            log::debug!("Start is already stationary: {}", state.reason);
            return state;
        }

        let descent = projected_steepest_descent(
            &state.x,
            state.f,
            &state.gradient_projected,
            &state.hessian_inactive,
            model,
            bounds,
            &state.active,
            self.max_iterations_gradient_descent,
            sd_options,
        );

        if descent.f_min < state.f {
            state.x = bounds.clip(&descent.x);
            state.f = model.criterion(&state.x);
            state.refresh(model, bounds);

            (state.converged, state.reason) = check_for_convergence(
                &state.x,
                state.f,
                &state.gradient_projected,
                model,
                bounds,
                None,
                self.max_iterations,
                &self.convergence,
            );
        }

        if !state.converged {
            state.radius = sd_options.clamp(descent.radius.max(descent.radius_upper_bound));
        }

        log::debug!(
            "Steepest descent phase: f={:.6e}, step_size={:.3e}, radius={:.3e}, active={}",
            state.f,
            descent.step_size,
            state.radius,
            state.active.all.len()
        );

        state
    }

    /// Retry conjugate gradient steps until one is accepted or the solve stops
    fn outer_iteration(
        &self,
        model: &QuadraticModel,
        bounds: &Bounds,
        state: &mut IterateState,
        iter: usize,
    ) -> Result<()> {
        let x_old = state.x.clone();
        let f_old = state.f;
        let mut accept_step = false;

        while !accept_step && !state.converged {
            let gradient_inactive = state.active.gather(&state.gradient);
            let cg_step = compute_conjugate_gradient_step(
                &state.x,
                &gradient_inactive,
                &state.hessian_inactive,
                bounds,
                &state.active,
                state.radius,
                &self.conjugate_gradient,
                &self.conjugate_gradient_radius,
            )?;
            state.radius = cg_step.radius;

            state.x = bounds.clip(&(&state.x + &cg_step.step));

            let predicted = predicted_reduction(
                &cg_step.step,
                &cg_step.step_inactive,
                &state.gradient,
                &gradient_inactive,
                &state.hessian_inactive,
                &state.active,
            );
            state.f = model.criterion(&state.x);
            let actual = f_old - state.f;

            let radius_old = state.radius;
            (state.radius, accept_step) = update_radius_conjugate_gradient(
                state.f,
                predicted,
                actual,
                cg_step.step_norm,
                state.radius,
                &self.conjugate_gradient_radius,
            );

            if accept_step {
                state.refresh(model, bounds);
                log::debug!(
                    "iter {iter}: f={:.6e} radius={:.3e} step_norm={:.3e} active={}",
                    state.f,
                    state.radius,
                    cg_step.step_norm,
                    state.active.all.len()
                );
            } else {
                log::trace!(
                    "iter {iter}: rejected step (predicted={predicted:.3e}, actual={actual:.3e}), \
                     radius {radius_old:.3e} -> {:.3e}",
                    state.radius
                );
                state.x = x_old.clone();
                state.f = f_old;

                if state.radius == radius_old {
                    state.converged = true;
                    state.reason = ConvergenceReason::TrustRegionRadiusStalled;
                    break;
                }
            }

            (state.converged, state.reason) = check_for_convergence(
                &state.x,
                state.f,
                &state.gradient,
                model,
                bounds,
                Some(iter),
                self.max_iterations,
                &self.convergence,
            );
        }

        Ok(())
    }
}

/// Bounded conjugate gradient step on the inactive coordinates
///
/// A zero radius is replaced by the step norm, or, when the step is zero too, by
/// the default radius with one re-solve.
///
/// # Errors
/// [`Error::ZeroDirection`] if the re-solve still gives a zero step.
#[allow(clippy::too_many_arguments)]
pub fn compute_conjugate_gradient_step(
    x: &Array1<f64>,
    gradient_inactive: &Array1<f64>,
    hessian_inactive: &Array2<f64>,
    bounds: &Bounds,
    active: &ActiveBounds,
    radius: f64,
    cg_options: &ConjugateGradientOptions,
    radius_options: &ConjugateGradientRadiusOptions,
) -> Result<ConjugateGradientStep> {
    let n = x.len();

    if active.inactive.is_empty() {
        let mut step = Array1::zeros(n);
        active.snap_step_to_bounds(&mut step, x, bounds);
        return Ok(ConjugateGradientStep {
            step,
            step_inactive: Array1::zeros(0),
            step_norm: 0.0,
            radius,
        });
    }

    // room left before each inactive coordinate reaches its bound
    let x_inactive = active.gather(x);
    let step_lower = &active.gather(bounds.lower()) - &x_inactive;
    let step_upper = &active.gather(bounds.upper()) - &x_inactive;

    let mut radius = radius;
    let mut step_inactive = cg_options.solve(gradient_inactive, hessian_inactive, radius, &step_lower, &step_upper);
    let mut step_norm = norm(&step_inactive);

    if radius == 0.0 {
        if step_norm > 0.0 {
            radius = radius_options.clamp(step_norm);
        } else {
            radius = radius_options.clamp(radius_options.default_radius);
            step_inactive = cg_options.solve(gradient_inactive, hessian_inactive, radius, &step_lower, &step_upper);
            step_norm = norm(&step_inactive);

            if step_norm == 0.0 {
                return Err(Error::ZeroDirection);
            }
        }
    }

    let mut step = active.scatter(&step_inactive, n);
    active.snap_step_to_bounds(&mut step, x, bounds);

    Ok(ConjugateGradientStep {
        step,
        step_inactive,
        step_norm,
        radius,
    })
}

/// Reduction of the model predicted for a conjugate gradient step
///
/// When some bound is active the projected step is re-evaluated with the
/// unprojected gradient on the inactive coordinates; otherwise the CG step itself
/// is evaluated.
pub fn predicted_reduction(
    step: &Array1<f64>,
    step_inactive: &Array1<f64>,
    gradient_unprojected: &Array1<f64>,
    gradient_inactive: &Array1<f64>,
    hessian_inactive: &Array2<f64>,
    active: &ActiveBounds,
) -> f64 {
    let model_value = if active.has_active() {
        let step_recomputed = active.gather(step);
        let gradient_recomputed = active.gather(gradient_unprojected);
        evaluate_criterion(
            step_recomputed.view(),
            gradient_recomputed.view(),
            hessian_inactive.view(),
        )
    } else {
        evaluate_criterion(
            step_inactive.view(),
            gradient_inactive.view(),
            hessian_inactive.view(),
        )
    };

    -model_value
}

/// Solve one bounded trust-region subproblem with explicit settings
///
/// Convenience wrapper around [`Bntr::minimize`].
#[allow(clippy::too_many_arguments)]
pub fn solve_bntr(
    model: &QuadraticModel,
    lower_bounds: &Array1<f64>,
    upper_bounds: &Array1<f64>,
    x_start: &Array1<f64>,
    conjugate_gradient_method: ConjugateGradientMethod,
    maxiter: usize,
    maxiter_gradient_descent: usize,
    gtol_abs: f64,
    gtol_rel: f64,
    gtol_scaled: f64,
    gtol_abs_cg: f64,
    gtol_rel_cg: f64,
) -> Result<BntrResult> {
    let bounds = Bounds::new(lower_bounds.clone(), upper_bounds.clone())?;

    Bntr::new()
        .with_max_iterations(maxiter)
        .with_max_iterations_gradient_descent(maxiter_gradient_descent)
        .with_convergence(ConvergenceCriteria {
            gtol_abs,
            gtol_rel,
            gtol_scaled,
        })
        .with_conjugate_gradient_method(conjugate_gradient_method)
        .with_conjugate_gradient_tolerances(gtol_abs_cg, gtol_rel_cg)
        .minimize(model, &bounds, x_start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr1, arr2};

    fn all_inactive(n: usize) -> ActiveBounds {
        ActiveBounds {
            lower: vec![],
            upper: vec![],
            fixed: vec![],
            all: vec![],
            inactive: (0..n).collect(),
        }
    }

    #[test]
    fn test_zero_radius_zero_gradient_is_fatal() {
        let x = arr1(&[0.0, 0.0]);
        let result = compute_conjugate_gradient_step(
            &x,
            &arr1(&[0.0, 0.0]),
            &Array2::zeros((2, 2)),
            &Bounds::unbounded(2),
            &all_inactive(2),
            0.0,
            &ConjugateGradientOptions::default(),
            &ConjugateGradientRadiusOptions::default(),
        );
        assert_eq!(result.unwrap_err(), Error::ZeroDirection);
    }

    #[test]
    fn test_zero_radius_resolves_at_default_radius() {
        let x = arr1(&[0.0, 0.0]);
        let step = compute_conjugate_gradient_step(
            &x,
            &arr1(&[1.0, 0.0]),
            &Array2::eye(2),
            &Bounds::unbounded(2),
            &all_inactive(2),
            0.0,
            &ConjugateGradientOptions::default(),
            &ConjugateGradientRadiusOptions::default(),
        )
        .unwrap();

        assert_relative_eq!(step.radius, 100.0);
        assert_relative_eq!(step.step[0], -1.0, epsilon = 1e-12);
        assert_relative_eq!(step.step_norm, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_empty_inactive_set_snaps_to_bounds() {
        let bounds = Bounds::new(arr1(&[0.0, -1.0]), arr1(&[0.0, 1.0])).unwrap();
        let x = arr1(&[0.0, 1.0]);
        let active = ActiveBounds::classify(&x, &arr1(&[1.0, -1.0]), &bounds);
        assert!(active.inactive.is_empty());

        let step = compute_conjugate_gradient_step(
            &x,
            &Array1::zeros(0),
            &Array2::zeros((0, 0)),
            &bounds,
            &active,
            1.0,
            &ConjugateGradientOptions::default(),
            &ConjugateGradientRadiusOptions::default(),
        )
        .unwrap();

        assert_eq!(step.step, arr1(&[0.0, 0.0]));
        assert_eq!(step.step_norm, 0.0);
        assert_eq!(step.step_inactive.len(), 0);
        assert_eq!(step.radius, 1.0);
    }

    #[test]
    fn test_predicted_reduction_without_active_bounds() {
        let active = all_inactive(2);
        let g = arr1(&[1.0, -2.0]);
        let h = arr2(&[[2.0, 0.0], [0.0, 4.0]]);
        let s = arr1(&[-0.5, 0.5]);

        // m(s) = -0.5 - 1.0 + 0.5 * (0.5 + 1.0) = -0.75
        let reduction = predicted_reduction(&s, &s, &g, &g, &h, &active);
        assert_relative_eq!(reduction, 0.75, epsilon = 1e-14);
    }

    #[test]
    fn test_predicted_reduction_with_active_bounds() {
        let active = ActiveBounds {
            lower: vec![0],
            upper: vec![],
            fixed: vec![],
            all: vec![0],
            inactive: vec![1],
        };
        let gradient = arr1(&[3.0, -2.0]);
        let step = arr1(&[0.1, 0.5]);
        let h = arr2(&[[4.0]]);

        // only the inactive coordinate counts: -2 * 0.5 + 0.5 * 4 * 0.25 = -0.5
        let reduction =
            predicted_reduction(&step, &arr1(&[0.5]), &gradient, &arr1(&[-2.0]), &h, &active);
        assert_relative_eq!(reduction, 0.5, epsilon = 1e-14);
    }

    #[test]
    fn test_builder_and_validation() {
        let solver = Bntr::new()
            .with_max_iterations(7)
            .with_max_iterations_gradient_descent(2)
            .with_conjugate_gradient_method(ConjugateGradientMethod::SteihaugToint)
            .with_conjugate_gradient_tolerances(1e-10, 1e-8);

        assert_eq!(solver.max_iterations, 7);
        assert_eq!(solver.max_iterations_gradient_descent, 2);
        assert_eq!(solver.conjugate_gradient.method, ConjugateGradientMethod::SteihaugToint);
        assert_eq!(solver.conjugate_gradient.gtol_abs, 1e-10);
        assert!(solver.validate().is_ok());

        let bad = Bntr::new().with_convergence(ConvergenceCriteria {
            gtol_abs: -1.0,
            ..Default::default()
        });
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_options_serde_round_trip() {
        let solver = Bntr::default();
        let json = serde_json::to_string(&solver).unwrap();
        assert!(json.contains("\"method\":\"cg\""));
        let back: Bntr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, solver);

        let solver = Bntr::new()
            .with_max_iterations(7)
            .with_conjugate_gradient_method(ConjugateGradientMethod::Trsbox);
        let json = serde_json::to_string(&solver).unwrap();
        assert!(json.contains("\"method\":\"trsbox\""));
        assert_eq!(serde_json::from_str::<Bntr>(&json).unwrap(), solver);
    }

    #[test]
    fn test_result_serde_round_trip() {
        let model = QuadraticModel::new(arr1(&[1.0, 0.0, 1.0]), Array2::eye(3)).unwrap();
        let result = Bntr::new()
            .minimize(&model, &Bounds::unbounded(3), &arr1(&[0.0, 0.0, 0.0]))
            .unwrap();

        let json = serde_json::to_string(&result).unwrap();
        let back: BntrResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_minimize_rejects_dimension_mismatch() {
        let model = QuadraticModel::new(arr1(&[1.0, 1.0]), Array2::eye(2)).unwrap();
        let solver = Bntr::new();

        let err = solver
            .minimize(&model, &Bounds::unbounded(3), &arr1(&[0.0, 0.0]))
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { what: "bounds", .. }));

        let err = solver
            .minimize(&model, &Bounds::unbounded(2), &arr1(&[0.0]))
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { what: "x_start", .. }));

        let err = solver
            .minimize(&model, &Bounds::unbounded(2), &arr1(&[f64::NAN, 0.0]))
            .unwrap_err();
        assert!(matches!(err, Error::NonFiniteInput(_)));
    }

    #[test]
    fn test_start_outside_box_is_projected() {
        let model = QuadraticModel::new(arr1(&[1.0, 1.0]), Array2::eye(2)).unwrap();
        let bounds = Bounds::new(arr1(&[0.0, 0.0]), arr1(&[1.0, 1.0])).unwrap();

        let result = Bntr::new().minimize(&model, &bounds, &arr1(&[5.0, -5.0])).unwrap();

        assert!(bounds.contains(&result.x));
        assert!(result.converged);
        assert_eq!(result.x, arr1(&[0.0, 0.0]));
    }

    #[test]
    fn test_max_iterations_is_reported() {
        let model = QuadraticModel::new(
            arr1(&[-1726.71, -394.745, -340.876]),
            arr2(&[
                [3.2235026082366367e03, 3.5903801754879023e03, 1.4504956347170955e03],
                [3.5903801754879023e03, 1.0326690788609463e04, 4.9152962632434155e03],
                [1.4504956347170955e03, 4.9152962632434155e03, 2.7645273367617360e03],
            ]),
        )
        .unwrap();
        let bounds = Bounds::new(arr1(&[-1.0, -1.0, -1.0]), arr1(&[1.0, 1.0, 1.0])).unwrap();

        let result = Bntr::new()
            .with_max_iterations(2)
            .minimize(&model, &bounds, &arr1(&[0.0, 0.0, 0.0]))
            .unwrap();

        assert!(!result.converged);
        assert_eq!(result.convergence_reason, ConvergenceReason::MaxIterationsReached);
        assert_eq!(result.n_iterations, 2);
        assert!(result.criterion < 0.0);
    }
}
