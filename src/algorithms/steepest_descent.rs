use ndarray::{Array1, Array2};

use crate::algorithms::radius::{update_radius_steepest_descent, SteepestDescentRadiusOptions};
use crate::core::{norm, ActiveBounds, Bounds, QuadraticModel};

/// Outcome of the projected steepest-descent phase
#[derive(Debug, Clone)]
pub struct SteepestDescentOutcome {
    /// Feasible point with the smallest model value seen (the start if nothing improved)
    pub x: Array1<f64>,
    /// Model value at `x`
    pub f_min: f64,
    /// Step length that produced `x`, 0 if nothing improved
    pub step_size: f64,
    /// Radius after the last trial step
    pub radius: f64,
    /// Largest radius that gave good agreement between predicted and actual reduction
    pub radius_upper_bound: f64,
}

/// Take up to `max_iterations` projected steps along -`gradient_projected`
///
/// Each trial moves from the previous trial point by `radius / ||g||` along the
/// negative projected gradient and is clipped back into the box. The radius is
/// adapted after every trial from the agreement between the model's predicted
/// decrease and the decrease relative to `f_initial`. Never fails: a zero
/// projected gradient or no improvement returns the start unchanged.
#[allow(clippy::too_many_arguments)]
pub fn projected_steepest_descent(
    x_start: &Array1<f64>,
    f_initial: f64,
    gradient_projected: &Array1<f64>,
    hessian_inactive: &Array2<f64>,
    model: &QuadraticModel,
    bounds: &Bounds,
    active: &ActiveBounds,
    max_iterations: usize,
    options: &SteepestDescentRadiusOptions,
) -> SteepestDescentOutcome {
    let gradient_norm = norm(gradient_projected);

    let mut outcome = SteepestDescentOutcome {
        x: x_start.clone(),
        f_min: f_initial,
        step_size: 0.0,
        radius: options.default_radius,
        radius_upper_bound: 0.0,
    };

    if gradient_norm == 0.0 || !gradient_norm.is_finite() {
        log::trace!("steepest descent skipped: projected gradient norm is {gradient_norm}");
        return outcome;
    }

    let mut x = x_start.clone();
    let mut radius = options.default_radius;
    let mut radius_upper_bound = 0.0;

    for iter in 0..max_iterations {
        let step_size = radius / gradient_norm;
        let x_old = x;
        x = bounds.clip(&(&x_old - &(gradient_projected * step_size)));
        let f_candidate = model.criterion(&x);

        if f_candidate < outcome.f_min {
            outcome.f_min = f_candidate;
            outcome.step_size = step_size;
            outcome.x = x.clone();
        }

        let displacement = active.gather(&(&x - &x_old));
        let curvature = if displacement.is_empty() {
            0.0
        } else {
            displacement.dot(&hessian_inactive.dot(&displacement))
        };

        let predicted_reduction =
            radius * (gradient_norm - 0.5 * radius * curvature / (gradient_norm * gradient_norm));
        let actual_reduction = f_initial - f_candidate;

        log::trace!(
            "steepest descent trial {iter}: radius={radius:.3e} f={f_candidate:.6e} \
             predicted={predicted_reduction:.3e} actual={actual_reduction:.3e}"
        );

        (radius, radius_upper_bound) = update_radius_steepest_descent(
            radius,
            radius_upper_bound,
            predicted_reduction,
            actual_reduction,
            gradient_norm,
            options,
        );
    }

    outcome.radius = radius;
    outcome.radius_upper_bound = radius_upper_bound;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr1, arr2};

    fn separable() -> QuadraticModel {
        QuadraticModel::new(
            arr1(&[1.0, 0.0, 1.0]),
            arr2(&[[1.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 2.0]]),
        )
        .unwrap()
    }

    fn run(model: &QuadraticModel, bounds: &Bounds, x: &Array1<f64>, iters: usize) -> SteepestDescentOutcome {
        run_with(model, bounds, x, iters, &SteepestDescentRadiusOptions::default())
    }

    fn run_with(
        model: &QuadraticModel,
        bounds: &Bounds,
        x: &Array1<f64>,
        iters: usize,
        options: &SteepestDescentRadiusOptions,
    ) -> SteepestDescentOutcome {
        let gradient = model.gradient(x);
        let active = ActiveBounds::classify(x, &gradient, bounds);
        let projected = active.project_gradient(&gradient);
        let hessian = active.restrict_hessian(model.square_terms());
        projected_steepest_descent(
            x,
            model.criterion(x),
            &projected,
            &hessian,
            model,
            bounds,
            &active,
            iters,
            options,
        )
    }

    #[test]
    fn test_descent_improves_and_stays_feasible() {
        let model = separable();
        let bounds = Bounds::new(arr1(&[-0.5, -1.0, -1.0]), arr1(&[1.0, 1.0, 1.0])).unwrap();
        let x = arr1(&[0.0, 0.0, 0.0]);

        let out = run(&model, &bounds, &x, 5);

        assert!(out.f_min < 0.0);
        assert!(out.step_size > 0.0);
        assert!(bounds.contains(&out.x));
        assert_relative_eq!(out.f_min, model.criterion(&out.x), epsilon = 1e-14);
    }

    #[test]
    fn test_zero_gradient_returns_start() {
        let model = QuadraticModel::new(Array1::zeros(2), Array2::zeros((2, 2))).unwrap();
        let bounds = Bounds::unbounded(2);
        let x = arr1(&[0.3, -0.2]);

        let out = run(&model, &bounds, &x, 5);

        assert_eq!(out.x, x);
        assert_eq!(out.f_min, 0.0);
        assert_eq!(out.step_size, 0.0);
        assert_eq!(out.radius, SteepestDescentRadiusOptions::default().default_radius);
        assert_eq!(out.radius_upper_bound, 0.0);
    }

    #[test]
    fn test_zero_iterations_returns_start() {
        let model = separable();
        let bounds = Bounds::unbounded(3);
        let x = arr1(&[0.0, 0.0, 0.0]);

        let out = run(&model, &bounds, &x, 0);

        assert_eq!(out.x, x);
        assert_eq!(out.step_size, 0.0);
    }

    #[test]
    fn test_fixed_coordinates_do_not_move() {
        let model = separable();
        let bounds = Bounds::new(arr1(&[-2.0, 0.25, -2.0]), arr1(&[2.0, 0.25, 2.0])).unwrap();
        let x = arr1(&[0.0, 0.25, 0.0]);
        let options = SteepestDescentRadiusOptions {
            default_radius: 0.5,
            ..Default::default()
        };

        let out = run_with(&model, &bounds, &x, 5, &options);

        assert_eq!(out.x[1], 0.25);
        assert!(out.step_size > 0.0);
        assert!(out.f_min < model.criterion(&x));
        assert!(bounds.contains(&out.x));
    }

    #[test]
    fn test_trials_chain_from_clipped_corner() {
        // The first trial at the default radius lands on the corner [-2, 0.25, -2],
        // and later trials start from there, so nothing beats the start
        let model = separable();
        let bounds = Bounds::new(arr1(&[-2.0, 0.25, -2.0]), arr1(&[2.0, 0.25, 2.0])).unwrap();
        let x = arr1(&[0.0, 0.25, 0.0]);

        let out = run(&model, &bounds, &x, 5);

        assert_eq!(out.x, x);
        assert_eq!(out.step_size, 0.0);
        assert_eq!(out.f_min, model.criterion(&x));
        assert!(out.radius < SteepestDescentRadiusOptions::default().default_radius);
    }
}
