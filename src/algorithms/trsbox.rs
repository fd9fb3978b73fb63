//! Powell's TRSBOX step for the trust-region subproblem with box constraints
//!
//!   min  gᵀs + ½ sᵀHs   subject to  ||s|| ≤ Δ,  lower ≤ s ≤ upper
//!
//! A truncated conjugate gradient phase pins each variable that reaches a bound
//! and restarts from steepest descent on the remaining free variables. Once the
//! step touches the trust-region boundary, alternative iterations rotate it
//! around the sphere in the plane of the step and the reduced gradient, as long
//! as each rotation still buys a worthwhile reduction.

use ndarray::{Array1, Array2};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pin {
    Free,
    Lower,
    Upper,
}

/// What follows the conjugate gradient phase
enum Continuation {
    Finish,
    Rotate,
}

struct TrsboxState<'a> {
    hessian: &'a Array2<f64>,
    lower: &'a Array1<f64>,
    upper: &'a Array1<f64>,
    pin: Vec<Pin>,
    n_pinned: usize,
    step: Array1<f64>,
    /// Model gradient g + Hs at the current step
    gradient: Array1<f64>,
    /// Squared radius still available to the free variables
    radius_sq: f64,
    /// Model reduction achieved so far
    reduction: f64,
    n_iterations: usize,
}

/// Approximately minimize the quadratic inside the ball and the box
///
/// `lower` and `upper` bound the step itself and must bracket zero. Infinite
/// entries are allowed. Each coordinate of the result lies in
/// `[lower, upper]`.
pub fn minimize_trust_trsbox(
    gradient: &Array1<f64>,
    hessian: &Array2<f64>,
    radius: f64,
    lower: &Array1<f64>,
    upper: &Array1<f64>,
) -> Array1<f64> {
    let n = gradient.len();
    if n == 0 {
        return Array1::zeros(0);
    }

    let pin: Vec<Pin> = (0..n)
        .map(|i| {
            if upper[i] <= 0.0 && gradient[i] <= 0.0 {
                Pin::Upper
            } else if lower[i] >= 0.0 && gradient[i] >= 0.0 {
                Pin::Lower
            } else {
                Pin::Free
            }
        })
        .collect();
    let n_pinned = pin.iter().filter(|p| **p != Pin::Free).count();

    let mut state = TrsboxState {
        hessian,
        lower,
        upper,
        pin,
        n_pinned,
        step: Array1::zeros(n),
        gradient: gradient.clone(),
        radius_sq: radius * radius,
        reduction: 0.0,
        n_iterations: 0,
    };

    if let Continuation::Rotate = state.conjugate_gradient_phase() {
        state.alternative_phase();
    }

    state.into_step()
}

impl TrsboxState<'_> {
    fn is_free(&self, i: usize) -> bool {
        self.pin[i] == Pin::Free
    }

    fn conjugate_gradient_phase(&mut self) -> Continuation {
        let n = self.step.len();
        let mut direction = Array1::<f64>::zeros(n);
        let mut beta = 0.0;
        let mut gradient_free_sq = 0.0;
        let mut max_iterations = 0;

        loop {
            for i in 0..n {
                direction[i] = if !self.is_free(i) {
                    0.0
                } else if beta == 0.0 {
                    -self.gradient[i]
                } else {
                    beta * direction[i] - self.gradient[i]
                };
            }
            let direction_sq = direction.dot(&direction);
            if direction_sq == 0.0 {
                return Continuation::Finish;
            }
            if beta == 0.0 {
                gradient_free_sq = direction_sq;
                max_iterations = self.n_iterations + n - self.n_pinned;
            }
            if gradient_free_sq * self.radius_sq <= 1e-4 * self.reduction * self.reduction {
                return Continuation::Finish;
            }

            let hessian_direction = self.hessian.dot(&direction);
            let mut residual = self.radius_sq;
            let mut step_dot_direction = 0.0;
            let mut curvature = 0.0;
            for i in (0..n).filter(|&i| self.is_free(i)) {
                residual -= self.step[i] * self.step[i];
                step_dot_direction += direction[i] * self.step[i];
                curvature += direction[i] * hessian_direction[i];
            }
            if residual <= 0.0 {
                return Continuation::Rotate;
            }

            let root = (direction_sq * residual + step_dot_direction * step_dot_direction).sqrt();
            let to_boundary = if step_dot_direction < 0.0 {
                (root - step_dot_direction) / direction_sq
            } else {
                residual / (root + step_dot_direction)
            };
            let mut step_length = if curvature > 0.0 {
                to_boundary.min(gradient_free_sq / curvature)
            } else {
                to_boundary
            };

            let mut hit = None;
            for i in 0..n {
                if direction[i] != 0.0 {
                    let room = if direction[i] > 0.0 {
                        (self.upper[i] - self.step[i]) / direction[i]
                    } else {
                        (self.lower[i] - self.step[i]) / direction[i]
                    };
                    if room < step_length {
                        step_length = room;
                        hit = Some(i);
                    }
                }
            }

            let previous_gradient_sq = gradient_free_sq;
            let mut decrease = 0.0;
            if step_length > 0.0 {
                self.n_iterations += 1;
                gradient_free_sq = 0.0;
                for i in 0..n {
                    self.gradient[i] += step_length * hessian_direction[i];
                    if self.is_free(i) {
                        gradient_free_sq += self.gradient[i] * self.gradient[i];
                    }
                    self.step[i] += step_length * direction[i];
                }
                decrease = (step_length * (previous_gradient_sq - 0.5 * step_length * curvature)).max(0.0);
                self.reduction += decrease;
            }

            if let Some(i) = hit {
                self.pin[i] = if direction[i] < 0.0 { Pin::Lower } else { Pin::Upper };
                self.n_pinned += 1;
                self.radius_sq -= self.step[i] * self.step[i];
                if self.radius_sq <= 0.0 {
                    return Continuation::Rotate;
                }
                beta = 0.0;
                continue;
            }

            if step_length < to_boundary {
                if self.n_iterations == max_iterations || decrease <= 0.01 * self.reduction {
                    return Continuation::Finish;
                }
                beta = gradient_free_sq / previous_gradient_sq;
                continue;
            }

            return Continuation::Rotate;
        }
    }

    /// Rotate the step along the trust-region boundary
    fn alternative_phase(&mut self) {
        let n = self.step.len();

        'pinned: loop {
            if self.n_pinned + 1 >= n {
                return;
            }

            let mut step_sq = 0.0;
            let mut step_dot_gradient = 0.0;
            let mut gradient_free_sq = 0.0;
            let mut direction = Array1::<f64>::zeros(n);
            for i in (0..n).filter(|&i| self.is_free(i)) {
                step_sq += self.step[i] * self.step[i];
                step_dot_gradient += self.step[i] * self.gradient[i];
                gradient_free_sq += self.gradient[i] * self.gradient[i];
                direction[i] = self.step[i];
            }
            let mut hessian_step = self.hessian.dot(&direction);

            loop {
                let orthogonal = gradient_free_sq * step_sq - step_dot_gradient * step_dot_gradient;
                if orthogonal <= 1e-4 * self.reduction * self.reduction {
                    return;
                }
                let orthogonal = orthogonal.sqrt();
                for i in 0..n {
                    direction[i] = if self.is_free(i) {
                        (step_dot_gradient * self.step[i] - step_sq * self.gradient[i]) / orthogonal
                    } else {
                        0.0
                    };
                }
                let direction_dot_gradient = -orthogonal;

                // tangent of half the largest rotation angle the box allows
                let mut angle_bound = 1.0;
                let mut hit = None;
                for i in 0..n {
                    if !self.is_free(i) {
                        continue;
                    }
                    let room_lower = self.step[i] - self.lower[i];
                    let room_upper = self.upper[i] - self.step[i];
                    if room_lower <= 0.0 {
                        self.pin[i] = Pin::Lower;
                        self.n_pinned += 1;
                        continue 'pinned;
                    }
                    if room_upper <= 0.0 {
                        self.pin[i] = Pin::Upper;
                        self.n_pinned += 1;
                        continue 'pinned;
                    }

                    let ssq = self.step[i] * self.step[i] + direction[i] * direction[i];
                    let excess = ssq - self.lower[i] * self.lower[i];
                    if excess > 0.0 {
                        let excess = excess.sqrt() - direction[i];
                        if angle_bound * excess > room_lower {
                            angle_bound = room_lower / excess;
                            hit = Some((i, Pin::Lower));
                        }
                    }
                    let excess = ssq - self.upper[i] * self.upper[i];
                    if excess > 0.0 {
                        let excess = excess.sqrt() + direction[i];
                        if angle_bound * excess > room_upper {
                            angle_bound = room_upper / excess;
                            hit = Some((i, Pin::Upper));
                        }
                    }
                }

                let hessian_direction = self.hessian.dot(&direction);
                let mut dhd_s = 0.0;
                let mut dhd_sd = 0.0;
                let mut dhd_d = 0.0;
                for i in (0..n).filter(|&i| self.is_free(i)) {
                    dhd_s += direction[i] * hessian_direction[i];
                    dhd_sd += self.step[i] * hessian_direction[i];
                    dhd_d += self.step[i] * hessian_step[i];
                }

                let reduction_at = |tangent: f64| {
                    let sine = 2.0 * tangent / (1.0 + tangent * tangent);
                    let curvature = dhd_s + tangent * (tangent * dhd_d - 2.0 * dhd_sd);
                    sine * (tangent * step_dot_gradient - direction_dot_gradient - 0.5 * sine * curvature)
                };

                // coarse search over equally spaced tangents, refined by a parabola
                let n_grid = (17.0 * angle_bound + 3.1) as usize;
                let mut best = 0.0;
                let mut best_index = None;
                let mut before_best = 0.0;
                let mut after_best = 0.0;
                let mut previous = 0.0;
                for k in 1..=n_grid {
                    let value = reduction_at(angle_bound * k as f64 / n_grid as f64);
                    if value > best {
                        best = value;
                        best_index = Some(k);
                        before_best = previous;
                    } else if best_index.map_or(k == 1, |b| k == b + 1) {
                        after_best = value;
                    }
                    previous = value;
                }

                let Some(k_best) = best_index else {
                    return;
                };
                let tangent = if k_best < n_grid {
                    let shift = (after_best - before_best) / (2.0 * best - before_best - after_best);
                    angle_bound * (k_best as f64 + 0.5 * shift) / n_grid as f64
                } else {
                    angle_bound * k_best as f64 / n_grid as f64
                };

                let cosine = (1.0 - tangent * tangent) / (1.0 + tangent * tangent);
                let sine = 2.0 * tangent / (1.0 + tangent * tangent);
                let decrease = reduction_at(tangent);
                if decrease <= 0.0 {
                    return;
                }

                step_dot_gradient = 0.0;
                gradient_free_sq = 0.0;
                for i in 0..n {
                    self.gradient[i] += (cosine - 1.0) * hessian_step[i] + sine * hessian_direction[i];
                    if self.is_free(i) {
                        self.step[i] = cosine * self.step[i] + sine * direction[i];
                        step_dot_gradient += self.step[i] * self.gradient[i];
                        gradient_free_sq += self.gradient[i] * self.gradient[i];
                    }
                    hessian_step[i] = cosine * hessian_step[i] + sine * hessian_direction[i];
                }
                self.reduction += decrease;
                self.n_iterations += 1;

                if let Some((i, pin)) = hit {
                    if k_best == n_grid {
                        self.pin[i] = pin;
                        self.n_pinned += 1;
                        continue 'pinned;
                    }
                }

                if decrease <= 0.01 * self.reduction {
                    return;
                }
            }
        }
    }

    /// Final step, with pinned variables exactly on their bound
    fn into_step(self) -> Array1<f64> {
        Array1::from_shape_fn(self.step.len(), |i| match self.pin[i] {
            Pin::Lower => self.lower[i],
            Pin::Upper => self.upper[i],
            Pin::Free => self.step[i].min(self.upper[i]).max(self.lower[i]),
        })
    }
}
