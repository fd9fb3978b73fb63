use ndarray::{Array1, Array2};

use crate::core::model::Bounds;

/// Partition of the coordinates by which bounds are currently binding
///
/// All index sets are sorted. A fresh value is built whenever the candidate point
/// or its gradient changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveBounds {
    /// At (or below) the lower bound with the gradient pushing further down
    pub lower: Vec<usize>,
    /// At (or above) the upper bound with the gradient pushing further up
    pub upper: Vec<usize>,
    /// lower == upper
    pub fixed: Vec<usize>,
    /// Union of `lower`, `upper` and `fixed`
    pub all: Vec<usize>,
    /// Complement of `all`
    pub inactive: Vec<usize>,
}

impl ActiveBounds {
    /// Classify every coordinate of `x` given the gradient at `x`
    pub fn classify(x: &Array1<f64>, gradient: &Array1<f64>, bounds: &Bounds) -> Self {
        let n = x.len();
        let (lo, up) = (bounds.lower(), bounds.upper());

        let mut lower = Vec::new();
        let mut upper = Vec::new();
        let mut fixed = Vec::new();
        let mut all = Vec::new();
        let mut inactive = Vec::new();

        for i in 0..n {
            // fixed coordinates belong to `fixed` only, whatever the gradient sign
            let is_fixed = bounds.is_fixed(i);
            let at_lower = !is_fixed && x[i] <= lo[i] && gradient[i] > 0.0;
            let at_upper = !is_fixed && x[i] >= up[i] && gradient[i] < 0.0;

            if at_lower {
                lower.push(i);
            }
            if at_upper {
                upper.push(i);
            }
            if is_fixed {
                fixed.push(i);
            }

            if at_lower || at_upper || is_fixed {
                all.push(i);
            } else {
                inactive.push(i);
            }
        }

        Self {
            lower,
            upper,
            fixed,
            all,
            inactive,
        }
    }

    pub fn has_active(&self) -> bool {
        !self.all.is_empty()
    }

    /// Restrict a full-length vector to the inactive coordinates
    pub fn gather(&self, v: &Array1<f64>) -> Array1<f64> {
        self.inactive.iter().map(|&i| v[i]).collect()
    }

    /// Embed an inactive-coordinate vector into a zero vector of length n
    pub fn scatter(&self, v_inactive: &Array1<f64>, n: usize) -> Array1<f64> {
        let mut full = Array1::zeros(n);
        for (k, &i) in self.inactive.iter().enumerate() {
            full[i] = v_inactive[k];
        }
        full
    }

    /// Gradient with every active coordinate zeroed
    pub fn project_gradient(&self, gradient: &Array1<f64>) -> Array1<f64> {
        self.scatter(&self.gather(gradient), gradient.len())
    }

    /// Principal submatrix of `hessian` on the inactive coordinates
    ///
    /// An empty inactive set gives a 0×0 matrix.
    pub fn restrict_hessian(&self, hessian: &Array2<f64>) -> Array2<f64> {
        let m = self.inactive.len();
        Array2::from_shape_fn((m, m), |(r, c)| {
            hessian[[self.inactive[r], self.inactive[c]]]
        })
    }

    /// Overwrite the active coordinates of a full-length step so that the
    /// resulting point lands exactly on its binding bound
    ///
    /// Fixed coordinates never move.
    pub fn snap_step_to_bounds(&self, step: &mut Array1<f64>, x: &Array1<f64>, bounds: &Bounds) {
        for &i in &self.lower {
            step[i] = bounds.lower()[i] - x[i];
        }
        for &i in &self.upper {
            step[i] = bounds.upper()[i] - x[i];
        }
        for &i in &self.fixed {
            step[i] = 0.0;
        }
    }
}
