use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Zip};

use crate::core::error::{Error, Result};

/// Quadratic surrogate m(x) = gᵀx + ½ xᵀHx around the expansion point
///
/// `linear_terms` is the gradient g of the surrogate at the expansion point and
/// `square_terms` the symmetric n×n Hessian H. H does not need to be positive
/// semi-definite.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadraticModel {
    linear_terms: Array1<f64>,
    square_terms: Array2<f64>,
}

impl QuadraticModel {
    /// Create a model, checking shape, finiteness and symmetry
    pub fn new(linear_terms: Array1<f64>, square_terms: Array2<f64>) -> Result<Self> {
        let n = linear_terms.len();

        if square_terms.nrows() != n {
            return Err(Error::DimensionMismatch {
                what: "square_terms rows",
                expected: n,
                got: square_terms.nrows(),
            });
        }
        if square_terms.ncols() != n {
            return Err(Error::DimensionMismatch {
                what: "square_terms columns",
                expected: n,
                got: square_terms.ncols(),
            });
        }

        if linear_terms.iter().any(|v| !v.is_finite()) {
            return Err(Error::NonFiniteInput(
                "linear_terms contains NaN or infinity".to_string(),
            ));
        }
        if square_terms.iter().any(|v| !v.is_finite()) {
            return Err(Error::NonFiniteInput(
                "square_terms contains NaN or infinity".to_string(),
            ));
        }

        for i in 0..n {
            for j in (i + 1)..n {
                let (hij, hji) = (square_terms[[i, j]], square_terms[[j, i]]);
                let scale = 1.0_f64.max(hij.abs()).max(hji.abs());
                if (hij - hji).abs() > 1e-8 * scale {
                    return Err(Error::InvalidParameter(format!(
                        "square_terms is not symmetric at ({i}, {j}): {hij} vs {hji}"
                    )));
                }
            }
        }

        Ok(Self {
            linear_terms,
            square_terms,
        })
    }

    pub fn dim(&self) -> usize {
        self.linear_terms.len()
    }

    pub fn linear_terms(&self) -> &Array1<f64> {
        &self.linear_terms
    }

    pub fn square_terms(&self) -> &Array2<f64> {
        &self.square_terms
    }

    /// Model value m(x)
    pub fn criterion(&self, x: &Array1<f64>) -> f64 {
        evaluate_criterion(x.view(), self.linear_terms.view(), self.square_terms.view())
    }

    /// Model gradient ∇m(x) = g + Hx
    pub fn gradient(&self, x: &Array1<f64>) -> Array1<f64> {
        &self.linear_terms + &self.square_terms.dot(x)
    }
}

/// Euclidean norm ||v||
pub fn norm(v: &Array1<f64>) -> f64 {
    v.dot(v).sqrt()
}

/// Evaluate gᵀx + ½ xᵀHx for arbitrary (possibly restricted) g and H
///
/// Empty inputs evaluate to zero.
pub fn evaluate_criterion(x: ArrayView1<f64>, gradient: ArrayView1<f64>, hessian: ArrayView2<f64>) -> f64 {
    if x.is_empty() {
        return 0.0;
    }
    gradient.dot(&x) + 0.5 * x.dot(&hessian.dot(&x))
}

/// Box constraints lower ≤ x ≤ upper
///
/// Infinite bounds are allowed. A coordinate with lower == upper is fixed.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    lower: Array1<f64>,
    upper: Array1<f64>,
}

impl Bounds {
    pub fn new(lower: Array1<f64>, upper: Array1<f64>) -> Result<Self> {
        if lower.len() != upper.len() {
            return Err(Error::DimensionMismatch {
                what: "upper bounds",
                expected: lower.len(),
                got: upper.len(),
            });
        }

        for (i, (&lo, &up)) in lower.iter().zip(upper.iter()).enumerate() {
            if lo.is_nan() || up.is_nan() {
                return Err(Error::InvalidBounds(format!("bound {i} is NaN")));
            }
            if lo > up {
                return Err(Error::InvalidBounds(format!(
                    "lower bound {lo} exceeds upper bound {up} at index {i}"
                )));
            }
            if lo == f64::INFINITY || up == f64::NEG_INFINITY {
                return Err(Error::InvalidBounds(format!(
                    "bound {i} excludes every finite value"
                )));
            }
        }

        Ok(Self { lower, upper })
    }

    /// Box with every coordinate unbounded
    pub fn unbounded(n: usize) -> Self {
        Self {
            lower: Array1::from_elem(n, f64::NEG_INFINITY),
            upper: Array1::from_elem(n, f64::INFINITY),
        }
    }

    pub fn dim(&self) -> usize {
        self.lower.len()
    }

    pub fn lower(&self) -> &Array1<f64> {
        &self.lower
    }

    pub fn upper(&self) -> &Array1<f64> {
        &self.upper
    }

    pub fn is_fixed(&self, i: usize) -> bool {
        self.lower[i] == self.upper[i]
    }

    /// Whether every coordinate of x lies within the box
    pub fn contains(&self, x: &Array1<f64>) -> bool {
        x.len() == self.dim()
            && Zip::from(x)
                .and(&self.lower)
                .and(&self.upper)
                .all(|&xi, &lo, &up| lo <= xi && xi <= up)
    }

    /// Snap every coordinate on or beyond a bound exactly onto it
    pub fn clip(&self, x: &Array1<f64>) -> Array1<f64> {
        self.clip_with_tolerance(x, 0.0)
    }

    /// Snap every coordinate within `tol` of (or beyond) a bound exactly onto it
    ///
    /// The upper bound wins when both apply, so fixed coordinates land on their value.
    pub fn clip_with_tolerance(&self, x: &Array1<f64>, tol: f64) -> Array1<f64> {
        let mut clipped = x.clone();
        Zip::from(&mut clipped)
            .and(&self.lower)
            .and(&self.upper)
            .for_each(|xi, &lo, &up| {
                if *xi <= lo + tol {
                    *xi = lo;
                }
                if *xi >= up - tol {
                    *xi = up;
                }
            });
        clipped
    }
}
