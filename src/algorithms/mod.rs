pub mod bntr;
pub mod conjugate_gradient;
pub mod convergence;
pub mod radius;
pub mod steepest_descent;
pub mod trsbox;

pub use bntr::{solve_bntr, Bntr, BntrResult};
pub use conjugate_gradient::{ConjugateGradientMethod, ConjugateGradientOptions};
pub use convergence::{fischer_burmeister, ConvergenceCriteria, ConvergenceReason};
pub use radius::{ConjugateGradientRadiusOptions, SteepestDescentRadiusOptions};
