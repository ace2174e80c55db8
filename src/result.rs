//! Result types for a Pathfinder run.

use ndarray::{Array1, Array2, ArrayView1};

/// Output of a single Pathfinder path.
#[derive(Debug, Clone)]
pub struct PathfinderResult {
    /// Row labels of [`draws`](Self::draws): the constrained parameter
    /// names followed by `lp_approx__` and `lp__`.
    pub param_names: Vec<String>,

    /// Constrained draws, `(num_constrained + 2) × num_draws`. The last
    /// two rows hold each draw's log-density under the selected Gaussian
    /// approximation and under the target.
    pub draws: Array2<f64>,

    /// Per-draw log importance ratio `lp__ - lp_approx__`, suitable for
    /// Pareto-smoothed importance sampling across paths.
    pub lp_ratio: Array1<f64>,

    /// ELBO estimate of the selected approximation.
    pub elbo: f64,

    /// Optimizer iteration whose approximation was selected (1-based).
    pub best_iteration: usize,

    /// ELBO estimate at every optimizer iteration, in order; `-inf` marks
    /// iterations whose approximation could not be built or scored.
    pub elbo_trace: Vec<f64>,

    /// Number of optimizer iterations taken.
    pub n_iterations: usize,

    /// Cumulative count of target log-density and gradient evaluations.
    pub lp_calls: usize,
}

impl PathfinderResult {
    /// Number of returned draws.
    pub fn num_draws(&self) -> usize {
        self.draws.ncols()
    }

    /// Per-draw log-density under the selected approximation.
    pub fn lp_approx(&self) -> ArrayView1<'_, f64> {
        self.draws.row(self.draws.nrows() - 2)
    }

    /// Per-draw target log-density.
    pub fn lp(&self) -> ArrayView1<'_, f64> {
        self.draws.row(self.draws.nrows() - 1)
    }
}
