//! L-BFGS step driver: curvature-filtered history, diagonal inverse-Hessian
//! preconditioner, two-loop search direction, strong-Wolfe line search.
//!
//! The driver advances one step at a time so the solver can inspect every
//! iterate; convergence bookkeeping lives here, iterate selection does not.

use ndarray::{Array1, Array2, ArrayView1};
use std::collections::VecDeque;

use crate::config::PathfinderConfig;
use crate::model::LogDensityModel;

/// Pairs with `|y|^2 / (y.s)` above this bound are rejected as
/// numerically unusable curvature.
const CURVATURE_BOUND: f64 = 1e12;

/// Sufficient-decrease constant for the Wolfe conditions.
const WOLFE_C1: f64 = 1e-4;
/// Curvature constant for the Wolfe conditions.
const WOLFE_C2: f64 = 0.9;
const MAX_LINE_SEARCH_ITERS: usize = 20;
const MAX_ZOOM_ITERS: usize = 30;
const STEP_SIZE_MAX: f64 = 1e10;

/// Accept a candidate pair `(y, s)` iff `y.s > 0` and the curvature ratio
/// `|y|^2 / (y.s)` stays below [`CURVATURE_BOUND`].
pub(crate) fn check_curvature(y: &ArrayView1<f64>, s: &ArrayView1<f64>) -> bool {
    let dk = y.dot(s);
    let theta = (y.dot(y) / dk).abs();
    log::trace!("curvature check: Dk = {:e}, theta = {:e}", dk, theta);
    dk > 0.0 && theta <= CURVATURE_BOUND
}

/// Diagonal inverse-Hessian update of Gilbert & Lemaréchal (1989), eq 4.9.
///
/// Produces a positive vector whenever `(y, s)` passed the curvature
/// check; callers must not feed rejected pairs through this.
pub(crate) fn update_diag(
    alpha: &ArrayView1<f64>,
    y: &ArrayView1<f64>,
    s: &ArrayView1<f64>,
) -> Array1<f64> {
    let y_alpha_y: f64 = y.iter().zip(alpha.iter()).map(|(&yi, &ai)| ai * yi * yi).sum();
    let y_s = y.dot(s);
    let s_inv_alpha_s: f64 = s.iter().zip(alpha.iter()).map(|(&si, &ai)| si * si / ai).sum();

    let mut out = Array1::<f64>::zeros(alpha.len());
    for i in 0..alpha.len() {
        let s_over_alpha = s[i] / alpha[i];
        let denom = y_alpha_y / alpha[i] + y[i] * y[i]
            - (y_alpha_y / s_inv_alpha_s) * s_over_alpha * s_over_alpha;
        out[i] = y_s / denom;
    }
    out
}

/// Bounded FIFO of accepted `(y, s)` pairs plus the diagonal
/// preconditioner they maintain.
#[derive(Debug)]
pub(crate) struct LbfgsHistory {
    y_pairs: VecDeque<Array1<f64>>,
    s_pairs: VecDeque<Array1<f64>>,
    /// rho_k = 1 / (y_k . s_k)
    rho: VecDeque<f64>,
    capacity: usize,
    alpha: Array1<f64>,
}

impl LbfgsHistory {
    pub(crate) fn new(capacity: usize, dim: usize) -> Self {
        Self {
            y_pairs: VecDeque::with_capacity(capacity),
            s_pairs: VecDeque::with_capacity(capacity),
            rho: VecDeque::with_capacity(capacity),
            capacity,
            alpha: Array1::ones(dim),
        }
    }

    /// Run the curvature filter on `(y, s)`; on acceptance update the
    /// diagonal preconditioner and append the pair, evicting the oldest
    /// when full. Returns whether the pair was accepted.
    pub(crate) fn update(&mut self, y: Array1<f64>, s: Array1<f64>) -> bool {
        if !check_curvature(&y.view(), &s.view()) {
            return false;
        }

        self.alpha = update_diag(&self.alpha.view(), &y.view(), &s.view());

        if self.y_pairs.len() >= self.capacity {
            self.y_pairs.pop_front();
            self.s_pairs.pop_front();
            self.rho.pop_front();
        }
        self.rho.push_back(1.0 / y.dot(&s));
        self.y_pairs.push_back(y);
        self.s_pairs.push_back(s);
        true
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.y_pairs.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.y_pairs.is_empty()
    }

    pub(crate) fn alpha(&self) -> &Array1<f64> {
        &self.alpha
    }

    /// Drop all pairs but keep the diagonal preconditioner.
    pub(crate) fn clear_pairs(&mut self) {
        self.y_pairs.clear();
        self.s_pairs.clear();
        self.rho.clear();
    }

    /// Gradient differences as a `d × n` matrix, oldest pair first.
    pub(crate) fn y_matrix(&self) -> Array2<f64> {
        self.pair_matrix(&self.y_pairs)
    }

    /// Parameter differences as a `d × n` matrix, oldest pair first.
    pub(crate) fn s_matrix(&self) -> Array2<f64> {
        self.pair_matrix(&self.s_pairs)
    }

    fn pair_matrix(&self, pairs: &VecDeque<Array1<f64>>) -> Array2<f64> {
        let d = self.alpha.len();
        let n = pairs.len();
        let mut m = Array2::<f64>::zeros((d, n));
        for (j, col) in pairs.iter().enumerate() {
            m.column_mut(j).assign(col);
        }
        m
    }

    /// Two-loop recursion with the diagonal preconditioner as the initial
    /// inverse Hessian. Returns the descent direction `-H g`.
    pub(crate) fn search_direction(&self, grad: &ArrayView1<f64>) -> Array1<f64> {
        let k = self.y_pairs.len();
        let mut q = grad.to_owned();

        if k == 0 {
            return -(&self.alpha * &q);
        }

        let mut coeffs = vec![0.0; k];

        // Backward pass through the history.
        for i in (0..k).rev() {
            coeffs[i] = self.rho[i] * self.s_pairs[i].dot(&q);
            q.scaled_add(-coeffs[i], &self.y_pairs[i]);
        }

        // Apply the diagonal initial inverse Hessian.
        let mut r = &self.alpha * &q;

        // Forward pass.
        for i in 0..k {
            let beta = self.rho[i] * self.y_pairs[i].dot(&r);
            r.scaled_add(coeffs[i] - beta, &self.s_pairs[i]);
        }

        -r
    }
}

/// Why the optimizer stopped making progress.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StepOutcome {
    /// Took a step; keep going.
    Continue,
    /// Took a step and a convergence test fired.
    Converged(&'static str),
    /// Line search failed even after a history reset; parameters and
    /// gradient are unchanged.
    LineSearchFailed,
}

/// One-step-at-a-time L-BFGS minimizer of the negative log-density.
pub(crate) struct LbfgsDriver<'a, M: LogDensityModel> {
    model: &'a M,
    config: &'a PathfinderConfig,
    history: LbfgsHistory,
    x: Array1<f64>,
    /// Objective value, `-log_density(x)`.
    f: f64,
    /// Objective gradient, `-d log_density / dx`.
    g: Array1<f64>,
    iter: usize,
    n_evals: usize,
    prev_step_norm: f64,
    prev_step_size: f64,
    note: &'static str,
}

impl<'a, M: LogDensityModel> LbfgsDriver<'a, M> {
    /// Start the driver at an already-evaluated point. `f0` and `g0` are
    /// in objective (negative log-density) convention.
    pub(crate) fn new(
        model: &'a M,
        config: &'a PathfinderConfig,
        x0: Array1<f64>,
        f0: f64,
        g0: Array1<f64>,
    ) -> Self {
        let dim = x0.len();
        Self {
            model,
            config,
            history: LbfgsHistory::new(config.history_size, dim),
            x: x0,
            f: f0,
            g: g0,
            iter: 0,
            n_evals: 0,
            prev_step_norm: 0.0,
            prev_step_size: 0.0,
            note: "",
        }
    }

    pub(crate) fn x(&self) -> &Array1<f64> {
        &self.x
    }

    /// Objective gradient at the current iterate.
    pub(crate) fn grad(&self) -> &Array1<f64> {
        &self.g
    }

    pub(crate) fn logp(&self) -> f64 {
        -self.f
    }

    pub(crate) fn iter_num(&self) -> usize {
        self.iter
    }

    pub(crate) fn n_evals(&self) -> usize {
        self.n_evals
    }

    pub(crate) fn prev_step_norm(&self) -> f64 {
        self.prev_step_norm
    }

    pub(crate) fn prev_step_size(&self) -> f64 {
        self.prev_step_size
    }

    pub(crate) fn grad_norm(&self) -> f64 {
        self.g.dot(&self.g).sqrt()
    }

    pub(crate) fn note(&self) -> &'static str {
        self.note
    }

    pub(crate) fn history(&self) -> &LbfgsHistory {
        &self.history
    }

    /// Evaluate the objective and its gradient; model failures and
    /// non-finite values become an infinite objective so the line search
    /// backs away from them.
    fn objective(&mut self, x: &Array1<f64>) -> (f64, Array1<f64>) {
        self.n_evals += 1;
        match self.model.log_density_gradient(&x.view()) {
            Ok((lp, grad)) if lp.is_finite() && grad.iter().all(|v| v.is_finite()) => {
                (-lp, grad.mapv(|v| -v))
            }
            _ => (f64::INFINITY, Array1::zeros(x.len())),
        }
    }

    /// Advance the optimizer by one line-search step.
    pub(crate) fn step(&mut self) -> StepOutcome {
        self.note = "";
        let mut dir = self.history.search_direction(&self.g.view());
        if dir.dot(&self.g) >= 0.0 {
            // History produced an ascent direction; restart from the
            // preconditioned gradient.
            self.history.clear_pairs();
            dir = self.history.search_direction(&self.g.view());
            self.note = "non-descent direction; history reset";
            if dir.dot(&self.g) >= 0.0 {
                return StepOutcome::LineSearchFailed;
            }
        }

        let alpha0 = if self.iter == 0 { self.config.init_alpha } else { 1.0 };
        let mut found = self.line_search(&dir, alpha0);

        if found.is_none() && !self.history.is_empty() {
            self.history.clear_pairs();
            dir = self.history.search_direction(&self.g.view());
            if dir.dot(&self.g) < 0.0 {
                found = self.line_search(&dir, alpha0);
                self.note = "line search failed; history reset";
            }
        }

        let Some((step_size, x_new, f_new, g_new)) = found else {
            self.note = "line search failed";
            return StepOutcome::LineSearchFailed;
        };

        let s = &x_new - &self.x;
        let y = &g_new - &self.g;
        let step_norm = s.dot(&s).sqrt();
        let grad_norm = g_new.dot(&g_new).sqrt();

        if !self.history.update(y, s) {
            log::debug!(
                "iteration {}: curvature pair rejected, history and alpha unchanged",
                self.iter
            );
        }

        let f_prev = self.f;
        self.x = x_new;
        self.f = f_new;
        self.g = g_new;
        self.prev_step_norm = step_norm;
        self.prev_step_size = step_size;
        self.iter += 1;

        let eps = f64::EPSILON;
        let obj_change = (f_new - f_prev).abs();
        let obj_scale = f_new.abs().max(f_prev.abs()).max(1.0);

        if grad_norm <= self.config.tol_grad {
            return StepOutcome::Converged("gradient norm below tolerance");
        }
        if grad_norm <= self.config.tol_rel_grad * eps * f_new.abs().max(1.0) {
            return StepOutcome::Converged("relative gradient norm below tolerance");
        }
        if obj_change <= self.config.tol_obj {
            return StepOutcome::Converged("objective change below tolerance");
        }
        if obj_change <= self.config.tol_rel_obj * eps * obj_scale {
            return StepOutcome::Converged("relative objective change below tolerance");
        }
        if step_norm <= self.config.tol_param {
            return StepOutcome::Converged("step size below tolerance");
        }
        if self.iter >= self.config.num_iterations {
            return StepOutcome::Converged("maximum number of iterations");
        }

        StepOutcome::Continue
    }

    /// Strong-Wolfe line search: bracketing phase with doubling, then
    /// bisection zoom. Returns `(step, x, f, g)` on success.
    fn line_search(
        &mut self,
        dir: &Array1<f64>,
        alpha0: f64,
    ) -> Option<(f64, Array1<f64>, f64, Array1<f64>)> {
        let f0 = self.f;
        let dphi0 = self.g.dot(dir);
        if dphi0 >= 0.0 {
            return None;
        }

        let mut a_prev = 0.0;
        let mut f_prev = f0;
        let mut g_prev = self.g.clone();
        let mut a = alpha0;

        for i in 0..MAX_LINE_SEARCH_ITERS {
            let x_a = &self.x + &(dir * a);
            let (f_a, g_a) = self.objective(&x_a);

            if f_a > f0 + WOLFE_C1 * a * dphi0 || (i > 0 && f_a >= f_prev) {
                return self.zoom(dir, f0, dphi0, a_prev, f_prev, g_prev, a);
            }

            let dphi_a = g_a.dot(dir);
            if dphi_a.abs() <= -WOLFE_C2 * dphi0 {
                return Some((a, x_a, f_a, g_a));
            }
            if dphi_a >= 0.0 {
                return self.zoom(dir, f0, dphi0, a, f_a, g_a, a_prev);
            }

            a_prev = a;
            f_prev = f_a;
            g_prev = g_a;
            a *= 2.0;
            if a > STEP_SIZE_MAX {
                break;
            }
        }

        None
    }

    /// Bisection zoom between a low point satisfying sufficient decrease
    /// and a high bound.
    #[allow(clippy::too_many_arguments)]
    fn zoom(
        &mut self,
        dir: &Array1<f64>,
        f0: f64,
        dphi0: f64,
        mut a_lo: f64,
        mut f_lo: f64,
        mut g_lo: Array1<f64>,
        mut a_hi: f64,
    ) -> Option<(f64, Array1<f64>, f64, Array1<f64>)> {
        for _ in 0..MAX_ZOOM_ITERS {
            let a = 0.5 * (a_lo + a_hi);
            if a <= 0.0 || (a_hi - a_lo).abs() <= f64::EPSILON * a_lo.abs().max(1e-16) {
                break;
            }
            let x_a = &self.x + &(dir * a);
            let (f_a, g_a) = self.objective(&x_a);

            if f_a > f0 + WOLFE_C1 * a * dphi0 || f_a >= f_lo {
                a_hi = a;
            } else {
                let dphi_a = g_a.dot(dir);
                if dphi_a.abs() <= -WOLFE_C2 * dphi0 {
                    return Some((a, x_a, f_a, g_a));
                }
                if dphi_a * (a_hi - a_lo) >= 0.0 {
                    a_hi = a_lo;
                }
                a_lo = a;
                f_lo = f_a;
                g_lo = g_a;
            }
        }

        // Settle for sufficient decrease when the curvature condition is
        // out of reach at this scale.
        if a_lo > 0.0 && f_lo < f0 && f_lo.is_finite() {
            let x_lo = &self.x + &(dir * a_lo);
            return Some((a_lo, x_lo, f_lo, g_lo));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as PfResult;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_curvature_accepts_positive_pair() {
        let y = array![0.5, 1.0];
        let s = array![1.0, 2.0];
        assert!(check_curvature(&y.view(), &s.view()));
    }

    #[test]
    fn test_curvature_rejects_nonpositive_product() {
        let y = array![1.0, -1.0];
        let s = array![1.0, 1.0];
        assert!(!check_curvature(&y.view(), &s.view()));
    }

    #[test]
    fn test_curvature_rejects_extreme_ratio() {
        // y.s barely positive, |y|^2 enormous.
        let y = array![1e8, -1e8];
        let s = array![1e-8, 1e-8 - 1e-16];
        assert!(!check_curvature(&y.view(), &s.view()));
    }

    #[test]
    fn test_update_diag_identity_curvature_is_fixed_point() {
        // With alpha = 1 and y = s the denominator collapses to |y|^2,
        // so the update returns all ones.
        let alpha = Array1::ones(3);
        let y = array![0.3, -1.2, 0.8];
        let new_alpha = update_diag(&alpha.view(), &y.view(), &y.view());
        for i in 0..3 {
            assert_abs_diff_eq!(new_alpha[i], 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_update_diag_stays_positive() {
        let alpha = array![0.5, 2.0, 1.5];
        let y = array![1.0, 0.2, -0.4];
        let s = array![0.8, 0.5, -0.1];
        assert!(check_curvature(&y.view(), &s.view()));
        let new_alpha = update_diag(&alpha.view(), &y.view(), &s.view());
        assert!(new_alpha.iter().all(|&a| a > 0.0 && a.is_finite()));
    }

    #[test]
    fn test_history_is_fifo_with_eviction() {
        let mut h = LbfgsHistory::new(2, 2);
        assert!(h.update(array![1.0, 0.0], array![1.0, 0.0]));
        assert!(h.update(array![0.0, 2.0], array![0.0, 1.0]));
        assert!(h.update(array![3.0, 3.0], array![1.0, 1.0]));

        assert_eq!(h.len(), 2);
        let y = h.y_matrix();
        // Oldest remaining pair is the second push.
        assert_abs_diff_eq!(y[[1, 0]], 2.0, epsilon = 1e-15);
        assert_abs_diff_eq!(y[[0, 1]], 3.0, epsilon = 1e-15);
    }

    #[test]
    fn test_history_rejects_bad_pair() {
        let mut h = LbfgsHistory::new(4, 2);
        let alpha_before = h.alpha().clone();
        assert!(!h.update(array![-1.0, 0.0], array![1.0, 0.0]));
        assert!(h.is_empty());
        assert_eq!(h.alpha(), &alpha_before);
    }

    #[test]
    fn test_direction_without_history_is_preconditioned_descent() {
        let h = LbfgsHistory::new(3, 2);
        let g = array![2.0, -4.0];
        let d = h.search_direction(&g.view());
        assert_abs_diff_eq!(d[0], -2.0, epsilon = 1e-15);
        assert_abs_diff_eq!(d[1], 4.0, epsilon = 1e-15);
    }

    struct Quadratic {
        scales: Array1<f64>,
    }

    impl LogDensityModel for Quadratic {
        fn dim(&self) -> usize {
            self.scales.len()
        }

        fn log_density(&self, x: &ArrayView1<f64>) -> PfResult<f64> {
            Ok(-0.5 * x.iter().zip(self.scales.iter()).map(|(&v, &c)| c * v * v).sum::<f64>())
        }

        fn log_density_gradient(&self, x: &ArrayView1<f64>) -> PfResult<(f64, Array1<f64>)> {
            let lp = self.log_density(x)?;
            let grad = Array1::from_iter(
                x.iter().zip(self.scales.iter()).map(|(&v, &c)| -c * v),
            );
            Ok((lp, grad))
        }
    }

    #[test]
    fn test_driver_minimizes_quadratic() {
        let model = Quadratic {
            scales: array![1.0, 4.0, 0.5],
        };
        let config = PathfinderConfig::builder().num_iterations(100).build();
        let x0 = array![3.0, -2.0, 5.0];
        let (lp, grad) = model.log_density_gradient(&x0.view()).unwrap();
        let mut driver = LbfgsDriver::new(&model, &config, x0, -lp, grad.mapv(|v| -v));

        let mut outcome = StepOutcome::Continue;
        for _ in 0..100 {
            outcome = driver.step();
            if outcome != StepOutcome::Continue {
                break;
            }
        }

        assert!(matches!(outcome, StepOutcome::Converged(_)), "got {:?}", outcome);
        for &xi in driver.x().iter() {
            assert_abs_diff_eq!(xi, 0.0, epsilon = 1e-4);
        }
        assert!(driver.n_evals() > 0);
    }
}
