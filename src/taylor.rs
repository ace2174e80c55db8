//! Gaussian approximations built from L-BFGS curvature history.
//!
//! At each iterate the inverse Hessian implied by the `(y, s)` history
//! factors as `diag(alpha) + low-rank(Y, S)`. When the history is rich
//! relative to the dimension (`2n >= d`) the factor is materialized as a
//! dense `d × d` Cholesky; otherwise the low-rank structure is kept: an
//! orthogonal basis `Q` of the history subspace plus a small triangular
//! factor inside that basis. The covariance never has to be formed in the
//! sparse case, only applied to vectors.

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::error::Result;
use crate::math::{cholesky_lower, householder_qr_thin, solve_upper_triangular_inplace};

/// Gaussian `N(x_center, Sigma)` in factored form.
///
/// Dense (`use_full`): `l_approx` is the upper-triangular transpose of the
/// Cholesky factor of `Sigma`; `qk` is empty.
///
/// Sparse: `Sigma = diag(alpha)^1/2 (qk (L L^T - I) qk^T + I) diag(alpha)^1/2`
/// with `L = l_approx` lower-triangular in the `qk` basis.
#[derive(Debug, Clone)]
pub(crate) struct TaylorApprox {
    pub(crate) x_center: Array1<f64>,
    /// Log-determinant of the Cholesky factor of `Sigma`.
    pub(crate) log_det_chol: f64,
    pub(crate) l_approx: Array2<f64>,
    /// Orthogonal basis of the history subspace; `d × 0` in the dense form.
    pub(crate) qk: Array2<f64>,
    pub(crate) alpha: Array1<f64>,
    pub(crate) use_full: bool,
}

/// Derived history quantities shared by both factorizations.
struct HistoryBlocks {
    /// `-R^{-1} S^T`, `n × d`.
    ninv_rst: Array2<f64>,
    /// `Y^T diag(alpha) Y + diag(D)`, `n × n`.
    y_tcross_alpha: Array2<f64>,
    /// `Y^T diag(alpha)`, `n × d`.
    y_mul_alpha: Array2<f64>,
    /// `Y^T diag(sqrt(alpha))`, `n × d`.
    y_mul_sqrt_alpha: Array2<f64>,
}

fn history_blocks(
    y_mat: &ArrayView2<f64>,
    s_mat: &ArrayView2<f64>,
    alpha: &Array1<f64>,
) -> HistoryBlocks {
    let n = y_mat.ncols();
    let sqrt_alpha = alpha.mapv(f64::sqrt);
    let yt = y_mat.t().to_owned();

    // R must be upper triangular no matter how S^T Y was accumulated.
    let mut rk = s_mat.t().dot(y_mat);
    for i in 1..n {
        for j in 0..i {
            rk[[i, j]] = 0.0;
        }
    }
    let dk = rk.diag().to_owned();

    let mut ninv_rst = s_mat.t().to_owned();
    solve_upper_triangular_inplace(&rk.view(), &mut ninv_rst);
    ninv_rst.mapv_inplace(|v| -v);

    let y_mul_sqrt_alpha = &yt * &sqrt_alpha;
    let mut y_tcross_alpha = y_mul_sqrt_alpha.dot(&y_mul_sqrt_alpha.t());
    for i in 0..n {
        y_tcross_alpha[[i, i]] += dk[i];
    }

    HistoryBlocks {
        ninv_rst,
        y_tcross_alpha,
        y_mul_alpha: &yt * alpha,
        y_mul_sqrt_alpha,
    }
}

/// Build the approximation for the iterate `(x, g)`, choosing the dense
/// form when `2n >= d` and the sparse form otherwise. `g` is the gradient
/// of the objective (negative log-density).
pub(crate) fn build(
    y_mat: &ArrayView2<f64>,
    s_mat: &ArrayView2<f64>,
    alpha: &ArrayView1<f64>,
    x: &ArrayView1<f64>,
    g: &ArrayView1<f64>,
) -> Result<TaylorApprox> {
    if 2 * y_mat.ncols() >= y_mat.nrows() {
        build_dense(y_mat, s_mat, alpha, x, g)
    } else {
        build_sparse(y_mat, s_mat, alpha, x, g)
    }
}

/// Dense factorization: materialize the `d × d` inverse-Hessian estimate
/// and take its Cholesky factor.
pub(crate) fn build_dense(
    y_mat: &ArrayView2<f64>,
    s_mat: &ArrayView2<f64>,
    alpha: &ArrayView1<f64>,
    x: &ArrayView1<f64>,
    g: &ArrayView1<f64>,
) -> Result<TaylorApprox> {
    let d = y_mat.nrows();
    let alpha = alpha.to_owned();
    let blocks = history_blocks(y_mat, s_mat, &alpha);

    let mut hk = blocks.y_mul_alpha.t().dot(&blocks.ninv_rst)
        + blocks
            .ninv_rst
            .t()
            .dot(&(&blocks.y_mul_alpha + &blocks.y_tcross_alpha.dot(&blocks.ninv_rst)));
    for i in 0..d {
        hk[[i, i]] += alpha[i];
    }

    let l = cholesky_lower(&hk.view())?;
    let l_approx = l.t().to_owned();
    let log_det_chol = l_approx.diag().iter().map(|v| v.abs().ln()).sum();
    let x_center = x - &hk.dot(g);
    log::trace!("dense approximation: log|chol| = {:e}", log_det_chol);

    Ok(TaylorApprox {
        x_center,
        log_det_chol,
        l_approx,
        qk: Array2::zeros((d, 0)),
        alpha,
        use_full: true,
    })
}

/// Sparse factorization: thin QR of the scaled history block, then a
/// `2n × 2n` Cholesky inside the resulting basis.
pub(crate) fn build_sparse(
    y_mat: &ArrayView2<f64>,
    s_mat: &ArrayView2<f64>,
    alpha: &ArrayView1<f64>,
    x: &ArrayView1<f64>,
    g: &ArrayView1<f64>,
) -> Result<TaylorApprox> {
    let d = y_mat.nrows();
    let n = y_mat.ncols();
    let alpha = alpha.to_owned();
    let blocks = history_blocks(y_mat, s_mat, &alpha);

    let inv_sqrt_alpha = alpha.mapv(|a| 1.0 / a.sqrt());
    let scaled_ninv_rst = &blocks.ninv_rst * &inv_sqrt_alpha;

    // W = [diag(sqrt(alpha)) Y | (diag(1/sqrt(alpha)) N^T)], d x 2n.
    let mut w = Array2::<f64>::zeros((d, 2 * n));
    w.slice_mut(s![.., ..n]).assign(&blocks.y_mul_sqrt_alpha.t());
    w.slice_mut(s![.., n..]).assign(&scaled_ninv_rst.t());

    let (qk, rk_thin) = householder_qr_thin(&w.view());
    let k = qk.ncols();

    // Middle block [[0, I], [I, Y^T alpha Y + D]].
    let mut mid = Array2::<f64>::zeros((2 * n, 2 * n));
    for i in 0..n {
        mid[[i, n + i]] = 1.0;
        mid[[n + i, i]] = 1.0;
    }
    mid.slice_mut(s![n.., n..]).assign(&blocks.y_tcross_alpha);

    let mut inner = rk_thin.dot(&mid).dot(&rk_thin.t());
    for i in 0..k {
        inner[[i, i]] += 1.0;
    }
    let l_approx = cholesky_lower(&inner.view())?;

    let log_det_chol: f64 = l_approx.diag().iter().map(|v| v.abs().ln()).sum::<f64>()
        + 0.5 * alpha.iter().map(|a| a.ln()).sum::<f64>();

    let ninv_rst_g = blocks.ninv_rst.dot(g);
    let alpha_mul_grad = &alpha * g;
    let correction = &alpha_mul_grad
        + &(&alpha * &y_mat.dot(&ninv_rst_g))
        + blocks
            .ninv_rst
            .t()
            .dot(&(&y_mat.t().dot(&alpha_mul_grad) + &blocks.y_tcross_alpha.dot(&ninv_rst_g)));
    let x_center = x - &correction;
    log::trace!(
        "sparse approximation: rank {}, log|chol| = {:e}",
        k,
        log_det_chol
    );

    Ok(TaylorApprox {
        x_center,
        log_det_chol,
        l_approx,
        qk,
        alpha,
        use_full: false,
    })
}

impl TaylorApprox {
    pub(crate) fn dim(&self) -> usize {
        self.x_center.len()
    }

    /// Push a matrix of standard-normal columns through the factored form.
    pub(crate) fn sample(&self, u: &ArrayView2<f64>) -> Array2<f64> {
        let center = self.x_center.view().insert_axis(Axis(1));
        if self.use_full {
            self.l_approx.t().dot(u) + &center
        } else {
            let k = self.l_approx.nrows();
            let mut l_minus_i = self.l_approx.clone();
            for i in 0..k {
                l_minus_i[[i, i]] -= 1.0;
            }
            let projected = self.qk.dot(&l_minus_i.dot(&self.qk.t().dot(u)));
            let sqrt_alpha = self.alpha.mapv(f64::sqrt);
            (projected + u) * &sqrt_alpha.view().insert_axis(Axis(1)) + &center
        }
    }

    /// Log-density under the approximation of the draw generated from the
    /// standard-normal column `u`. Exact for both forms.
    pub(crate) fn log_density_from_unit(&self, u: &ArrayView1<f64>) -> f64 {
        let d = self.dim() as f64;
        let log_two_pi = (2.0 * std::f64::consts::PI).ln();
        -self.log_det_chol - 0.5 * (u.dot(u) + d * log_two_pi)
    }
}
