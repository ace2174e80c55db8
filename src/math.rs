//! Dense linear-algebra kernels used by the Gaussian approximation.
//!
//! Everything operates on `ndarray` types and is written for the small
//! factor matrices that occur here (history-sized blocks, or a `d × d`
//! factor when the dense form is chosen), not for large general systems.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::error::{PathfinderError, Result};

// ============================================================================
// Factorizations
// ============================================================================

/// Cholesky factorization of a symmetric positive-definite matrix.
///
/// Returns the lower-triangular `L` with `A = L L^T`. Only the lower
/// triangle of `a` is read. Fails if a pivot is non-positive or not
/// finite, which is how an indefinite surrogate Hessian is detected.
pub(crate) fn cholesky_lower(a: &ArrayView2<f64>) -> Result<Array2<f64>> {
    let n = a.nrows();
    if n != a.ncols() {
        return Err(PathfinderError::numerical("cholesky of non-square matrix"));
    }

    let mut l = Array2::<f64>::zeros((n, n));
    for j in 0..n {
        let mut diag = a[[j, j]];
        for k in 0..j {
            diag -= l[[j, k]] * l[[j, k]];
        }
        if !(diag > 0.0) || !diag.is_finite() {
            return Err(PathfinderError::numerical(format!(
                "matrix not positive definite (pivot {} at column {})",
                diag, j
            )));
        }
        let d = diag.sqrt();
        l[[j, j]] = d;

        for i in (j + 1)..n {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            l[[i, j]] = sum / d;
        }
    }

    Ok(l)
}

/// Thin Householder QR of a `d × m` matrix.
///
/// Returns `(q, r)` with `q` of shape `d × k`, `r` of shape `k × m` and
/// upper-trapezoidal, `k = min(d, m)`, such that `q r == w` and
/// `q^T q == I`. Handles `m == 0` by returning empty factors.
pub(crate) fn householder_qr_thin(w: &ArrayView2<f64>) -> (Array2<f64>, Array2<f64>) {
    let (d, m) = (w.nrows(), w.ncols());
    let k = d.min(m);

    let mut r = w.to_owned();
    // Householder vectors, stored per reflected column.
    let mut vs: Vec<Array1<f64>> = Vec::with_capacity(k);

    for j in 0..k {
        let mut v = Array1::<f64>::zeros(d - j);
        for i in j..d {
            v[i - j] = r[[i, j]];
        }
        let norm_x = v.dot(&v).sqrt();

        if norm_x == 0.0 {
            vs.push(v);
            continue;
        }

        // Reflect onto -sign(x0) * ||x|| * e1 for stability.
        let alpha = if v[0] >= 0.0 { -norm_x } else { norm_x };
        v[0] -= alpha;
        let vnorm_sq = v.dot(&v);

        if vnorm_sq > 0.0 {
            // Apply H = I - 2 v v^T / (v^T v) to the trailing block of r.
            for c in j..m {
                let mut dot = 0.0;
                for i in j..d {
                    dot += v[i - j] * r[[i, c]];
                }
                let scale = 2.0 * dot / vnorm_sq;
                for i in j..d {
                    r[[i, c]] -= scale * v[i - j];
                }
            }
        }
        r[[j, j]] = alpha;
        for i in (j + 1)..d {
            r[[i, j]] = 0.0;
        }
        vs.push(v);
    }

    // Accumulate the thin Q by applying the reflections to I_{d x k}
    // in reverse order.
    let mut q = Array2::<f64>::zeros((d, k));
    for i in 0..k {
        q[[i, i]] = 1.0;
    }
    for j in (0..k).rev() {
        let v = &vs[j];
        let vnorm_sq = v.dot(v);
        if vnorm_sq == 0.0 {
            continue;
        }
        for c in 0..k {
            let mut dot = 0.0;
            for i in j..d {
                dot += v[i - j] * q[[i, c]];
            }
            let scale = 2.0 * dot / vnorm_sq;
            for i in j..d {
                q[[i, c]] -= scale * v[i - j];
            }
        }
    }

    let r_thin = r.slice(ndarray::s![..k, ..]).to_owned();
    (q, r_thin)
}

// ============================================================================
// Triangular solves
// ============================================================================

/// Solve `R X = B` in place for upper-triangular `R`, overwriting `B`
/// with the solution. `R` is `n × n`, `B` is `n × m`.
pub(crate) fn solve_upper_triangular_inplace(r: &ArrayView2<f64>, b: &mut Array2<f64>) {
    let n = r.nrows();
    let m = b.ncols();
    for c in 0..m {
        for i in (0..n).rev() {
            let mut sum = b[[i, c]];
            for k in (i + 1)..n {
                sum -= r[[i, k]] * b[[k, c]];
            }
            b[[i, c]] = sum / r[[i, i]];
        }
    }
}

/// Solve `L x = b` for lower-triangular `L`.
#[cfg(test)]
pub(crate) fn solve_lower_triangular(l: &ArrayView2<f64>, b: &ArrayView1<f64>) -> Array1<f64> {
    let n = l.nrows();
    let mut x = b.to_owned();
    for i in 0..n {
        let mut sum = x[i];
        for k in 0..i {
            sum -= l[[i, k]] * x[k];
        }
        x[i] = sum / l[[i, i]];
    }
    x
}

/// Solve `L^T x = b` for lower-triangular `L`.
#[cfg(test)]
pub(crate) fn solve_lower_transpose(l: &ArrayView2<f64>, b: &ArrayView1<f64>) -> Array1<f64> {
    let n = l.nrows();
    let mut x = b.to_owned();
    for i in (0..n).rev() {
        let mut sum = x[i];
        for k in (i + 1)..n {
            sum -= l[[k, i]] * x[k];
        }
        x[i] = sum / l[[i, i]];
    }
    x
}

// ============================================================================
// Reductions
// ============================================================================

/// Numerically stable `log(sum(exp(x)))`.
pub(crate) fn log_sum_exp(x: &ArrayView1<f64>) -> f64 {
    let max = x.iter().fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = x.iter().map(|&v| (v - max).exp()).sum();
    max + sum.ln()
}

// ============================================================================
// Tests
// ============================================================================
