//! Pareto-smoothed importance sampling.
//!
//! Raw log importance ratios from a Gaussian approximation can have a
//! heavy right tail; the estimator here fits a generalized Pareto
//! distribution (GPD) to the largest `tail_len` ratios and replaces them
//! with smoothed quantiles before normalizing, following Vehtari et al.
//! and the Zhang & Stephens (2009) profile-likelihood GPD fit.
//!
//! The shape parameter `k` reported here is the negative of `k` in Zhang
//! & Stephens.

use ndarray::{Array1, ArrayView1};

use crate::math::log_sum_exp;

/// Default floor on the number of GPD grid points; the fit uses
/// `min_grid_pts + floor(sqrt(n))`.
pub const MIN_GRID_PTS: usize = 30;

/// Partitions at or above this size sort their halves in parallel.
const PARALLEL_SORT_CUTOFF: usize = 400;

/// Gaussian pseudo-count of the weakly informative shape prior.
const SHAPE_PRIOR_COUNT: f64 = 10.0;

/// Normalized importance weights plus the fitted tail shape.
#[derive(Debug, Clone)]
pub struct PsisResult {
    /// Weights summing to one, in the order of the input ratios.
    pub weights: Array1<f64>,
    /// Fitted GPD shape; `NaN` when the tail was too short or too flat to
    /// smooth. Values above 0.7 indicate unreliable importance sampling.
    pub khat: f64,
}

/// Smooth the upper tail of `log_ratios` and return self-normalized
/// importance weights.
///
/// Smoothing is disabled when `tail_len < 5` (or when fewer than
/// `tail_len + 1` ratios are supplied); the ratios are then only
/// truncated at their maximum and normalized.
pub fn psis_weights(log_ratios: &ArrayView1<f64>, tail_len: usize) -> PsisResult {
    let s = log_ratios.len();
    if s == 0 {
        return PsisResult {
            weights: Array1::zeros(0),
            khat: f64::NAN,
        };
    }

    let max_lr = log_ratios.iter().fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
    if !max_lr.is_finite() {
        log::warn!("all log importance ratios are non-finite; returning uniform weights");
        return PsisResult {
            weights: Array1::from_elem(s, 1.0 / s as f64),
            khat: f64::NAN,
        };
    }

    // Shift for safe exponentiation.
    let mut lw = log_ratios.mapv(|v| v - max_lr);
    let mut khat = f64::NAN;

    if tail_len >= 5 && tail_len + 1 <= s {
        let (top_vals, top_idx) = largest_n(&lw.view(), tail_len + 1);
        // Smallest of the top block is the non-tail boundary.
        let cutoff = top_vals[0];
        let tail_vals = &top_vals[1..];
        let tail_idx = &top_idx[1..];

        if tail_vals[tail_len - 1] - tail_vals[0] <= 10.0 * f64::MIN_POSITIVE {
            log::warn!("importance ratio tail is effectively constant; skipping smoothing");
        } else {
            let exp_cutoff = cutoff.exp();
            let exceedances =
                Array1::from_iter(tail_vals.iter().map(|&v| v.exp() - exp_cutoff));
            let (sigma, k) = gpdfit(&exceedances.view(), MIN_GRID_PTS);
            khat = k;
            if k.is_finite() {
                for (i, &pos) in tail_idx.iter().enumerate() {
                    let p = (i as f64 + 0.5) / tail_len as f64;
                    lw[pos] = (qgpd(p, k, sigma) + exp_cutoff).ln();
                }
            }
            log::debug!("smoothed {} tail weights, khat = {:.3}", tail_len, khat);
        }
    } else if tail_len > 0 && tail_len < 5 {
        log::warn!("tail length {} is below 5; smoothing disabled", tail_len);
    }

    // Truncate at the maximum of the raw weights (zero after the shift).
    lw.mapv_inplace(|v| v.min(0.0));

    let adjusted = lw + max_lr;
    let norm = log_sum_exp(&adjusted.view());
    PsisResult {
        weights: adjusted.mapv(|v| (v - norm).exp()),
        khat,
    }
}

/// Fit a generalized Pareto distribution with location 0 to an
/// ascending-sorted positive sample, returning `(sigma, k)`.
///
/// Uses the Zhang & Stephens (2009) grid over the profile likelihood with
/// `min_grid_pts + floor(sqrt(n))` points and a weakly informative
/// Gaussian prior on the shape centered at 0.5.
pub fn gpdfit(x: &ArrayView1<f64>, min_grid_pts: usize) -> (f64, f64) {
    let n = x.len();
    let n_f = n as f64;
    let prior = 3.0;
    let m = min_grid_pts + n_f.sqrt().floor() as usize;

    // First-quartile sample.
    let quartile_idx = ((n_f / 4.0 + 0.5).floor() as usize).max(1) - 1;
    let xstar = x[quartile_idx];
    let x_last = x[n - 1];

    let mut theta = Array1::<f64>::zeros(m);
    for j in 0..m {
        let jj = (j + 1) as f64;
        theta[j] = 1.0 / x_last + (1.0 - (m as f64 / (jj - 0.5)).sqrt()) / (prior * xstar);
    }

    // Profile log-likelihood over the grid.
    let mut log_lik = Array1::<f64>::zeros(m);
    for j in 0..m {
        let mut mean_log = 0.0;
        for &xi in x.iter() {
            mean_log += (-theta[j] * xi).ln_1p();
        }
        mean_log /= n_f;
        log_lik[j] = n_f * ((-theta[j] / mean_log).ln() - mean_log - 1.0);
    }

    let norm = log_sum_exp(&log_lik.view());
    let mut theta_hat = 0.0;
    for j in 0..m {
        theta_hat += theta[j] * (log_lik[j] - norm).exp();
    }

    let mut k: f64 = x.iter().map(|&xi| (-theta_hat * xi).ln_1p()).sum::<f64>() / n_f;
    let sigma = -k / theta_hat;
    let n_plus_a = n_f + SHAPE_PRIOR_COUNT;
    k = k * n_f / n_plus_a + SHAPE_PRIOR_COUNT * 0.5 / n_plus_a;
    (sigma, k)
}

/// Inverse CDF of the generalized Pareto distribution with location 0.
pub fn qgpd(p: f64, k: f64, sigma: f64) -> f64 {
    sigma * (-k * (-p).ln_1p()).exp_m1() / k
}

/// Largest `n` values of `lw` with their original positions, both in
/// ascending value order: a partial sort of the first `n` entries
/// followed by a binary-insertion scan over the remainder.
fn largest_n(lw: &ArrayView1<f64>, n: usize) -> (Vec<f64>, Vec<usize>) {
    let mut vals: Vec<f64> = lw.iter().take(n).copied().collect();
    let mut idx: Vec<usize> = (0..n).collect();
    quick_sort_pair(&mut vals, &mut idx);

    for i in n..lw.len() {
        let v = lw[i];
        if v >= vals[0] {
            let pos = insertion_start(&vals, v);
            for k in 1..=pos {
                vals[k - 1] = vals[k];
                idx[k - 1] = idx[k];
            }
            vals[pos] = v;
            idx[pos] = i;
        }
    }

    (vals, idx)
}

/// Largest index at which `value` can be placed after shifting the
/// smaller entries left, keeping `top_n` ascending. `top_n` must be
/// ascending and `value >= top_n[0]`.
fn insertion_start(top_n: &[f64], value: f64) -> usize {
    let size = top_n.len() as isize;
    let mut low: isize = -1;
    let mut high: isize = size;
    while high - low > 1 {
        let probe = (low + high) / 2;
        if top_n[probe as usize] > value {
            high = probe;
        } else {
            low = probe;
        }
    }
    if high == size {
        (size - 1) as usize
    } else {
        (high - 1) as usize
    }
}

/// Quicksort of a value array with a parallel index array. Large
/// partitions fork via rayon; the tasks own disjoint slices.
fn quick_sort_pair(vals: &mut [f64], idx: &mut [usize]) {
    let len = vals.len();
    if len <= 1 {
        return;
    }
    let p = partition(vals, idx);
    let (v_lo, v_rest) = vals.split_at_mut(p);
    let v_hi = &mut v_rest[1..];
    let (i_lo, i_rest) = idx.split_at_mut(p);
    let i_hi = &mut i_rest[1..];

    if len >= PARALLEL_SORT_CUTOFF {
        rayon::join(
            || quick_sort_pair(v_lo, i_lo),
            || quick_sort_pair(v_hi, i_hi),
        );
    } else {
        quick_sort_pair(v_lo, i_lo);
        quick_sort_pair(v_hi, i_hi);
    }
}

/// Lomuto partition around the last element.
fn partition(vals: &mut [f64], idx: &mut [usize]) -> usize {
    let high = vals.len() - 1;
    let pivot = vals[high];
    let mut i = 0usize;
    for j in 0..high {
        if vals[j] <= pivot {
            vals.swap(i, j);
            idx.swap(i, j);
            i += 1;
        }
    }
    vals.swap(i, high);
    idx.swap(i, high);
    i
}
