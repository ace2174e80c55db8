//! Monte-Carlo ELBO estimation for one Gaussian approximation.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::model::LogDensityModel;
use crate::taylor::TaylorApprox;

/// Draws, per-draw log-densities, and the resulting ELBO estimate for one
/// iterate's approximation.
#[derive(Debug, Clone)]
pub(crate) struct ElboEstimate {
    /// Mean log importance ratio over draws with a finite target density;
    /// `-inf` when no draw survives (or when the estimate was skipped).
    pub(crate) elbo: f64,
    /// Number of target log-density evaluations attempted.
    pub(crate) fn_calls: usize,
    /// The approximate-posterior draws, `d × K`.
    pub(crate) draws: Array2<f64>,
    /// `K × 2`: column 0 the approximation's log-density, column 1 the
    /// target's.
    pub(crate) lp_mat: Array2<f64>,
    /// `lp_mat[:,1] - lp_mat[:,0]`, one entry per draw.
    pub(crate) lp_ratio: Array1<f64>,
}

/// Sample `num_draws` from the approximation and score them against the
/// target. A draw whose target density cannot be evaluated records `-inf`
/// and the estimate continues; with `compute_elbo` false the ELBO is left
/// at `-inf` (used by the final-draw stage, which reuses the sampler
/// without rescoring the approximation).
pub(crate) fn estimate<M: LogDensityModel>(
    model: &M,
    rng: &mut StdRng,
    approx: &TaylorApprox,
    num_draws: usize,
    compute_elbo: bool,
) -> ElboEstimate {
    let d = approx.dim();

    let mut units = Array2::<f64>::zeros((d, num_draws));
    for j in 0..num_draws {
        for i in 0..d {
            units[[i, j]] = rng.sample(StandardNormal);
        }
    }

    let mut lp_mat = Array2::<f64>::zeros((num_draws, 2));
    for j in 0..num_draws {
        lp_mat[[j, 0]] = approx.log_density_from_unit(&units.column(j));
    }

    let draws = approx.sample(&units.view());

    let mut fn_calls = 0;
    for j in 0..num_draws {
        fn_calls += 1;
        lp_mat[[j, 1]] = match model.log_density(&draws.column(j)) {
            Ok(lp) => lp,
            Err(e) => {
                log::debug!("target log density failed on draw {}: {}", j, e);
                f64::NEG_INFINITY
            }
        };
    }

    let lp_ratio =
        Array1::from_iter((0..num_draws).map(|j| lp_mat[[j, 1]] - lp_mat[[j, 0]]));

    let elbo = if compute_elbo {
        let mut sum = 0.0;
        let mut count = 0usize;
        for &r in lp_ratio.iter() {
            if r.is_finite() {
                sum += r;
                count += 1;
            }
        }
        if count > 0 {
            sum / count as f64
        } else {
            f64::NEG_INFINITY
        }
    } else {
        f64::NEG_INFINITY
    };

    ElboEstimate {
        elbo,
        fn_calls,
        draws,
        lp_mat,
        lp_ratio,
    }
}
