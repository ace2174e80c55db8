//! Target density interface.

use ndarray::{Array1, ArrayView1};
use rand::rngs::StdRng;

use crate::error::Result;

/// A differentiable unnormalized log-density over an unconstrained real
/// vector, plus the transform back to the constrained parameter space.
///
/// Implementations must be safe to evaluate concurrently on distinct
/// inputs; the solver owns a single RNG per path and only hands it to
/// [`constrain`](LogDensityModel::constrain) from the driver thread.
///
/// Evaluation failures are ordinary `Err` values. A failed
/// [`log_density`](LogDensityModel::log_density) on a candidate draw is
/// recorded as `-inf` for that draw and the run continues; a failed
/// [`log_density_gradient`](LogDensityModel::log_density_gradient) during
/// optimization makes the line search back off as if the objective were
/// infinite there.
pub trait LogDensityModel: Sync {
    /// Number of unconstrained parameters.
    fn dim(&self) -> usize;

    /// Unnormalized log-density at `x`.
    fn log_density(&self, x: &ArrayView1<f64>) -> Result<f64>;

    /// Log-density and its gradient at `x`.
    fn log_density_gradient(&self, x: &ArrayView1<f64>) -> Result<(f64, Array1<f64>)>;

    /// Number of constrained parameters written by
    /// [`constrain`](LogDensityModel::constrain).
    fn num_constrained(&self) -> usize {
        self.dim()
    }

    /// Names of the constrained parameters, in output order.
    fn constrained_names(&self) -> Vec<String> {
        (0..self.num_constrained()).map(|i| format!("x.{}", i)).collect()
    }

    /// Map an unconstrained draw to the constrained space.
    ///
    /// The default is the identity, for models already defined on all of
    /// `R^d`. The RNG is available for models whose constrained output
    /// includes generated quantities.
    fn constrain(&self, _rng: &mut StdRng, x: &ArrayView1<f64>) -> Result<Array1<f64>> {
        Ok(x.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;

    struct Quadratic;

    impl LogDensityModel for Quadratic {
        fn dim(&self) -> usize {
            2
        }

        fn log_density(&self, x: &ArrayView1<f64>) -> Result<f64> {
            Ok(-0.5 * x.dot(x))
        }

        fn log_density_gradient(&self, x: &ArrayView1<f64>) -> Result<(f64, Array1<f64>)> {
            Ok((-0.5 * x.dot(x), x.mapv(|v| -v)))
        }
    }

    #[test]
    fn test_default_constrain_is_identity() {
        let model = Quadratic;
        let mut rng = StdRng::seed_from_u64(7);
        let x = array![1.5, -0.25];
        let c = model.constrain(&mut rng, &x.view()).unwrap();
        assert_eq!(c, x);
        assert_eq!(model.num_constrained(), 2);
    }

    #[test]
    fn test_default_names() {
        let model = Quadratic;
        assert_eq!(model.constrained_names(), vec!["x.0".to_string(), "x.1".to_string()]);
    }
}
