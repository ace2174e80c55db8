// src/lib.rs

//! # Pathfinder
//!
//! Single-path Pathfinder variational inference.
//!
//! This crate implements the Pathfinder algorithm from:
//!
//! > Lu Zhang, Bob Carpenter, Andrew Gelman, Aki Vehtari.
//! > "Pathfinder: Parallel quasi-Newton variational inference"
//! > Journal of Machine Learning Research, 2022
//!
//! Pathfinder runs L-BFGS toward the mode of a differentiable
//! unnormalized log-density and, at every iterate along the trajectory,
//! builds a Gaussian approximation whose covariance is the inverse
//! Hessian implied by the optimizer's curvature history. Each
//! approximation is scored by a Monte Carlo ELBO estimate; draws from the
//! best-scoring one are returned together with their log importance
//! ratios. The companion [`psis`] module smooths such ratios with a
//! generalized Pareto tail fit for importance resampling across paths.
//!
//! ## Example
//!
//! ```rust
//! use ndarray::{Array1, ArrayView1};
//! use pathfinder::{LogDensityModel, Pathfinder, PathfinderConfig, Result};
//!
//! struct StdNormal;
//!
//! impl LogDensityModel for StdNormal {
//!     fn dim(&self) -> usize {
//!         2
//!     }
//!
//!     fn log_density(&self, x: &ArrayView1<f64>) -> Result<f64> {
//!         Ok(-0.5 * x.dot(x))
//!     }
//!
//!     fn log_density_gradient(&self, x: &ArrayView1<f64>) -> Result<(f64, Array1<f64>)> {
//!         Ok((-0.5 * x.dot(x), x.mapv(|v| -v)))
//!     }
//! }
//!
//! # fn main() -> Result<()> {
//! let config = PathfinderConfig::builder()
//!     .random_seed(42)
//!     .num_draws(100)
//!     .num_elbo_draws(25)
//!     .refresh(0)
//!     .build();
//! let result = Pathfinder::run_with_config(&StdNormal, &config)?;
//!
//! assert_eq!(result.num_draws(), 100);
//! println!("ELBO: {:.3}", result.elbo);
//! # Ok(())
//! # }
//! ```

mod config;
mod elbo;
mod error;
mod lbfgs;
mod math;
mod model;
pub mod psis;
mod result;
mod solver;
mod taylor;

pub use config::{ConfigBuilder, PathfinderConfig};
pub use error::{PathfinderError, Result};
pub use model::LogDensityModel;
pub use psis::{gpdfit, psis_weights, PsisResult};
pub use result::PathfinderResult;
pub use solver::{DiagnosticWriter, Hooks, ParamWriter, Pathfinder};

// Re-export ndarray for convenience
pub use ndarray;
