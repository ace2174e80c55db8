//! Configuration for the Pathfinder algorithm.

use ndarray::Array1;

use crate::error::{PathfinderError, Result};

/// Configuration parameters for a single Pathfinder path.
#[derive(Debug, Clone)]
pub struct PathfinderConfig {
    /// Seed for the random number generator.
    pub random_seed: u64,

    /// Path index; advances the per-path random stream so that paths run
    /// with the same seed stay independent.
    pub path: u64,

    /// Initial values for the unconstrained parameters. Components that
    /// are missing or non-finite are drawn uniformly from
    /// `(-init_radius, init_radius)`.
    pub init: Option<Array1<f64>>,

    /// Half-width of the uniform initialization interval.
    pub init_radius: f64,

    /// Number of `(y, s)` pairs retained by the optimizer.
    pub history_size: usize,

    /// Line-search step size for the first iteration.
    pub init_alpha: f64,

    /// Convergence tolerance on absolute changes in the objective.
    pub tol_obj: f64,

    /// Convergence tolerance on relative changes in the objective,
    /// in units of machine epsilon.
    pub tol_rel_obj: f64,

    /// Convergence tolerance on the gradient norm.
    pub tol_grad: f64,

    /// Convergence tolerance on the relative gradient norm, in units of
    /// machine epsilon.
    pub tol_rel_grad: f64,

    /// Convergence tolerance on the step norm.
    pub tol_param: f64,

    /// Maximum number of optimizer iterations.
    pub num_iterations: usize,

    /// Number of Monte Carlo draws per ELBO estimate.
    pub num_elbo_draws: usize,

    /// Number of approximate posterior draws to return.
    pub num_draws: usize,

    /// If true, stream each iteration's parameters and gradient to the
    /// diagnostic writer.
    pub save_iterations: bool,

    /// Log a progress line every `refresh` iterations; 0 silences
    /// per-iteration output.
    pub refresh: usize,
}

impl Default for PathfinderConfig {
    fn default() -> Self {
        Self {
            random_seed: 1,
            path: 0,
            init: None,
            init_radius: 2.0,
            history_size: 5,
            init_alpha: 0.001,
            tol_obj: 1e-12,
            tol_rel_obj: 1e4,
            tol_grad: 1e-8,
            tol_rel_grad: 1e7,
            tol_param: 1e-8,
            num_iterations: 1000,
            num_elbo_draws: 25,
            num_draws: 1000,
            save_iterations: false,
            refresh: 100,
        }
    }
}

impl PathfinderConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for constructing a configuration.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !(self.init_radius >= 0.0) || !self.init_radius.is_finite() {
            return Err(PathfinderError::invalid_config(
                "init_radius",
                "must be finite and non-negative",
            ));
        }

        if self.history_size == 0 {
            return Err(PathfinderError::invalid_config(
                "history_size",
                "optimizer memory must be at least 1",
            ));
        }

        if !(self.init_alpha > 0.0) {
            return Err(PathfinderError::invalid_config(
                "init_alpha",
                "must be positive",
            ));
        }

        for (name, value) in [
            ("tol_obj", self.tol_obj),
            ("tol_rel_obj", self.tol_rel_obj),
            ("tol_grad", self.tol_grad),
            ("tol_rel_grad", self.tol_rel_grad),
            ("tol_param", self.tol_param),
        ] {
            if !(value >= 0.0) {
                return Err(PathfinderError::invalid_config(name, "must be non-negative"));
            }
        }

        if self.num_iterations == 0 {
            return Err(PathfinderError::invalid_config(
                "num_iterations",
                "must be at least 1",
            ));
        }

        if self.num_elbo_draws == 0 {
            return Err(PathfinderError::invalid_config(
                "num_elbo_draws",
                "must be at least 1",
            ));
        }

        if self.num_draws < self.num_elbo_draws {
            return Err(PathfinderError::invalid_config(
                "num_draws",
                "must be at least num_elbo_draws",
            ));
        }

        Ok(())
    }
}

/// Builder for constructing `PathfinderConfig` with a fluent API.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: PathfinderConfig,
}

impl ConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            config: PathfinderConfig::default(),
        }
    }

    /// Set the RNG seed.
    pub fn random_seed(mut self, seed: u64) -> Self {
        self.config.random_seed = seed;
        self
    }

    /// Set the path index.
    pub fn path(mut self, path: u64) -> Self {
        self.config.path = path;
        self
    }

    /// Set initial unconstrained parameter values.
    ///
    /// Non-finite components are treated as unspecified and drawn
    /// uniformly from the initialization interval.
    pub fn init(mut self, init: Array1<f64>) -> Self {
        self.config.init = Some(init);
        self
    }

    /// Set the half-width of the uniform initialization interval.
    pub fn init_radius(mut self, radius: f64) -> Self {
        self.config.init_radius = radius;
        self
    }

    /// Set the optimizer history size.
    pub fn history_size(mut self, m: usize) -> Self {
        self.config.history_size = m;
        self
    }

    /// Set the first-iteration line-search step size.
    pub fn init_alpha(mut self, alpha: f64) -> Self {
        self.config.init_alpha = alpha;
        self
    }

    /// Set the absolute objective-change tolerance.
    pub fn tol_obj(mut self, tol: f64) -> Self {
        self.config.tol_obj = tol;
        self
    }

    /// Set the relative objective-change tolerance (in machine epsilons).
    pub fn tol_rel_obj(mut self, tol: f64) -> Self {
        self.config.tol_rel_obj = tol;
        self
    }

    /// Set the absolute gradient-norm tolerance.
    pub fn tol_grad(mut self, tol: f64) -> Self {
        self.config.tol_grad = tol;
        self
    }

    /// Set the relative gradient-norm tolerance (in machine epsilons).
    pub fn tol_rel_grad(mut self, tol: f64) -> Self {
        self.config.tol_rel_grad = tol;
        self
    }

    /// Set the step-norm tolerance.
    pub fn tol_param(mut self, tol: f64) -> Self {
        self.config.tol_param = tol;
        self
    }

    /// Set the maximum number of optimizer iterations.
    pub fn num_iterations(mut self, n: usize) -> Self {
        self.config.num_iterations = n;
        self
    }

    /// Set the number of Monte Carlo draws per ELBO estimate.
    pub fn num_elbo_draws(mut self, k: usize) -> Self {
        self.config.num_elbo_draws = k;
        self
    }

    /// Set the number of returned posterior draws.
    pub fn num_draws(mut self, m: usize) -> Self {
        self.config.num_draws = m;
        self
    }

    /// Enable or disable streaming per-iteration diagnostics.
    pub fn save_iterations(mut self, save: bool) -> Self {
        self.config.save_iterations = save;
        self
    }

    /// Set the progress-logging cadence (0 silences it).
    pub fn refresh(mut self, refresh: usize) -> Self {
        self.config.refresh = refresh;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> PathfinderConfig {
        self.config
    }

    /// Build and validate the configuration.
    pub fn build_validated(self) -> Result<PathfinderConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(PathfinderConfig::default().validate().is_ok());
    }

    #[test]
    fn test_builder_round_trip() {
        let config = PathfinderConfig::builder()
            .random_seed(99)
            .path(3)
            .history_size(8)
            .num_elbo_draws(50)
            .num_draws(500)
            .refresh(0)
            .build();

        assert_eq!(config.random_seed, 99);
        assert_eq!(config.path, 3);
        assert_eq!(config.history_size, 8);
        assert_eq!(config.num_elbo_draws, 50);
        assert_eq!(config.num_draws, 500);
        assert_eq!(config.refresh, 0);
    }

    #[test]
    fn test_rejects_zero_history() {
        let config = PathfinderConfig::builder().history_size(0).build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_draws_below_elbo_draws() {
        let config = PathfinderConfig::builder()
            .num_elbo_draws(100)
            .num_draws(50)
            .build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_negative_radius() {
        let config = PathfinderConfig::builder().init_radius(-1.0).build();
        assert!(config.validate().is_err());
    }
}
