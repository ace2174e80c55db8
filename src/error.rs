//! Error types for Pathfinder.

use core::fmt;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PathfinderError>;

/// Errors that can abort a Pathfinder run.
///
/// Locally recoverable failures (a draw whose target density cannot be
/// evaluated, a curvature pair that fails the positivity check, a Gaussian
/// factorization that breaks down at one iterate) are absorbed by the
/// driver and only logged; the variants here are the failures that prevent
/// returning any valid draw at all.
#[derive(Debug, Clone)]
pub enum PathfinderError {
    /// A configuration parameter is out of range.
    InvalidConfig { parameter: String, message: String },

    /// Supplied initial values do not match the model dimension.
    InvalidInit { expected: usize, got: usize },

    /// No initial point with finite log-density and gradient was found.
    InitializationFailed { attempts: usize },

    /// The optimizer never produced an iterate with a usable ELBO.
    NoUsableIterate { iterations: usize },

    /// The interrupt callback requested cancellation.
    Interrupted,

    /// Model-reported failure (log density, gradient, or constraining
    /// transform).
    Model { message: String },

    /// Numerical error during computation.
    NumericalError { message: String },
}

impl fmt::Display for PathfinderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig { parameter, message } => {
                write!(f, "invalid configuration: {}: {}", parameter, message)
            }
            Self::InvalidInit { expected, got } => {
                write!(
                    f,
                    "initial values have length {}, model has {} parameters",
                    got, expected
                )
            }
            Self::InitializationFailed { attempts } => {
                write!(
                    f,
                    "no initial point with finite log density and gradient found in {} attempts",
                    attempts
                )
            }
            Self::NoUsableIterate { iterations } => {
                write!(
                    f,
                    "none of the {} optimizer iterations produced a usable approximation",
                    iterations
                )
            }
            Self::Interrupted => write!(f, "run cancelled by interrupt callback"),
            Self::Model { message } => write!(f, "model evaluation failed: {}", message),
            Self::NumericalError { message } => write!(f, "numerical error: {}", message),
        }
    }
}

impl std::error::Error for PathfinderError {}

impl PathfinderError {
    /// Build a [`PathfinderError::Model`] from anything displayable.
    ///
    /// Intended for [`LogDensityModel`](crate::model::LogDensityModel)
    /// implementations.
    pub fn model(message: impl Into<String>) -> Self {
        Self::Model {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_config(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    pub(crate) fn numerical(message: impl Into<String>) -> Self {
        Self::NumericalError {
            message: message.into(),
        }
    }
}
