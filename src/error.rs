//! Error types for plumetrace
//!
//! - **DomainError**: invalid physical inputs rejected by the forward model.
//!   Never fatal to a run; the evaluator turns it into a penalty fitness.
//! - **InversionError**: failures that stop a run before or during optimization.
//! - **Result**: type alias for `Result<T, InversionError>`

use thiserror::Error;

/// Result type alias for inversion operations
pub type Result<T> = std::result::Result<T, InversionError>;

/// Physical input rejected by the dispersion model
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// Dispersion is undefined without wind
    #[error("wind speed must be positive (got {0} m/s)")]
    NonPositiveWindSpeed(f64),

    /// Receptor below ground level
    #[error("receptor {id} has negative height {z} m")]
    NegativeReceptorHeight {
        /// Sensor identifier
        id: String,
        /// Offending height
        z: f64,
    },

    /// Release point below ground level
    #[error("source height must be non-negative (got {0} m)")]
    NegativeSourceHeight(f64),

    /// Negative mass flux
    #[error("emission rate must be non-negative (got {0} g/s)")]
    NegativeEmissionRate(f64),

    /// NaN or infinite input
    #[error("non-finite value for {0}")]
    NonFinite(&'static str),
}

/// Main error type for inversion runs
#[derive(Error, Debug)]
pub enum InversionError {
    /// Malformed scenario, observations or run options. Raised before the
    /// optimizer starts; no partial run is attempted.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Evaluation cache returned a slot for a different canonical key
    #[error("evaluation cache invariant violated: {0}")]
    CacheInvariant(String),

    /// Worker pool could not be created
    #[error("worker pool error: {0}")]
    WorkerPool(String),
}

impl InversionError {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a cache invariant error
    pub fn cache_invariant(msg: impl Into<String>) -> Self {
        Self::CacheInvariant(msg.into())
    }

    /// True for errors raised by input validation
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

impl From<rayon::ThreadPoolBuildError> for InversionError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        Self::WorkerPool(err.to_string())
    }
}
