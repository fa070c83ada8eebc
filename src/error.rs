use thiserror::Error;

/// Failures surfaced by the estimation core.
///
/// Everything else (implausible RSSI, NaN input) is tolerated and produces
/// a possibly-poor estimate instead of an error.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EstimatorError {
    /// `predict` was called before a model artifact was loaded
    #[error("no model artifact loaded")]
    ModelNotLoaded,

    /// The feature vector does not match what the scaler was fit on.
    /// Usually means the feature builder changed without retraining.
    #[error("feature shape mismatch: model expects {expected} features, got {actual}")]
    FeatureShape { expected: usize, actual: usize },

    /// The artifact is malformed or uses an unknown layout
    #[error("invalid model artifact: {0}")]
    Artifact(String),
}

pub type EstimatorResult<T> = std::result::Result<T, EstimatorError>;
