use thiserror::Error;

/// Result alias for the clustering API.
pub type Result<T> = std::result::Result<T, KMeansError>;

/// Errors raised by [`MaskedKMeans`](crate::MaskedKMeans).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum KMeansError {
    /// Input matrices have the wrong dimensionality or disagree in shape.
    #[error("shape error: {0}")]
    Shape(String),

    /// A scalar argument is out of range.
    #[error("invalid argument '{arg}': {reason}")]
    InvalidArgument {
        arg: &'static str,
        reason: String,
    },

    /// `cluster` was called before any centroids were placed.
    #[error("centroids are not initialised; call initialise() or set_centroids() first")]
    NotInitialised,
}
