pub mod detector;
pub mod matcher;
pub mod pipeline;
pub mod thumbnail;

use thiserror::Error;

pub use detector::{Detection, Detections};
pub use pipeline::extract_faces;

/// Failures of the face extraction and matching core.
///
/// Absence of faces is never an error: detection of a faceless image
/// yields an empty sequence, matching against an empty pool yields an
/// empty set.
#[derive(Debug, Error)]
pub enum FaceError {
    /// Image bytes could not be decoded or re-encoded
    #[error("image codec failure: {0}")]
    Decode(#[from] image::ImageError),

    /// Detection was requested before the models finished loading
    #[error("face models are not loaded")]
    NotReady,

    /// A descriptor does not have the configured length
    #[error("invalid descriptor length: expected {expected}, got {actual}")]
    Validation { expected: usize, actual: usize },

    /// Persisting face records failed
    #[error("face store failure: {0}")]
    Store(#[source] anyhow::Error),

    /// Model inference failed
    #[error(transparent)]
    Inference(#[from] anyhow::Error),
}

impl From<ort::Error> for FaceError {
    fn from(err: ort::Error) -> Self {
        FaceError::Inference(err.into())
    }
}
