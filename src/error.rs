//! Error types for the triage engine

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for triage operations
pub type Result<T> = std::result::Result<T, TriageError>;

/// Errors raised by the triage engine.
///
/// Checkpoint errors are fatal for the handle being built and are never
/// retried inside the engine. Image errors are scoped to a single request.
#[derive(Error, Debug)]
pub enum TriageError {
    /// Checkpoint path does not exist
    #[error("checkpoint not found: {}", .0.display())]
    ArtifactNotFound(PathBuf),

    /// Checkpoint exists but could not be parsed
    #[error("failed to read checkpoint {}: {source}", .path.display())]
    ArtifactRead {
        path: PathBuf,
        #[source]
        source: candle_core::Error,
    },

    /// Checkpoint and topology do not fit together
    #[error("checkpoint integrity error: {0}")]
    LoadIntegrity(String),

    /// Input bytes are not a decodable image
    #[error("image decode failed: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// Input exceeds the configured size limit
    #[error("image too large: {size} bytes (limit {limit})")]
    ImageTooLarge { size: usize, limit: usize },

    /// Tensor computation failed
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}

impl TriageError {
    /// Whether the error comes from building a model handle rather than
    /// from a single request.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TriageError::ArtifactNotFound(_)
                | TriageError::ArtifactRead { .. }
                | TriageError::LoadIntegrity(_)
        )
    }
}
