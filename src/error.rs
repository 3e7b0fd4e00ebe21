//! Typed failure kinds surfaced by the classification pipeline.
//!
//! The public API returns `anyhow::Result`; these errors sit at the bottom of
//! the chain so callers can still tell a bad input file apart from a model
//! that refused the input.

use std::path::PathBuf;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while turning an audio file into classification scores.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The file is missing, unreadable, or not a supported audio format.
    #[error("failed to decode audio file {}: {source}", path.display())]
    Decode {
        /// Offending input path.
        path: PathBuf,
        /// Underlying I/O or codec error.
        #[source]
        source: BoxError,
    },
    /// The model cannot process the prepared input.
    #[error("model inference failed: {0}")]
    Inference(String),
}

impl PipelineError {
    /// Wrap an I/O or codec failure for `path`.
    pub fn decode(path: impl Into<PathBuf>, source: impl Into<BoxError>) -> Self {
        Self::Decode {
            path: path.into(),
            source: source.into(),
        }
    }

    /// Build an inference error from a message.
    pub fn inference(message: impl Into<String>) -> Self {
        Self::Inference(message.into())
    }

    /// Returns true for decode failures.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }

    /// Returns true for inference failures.
    pub fn is_inference(&self) -> bool {
        matches!(self, Self::Inference(_))
    }
}
