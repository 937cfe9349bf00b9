use std::path::PathBuf;

use thiserror::Error;

/// Error taxonomy for the whole pipeline.
///
/// Only `InvalidConfiguration` and `MissingDependency` are fatal; every
/// per-video and per-frame variant is caught at the item boundary and
/// converted into a recorded outcome so a batch never dies to one bad item.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("{tool} not found. {hint}")]
    MissingDependency { tool: String, hint: String },
    #[error("video {video_id} is no longer available from its source")]
    SourceUnavailable { video_id: String },
    #[error("could not decode a frame from {}", path.display())]
    FrameDecode { path: PathBuf },
    #[error("no frame registered with index {index}")]
    MissingFrame { index: usize },
    #[error("generation failed for frame {index}: {message}")]
    Generation { index: usize, message: String },
}
