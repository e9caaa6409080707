//! The error taxonomy for the conversion pipeline.
//!
//! Stage code generally works with [`anyhow::Result`], but failures that the
//! HTTP layer needs to distinguish are raised as [`PipelineError`] values so
//! they can be recovered with `downcast_ref` when choosing a status code.

use thiserror::Error;

/// A failure that terminates a conversion request or a download.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The upload contained no document at all.
    #[error("no document supplied")]
    MissingInput,

    /// The upload was not recognizable as a PDF.
    #[error("uploaded file is not a PDF (detected {0})")]
    UnsupportedInput(String),

    /// Rasterization ran but produced zero page images, usually because the
    /// document is empty or corrupt. Never retried.
    #[error("rasterization produced no page images")]
    NoPagesProduced,

    /// An external process exceeded its execution bound.
    #[error("{stage} exceeded its {limit_secs}s execution limit")]
    StageTimeout {
        stage: &'static str,
        limit_secs: u64,
    },

    /// The recognition engine exited nonzero or produced no output file.
    #[error("recognition engine failed: {details}")]
    OcrEngine { details: String },

    /// The output document could not be serialized.
    #[error("could not serialize output document: {0}")]
    Assembly(String),

    /// A download referenced an artifact that is unknown, already taken, or
    /// past its retention deadline. Reported to the caller as "not found",
    /// never as a server fault.
    #[error("artifact {0} has expired or does not exist")]
    ArtifactExpired(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
