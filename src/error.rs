//! Error types for the scan collaborators and the orchestrator.
//!
//! Collaborator errors never leave a scan: the pipeline logs them and carries
//! on with neutral evidence. `ScanError` is what aborts a scan, and even that
//! is reported as an empty result rather than returned to the caller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("text extraction request failed: {0}")]
    Request(String),

    #[error("text extraction returned no transcript")]
    EmptyResponse,
}

#[derive(Debug, Error)]
pub enum CatalogSearchError {
    #[error("catalog transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("catalog returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("catalog search timed out")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum VisualAnalysisError {
    #[error("image could not be decoded: {0}")]
    Decode(#[from] image::ImageError),

    #[error("image worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan cancelled by caller")]
    Cancelled,

    #[error("scan aborted: {0}")]
    Internal(String),
}
