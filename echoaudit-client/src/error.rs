//! Error types for echoaudit-client
//!
//! - `JobServiceError`: one failed request/response exchange
//! - `CatalogError`: navigation and index refresh failures
//! - `PipelineError`: run/stage outcomes that end a pipeline operation
//! - `PlaybackError`: audio stream and player failures

use echoaudit_common::api::Stage;
use thiserror::Error;

/// Job Service client errors
#[derive(Debug, Error)]
pub enum JobServiceError {
    #[error("Network error: {0}")]
    Network(String),

    /// 404, or a resource the service says does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// 409: the service declined to start work (e.g. already running)
    #[error("Rejected by Job Service: {0}")]
    Rejected(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Catalog (index + selection + calls) errors
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Fetch failed; the previous snapshot is still published
    #[error("Transient fetch error: {0}")]
    Fetch(#[from] JobServiceError),

    /// Selection names a key absent from the current index
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation needs a parent level selected first
    #[error("Nothing selected: {0}")]
    NoSelection(&'static str),
}

/// Pipeline operation errors
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The trigger request itself failed
    #[error("Request for {target} failed: {source}")]
    Request {
        target: String,
        #[source]
        source: JobServiceError,
    },

    /// The Job Service declined to start; nothing was started
    #[error("{target} was not started: {reason}")]
    TriggerRejected { target: String, reason: String },

    /// The stage ran and reported a terminal error (verbatim)
    #[error("{stage} stage failed: {message}")]
    StageFailure { stage: Stage, message: String },

    /// Another run holds the stage lock
    #[error("Pipeline busy: {0}")]
    Busy(String),

    /// Local observation stopped; the remote job keeps running
    #[error("Cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Whether this outcome should be reported as a failure rather than a no-op
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::Request { .. } | PipelineError::StageFailure { .. }
        )
    }
}

/// Playback errors
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("Audio stream unavailable: {0}")]
    Stream(#[from] JobServiceError),

    #[error("Player error: {0}")]
    Player(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
