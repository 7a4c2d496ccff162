//! Resumable chunked uploads with progress tracking.
//!
//! A push streams two outputs (patch and signature) to resumable upload
//! sessions. [`bootstrap_session`] opens a session; [`spawn_sink`] starts a
//! task that drains an [`UploadWriter`] into it in chunk groups, retrying
//! transient failures and publishing confirmed byte counts. The
//! [`progress`] module turns those counts into a conservative completion
//! estimate.

mod chunked;
pub mod progress;
mod resumable;
mod session;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use chunked::{content_range, group_size, parse_range_header};
pub use progress::{ProgressEstimator, ProgressFeeds, ProgressSnapshot, format_bytes};
pub use resumable::{SinkConfig, UploadSink, UploadWriter, spawn_sink};
pub use session::{UploadSession, bootstrap_session};

/// Builds the HTTP client used for upload sessions.
///
/// Resumable sessions answer intermediate chunks with `308`, which must
/// reach the sink instead of being followed as a redirect.
pub fn upload_client() -> Result<reqwest::Client, TransferError> {
    Ok(reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()?)
}

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("upload session response has no Location header")]
    MissingLocation,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("server confirmed no new bytes")]
    NoProgress,

    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("upload stream dropped before it was closed")]
    Aborted,

    #[error("cancelled")]
    Cancelled,

    #[error("upload task failed: {0}")]
    Task(String),
}

impl TransferError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::NoProgress => true,
            Self::UnexpectedStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_statuses() {
        let status = |status| TransferError::UnexpectedStatus {
            status,
            body: String::new(),
        };
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
        assert!(!status(404).is_transient());
        assert!(!TransferError::Cancelled.is_transient());
        assert!(TransferError::NoProgress.is_transient());
    }
}
