//! Outbound side of a csvflow job.
//!
//! Validates the caller's file by declared content type and moves its bytes
//! to the processing service over HTTP, optionally reporting byte-level
//! upload progress.

mod http;
mod progress;
mod types;
mod validation;

pub use http::{Endpoint, HttpTransfer, TransferMode, TransferResponse};
pub use progress::{ProgressSender, percent_of};
pub use types::{CandidateFile, SourceFile};
pub use validation::{ValidationError, detect_content_type, is_csv_type, validate_source};

/// Errors produced while moving a file to the service.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("network error: {0}")]
    Network(String),

    #[error("transfer timed out")]
    Timeout,

    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for TransferError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::Timeout;
        }
        let mut msg = e.to_string();
        let mut source = std::error::Error::source(&e);
        while let Some(cause) = source {
            msg.push_str(": ");
            msg.push_str(&cause.to_string());
            source = cause.source();
        }
        Self::Network(msg)
    }
}
