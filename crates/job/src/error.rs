//! Job error taxonomy.

use csvflow_event_channel::ChannelError;
use csvflow_transfer::{TransferError, ValidationError};

/// Why a job ended in [`Phase::Failed`](crate::Phase::Failed).
///
/// Every lower-level error is folded into one of these kinds. The type is
/// `Clone + PartialEq` so it can live inside the phase.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("network error: {0}")]
    Network(String),

    #[error("transfer timed out")]
    Timeout,

    /// Rejected by the service. `status` is absent when the rejection came
    /// over the event channel.
    #[error("{message}")]
    Server { status: Option<u16>, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unreadable result: {0}")]
    Serialization(String),

    #[error("cancelled")]
    Cancelled,
}

impl JobError {
    /// Text shown to the user for this failure.
    ///
    /// Validation and server errors are shown as-is; transport errors get a
    /// generic message since their detail is only useful in logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(e) => e.to_string(),
            Self::Server { message, .. } => message.clone(),
            Self::Network(_) => "Could not reach the processing service.".into(),
            Self::Timeout => "The processing service stopped responding.".into(),
            Self::Protocol(_) => "The processing service sent an unexpected response.".into(),
            Self::Serialization(_) => "The processed file could not be read.".into(),
            Self::Cancelled => "Processing was cancelled.".into(),
        }
    }
}

impl From<TransferError> for JobError {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::Timeout => Self::Timeout,
            TransferError::Server { status, body } => Self::Server {
                status: Some(status),
                message: body,
            },
            TransferError::Network(msg) => Self::Network(msg),
            TransferError::Io(e) => Self::Network(e.to_string()),
            TransferError::InvalidUrl(url) => Self::Network(format!("invalid URL: {url}")),
        }
    }
}

impl From<ChannelError> for JobError {
    fn from(e: ChannelError) -> Self {
        match e {
            ChannelError::Timeout => Self::Timeout,
            ChannelError::Json(e) => Self::Protocol(e.to_string()),
            ChannelError::AlreadyStarted => Self::Protocol(e.to_string()),
            ChannelError::Ws(_) | ChannelError::Closed | ChannelError::InvalidUrl(_) => {
                Self::Network(e.to_string())
            }
        }
    }
}
