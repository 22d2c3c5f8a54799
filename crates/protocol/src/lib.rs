//! Wire protocol shared by the csvflow transfer and event channels.
//!
//! Covers both protocol variants: the HTTP endpoints used to move the CSV
//! out, and the JSON envelopes pushed over the duplex event channel.

pub mod constants;
pub mod envelope;
pub mod messages;

pub use constants::EventType;
pub use envelope::Envelope;
pub use messages::{ErrorPayload, FileReadyPayload, ProgressPayload, StartCommand};

/// Errors produced while decoding wire data.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing payload for {0:?} event")]
    MissingPayload(EventType),
}
