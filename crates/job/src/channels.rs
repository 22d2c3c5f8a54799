//! Transport seams of the orchestrator.
//!
//! The orchestrator only talks to these traits. [`crate::adapters`]
//! implements them on top of the HTTP transfer and WebSocket clients;
//! tests implement them with mocks.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use csvflow_event_channel::{ChannelError, ChannelEvent, CommandKind};
use csvflow_protocol::StartCommand;
use csvflow_transfer::{ProgressSender, SourceFile, TransferError};

use crate::result::ResultPayload;
use crate::types::JobId;

/// Typed push events of one event channel.
pub type EventStream = mpsc::Receiver<ChannelEvent>;

/// What a finished transfer produced.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutcome {
    /// The service only acknowledged receipt; the result comes over the
    /// event channel.
    Acknowledged,
    /// The response already carries the processed file.
    Processed(ResultPayload),
}

/// Moves a source file to the service.
pub trait TransferChannel: Send + Sync {
    /// Sends `file`, reporting upload percentages on `progress_tx`.
    ///
    /// Dropping the returned future abandons the transfer.
    fn send<'a>(
        &'a self,
        file: &'a SourceFile,
        progress_tx: ProgressSender,
    ) -> Pin<Box<dyn Future<Output = Result<TransferOutcome, TransferError>> + Send + 'a>>;
}

/// An open event channel, owned by the job that opened it.
pub trait EventChannel: Send {
    /// Sends the job-start command. Only the first call may succeed.
    fn start(&self, kind: CommandKind, command: &StartCommand) -> Result<(), ChannelError>;

    /// Closes the channel. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Opens event channels, one per job.
pub trait EventConnector: Send + Sync {
    fn open<'a>(
        &'a self,
        job: JobId,
    ) -> Pin<Box<dyn Future<Output = Result<(Box<dyn EventChannel>, EventStream), ChannelError>> + Send + 'a>>;
}
