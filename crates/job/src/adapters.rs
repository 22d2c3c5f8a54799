//! Adapters from the transport clients to the orchestrator's traits.

use std::future::Future;
use std::pin::Pin;

use csvflow_event_channel::{ChannelError, CommandKind, EventClient, ReconnectConfig};
use csvflow_protocol::StartCommand;
use csvflow_transfer::{Endpoint, HttpTransfer, ProgressSender, SourceFile, TransferError};

use crate::channels::{EventChannel, EventConnector, EventStream, TransferChannel, TransferOutcome};
use crate::result::ResultPayload;
use crate::types::JobId;

/// [`TransferChannel`] over [`HttpTransfer`].
///
/// Posting to [`Endpoint::ProcessCsv`] yields the processed file directly;
/// [`Endpoint::UploadCsv`] only yields an acknowledgment.
pub struct HttpTransferChannel {
    transfer: HttpTransfer,
    endpoint: Endpoint,
}

impl HttpTransferChannel {
    pub fn new(transfer: HttpTransfer, endpoint: Endpoint) -> Self {
        Self { transfer, endpoint }
    }
}

impl TransferChannel for HttpTransferChannel {
    fn send<'a>(
        &'a self,
        file: &'a SourceFile,
        progress_tx: ProgressSender,
    ) -> Pin<Box<dyn Future<Output = Result<TransferOutcome, TransferError>> + Send + 'a>> {
        Box::pin(async move {
            let resp = self
                .transfer
                .send(self.endpoint, file, Some(progress_tx))
                .await?;
            Ok(match self.endpoint {
                Endpoint::ProcessCsv => TransferOutcome::Processed(ResultPayload {
                    // An empty name falls back to the configured default.
                    filename: resp.filename.unwrap_or_default(),
                    bytes: resp.body,
                }),
                Endpoint::UploadCsv => TransferOutcome::Acknowledged,
            })
        })
    }
}

impl EventChannel for EventClient {
    fn start(&self, kind: CommandKind, command: &StartCommand) -> Result<(), ChannelError> {
        self.send_command(kind, command)
    }

    fn close(&self) {
        EventClient::close(self);
    }

    fn is_closed(&self) -> bool {
        EventClient::is_closed(self)
    }
}

/// [`EventConnector`] that opens a WebSocket [`EventClient`] per job.
pub struct WsConnector {
    url: String,
    reconnect: ReconnectConfig,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, reconnect: ReconnectConfig) -> Self {
        Self {
            url: url.into(),
            reconnect,
        }
    }
}

impl EventConnector for WsConnector {
    fn open<'a>(
        &'a self,
        job: JobId,
    ) -> Pin<Box<dyn Future<Output = Result<(Box<dyn EventChannel>, EventStream), ChannelError>> + Send + 'a>>
    {
        Box::pin(async move {
            let (client, events) =
                EventClient::connect(&self.url, Some(job.to_string()), self.reconnect.clone())
                    .await?;
            Ok((Box::new(client) as Box<dyn EventChannel>, events))
        })
    }
}
