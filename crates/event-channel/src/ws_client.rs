//! WebSocket client for the processing service's push-event channel.
//!
//! Sends the single job-start command and delivers push events as a typed
//! stream. Keepalive pings and reconnection run in a background task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use csvflow_protocol::constants::WS_MAX_MESSAGE_SIZE;
use csvflow_protocol::{Envelope, StartCommand};

use crate::reconnection::Supervisor;
use crate::types::{ChannelEvent, ChannelState, CommandKind, ReconnectConfig};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Time allowed for one WebSocket handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the outbound frame queue and the event stream.
const QUEUE_CAPACITY: usize = 256;

/// Errors from the event channel client.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection timed out")]
    Timeout,

    #[error("channel closed")]
    Closed,

    #[error("start command already sent")]
    AlreadyStarted,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Opens one WebSocket connection.
pub(crate) async fn open_stream(url: &str) -> Result<WsStream, ChannelError> {
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
    ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);

    let connect = tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false);
    let (stream, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect)
        .await
        .map_err(|_| ChannelError::Timeout)??;
    Ok(stream)
}

/// Event channel for one job.
///
/// Created fresh per job by [`EventClient::connect`]. Dropping the client
/// closes the channel.
pub struct EventClient {
    job_id: Option<String>,
    write_tx: mpsc::Sender<tungstenite::Message>,
    started: AtomicBool,
    state: Arc<Mutex<ChannelState>>,
    cancel: CancellationToken,
}

impl EventClient {
    /// Connects to `url` and starts the background supervisor.
    ///
    /// The initial connection is a single attempt; reconnection only applies
    /// to connections that drop after opening. When `job_id` is set, frames
    /// addressed to another job are ignored.
    pub async fn connect(
        url: &str,
        job_id: Option<String>,
        config: ReconnectConfig,
    ) -> Result<(Self, mpsc::Receiver<ChannelEvent>), ChannelError> {
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ChannelError::InvalidUrl(url.to_string()));
        }

        let state = Arc::new(Mutex::new(ChannelState::Connecting));
        let stream = open_stream(url).await?;
        if let Ok(mut s) = state.lock() {
            *s = ChannelState::Open;
        }
        info!(url, job = ?job_id, "event channel open");

        let (write_tx, write_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(QUEUE_CAPACITY);
        let cancel = CancellationToken::new();

        let supervisor = Supervisor {
            url: url.to_string(),
            job_id: job_id.clone(),
            config,
            write_tx: write_tx.clone(),
            write_rx,
            events_tx,
            state: state.clone(),
            cancel: cancel.clone(),
        };
        tokio::spawn(supervisor.run(stream));

        let client = Self {
            job_id,
            write_tx,
            started: AtomicBool::new(false),
            state,
            cancel,
        };
        Ok((client, events_rx))
    }

    /// Queues the job-start command.
    ///
    /// Only one start command is accepted per client; it is not re-sent
    /// after a reconnect.
    pub fn send_command(
        &self,
        kind: CommandKind,
        command: &StartCommand,
    ) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ChannelError::AlreadyStarted);
        }

        let envelope = Envelope::new(kind.event_type(), self.job_id.as_deref(), Some(command))?;
        let json = serde_json::to_string(&envelope)?;
        debug!(
            command = ?kind,
            job = ?self.job_id,
            carries_file = command.file.is_some(),
            "sending start command"
        );

        self.write_tx
            .try_send(tungstenite::Message::Text(json.into()))
            .map_err(|_| ChannelError::Closed)
    }

    /// Current connection state.
    pub fn state(&self) -> ChannelState {
        self.state
            .lock()
            .map(|s| s.clone())
            .unwrap_or(ChannelState::Closed)
    }

    /// Returns `true` once the channel has closed for any reason.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.state() == ChannelState::Closed
    }

    /// Closes the channel. Calling it again is a no-op.
    pub fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        if let Ok(mut s) = self.state.lock() {
            *s = ChannelState::Closed;
        }
        self.cancel.cancel();
        debug!(job = ?self.job_id, "event channel close requested");
    }
}

impl Drop for EventClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
