//! Connection supervisor: runs the pumps for each connection and
//! reconnects with exponential backoff when one drops.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use csvflow_protocol::constants::WS_PING_PERIOD;

use crate::pumps::ping::ping_pump;
use crate::pumps::read::{ReadExit, read_pump};
use crate::pumps::write::write_pump;
use crate::types::{ChannelEvent, ChannelState, ReconnectConfig};
use crate::ws_client::{WsStream, open_stream};

/// Time allowed for the close handshake when the channel shuts down.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Owns everything one [`EventClient`](crate::EventClient) needs across
/// connections.
pub(crate) struct Supervisor {
    pub(crate) url: String,
    pub(crate) job_id: Option<String>,
    pub(crate) config: ReconnectConfig,
    pub(crate) write_tx: mpsc::Sender<tungstenite::Message>,
    pub(crate) write_rx: mpsc::Receiver<tungstenite::Message>,
    pub(crate) events_tx: mpsc::Sender<ChannelEvent>,
    pub(crate) state: Arc<Mutex<ChannelState>>,
    pub(crate) cancel: CancellationToken,
}

impl Supervisor {
    /// Serves `stream` and its successors until the channel closes.
    pub(crate) async fn run(mut self, stream: WsStream) {
        let mut stream = stream;
        loop {
            match self.serve(stream).await {
                ReadExit::Cancelled => {
                    debug!(job = ?self.job_id, "event channel closed");
                    break;
                }
                ReadExit::Terminal => {
                    debug!(job = ?self.job_id, "terminal event delivered, closing channel");
                    break;
                }
                ReadExit::Lost(reason) => {
                    warn!(job = ?self.job_id, %reason, "event channel disconnected");
                    if self.events_tx.send(ChannelEvent::Disconnected).await.is_err() {
                        break;
                    }
                    match self.reconnect().await {
                        Some(next) => stream = next,
                        None => break,
                    }
                }
            }
        }
        self.set_state(ChannelState::Closed);
        self.cancel.cancel();
    }

    /// Runs the read, write and ping pumps for one connection.
    async fn serve(&mut self, stream: WsStream) -> ReadExit {
        let (mut write, read) = stream.split();
        let conn_cancel = self.cancel.child_token();

        let exit = tokio::select! {
            exit = read_pump(
                read,
                self.job_id.as_deref(),
                &self.events_tx,
                &self.write_tx,
                &conn_cancel,
            ) => exit,
            () = write_pump(&mut write, &mut self.write_rx, &conn_cancel) => {
                if self.cancel.is_cancelled() {
                    ReadExit::Cancelled
                } else {
                    ReadExit::Lost("write failed".into())
                }
            }
            () = ping_pump(self.write_tx.clone(), WS_PING_PERIOD, &conn_cancel) => {
                ReadExit::Cancelled
            }
        };
        conn_cancel.cancel();

        if !matches!(exit, ReadExit::Lost(_)) {
            let close = write.send(tungstenite::Message::Close(None));
            let _ = tokio::time::timeout(CLOSE_GRACE, close).await;
        }
        exit
    }

    /// Attempts to reconnect within the retry budget.
    ///
    /// Returns `None` if the channel was closed meanwhile or every attempt
    /// failed; in the latter case [`ChannelEvent::Exhausted`] is emitted.
    async fn reconnect(&mut self) -> Option<WsStream> {
        let max_attempts = self.config.max_attempts;
        for attempt in 1..=max_attempts {
            let delay = self.config.delay_for_attempt(attempt);
            self.set_state(ChannelState::Reconnecting { attempt });

            info!(
                job = ?self.job_id,
                attempt,
                max_attempts,
                delay_secs = format_args!("{:.2}", delay.as_secs_f64()),
                "reconnecting"
            );

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(job = ?self.job_id, "reconnect cancelled");
                    return None;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let result = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                r = open_stream(&self.url) => r,
            };

            match result {
                Ok(stream) => {
                    info!(job = ?self.job_id, attempt, "reconnected");
                    self.set_state(ChannelState::Open);
                    let _ = self
                        .events_tx
                        .send(ChannelEvent::Reconnected { attempt })
                        .await;
                    return Some(stream);
                }
                Err(e) => {
                    warn!(job = ?self.job_id, attempt, error = %e, "reconnect attempt failed");
                }
            }
        }

        warn!(job = ?self.job_id, attempts = max_attempts, "reconnect budget exhausted");
        let _ = self
            .events_tx
            .send(ChannelEvent::Exhausted {
                attempts: max_attempts,
            })
            .await;
        None
    }

    fn set_state(&self, next: ChannelState) {
        if let Ok(mut state) = self.state.lock()
            && *state != ChannelState::Closed
        {
            *state = next;
        }
    }
}
