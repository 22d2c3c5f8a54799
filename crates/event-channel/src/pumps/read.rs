//! WebSocket read pump: decodes push frames into [`ChannelEvent`]s.

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use csvflow_protocol::constants::{WS_MAX_MESSAGE_SIZE, WS_PONG_WAIT};
use csvflow_protocol::messages::{ErrorPayload, FileReadyPayload, ProgressPayload};
use csvflow_protocol::{Envelope, EventType, ProtocolError};

use crate::types::ChannelEvent;

/// Why a read pump stopped.
#[derive(Debug, PartialEq)]
pub(crate) enum ReadExit {
    /// The caller closed the channel, or nobody is listening any more.
    Cancelled,
    /// A terminal event was delivered.
    Terminal,
    /// The connection is gone: stream end, close frame, read error or
    /// pong timeout.
    Lost(String),
}

/// Reads frames from one connection and forwards decoded events.
///
/// Any incoming frame resets the pong deadline. If nothing arrives within
/// [`WS_PONG_WAIT`] the connection is considered dead.
pub(crate) async fn read_pump<S>(
    mut read: S,
    job_id: Option<&str>,
    events_tx: &mpsc::Sender<ChannelEvent>,
    write_tx: &mpsc::Sender<tungstenite::Message>,
    cancel: &CancellationToken,
) -> ReadExit
where
    S: Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let pong_deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(pong_deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return ReadExit::Cancelled,

            () = &mut pong_deadline => {
                warn!("no frame within pong wait, connection dead");
                return ReadExit::Lost("pong timeout".into());
            }

            msg = read.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        return ReadExit::Lost(e.to_string());
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        return ReadExit::Lost("stream ended".into());
                    }
                };

                pong_deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);

                match msg {
                    tungstenite::Message::Text(text) => {
                        let Some(event) = handle_text_message(&text, job_id) else {
                            continue;
                        };
                        let terminal = event.is_terminal();
                        if events_tx.send(event).await.is_err() {
                            debug!("event receiver dropped");
                            return ReadExit::Cancelled;
                        }
                        if terminal {
                            return ReadExit::Terminal;
                        }
                    }
                    tungstenite::Message::Ping(data) => {
                        trace!("received ping, sending pong");
                        let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                    }
                    tungstenite::Message::Pong(_) => {
                        trace!("received pong");
                    }
                    tungstenite::Message::Close(frame) => {
                        debug!(?frame, "received close frame");
                        return ReadExit::Lost("closed by service".into());
                    }
                    _ => {} // Binary and raw frames are not part of the protocol.
                }
            }
        }
    }
}

/// Decodes one text frame. Returns `None` for frames that are dropped.
pub(crate) fn handle_text_message(text: &str, job_id: Option<&str>) -> Option<ChannelEvent> {
    if text.len() > WS_MAX_MESSAGE_SIZE {
        warn!("message too large ({} bytes), dropping", text.len());
        return None;
    }

    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(e) => e,
        Err(e) => {
            warn!("failed to parse frame: {e}");
            return None;
        }
    };

    trace!(event = ?envelope.event, job = ?envelope.job, "received frame");

    if let Some(id) = job_id
        && !envelope.is_for(id)
    {
        debug!(event = ?envelope.event, job = ?envelope.job, "frame for another job, dropping");
        return None;
    }

    let decoded = match envelope.event {
        EventType::Progress => envelope
            .require_payload::<ProgressPayload>()
            .map(|p| ChannelEvent::Progress(p.clamped())),
        EventType::FileReady | EventType::ProcessedFile => envelope
            .require_payload::<FileReadyPayload>()
            .map(ChannelEvent::Result),
        EventType::Error => envelope
            .require_payload::<ErrorPayload>()
            .map(|p| ChannelEvent::Error(p.message)),
        EventType::ProcessCsv | EventType::UploadFile | EventType::Unknown => {
            debug!(event = ?envelope.event, "ignoring non-push frame");
            return None;
        }
    };

    Some(decoded.unwrap_or_else(|e: ProtocolError| {
        warn!(event = ?envelope.event, error = %e, "malformed payload");
        ChannelEvent::Malformed {
            event: envelope.event.clone(),
            reason: e.to_string(),
        }
    }))
}
