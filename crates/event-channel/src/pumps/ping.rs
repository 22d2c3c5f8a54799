//! Keepalive for the event channel while a job is being processed.
//!
//! Processing can run for minutes without a push event; the pings keep the
//! service and any proxy in between from reaping the idle socket.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Queues a ping every `period` until `cancel` fires or the write queue is
/// gone.
///
/// A ping is skipped when the write queue is full: queued frames will reach
/// the service anyway and keep the socket busy.
pub(crate) async fn ping_pump(
    write_tx: mpsc::Sender<Message>,
    period: Duration,
    cancel: &CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        match write_tx.try_send(Message::Ping(Vec::<u8>::new().into())) {
            Ok(()) => trace!("keepalive ping queued"),
            Err(TrySendError::Full(_)) => trace!("write queue busy, ping skipped"),
            Err(TrySendError::Closed(_)) => return,
        }
    }
}
