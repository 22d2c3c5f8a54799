//! Public types for the event channel.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use csvflow_protocol::EventType;
use csvflow_protocol::messages::FileReadyPayload;

/// Lifecycle of an [`EventClient`](crate::EventClient).
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelState {
    /// Initial WebSocket handshake in progress.
    Connecting,
    /// Connected; commands flow out and events flow in.
    Open,
    /// Connection lost, attempting to reconnect.
    Reconnecting { attempt: u32 },
    /// Closed by the caller, after a terminal event, or after the retry
    /// budget ran out. Never reopens.
    Closed,
}

/// A typed push event, in transport order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Processing progress, rounded and clamped into `0..=100`.
    Progress(u8),
    /// The processed file. Terminal.
    Result(FileReadyPayload),
    /// Service-reported failure. Terminal.
    Error(String),
    /// A known event arrived with a payload that could not be decoded.
    Malformed { event: EventType, reason: String },
    /// The connection dropped; a reconnect is about to be attempted.
    Disconnected,
    /// A reconnect attempt succeeded.
    Reconnected { attempt: u32 },
    /// Every reconnect attempt failed; the channel is closed.
    Exhausted { attempts: u32 },
}

impl ChannelEvent {
    /// Returns `true` for events after which nothing else is honored.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result(_) | Self::Error(_))
    }
}

/// The job-start command a client sends over the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Asks the service to process a file it already received.
    #[default]
    ProcessCsv,
    /// Carries the file itself.
    UploadFile,
}

impl CommandKind {
    pub fn event_type(self) -> EventType {
        match self {
            Self::ProcessCsv => EventType::ProcessCsv,
            Self::UploadFile => EventType::UploadFile,
        }
    }
}

/// Configuration for automatic reconnection with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Initial delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (backoff cap).
    pub max_delay: Duration,
    /// Multiplier for each subsequent attempt.
    pub backoff_factor: f64,
    /// Attempts made after a disconnect before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
            backoff_factor: 2.0,
            max_attempts: 5,
        }
    }
}

impl ReconnectConfig {
    /// Calculates the delay for a given attempt number (1-based),
    /// with ±25% jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        let jitter = capped * 0.25;
        let offset = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as f64
            / u32::MAX as f64)
            * 2.0
            - 1.0; // [-1.0, 1.0)
        let with_jitter = (capped + jitter * offset).max(0.05);
        Duration::from_secs_f64(with_jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_state_equality() {
        assert_eq!(ChannelState::Open, ChannelState::Open);
        assert_ne!(ChannelState::Open, ChannelState::Closed);
        assert_ne!(
            ChannelState::Reconnecting { attempt: 1 },
            ChannelState::Reconnecting { attempt: 2 },
        );
    }

    #[test]
    fn terminal_events() {
        let ready = ChannelEvent::Result(FileReadyPayload {
            filename: "out.csv".into(),
            data: vec![1],
        });
        assert!(ready.is_terminal());
        assert!(ChannelEvent::Error("boom".into()).is_terminal());
        assert!(!ChannelEvent::Progress(50).is_terminal());
        assert!(!ChannelEvent::Disconnected.is_terminal());
        assert!(!ChannelEvent::Exhausted { attempts: 5 }.is_terminal());
    }

    #[test]
    fn command_kind_wire_names() {
        assert_eq!(CommandKind::ProcessCsv.event_type(), EventType::ProcessCsv);
        assert_eq!(CommandKind::UploadFile.event_type(), EventType::UploadFile);
        let kind: CommandKind = serde_json::from_str("\"upload_file\"").unwrap();
        assert_eq!(kind, CommandKind::UploadFile);
    }

    #[test]
    fn reconnect_config_defaults() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_millis(250));
        assert_eq!(config.max_delay, Duration::from_secs(4));
        assert_eq!(config.max_attempts, 5);
    }

    #[test]
    fn reconnect_config_delay_backoff() {
        let config = ReconnectConfig::default();
        // Base delays: 250ms, 500ms, 1s, 2s, 4s (capped), 4s.
        let expected_base = [0.25, 0.5, 1.0, 2.0, 4.0, 4.0];
        for (i, &base) in expected_base.iter().enumerate() {
            let secs = config.delay_for_attempt((i + 1) as u32).as_secs_f64();
            let lo = base * 0.74;
            let hi = base * 1.26;
            assert!(
                secs >= lo && secs <= hi,
                "attempt {}: {secs:.3}s not in [{lo:.3}, {hi:.3}]",
                i + 1
            );
        }
    }

    #[test]
    fn reconnect_config_delay_floor() {
        let config = ReconnectConfig {
            initial_delay: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.delay_for_attempt(1) >= Duration::from_millis(50));
    }
}
