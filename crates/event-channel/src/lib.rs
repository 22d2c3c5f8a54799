//! Push-event channel for processing jobs.
//!
//! Provides a WebSocket client that sends the one job-start command and
//! turns the service's push frames into a typed [`ChannelEvent`] stream,
//! reconnecting within a bounded retry budget when the connection drops.

mod pumps;
mod reconnection;
pub mod types;
pub mod ws_client;

pub use types::{ChannelEvent, ChannelState, CommandKind, ReconnectConfig};
pub use ws_client::{ChannelError, EventClient};
