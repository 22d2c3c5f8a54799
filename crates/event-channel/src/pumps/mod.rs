//! Per-connection WebSocket tasks.

pub(crate) mod ping;
pub(crate) mod read;
pub(crate) mod write;
