//! CSV processing job lifecycle.
//!
//! This crate holds the **business logic** of a processing job. It owns
//! no transport of its own: the HTTP transfer and the push-event channel
//! are reached through the [`TransferChannel`] and [`EventConnector`]
//! traits, with adapters for the `csvflow-transfer` and
//! `csvflow-event-channel` clients.
//!
//! # Lifecycle
//!
//! 1. **Validate** the declared content type
//! 2. **Upload** the file, tracking byte-level progress
//! 3. **Await processing** over the event channel
//! 4. **Receive** the result and materialize it as an [`Artifact`]
//!
//! Any failure lands in [`Phase::Failed`] after the same cleanup, and the
//! orchestrator accepts a new submission once the caller acknowledged it.

pub mod adapters;
pub mod channels;
pub mod config;
pub mod error;
pub mod machine;
pub mod orchestrator;
pub mod progress;
pub mod result;
pub mod types;

pub use adapters::{HttpTransferChannel, WsConnector};
pub use channels::{EventChannel, EventConnector, EventStream, TransferChannel, TransferOutcome};
pub use config::{
    ClientConfig, ConfigError, EventsConfig, ProtocolVariant, ReconnectSettings, TransferConfig,
};
pub use error::JobError;
pub use machine::{JobMachine, Submission};
pub use orchestrator::{AbortHandle, JobOrchestrator};
pub use progress::MonotonicProgress;
pub use result::{Artifact, ResultHandler, ResultPayload};
pub use types::{JobEvent, JobId, JobOutcome, JobSnapshot, Phase, ProgressKind};
