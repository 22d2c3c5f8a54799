//! Async driver for the job state machine.
//!
//! Runs one job at a time: uploads the file, opens the event channel,
//! feeds push events into [`JobMachine`] and returns the outcome. Every
//! state change happens inside the machine; this module only waits.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use csvflow_event_channel::CommandKind;
use csvflow_protocol::StartCommand;
use csvflow_transfer::{CandidateFile, Endpoint, HttpTransfer, SourceFile};

use crate::adapters::{HttpTransferChannel, WsConnector};
use crate::channels::{EventConnector, TransferChannel, TransferOutcome};
use crate::config::{ClientConfig, ConfigError, ProtocolVariant};
use crate::error::JobError;
use crate::machine::{JobMachine, Submission};
use crate::result::ResultHandler;
use crate::types::{JobEvent, JobOutcome, JobSnapshot, Phase};

/// Capacity of the job event feed.
const EVENT_CAPACITY: usize = 256;

/// Capacity of the upload progress queue.
const PROGRESS_CAPACITY: usize = 128;

/// Aborts the job currently run by a [`JobOrchestrator`].
///
/// Cloneable and usable from any task while `run` is awaited.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    current: Arc<Mutex<Option<CancellationToken>>>,
}

impl AbortHandle {
    /// Requests teardown of the running job. Returns `false` if no job was
    /// running.
    pub fn abort(&self) -> bool {
        if let Ok(guard) = self.current.lock()
            && let Some(token) = guard.as_ref()
        {
            token.cancel();
            return true;
        }
        false
    }

    fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut guard) = self.current.lock() {
            *guard = Some(token.clone());
        }
        token
    }

    fn disarm(&self) {
        if let Ok(mut guard) = self.current.lock() {
            *guard = None;
        }
    }
}

/// Per-job settings taken from [`ClientConfig`].
#[derive(Debug, Clone, Copy)]
struct JobSettings {
    variant: ProtocolVariant,
    command: CommandKind,
    resend_file: bool,
    inactivity_timeout: Duration,
    response_timeout: Duration,
}

/// Disarms the abort handle when `run` ends, and cancels the job if the
/// `run` future was dropped mid-flight.
struct CancelOnDrop<'a> {
    machine: &'a mut JobMachine,
    abort: &'a AbortHandle,
}

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        self.abort.disarm();
        if self.machine.cancel() {
            debug!("job future dropped, torn down");
        }
    }
}

/// Runs CSV processing jobs against one service.
pub struct JobOrchestrator {
    machine: JobMachine,
    transfer: Option<Box<dyn TransferChannel>>,
    connector: Box<dyn EventConnector>,
    settings: JobSettings,
    events_rx: Option<mpsc::Receiver<JobEvent>>,
    abort: AbortHandle,
}

impl JobOrchestrator {
    /// Builds an orchestrator with the HTTP and WebSocket clients described
    /// by `config`.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let transfer = match config.variant {
            ProtocolVariant::EventsOnly => None,
            variant => {
                let endpoint = if variant == ProtocolVariant::RequestResponse {
                    Endpoint::ProcessCsv
                } else {
                    Endpoint::UploadCsv
                };
                let http = HttpTransfer::new(&config.base_url, config.transfer.mode)
                    .map_err(|e| ConfigError::Invalid(e.to_string()))?
                    .with_chunk_size(config.transfer.chunk_size);
                Some(Box::new(HttpTransferChannel::new(http, endpoint)) as Box<dyn TransferChannel>)
            }
        };
        let connector = WsConnector::new(&config.events_url, config.reconnect_config());

        Ok(Self::build(config, transfer, Box::new(connector)))
    }

    /// Builds an orchestrator over caller-supplied channels.
    pub fn with_channels(
        config: &ClientConfig,
        transfer: Box<dyn TransferChannel>,
        connector: Box<dyn EventConnector>,
    ) -> Self {
        Self::build(config, Some(transfer), connector)
    }

    fn build(
        config: &ClientConfig,
        transfer: Option<Box<dyn TransferChannel>>,
        connector: Box<dyn EventConnector>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let results = ResultHandler::new(config.default_result_name.clone());
        Self {
            machine: JobMachine::new(results, config.auto_reset, events_tx),
            transfer,
            connector,
            settings: JobSettings {
                variant: config.variant,
                command: config.events.command,
                resend_file: config.events.resend_file,
                inactivity_timeout: config.inactivity_timeout(),
                response_timeout: config.response_timeout(),
            },
            events_rx: Some(events_rx),
            abort: AbortHandle::default(),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<JobEvent>> {
        self.events_rx.take()
    }

    /// Handle that aborts the running job.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.machine.snapshot()
    }

    pub fn phase(&self) -> &Phase {
        self.machine.phase()
    }

    /// Returns a finished job to `Idle` so the next one can be submitted.
    pub fn acknowledge(&mut self) -> bool {
        self.machine.acknowledge()
    }

    /// Runs one job to completion.
    ///
    /// Returns [`JobOutcome::Rejected`] without side effects if the previous
    /// job is still active or was not acknowledged. Dropping the returned
    /// future tears the job down as `Failed(Cancelled)`.
    pub async fn run(&mut self, candidate: CandidateFile) -> JobOutcome {
        let source = match self.machine.submit(candidate) {
            Submission::Busy => return JobOutcome::Rejected,
            Submission::Invalid(err) => {
                return self.machine.take_outcome().unwrap_or(JobOutcome::Failed(err));
            }
            Submission::Accepted(file) => file,
        };

        let abort = self.abort.arm();
        {
            let mut guard = CancelOnDrop {
                machine: &mut self.machine,
                abort: &self.abort,
            };
            drive(
                &mut *guard.machine,
                self.transfer.as_deref(),
                self.connector.as_ref(),
                self.settings,
                source,
                &abort,
            )
            .await;
        }

        self.machine
            .take_outcome()
            .unwrap_or(JobOutcome::Failed(JobError::Cancelled))
    }
}

/// Moves an accepted job from `Uploading` to a terminal phase.
async fn drive(
    machine: &mut JobMachine,
    transfer: Option<&dyn TransferChannel>,
    connector: &dyn EventConnector,
    settings: JobSettings,
    source: SourceFile,
    abort: &CancellationToken,
) {
    let Some(job) = machine.job() else {
        return;
    };
    let events_only = settings.variant == ProtocolVariant::EventsOnly;

    if !events_only {
        let Some(transfer) = transfer else {
            machine.fail(JobError::Network("no transfer channel configured".into()));
            return;
        };
        match upload(machine, transfer, &source, settings, abort).await {
            Ok(outcome) => machine.on_transfer_complete(outcome),
            Err(e) => {
                machine.fail(e);
                return;
            }
        }
        if machine.phase() != &Phase::AwaitingProcessing {
            return;
        }
    }

    let opened = tokio::select! {
        _ = abort.cancelled() => {
            machine.cancel();
            return;
        }
        opened = connector.open(job) => opened,
    };
    let (channel, mut events) = match opened {
        Ok(opened) => opened,
        Err(e) => {
            machine.fail(JobError::from(e));
            return;
        }
    };

    let (kind, file) = if events_only {
        (CommandKind::UploadFile, Some(source.data().to_vec()))
    } else {
        (
            settings.command,
            settings.resend_file.then(|| source.data().to_vec()),
        )
    };
    let command = StartCommand {
        filename: source.name().to_string(),
        file,
    };
    drop(source);

    if !machine.attach_channel(channel, kind, &command) {
        return;
    }
    if events_only {
        // The file left with the start command.
        machine.on_transfer_complete(TransferOutcome::Acknowledged);
    }

    while machine.phase().is_active() {
        tokio::select! {
            _ = abort.cancelled() => {
                machine.cancel();
            }
            event = events.recv() => match event {
                Some(event) => machine.on_channel_event(event),
                None => machine.on_channel_closed(),
            },
        }
    }
}

/// Runs the transfer, failing it after the inactivity timeout without
/// progress. Once the body is fully sent the response timeout applies
/// instead.
async fn upload(
    machine: &mut JobMachine,
    transfer: &dyn TransferChannel,
    source: &SourceFile,
    settings: JobSettings,
    abort: &CancellationToken,
) -> Result<TransferOutcome, JobError> {
    let (progress_tx, mut progress_rx) = mpsc::channel(PROGRESS_CAPACITY);
    let mut send = transfer.send(source, progress_tx);

    let mut wait = settings.inactivity_timeout;
    let deadline = tokio::time::sleep(wait);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = abort.cancelled() => return Err(JobError::Cancelled),

            () = &mut deadline => {
                warn!(
                    job = ?machine.job(),
                    timeout_secs = wait.as_secs(),
                    sent = machine.snapshot().upload_percent,
                    "transfer inactive, giving up"
                );
                return Err(JobError::Timeout);
            }

            Some(percent) = progress_rx.recv() => {
                if machine.on_upload_progress(percent) >= 100 {
                    wait = settings.response_timeout;
                }
                deadline.as_mut().reset(tokio::time::Instant::now() + wait);
            }

            result = &mut send => return result.map_err(JobError::from),
        }
    }
}
