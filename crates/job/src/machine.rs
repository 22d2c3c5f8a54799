//! Job state machine.
//!
//! `JobMachine` owns every per-job resource (source file, event channel,
//! progress counters) and changes them only inside its transition
//! functions. It never awaits; [`JobOrchestrator`](crate::JobOrchestrator)
//! drives it from transport events.

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use csvflow_event_channel::{ChannelEvent, CommandKind};
use csvflow_protocol::{EventType, StartCommand};
use csvflow_transfer::{CandidateFile, SourceFile, validate_source};

use crate::channels::{EventChannel, TransferOutcome};
use crate::error::JobError;
use crate::progress::MonotonicProgress;
use crate::result::{Artifact, ResultHandler, ResultPayload};
use crate::types::{JobEvent, JobId, JobOutcome, JobSnapshot, Phase, ProgressKind};

/// Result of [`JobMachine::submit`].
#[derive(Debug)]
pub enum Submission {
    /// Validated; the job is now uploading this file.
    Accepted(SourceFile),
    /// Rejected by validation; the job is already `Failed`.
    Invalid(JobError),
    /// Another job is active or not yet acknowledged. Nothing changed.
    Busy,
}

/// State machine for one job at a time.
pub struct JobMachine {
    job: Option<JobId>,
    phase: Phase,
    source: Option<SourceFile>,
    channel: Option<Box<dyn EventChannel>>,
    upload: MonotonicProgress,
    process: MonotonicProgress,
    results: ResultHandler,
    auto_reset: bool,
    events_tx: mpsc::Sender<JobEvent>,
    outcome: Option<JobOutcome>,
}

impl JobMachine {
    /// Creates an idle machine. Events go to `events_tx`; they are dropped
    /// if the receiver lags.
    pub fn new(
        results: ResultHandler,
        auto_reset: bool,
        events_tx: mpsc::Sender<JobEvent>,
    ) -> Self {
        Self {
            job: None,
            phase: Phase::Idle,
            source: None,
            channel: None,
            upload: MonotonicProgress::new(),
            process: MonotonicProgress::new(),
            results,
            auto_reset,
            events_tx,
            outcome: None,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn job(&self) -> Option<JobId> {
        self.job
    }

    /// The file of the active job. `None` once the job ended.
    pub fn source(&self) -> Option<&SourceFile> {
        self.source.as_ref()
    }

    pub fn has_channel(&self) -> bool {
        self.channel.is_some()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job: self.job,
            phase: self.phase.clone(),
            file: self.source.as_ref().map(|f| f.name().to_string()),
            upload_percent: self.upload.get(),
            process_percent: self.process.get(),
        }
    }

    /// Takes the outcome of the last finished job.
    pub fn take_outcome(&mut self) -> Option<JobOutcome> {
        self.outcome.take()
    }

    /// Starts a job for `candidate` if the machine is idle.
    pub fn submit(&mut self, candidate: CandidateFile) -> Submission {
        if self.phase != Phase::Idle {
            debug!(
                phase = self.phase.name(),
                file = %candidate.name,
                "job in progress, submission ignored"
            );
            return Submission::Busy;
        }

        let job = JobId::new();
        self.job = Some(job);
        self.outcome = None;
        self.set_phase(Phase::Validating);

        match validate_source(candidate) {
            Ok(file) => {
                info!(job = %job, file = file.name(), bytes = file.len(), "source accepted");
                self.source = Some(file.clone());
                self.set_phase(Phase::Uploading);
                Submission::Accepted(file)
            }
            Err(e) => {
                let err = JobError::from(e);
                self.fail(err.clone());
                Submission::Invalid(err)
            }
        }
    }

    /// Records an upload percentage. Returns the displayed value.
    pub fn on_upload_progress(&mut self, percent: u8) -> u8 {
        if self.phase == Phase::Uploading && self.upload.observe(percent) {
            trace!(percent = self.upload.get(), "upload progress");
            self.emit_progress(ProgressKind::Upload, self.upload.get());
        }
        self.upload.get()
    }

    /// The transfer finished successfully.
    pub fn on_transfer_complete(&mut self, outcome: TransferOutcome) {
        if self.phase != Phase::Uploading {
            debug!(phase = self.phase.name(), "transfer completion ignored");
            return;
        }
        if self.upload.observe(100) {
            self.emit_progress(ProgressKind::Upload, 100);
        }
        match outcome {
            TransferOutcome::Acknowledged => self.set_phase(Phase::AwaitingProcessing),
            TransferOutcome::Processed(payload) => self.receive(payload),
        }
    }

    /// Hands the job its event channel and sends the start command.
    ///
    /// A channel that arrives when none is wanted (the job ended, or one is
    /// already attached) is closed right away. Returns `true` if the
    /// channel was attached and started.
    pub fn attach_channel(
        &mut self,
        channel: Box<dyn EventChannel>,
        kind: CommandKind,
        command: &StartCommand,
    ) -> bool {
        let wanted = matches!(self.phase, Phase::Uploading | Phase::AwaitingProcessing);
        if !wanted || self.channel.is_some() {
            debug!(phase = self.phase.name(), "event channel not needed, closing");
            channel.close();
            return false;
        }

        let started = channel.start(kind, command);
        self.channel = Some(channel);
        match started {
            Ok(()) => {
                debug!(job = ?self.job, command = ?kind, "start command sent");
                true
            }
            Err(e) => {
                self.fail(JobError::from(e));
                false
            }
        }
    }

    /// Applies one push event.
    pub fn on_channel_event(&mut self, event: ChannelEvent) {
        if !matches!(self.phase, Phase::AwaitingProcessing | Phase::Receiving) {
            debug!(
                phase = self.phase.name(),
                event = event_name(&event),
                "event after job settled, ignoring"
            );
            return;
        }

        match event {
            ChannelEvent::Progress(percent) => {
                if self.process.observe(percent) {
                    debug!(job = ?self.job, percent, "processing progress");
                    self.emit_progress(ProgressKind::Process, percent);
                }
            }
            ChannelEvent::Result(payload) => self.receive(payload.into()),
            ChannelEvent::Error(message) => self.fail(JobError::Server {
                status: None,
                message,
            }),
            ChannelEvent::Malformed {
                event: event @ (EventType::FileReady | EventType::ProcessedFile),
                reason,
            } => {
                // A result whose bytes cannot be decoded.
                self.fail(JobError::Serialization(format!("{event:?} payload: {reason}")))
            }
            ChannelEvent::Malformed { event, reason } => {
                self.fail(JobError::Protocol(format!("malformed {event:?} event: {reason}")))
            }
            ChannelEvent::Disconnected => {
                warn!(job = ?self.job, "event channel dropped, waiting for reconnect");
            }
            ChannelEvent::Reconnected { attempt } => {
                info!(job = ?self.job, attempt, "event channel restored");
            }
            ChannelEvent::Exhausted { attempts } => self.fail(JobError::Network(format!(
                "event channel lost after {attempts} reconnect attempts"
            ))),
        }
    }

    /// The event stream ended.
    pub fn on_channel_closed(&mut self) {
        if self.phase.is_active() {
            self.fail(JobError::Network(
                "event channel closed before a result arrived".into(),
            ));
        }
    }

    /// Forced teardown by the caller. Returns `true` if a job was active.
    pub fn cancel(&mut self) -> bool {
        if !self.phase.is_active() {
            return false;
        }
        info!(job = ?self.job, phase = self.phase.name(), "job cancelled");
        self.fail(JobError::Cancelled);
        true
    }

    /// Ends the active job with `error`.
    ///
    /// Only the first terminal transition counts; later calls are ignored.
    pub fn fail(&mut self, error: JobError) {
        if !self.phase.is_active() {
            debug!(phase = self.phase.name(), %error, "job already settled, ignoring failure");
            return;
        }
        warn!(job = ?self.job, phase = self.phase.name(), %error, "job failed");

        self.teardown();
        self.set_phase(Phase::Failed(error.clone()));
        self.outcome = Some(JobOutcome::Failed(error.clone()));
        if let Some(job) = self.job {
            self.emit(JobEvent::Failed { job, error });
        }
        if self.auto_reset {
            self.reset_to_idle();
        }
    }

    /// Returns a finished job to `Idle`. Returns `false` if no job has
    /// finished.
    pub fn acknowledge(&mut self) -> bool {
        if !self.phase.is_terminal() {
            return false;
        }
        self.reset_to_idle();
        true
    }

    fn receive(&mut self, payload: ResultPayload) {
        self.set_phase(Phase::Receiving);
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        let artifact = self.results.materialize(payload);
        self.complete(artifact);
    }

    fn complete(&mut self, artifact: Artifact) {
        info!(
            job = ?self.job,
            filename = %artifact.filename,
            bytes = artifact.bytes.len(),
            "job completed"
        );

        self.teardown();
        self.set_phase(Phase::Completed);
        self.outcome = Some(JobOutcome::Completed(artifact.clone()));
        if let Some(job) = self.job {
            self.emit(JobEvent::Completed { job, artifact });
        }
        if self.auto_reset {
            self.reset_to_idle();
        }
    }

    fn teardown(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        self.source = None;
        self.upload.reset();
        self.process.reset();
    }

    fn reset_to_idle(&mut self) {
        self.set_phase(Phase::Idle);
        self.job = None;
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase == phase {
            return;
        }
        info!(job = ?self.job, from = self.phase.name(), to = phase.name(), "phase changed");
        self.phase = phase.clone();
        if let Some(job) = self.job {
            self.emit(JobEvent::PhaseChanged { job, phase });
        }
    }

    fn emit_progress(&self, kind: ProgressKind, percent: u8) {
        if let Some(job) = self.job {
            self.emit(JobEvent::Progress { job, kind, percent });
        }
    }

    fn emit(&self, event: JobEvent) {
        if let Err(e) = self.events_tx.try_send(event) {
            trace!("job event dropped: {e}");
        }
    }
}

/// Names an event for logs without dumping result bytes.
fn event_name(event: &ChannelEvent) -> &'static str {
    match event {
        ChannelEvent::Progress(_) => "progress",
        ChannelEvent::Result(_) => "result",
        ChannelEvent::Error(_) => "error",
        ChannelEvent::Malformed { .. } => "malformed",
        ChannelEvent::Disconnected => "disconnected",
        ChannelEvent::Reconnected { .. } => "reconnected",
        ChannelEvent::Exhausted { .. } => "exhausted",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use csvflow_event_channel::ChannelError;
    use csvflow_protocol::messages::FileReadyPayload;

    #[derive(Default)]
    struct MockChannel {
        closes: Arc<AtomicUsize>,
        starts: Arc<Mutex<Vec<(CommandKind, StartCommand)>>>,
        fail_start: bool,
    }

    impl EventChannel for MockChannel {
        fn start(&self, kind: CommandKind, command: &StartCommand) -> Result<(), ChannelError> {
            if self.fail_start {
                return Err(ChannelError::Closed);
            }
            self.starts.lock().unwrap().push((kind, command.clone()));
            Ok(())
        }

        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }

        fn is_closed(&self) -> bool {
            self.closes.load(Ordering::SeqCst) > 0
        }
    }

    fn machine() -> (JobMachine, mpsc::Receiver<JobEvent>) {
        let (tx, rx) = mpsc::channel(256);
        (JobMachine::new(ResultHandler::default(), false, tx), rx)
    }

    fn csv(len: usize) -> CandidateFile {
        CandidateFile::new("data.csv", "text/csv", vec![b'x'; len])
    }

    fn ready(filename: &str, data: &[u8]) -> ChannelEvent {
        ChannelEvent::Result(FileReadyPayload {
            filename: filename.into(),
            data: data.to_vec(),
        })
    }

    /// Drives a fresh machine to `AwaitingProcessing` with a mock channel
    /// attached, returning the channel's close counter.
    fn awaiting(m: &mut JobMachine) -> Arc<AtomicUsize> {
        assert!(matches!(m.submit(csv(1000)), Submission::Accepted(_)));
        m.on_transfer_complete(TransferOutcome::Acknowledged);
        let channel = MockChannel::default();
        let closes = channel.closes.clone();
        assert!(m.attach_channel(
            Box::new(channel),
            CommandKind::ProcessCsv,
            &StartCommand::default()
        ));
        assert_eq!(m.phase(), &Phase::AwaitingProcessing);
        closes
    }

    fn drain(rx: &mut mpsc::Receiver<JobEvent>) -> Vec<JobEvent> {
        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        events
    }

    #[test]
    fn submit_valid_file_starts_upload() {
        let (mut m, mut rx) = machine();
        let Submission::Accepted(file) = m.submit(csv(10)) else {
            panic!("expected acceptance");
        };
        assert_eq!(file.len(), 10);
        assert_eq!(m.phase(), &Phase::Uploading);
        assert!(m.source().is_some());

        let phases: Vec<Phase> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                JobEvent::PhaseChanged { phase, .. } => Some(phase),
                _ => None,
            })
            .collect();
        assert_eq!(phases, vec![Phase::Validating, Phase::Uploading]);
    }

    #[test]
    fn submit_non_csv_fails_without_channel() {
        let (mut m, _rx) = machine();
        let candidate = CandidateFile::new("notes.txt", "text/plain", b"hi".to_vec());
        let Submission::Invalid(err) = m.submit(candidate) else {
            panic!("expected rejection");
        };
        assert!(matches!(err, JobError::Validation(_)));
        assert!(matches!(m.phase(), Phase::Failed(JobError::Validation(_))));
        assert!(!m.has_channel());
        assert!(m.source().is_none());
    }

    #[test]
    fn submit_while_active_is_ignored() {
        let (mut m, mut rx) = machine();
        m.submit(csv(10));
        let job = m.job();
        drain(&mut rx);

        assert!(matches!(m.submit(csv(20)), Submission::Busy));
        assert_eq!(m.phase(), &Phase::Uploading);
        assert_eq!(m.job(), job);
        assert_eq!(m.source().map(SourceFile::len), Some(10));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn submit_before_acknowledge_is_ignored() {
        let (mut m, _rx) = machine();
        m.submit(CandidateFile::new("a.txt", "text/plain", Vec::new()));
        assert!(matches!(m.submit(csv(1)), Submission::Busy));
        assert!(m.acknowledge());
        assert_eq!(m.phase(), &Phase::Idle);
        assert!(matches!(m.submit(csv(1)), Submission::Accepted(_)));
    }

    #[test]
    fn upload_progress_is_monotonic() {
        let (mut m, _rx) = machine();
        m.submit(csv(10));
        let shown: Vec<u8> = [5, 30, 20, 30, 60]
            .into_iter()
            .map(|p| m.on_upload_progress(p))
            .collect();
        assert_eq!(shown, vec![5, 30, 30, 30, 60]);
    }

    #[test]
    fn upload_progress_ignored_outside_upload() {
        let (mut m, _rx) = machine();
        assert_eq!(m.on_upload_progress(50), 0);
    }

    #[test]
    fn two_phase_flow_completes() {
        let (mut m, mut rx) = machine();
        let closes = awaiting(&mut m);
        assert_eq!(m.snapshot().upload_percent, 100);

        let mut shown = Vec::new();
        for p in [10, 40, 40, 90] {
            m.on_channel_event(ChannelEvent::Progress(p));
            shown.push(m.snapshot().process_percent);
        }
        assert_eq!(shown, vec![10, 40, 40, 90]);

        m.on_channel_event(ready("out.csv", b"a,b\n1,2\n"));
        assert_eq!(m.phase(), &Phase::Completed);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(m.source().is_none());
        assert!(!m.has_channel());
        assert_eq!(m.snapshot().process_percent, 0);
        assert_eq!(m.snapshot().upload_percent, 0);

        let Some(JobOutcome::Completed(artifact)) = m.take_outcome() else {
            panic!("expected artifact");
        };
        assert_eq!(artifact.filename, "out.csv");
        assert_eq!(artifact.bytes, b"a,b\n1,2\n");

        let process_ticks: Vec<u8> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                JobEvent::Progress {
                    kind: ProgressKind::Process,
                    percent,
                    ..
                } => Some(percent),
                _ => None,
            })
            .collect();
        assert_eq!(process_ticks, vec![10, 40, 90]);
    }

    #[test]
    fn request_response_completes_without_channel() {
        let (mut m, _rx) = machine();
        m.submit(csv(10));
        m.on_transfer_complete(TransferOutcome::Processed(ResultPayload {
            filename: String::new(),
            bytes: b"x;y\n".to_vec(),
        }));
        assert_eq!(m.phase(), &Phase::Completed);
        let Some(JobOutcome::Completed(artifact)) = m.take_outcome() else {
            panic!("expected artifact");
        };
        assert_eq!(artifact.filename, "processed.csv");
    }

    #[test]
    fn error_event_fails_and_closes_once() {
        let (mut m, _rx) = machine();
        let closes = awaiting(&mut m);

        m.on_channel_event(ChannelEvent::Error("bad header".into()));
        let Phase::Failed(err) = m.phase().clone() else {
            panic!("expected failure");
        };
        assert_eq!(err.to_string(), "bad header");
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        // Later terminal events change nothing.
        m.on_channel_event(ready("out.csv", b"a"));
        m.on_channel_event(ChannelEvent::Error("again".into()));
        assert!(matches!(m.phase(), Phase::Failed(JobError::Server { .. })));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn first_terminal_event_wins() {
        let (mut m, _rx) = machine();
        let closes = awaiting(&mut m);
        m.on_channel_event(ready("out.csv", b"a"));
        m.on_channel_event(ChannelEvent::Error("late".into()));
        assert_eq!(m.phase(), &Phase::Completed);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_while_awaiting() {
        let (mut m, _rx) = machine();
        let closes = awaiting(&mut m);
        m.on_channel_event(ChannelEvent::Progress(30));

        assert!(m.cancel());
        assert_eq!(m.phase(), &Phase::Failed(JobError::Cancelled));
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        m.on_channel_event(ChannelEvent::Progress(80));
        assert_eq!(m.snapshot().process_percent, 0);
        assert!(!m.cancel());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disconnect_alone_does_not_fail() {
        let (mut m, _rx) = machine();
        awaiting(&mut m);
        m.on_channel_event(ChannelEvent::Disconnected);
        m.on_channel_event(ChannelEvent::Reconnected { attempt: 2 });
        assert_eq!(m.phase(), &Phase::AwaitingProcessing);
    }

    #[test]
    fn exhausted_reconnects_fail_with_network() {
        let (mut m, _rx) = machine();
        awaiting(&mut m);
        m.on_channel_event(ChannelEvent::Disconnected);
        m.on_channel_event(ChannelEvent::Exhausted { attempts: 5 });
        assert!(matches!(m.phase(), Phase::Failed(JobError::Network(_))));
    }

    #[test]
    fn malformed_event_fails_with_protocol() {
        let (mut m, _rx) = machine();
        awaiting(&mut m);
        m.on_channel_event(ChannelEvent::Malformed {
            event: EventType::Progress,
            reason: "invalid type: string \"ten\"".into(),
        });
        assert!(matches!(m.phase(), Phase::Failed(JobError::Protocol(_))));
    }

    #[test]
    fn stream_end_without_result_fails() {
        let (mut m, _rx) = machine();
        awaiting(&mut m);
        m.on_channel_closed();
        assert!(matches!(m.phase(), Phase::Failed(JobError::Network(_))));
    }

    #[test]
    fn undecodable_result_fails_with_serialization() {
        let (mut m, _rx) = machine();
        let closes = awaiting(&mut m);
        m.on_channel_event(ChannelEvent::Malformed {
            event: EventType::FileReady,
            reason: "missing field `data`".into(),
        });
        assert!(matches!(m.phase(), Phase::Failed(JobError::Serialization(_))));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn non_utf8_result_completes_unchanged() {
        let (mut m, _rx) = machine();
        let closes = awaiting(&mut m);
        // "Оценка;1" in Windows-1251.
        let bytes = [0xCE, 0xF6, 0xE5, 0xED, 0xEA, 0xE0, b';', b'1', b'\n'];
        m.on_channel_event(ready("scores.csv", &bytes));

        assert_eq!(m.phase(), &Phase::Completed);
        let Some(JobOutcome::Completed(artifact)) = m.take_outcome() else {
            panic!("expected completion");
        };
        assert_eq!(artifact.bytes, bytes);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_start_fails_job() {
        let (mut m, _rx) = machine();
        m.submit(csv(10));
        m.on_transfer_complete(TransferOutcome::Acknowledged);
        let channel = MockChannel {
            fail_start: true,
            ..Default::default()
        };
        let closes = channel.closes.clone();
        assert!(!m.attach_channel(
            Box::new(channel),
            CommandKind::ProcessCsv,
            &StartCommand::default()
        ));
        assert!(matches!(m.phase(), Phase::Failed(JobError::Network(_))));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn late_channel_is_closed_immediately() {
        let (mut m, _rx) = machine();
        m.submit(csv(10));
        m.cancel();

        let channel = MockChannel::default();
        let closes = channel.closes.clone();
        let starts = channel.starts.clone();
        assert!(!m.attach_channel(
            Box::new(channel),
            CommandKind::ProcessCsv,
            &StartCommand::default()
        ));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(starts.lock().unwrap().is_empty());
    }

    #[test]
    fn second_channel_is_refused() {
        let (mut m, _rx) = machine();
        let first = awaiting(&mut m);

        let extra = MockChannel::default();
        let extra_closes = extra.closes.clone();
        assert!(!m.attach_channel(
            Box::new(extra),
            CommandKind::ProcessCsv,
            &StartCommand::default()
        ));
        assert_eq!(extra_closes.load(Ordering::SeqCst), 1);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert!(m.has_channel());
    }

    #[test]
    fn auto_reset_returns_to_idle() {
        let (tx, mut rx) = mpsc::channel(256);
        let mut m = JobMachine::new(ResultHandler::default(), true, tx);
        m.submit(CandidateFile::new("a.txt", "text/plain", Vec::new()));

        assert_eq!(m.phase(), &Phase::Idle);
        assert!(m.job().is_none());
        assert!(matches!(m.take_outcome(), Some(JobOutcome::Failed(_))));

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(e, JobEvent::Failed { .. })));
        assert!(matches!(
            events.last(),
            Some(JobEvent::PhaseChanged {
                phase: Phase::Idle,
                ..
            })
        ));
        assert!(matches!(m.submit(csv(1)), Submission::Accepted(_)));
    }
}
