//! Data types for the job lifecycle.

use std::fmt;

use crate::error::JobError;
use crate::result::Artifact;

/// Identifier of one job, fresh per submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(uuid::Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Major step of a job's lifecycle.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Validating,
    Uploading,
    AwaitingProcessing,
    Receiving,
    Completed,
    Failed(JobError),
}

impl Phase {
    /// Returns `true` while a job is in flight.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Validating | Self::Uploading | Self::AwaitingProcessing | Self::Receiving
        )
    }

    /// Returns `true` for `Completed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::Uploading => "uploading",
            Self::AwaitingProcessing => "awaiting_processing",
            Self::Receiving => "receiving",
            Self::Completed => "completed",
            Self::Failed(_) => "failed",
        }
    }
}

/// Which progress counter an update belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressKind {
    /// Bytes handed to the transport.
    Upload,
    /// Server-side processing, as reported over the event channel.
    Process,
}

/// Event emitted by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// The job moved to a new phase.
    PhaseChanged { job: JobId, phase: Phase },
    /// A progress counter rose.
    Progress {
        job: JobId,
        kind: ProgressKind,
        percent: u8,
    },
    /// The job finished with a result.
    Completed { job: JobId, artifact: Artifact },
    /// The job failed.
    Failed { job: JobId, error: JobError },
}

/// Point-in-time view of the orchestrator.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JobSnapshot {
    pub job: Option<JobId>,
    pub phase: Phase,
    /// Name of the source file while the job holds it.
    pub file: Option<String>,
    pub upload_percent: u8,
    pub process_percent: u8,
}

/// How a call to [`JobOrchestrator::run`](crate::JobOrchestrator::run)
/// ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(Artifact),
    Failed(JobError),
    /// Another job was still active; nothing happened.
    Rejected,
}
