//! Execution step, progress, and result types.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Status of one execution step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of an execution run
///
/// Created and mutated only by the coordinator during a run; snapshots are
/// published on the event stream and the final state is carried on the
/// [`ExecutionResult`].
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionStep {
    pub id: u32,
    pub name: String,
    pub description: String,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Opaque step payload (e.g. a backup identifier)
    pub result: Option<String>,
}

impl ExecutionStep {
    pub fn new(id: u32, name: &str, description: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            description: description.to_string(),
            status: StepStatus::Pending,
            started_at: None,
            finished_at: None,
            error: None,
            result: None,
        }
    }

    pub(crate) fn start(&mut self) {
        self.status = StepStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn complete(&mut self) {
        self.status = StepStatus::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn fail(&mut self, error: String) {
        self.status = StepStatus::Failed;
        self.error = Some(error);
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn skip(&mut self) {
        self.status = StepStatus::Skipped;
    }

    /// Duration between start and finish, when both are recorded
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(finish)) => Some(finish - start),
            _ => None,
        }
    }
}

/// Transient progress snapshot emitted during a run
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionProgress {
    /// 1-based index of the step currently reported
    pub current_step: u32,
    pub total_steps: u32,
    pub step_name: String,
    /// Completed fraction of the run, 0.0 to 100.0
    pub percent: f32,
    pub status: StepStatus,
    /// Estimated remaining time, from the average completed-step duration
    pub eta_seconds: Option<u64>,
}

/// Machine-readable outcome code on an [`ExecutionResult`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunCode {
    /// Remediation scripts executed successfully
    Completed,
    /// Validation found nothing to remediate
    NoActionNeeded,
    /// Remediation is needed but fixes were not requested
    FixesSkipped,
    /// The database could not be reached
    ConnectionFailed,
    /// Script generation failed (cycle or unresolved reference)
    GenerationFailed,
    /// A script failed during execution
    ExecutionFailed,
    /// The run was cancelled cooperatively
    Cancelled,
}

impl RunCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunCode::Completed => "COMPLETED",
            RunCode::NoActionNeeded => "NO_ACTION_NEEDED",
            RunCode::FixesSkipped => "FIXES_SKIPPED",
            RunCode::ConnectionFailed => "CONNECTION_FAILED",
            RunCode::GenerationFailed => "GENERATION_FAILED",
            RunCode::ExecutionFailed => "EXECUTION_FAILED",
            RunCode::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for RunCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final outcome of an execution run
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub run_id: Uuid,
    pub success: bool,
    pub code: RunCode,
    /// Human-readable outcome message
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub steps: Vec<ExecutionStep>,
    pub rollback_executed: bool,
    pub completed_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    /// Top-level error, when the run did not succeed
    pub error: Option<String>,
}

impl ExecutionResult {
    /// Total run duration
    pub fn duration(&self) -> Duration {
        self.finished_at - self.started_at
    }
}

/// Outcome of a dry run over one layer
#[derive(Debug, Clone, Serialize)]
pub struct DryRunResult {
    /// Layer the dry run covered
    pub layer: String,
    /// Number of DDL statements the layer would execute
    pub statement_count: usize,
    /// Tables whose structure would change, in execution order
    pub affected_tables: Vec<String>,
    /// Rough execution estimate from a fixed per-statement cost
    pub estimated_ms: u64,
    pub warnings: Vec<String>,
}
