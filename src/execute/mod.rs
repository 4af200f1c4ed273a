//! Execution coordination.
//!
//! The [`ExecutionCoordinator`] orchestrates the full workflow: validate,
//! decide whether remediation is needed, optionally back up, execute the
//! generated scripts in dependency order, publish progress and step
//! events, and produce a final [`ExecutionResult`]. It owns cooperative
//! cancellation and rollback-on-failure.
//!
//! A coordinator instance runs at most one workflow at a time. The run
//! guard is an explicit, inspectable piece of state acquired atomically at
//! start; a concurrent start fails fast with
//! [`ExecuteError::AlreadyRunning`] instead of interleaving.

pub mod events;
pub mod step;

pub use events::{EngineEvent, EventBus, RunPhase};
pub use step::{
    DryRunResult, ExecutionProgress, ExecutionResult, ExecutionStep, RunCode, StepStatus,
};

use chrono::Utc;
use crossbeam_channel::Receiver;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

use crate::catalog::{EntityKind, SchemaCatalog};
use crate::executor::GuardError;
use crate::generate::{batch_fingerprint, sql, GenerateError, ScriptGenerator, SqlScript};
use crate::introspect::SchemaBackend;
use crate::ledger;
use crate::validate::{ValidationReport, Validator};

/// Coordinator-level errors
///
/// Pipeline-phase failures (connection, generation, script execution) are
/// reported inside the [`ExecutionResult`] with a machine-readable
/// [`RunCode`]; this error type covers the cases where no result exists.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// Another run is in progress on this coordinator instance
    #[error("a run is already in progress on this coordinator")]
    AlreadyRunning,
    /// The database could not be reached
    #[error(transparent)]
    Validation(#[from] GuardError),
    /// Script generation failed
    #[error(transparent)]
    Generation(#[from] GenerateError),
}

/// Options for a setup or layer run
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Execute remediation scripts; when false, a run that finds gaps
    /// returns a partial-success result without touching the database
    pub auto_fix: bool,
    /// Invoke the backup hook before executing any DDL
    pub create_backup: bool,
    /// Roll back completed scripts, in reverse order, on failure or
    /// cancellation
    pub enable_rollback: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            auto_fix: true,
            create_backup: false,
            enable_rollback: true,
        }
    }
}

/// A named subset of scripts executable on its own
///
/// Layers group scripts by entity kind, which is how staged callers walk
/// the setup: tables first, then indexes, policies, and functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupLayer {
    Tables,
    Indexes,
    Policies,
    Functions,
}

impl SetupLayer {
    pub fn kind(&self) -> EntityKind {
        match self {
            SetupLayer::Tables => EntityKind::Table,
            SetupLayer::Indexes => EntityKind::Index,
            SetupLayer::Policies => EntityKind::Policy,
            SetupLayer::Functions => EntityKind::Function,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SetupLayer::Tables => "tables",
            SetupLayer::Indexes => "indexes",
            SetupLayer::Policies => "policies",
            SetupLayer::Functions => "functions",
        }
    }
}

impl fmt::Display for SetupLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SetupLayer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tables" => Ok(SetupLayer::Tables),
            "indexes" => Ok(SetupLayer::Indexes),
            "policies" => Ok(SetupLayer::Policies),
            "functions" => Ok(SetupLayer::Functions),
            other => Err(format!(
                "unknown layer '{other}' (expected tables, indexes, policies, or functions)"
            )),
        }
    }
}

/// Hook invoked before irreversible changes when a backup is requested
///
/// The returned identifier is recorded on the backup step but not
/// interpreted further.
pub trait BackupHook {
    /// Create a backup and return its name or identifier
    ///
    /// # Errors
    ///
    /// Returns `GuardError` when the backup could not be created; the run
    /// aborts before any DDL in that case.
    fn create_backup(&self) -> Result<String, GuardError>;
}

/// Handle for requesting cooperative cancellation of a run
///
/// The signal is consulted immediately before each queued script starts; a
/// script that is already executing runs to completion.
#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Request cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Releases the run flag when the run ends, however it ends
struct RunGuard<'c> {
    running: &'c AtomicBool,
    phase: &'c Mutex<RunPhase>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut phase) = self.phase.lock() {
            *phase = RunPhase::Idle;
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Orchestrates validation, generation, and script execution
pub struct ExecutionCoordinator<'a> {
    catalog: &'a SchemaCatalog,
    backend: &'a dyn SchemaBackend,
    backup_hook: Option<Box<dyn BackupHook + 'a>>,
    running: AtomicBool,
    cancel: Arc<AtomicBool>,
    phase: Mutex<RunPhase>,
    events: EventBus,
}

impl<'a> ExecutionCoordinator<'a> {
    pub fn new(catalog: &'a SchemaCatalog, backend: &'a dyn SchemaBackend) -> Self {
        Self {
            catalog,
            backend,
            backup_hook: None,
            running: AtomicBool::new(false),
            cancel: Arc::new(AtomicBool::new(false)),
            phase: Mutex::new(RunPhase::Idle),
            events: EventBus::new(),
        }
    }

    /// Attach a backup hook, invoked when a run requests `create_backup`
    #[must_use]
    pub fn with_backup_hook(mut self, hook: Box<dyn BackupHook + 'a>) -> Self {
        self.backup_hook = Some(hook);
        self
    }

    /// Subscribe to the event stream
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Whether a run is currently in progress on this instance
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current run phase
    pub fn phase(&self) -> RunPhase {
        self.phase
            .lock()
            .map(|p| *p)
            .unwrap_or(RunPhase::Idle)
    }

    /// Request cooperative cancellation of the current run
    pub fn cancel(&self) {
        log::info!("cancellation requested");
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// A cloneable handle for requesting cancellation from elsewhere
    pub fn cancel_token(&self) -> CancelToken {
        CancelToken {
            flag: Arc::clone(&self.cancel),
        }
    }

    /// Run only the validator; no side effects
    ///
    /// # Errors
    ///
    /// Returns `GuardError` when the database cannot be reached.
    pub fn validate_only(&self) -> Result<ValidationReport, GuardError> {
        Validator::new(self.catalog, self.backend).validate()
    }

    /// Run the full pipeline: validate, generate, back up, execute
    ///
    /// Returns a success no-op result when validation shows nothing to
    /// remediate, and a partial-success result when remediation is needed
    /// but `auto_fix` is disabled.
    ///
    /// # Errors
    ///
    /// Returns [`ExecuteError::AlreadyRunning`] when invoked while another
    /// run is in progress on this instance. Pipeline failures are reported
    /// inside the returned result, never as raw driver errors.
    pub fn run_full_setup(&self, options: RunOptions) -> Result<ExecutionResult, ExecuteError> {
        let _guard = self.acquire_run_guard()?;
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        log::info!("starting full setup run {run_id}");

        self.set_phase(RunPhase::Validating);
        let report = match self.validate_only() {
            Ok(report) => report,
            Err(e) => {
                return Ok(self.finish_failed(
                    run_id,
                    started_at,
                    Vec::new(),
                    RunCode::ConnectionFailed,
                    format!("validation aborted: {e}"),
                    false,
                ));
            }
        };

        if !report.remediation_needed() {
            return Ok(self.finish_noop(
                run_id,
                started_at,
                RunCode::NoActionNeeded,
                format!(
                    "schema already satisfies the catalog (score {}/100)",
                    report.summary.overall_score
                ),
            ));
        }

        if !options.auto_fix {
            return Ok(self.finish_noop(
                run_id,
                started_at,
                RunCode::FixesSkipped,
                "remediation is needed but automatic fixes are disabled".to_string(),
            ));
        }

        self.set_phase(RunPhase::Generating);
        let scripts = match ScriptGenerator::new(self.catalog).generate(&report) {
            Ok(scripts) => scripts,
            Err(e) => {
                return Ok(self.finish_failed(
                    run_id,
                    started_at,
                    Vec::new(),
                    RunCode::GenerationFailed,
                    format!("script generation failed: {e}"),
                    false,
                ));
            }
        };

        if scripts.is_empty() {
            return Ok(self.finish_noop(
                run_id,
                started_at,
                RunCode::NoActionNeeded,
                "no remediation scripts could be derived".to_string(),
            ));
        }

        Ok(self.execute_scripts(run_id, started_at, &scripts, &options))
    }

    /// Execute the scripts of one layer, keeping their global order
    ///
    /// # Errors
    ///
    /// Returns [`ExecuteError::AlreadyRunning`] when invoked while another
    /// run is in progress on this instance.
    pub fn execute_layer(
        &self,
        layer: SetupLayer,
        options: RunOptions,
    ) -> Result<ExecutionResult, ExecuteError> {
        let _guard = self.acquire_run_guard()?;
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        log::info!("starting layer run {run_id} for '{layer}'");

        self.set_phase(RunPhase::Validating);
        let report = match self.validate_only() {
            Ok(report) => report,
            Err(e) => {
                return Ok(self.finish_failed(
                    run_id,
                    started_at,
                    Vec::new(),
                    RunCode::ConnectionFailed,
                    format!("validation aborted: {e}"),
                    false,
                ));
            }
        };

        self.set_phase(RunPhase::Generating);
        let scripts = match ScriptGenerator::new(self.catalog).generate(&report) {
            Ok(scripts) => scripts,
            Err(e) => {
                return Ok(self.finish_failed(
                    run_id,
                    started_at,
                    Vec::new(),
                    RunCode::GenerationFailed,
                    format!("script generation failed: {e}"),
                    false,
                ));
            }
        };

        let subset: Vec<SqlScript> = scripts
            .into_iter()
            .filter(|s| s.kind == layer.kind())
            .collect();

        if subset.is_empty() {
            return Ok(self.finish_noop(
                run_id,
                started_at,
                RunCode::NoActionNeeded,
                format!("layer '{layer}' needs no remediation"),
            ));
        }

        Ok(self.execute_scripts(run_id, started_at, &subset, &options))
    }

    /// Compute what a layer would do without executing any DDL
    ///
    /// # Errors
    ///
    /// Returns [`ExecuteError`] when validation or generation fails.
    pub fn dry_run(&self, layer: SetupLayer) -> Result<DryRunResult, ExecuteError> {
        let report = self.validate_only()?;
        let scripts = ScriptGenerator::new(self.catalog).generate(&report)?;

        // Tables that get a script this run; a layer-subset dependency on
        // one of them is unsatisfied unless that script is in the subset.
        let tables_with_scripts: Vec<&str> = scripts
            .iter()
            .filter(|s| s.kind == EntityKind::Table)
            .filter_map(|s| s.target_table.as_deref())
            .collect();

        let subset: Vec<&SqlScript> = scripts
            .iter()
            .filter(|s| s.kind == layer.kind())
            .collect();

        let statement_count = subset
            .iter()
            .map(|s| sql::count_statements(&s.forward_sql))
            .sum::<usize>();

        let mut affected_tables: Vec<String> = Vec::new();
        for script in &subset {
            if let Some(ref table) = script.target_table {
                if !affected_tables.contains(table) {
                    affected_tables.push(table.clone());
                }
            }
        }

        let mut warnings = Vec::new();
        for script in &subset {
            if !script.reversible {
                warnings.push(format!("script '{}' is not reversible", script.name));
            }
            if script.kind == EntityKind::Table && script.name.starts_with("alter_table_") {
                warnings.push(format!(
                    "rollback for '{}' drops columns and would discard their data if replayed outside this run",
                    script.name
                ));
            }
            for dep in &script.dependencies {
                let dep_needs_script = tables_with_scripts.contains(&dep.as_str());
                let dep_in_subset = subset.iter().any(|s| {
                    s.kind == EntityKind::Table && s.target_table.as_deref() == Some(dep.as_str())
                });
                if dep_needs_script && !dep_in_subset {
                    warnings.push(format!(
                        "script '{}' depends on table '{dep}', which does not exist yet and is outside this layer",
                        script.name
                    ));
                }
            }
        }

        // Fixed per-statement estimate; DDL cost is dominated by round
        // trips, not statement complexity.
        const ESTIMATED_MS_PER_STATEMENT: u64 = 250;

        Ok(DryRunResult {
            layer: layer.to_string(),
            statement_count,
            affected_tables,
            estimated_ms: statement_count as u64 * ESTIMATED_MS_PER_STATEMENT,
            warnings,
        })
    }

    fn acquire_run_guard(&self) -> Result<RunGuard<'_>, ExecuteError> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| ExecuteError::AlreadyRunning)?;
        // A fresh run starts with a clear cancellation signal.
        self.cancel.store(false, Ordering::SeqCst);
        Ok(RunGuard {
            running: &self.running,
            phase: &self.phase,
        })
    }

    fn set_phase(&self, phase: RunPhase) {
        if let Ok(mut current) = self.phase.lock() {
            *current = phase;
        }
        self.events.publish(EngineEvent::PhaseChanged {
            phase,
            at: Utc::now(),
        });
    }

    fn emit_step(&self, step: &ExecutionStep) {
        self.events
            .publish(EngineEvent::StepChanged { step: step.clone() });
    }

    fn emit_progress(
        &self,
        completed: usize,
        total: usize,
        step_name: &str,
        status: StepStatus,
        durations_ms: &[u64],
    ) {
        let eta_seconds = if durations_ms.is_empty() || completed >= total {
            None
        } else {
            let avg = durations_ms.iter().sum::<u64>() / durations_ms.len() as u64;
            Some(avg * (total - completed) as u64 / 1000)
        };
        self.events.publish(EngineEvent::Progress {
            progress: ExecutionProgress {
                current_step: completed.min(total) as u32 + u32::from(completed < total),
                total_steps: total as u32,
                step_name: step_name.to_string(),
                percent: if total == 0 {
                    100.0
                } else {
                    completed as f32 / total as f32 * 100.0
                },
                status,
                eta_seconds,
            },
        });
    }

    /// Execute a script queue sequentially, with cancellation checks
    /// between scripts and rollback on failure or cancellation
    fn execute_scripts(
        &self,
        run_id: Uuid,
        started_at: chrono::DateTime<Utc>,
        scripts: &[SqlScript],
        options: &RunOptions,
    ) -> ExecutionResult {
        let mut steps: Vec<ExecutionStep> = Vec::new();
        let mut step_id = 1u32;

        if options.create_backup {
            self.set_phase(RunPhase::BackingUp);
            let mut step = ExecutionStep::new(
                step_id,
                "backup",
                "Create a backup before applying changes",
            );
            step_id += 1;
            match &self.backup_hook {
                Some(hook) => {
                    step.start();
                    self.emit_step(&step);
                    match hook.create_backup() {
                        Ok(identifier) => {
                            step.result = Some(identifier);
                            step.complete();
                            self.emit_step(&step);
                            steps.push(step);
                        }
                        Err(e) => {
                            step.fail(format!("backup failed: {e}"));
                            self.emit_step(&step);
                            steps.push(step);
                            return self.finalize(
                                run_id,
                                started_at,
                                steps,
                                RunCode::ExecutionFailed,
                                Some("backup failed; no changes were applied".to_string()),
                                false,
                            );
                        }
                    }
                }
                None => {
                    log::warn!("backup requested but no backup hook is configured");
                    step.result = Some("no backup hook configured".to_string());
                    step.skip();
                    self.emit_step(&step);
                    steps.push(step);
                }
            }
        }

        self.set_phase(RunPhase::Executing);
        log::info!(
            "executing {} scripts (batch {})",
            scripts.len(),
            batch_fingerprint(scripts)
        );

        let total = scripts.len();
        let mut completed_scripts: Vec<(&SqlScript, u64)> = Vec::new();
        let mut durations_ms: Vec<u64> = Vec::new();
        let mut failure: Option<String> = None;
        let mut cancelled = false;

        for (i, script) in scripts.iter().enumerate() {
            // The cancellation signal is consulted before each script; a
            // script that already started runs to completion.
            if self.cancel.load(Ordering::SeqCst) {
                cancelled = true;
                log::warn!(
                    "cancellation observed before script '{}'; skipping the remaining {}",
                    script.name,
                    total - i
                );
                for remaining in &scripts[i..] {
                    let mut step =
                        ExecutionStep::new(step_id, &remaining.name, &remaining.description);
                    step_id += 1;
                    step.skip();
                    self.emit_step(&step);
                    steps.push(step);
                }
                break;
            }

            let mut step = ExecutionStep::new(step_id, &script.name, &script.description);
            step_id += 1;
            step.start();
            self.emit_step(&step);
            self.emit_progress(i, total, &script.name, StepStatus::Running, &durations_ms);

            let sql_start = Instant::now();
            match self.backend.execute(&script.forward_sql) {
                Ok(_) => {
                    let elapsed_ms = sql_start.elapsed().as_millis() as u64;
                    durations_ms.push(elapsed_ms);
                    step.complete();
                    self.emit_step(&step);
                    self.emit_progress(
                        i + 1,
                        total,
                        &script.name,
                        StepStatus::Completed,
                        &durations_ms,
                    );
                    steps.push(step);
                    completed_scripts.push((script, elapsed_ms));
                }
                Err(e) => {
                    log::error!("script '{}' failed: {e}", script.name);
                    step.fail(e.to_string());
                    self.emit_step(&step);
                    steps.push(step);
                    failure = Some(format!("script '{}' failed: {e}", script.name));
                    for remaining in &scripts[i + 1..] {
                        let mut skipped =
                            ExecutionStep::new(step_id, &remaining.name, &remaining.description);
                        step_id += 1;
                        skipped.skip();
                        self.emit_step(&skipped);
                        steps.push(skipped);
                    }
                    break;
                }
            }
        }

        let mut rollback_executed = false;
        if (failure.is_some() || cancelled)
            && options.enable_rollback
            && !completed_scripts.is_empty()
        {
            self.set_phase(RunPhase::RollingBack);
            rollback_executed = true;
            log::warn!(
                "rolling back {} completed scripts in reverse order",
                completed_scripts.len()
            );
            for (script, _) in completed_scripts.iter().rev() {
                match &script.rollback_sql {
                    Some(rollback) => {
                        // Rollback failures are logged, never re-thrown:
                        // the original error must stay visible.
                        if let Err(e) = self.backend.execute(rollback) {
                            log::error!("rollback of '{}' failed: {e}", script.name);
                        }
                    }
                    None => {
                        log::warn!(
                            "script '{}' is not reversible; leaving its changes in place",
                            script.name
                        );
                    }
                }
            }
        }

        if failure.is_none() && !cancelled && !completed_scripts.is_empty() {
            if let Err(e) = self.append_ledger(&completed_scripts) {
                // The run itself succeeded and every script is idempotent;
                // a missing ledger row only costs a re-validation next run.
                log::warn!("failed to record migration ledger entries: {e}");
            }
        }

        let (code, error) = if let Some(err) = failure {
            (RunCode::ExecutionFailed, Some(err))
        } else if cancelled {
            (RunCode::Cancelled, None)
        } else {
            (RunCode::Completed, None)
        };

        self.finalize(run_id, started_at, steps, code, error, rollback_executed)
    }

    fn append_ledger(&self, completed: &[(&SqlScript, u64)]) -> Result<(), GuardError> {
        ledger::initialize_ledger(self.backend)?;
        for (script, elapsed_ms) in completed {
            ledger::record_applied(self.backend, &script.name, *elapsed_ms as i64)?;
        }
        Ok(())
    }

    fn finish_noop(
        &self,
        run_id: Uuid,
        started_at: chrono::DateTime<Utc>,
        code: RunCode,
        message: String,
    ) -> ExecutionResult {
        self.set_phase(RunPhase::Completed);
        self.events.publish(EngineEvent::Finished {
            code,
            at: Utc::now(),
        });
        log::info!("run {run_id} finished: {code} ({message})");
        ExecutionResult {
            run_id,
            success: true,
            code,
            message,
            started_at,
            finished_at: Utc::now(),
            steps: Vec::new(),
            rollback_executed: false,
            completed_count: 0,
            failed_count: 0,
            skipped_count: 0,
            error: None,
        }
    }

    fn finish_failed(
        &self,
        run_id: Uuid,
        started_at: chrono::DateTime<Utc>,
        steps: Vec<ExecutionStep>,
        code: RunCode,
        error: String,
        rollback_executed: bool,
    ) -> ExecutionResult {
        self.finalize(run_id, started_at, steps, code, Some(error), rollback_executed)
    }

    fn finalize(
        &self,
        run_id: Uuid,
        started_at: chrono::DateTime<Utc>,
        steps: Vec<ExecutionStep>,
        code: RunCode,
        error: Option<String>,
        rollback_executed: bool,
    ) -> ExecutionResult {
        let completed_count = steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count();
        let failed_count = steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .count();
        let skipped_count = steps
            .iter()
            .filter(|s| s.status == StepStatus::Skipped)
            .count();

        // Cancellation is not a failure: success reflects whether every
        // step that actually ran completed.
        let success = failed_count == 0 && error.is_none();

        let message = match code {
            RunCode::Completed => format!("applied {completed_count} scripts"),
            RunCode::Cancelled => format!(
                "run cancelled: {completed_count} completed, {skipped_count} skipped{}",
                if rollback_executed {
                    ", completed scripts rolled back"
                } else {
                    ""
                }
            ),
            RunCode::ExecutionFailed => format!(
                "run failed after {completed_count} completed scripts{}",
                if rollback_executed {
                    ", completed scripts rolled back"
                } else {
                    ""
                }
            ),
            other => other.to_string(),
        };

        self.set_phase(if success {
            RunPhase::Completed
        } else {
            RunPhase::Failed
        });
        self.events.publish(EngineEvent::Finished {
            code,
            at: Utc::now(),
        });

        if success {
            log::info!("run {run_id} finished: {code} ({message})");
        } else {
            log::error!(
                "run {run_id} finished: {code} ({})",
                error.as_deref().unwrap_or(&message)
            );
        }

        ExecutionResult {
            run_id,
            success,
            code,
            message,
            started_at,
            finished_at: Utc::now(),
            steps,
            rollback_executed,
            completed_count,
            failed_count,
            skipped_count,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::{
        AppliedMigration, LiveColumn, LiveConstraint, LiveIndex, LivePolicy,
    };

    struct NullBackend;

    impl SchemaBackend for NullBackend {
        fn ping(&self) -> Result<(), GuardError> {
            Ok(())
        }
        fn table_exists(&self, _table: &str) -> Result<bool, GuardError> {
            Ok(false)
        }
        fn table_columns(&self, _table: &str) -> Result<Vec<LiveColumn>, GuardError> {
            Ok(Vec::new())
        }
        fn table_constraints(&self, _table: &str) -> Result<Vec<LiveConstraint>, GuardError> {
            Ok(Vec::new())
        }
        fn table_policies(&self, _table: &str) -> Result<Vec<LivePolicy>, GuardError> {
            Ok(Vec::new())
        }
        fn find_index(&self, _name: &str) -> Result<Option<LiveIndex>, GuardError> {
            Ok(None)
        }
        fn find_function(
            &self,
            _name: &str,
        ) -> Result<Option<crate::introspect::LiveFunction>, GuardError> {
            Ok(None)
        }
        fn applied_migrations(&self) -> Result<Vec<AppliedMigration>, GuardError> {
            Ok(Vec::new())
        }
        fn execute(&self, _sql: &str) -> Result<u64, GuardError> {
            Ok(0)
        }
    }

    #[test]
    fn test_run_guard_rejects_concurrent_starts() {
        let catalog = SchemaCatalog::new();
        let backend = NullBackend;
        let coordinator = ExecutionCoordinator::new(&catalog, &backend);

        let guard = coordinator.acquire_run_guard().unwrap();
        assert!(coordinator.is_running());
        assert!(matches!(
            coordinator.run_full_setup(RunOptions::default()),
            Err(ExecuteError::AlreadyRunning)
        ));
        drop(guard);
        assert!(!coordinator.is_running());
        assert_eq!(coordinator.phase(), RunPhase::Idle);
    }

    #[test]
    fn test_cancel_token_shares_the_flag() {
        let catalog = SchemaCatalog::new();
        let backend = NullBackend;
        let coordinator = ExecutionCoordinator::new(&catalog, &backend);

        let token = coordinator.cancel_token();
        assert!(!token.is_cancelled());
        coordinator.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_layer_parsing() {
        assert_eq!("tables".parse::<SetupLayer>().unwrap(), SetupLayer::Tables);
        assert_eq!(
            "Policies".parse::<SetupLayer>().unwrap(),
            SetupLayer::Policies
        );
        assert!("widgets".parse::<SetupLayer>().is_err());
    }
}
