// src/executor/mod.rs

//! Transactional plan execution
//!
//! The executor applies a plan stage by stage, sequentially. Every
//! operation follows the same protocol:
//!
//! 1. Emit a `running` progress event (`pending` under dry-run)
//! 2. Dry-run: validate via the registry's `simulate` or the built-in
//!    check, emit `skipped`, continue
//! 3. Real run: journal the before snapshot, dispatch to the kind's
//!    applier, journal the after snapshot and backup path
//! 4. On any error: emit `failed`, undo every recorded mutation in reverse
//!    order, notify the journal, and return with `success = false`
//!
//! Appliers back existing targets up before overwriting, so rollback can
//! always restore the pre-run bytes; files the run created are simply
//! removed. On success the journal is persisted as a replayable setup log.

mod config;
mod content;
mod file;
mod script;

use crate::error::{Error, Result};
use crate::journal::{Artifacts, ChangeJournal, Journal};
use crate::operation::{FileAction, Operation, SetupOperation};
use crate::path::sanitize_component;
use crate::planner::{ExecutionPlan, Stage};
use crate::progress::{ProgressCallback, ProgressEvent, ProgressStatus};
use crate::registry::{ApplyOutcome, ExecuteContext, Registry};
use chrono::Utc;
use fs2::FileExt;
use serde::Serialize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default backup directory, relative to the workspace root
pub const DEFAULT_BACKUP_DIR: &str = ".kb/logs/setup";

/// Options controlling one execution run
#[derive(Default)]
pub struct ExecuteOptions {
    /// Validate without touching the workspace
    pub dry_run: bool,
    /// Resolve `prompt` conflicts in favor of overwriting
    pub auto_confirm: bool,
    /// Overrides `<workspace>/.kb/logs/setup`
    pub backup_dir: Option<PathBuf>,
    /// Opt-in progress event callback
    pub on_progress: Option<ProgressCallback>,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn auto_confirm(mut self, auto_confirm: bool) -> Self {
        self.auto_confirm = auto_confirm;
        self
    }

    pub fn with_backup_dir(mut self, backup_dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = Some(backup_dir.into());
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }
}

/// An operation that failed during execution
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedOperation {
    pub operation: SetupOperation,
    pub error: String,
}

/// Outcome of one execution run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    /// Operations that actually changed the workspace
    pub applied: Vec<SetupOperation>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<FailedOperation>,
    pub rollback_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
    pub artifacts: Artifacts,
}

/// One recorded workspace mutation, for reverse-order rollback
#[derive(Debug, Clone)]
pub(crate) struct MutationRecord {
    pub target: PathBuf,
    pub backup: Option<PathBuf>,
    #[allow(dead_code)]
    pub existed_before: bool,
}

/// Copy the pre-mutation target into the backup directory
///
/// Called only when the target exists. Names follow
/// `<unix-ms>-<opId>-<relPath>.bak` with both components sanitized.
pub(crate) fn create_backup(
    backup_dir: &Path,
    op_id: &str,
    rel_path: &str,
    source: &Path,
) -> Result<PathBuf> {
    fs::create_dir_all(backup_dir)?;
    let name = format!(
        "{}-{}-{}.bak",
        Utc::now().timestamp_millis(),
        sanitize_component(op_id),
        sanitize_component(rel_path),
    );
    let path = backup_dir.join(name);
    fs::copy(source, &path)?;
    Ok(path)
}

/// Advisory exclusive lock on the backup directory for the run's duration
struct RunLock {
    file: File,
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn acquire_lock(backup_dir: &Path) -> Result<RunLock> {
    let path = backup_dir.join("setup.lock");
    let file = File::create(&path)?;

    // Retry with backoff: 0ms, 50ms, 100ms, 200ms, 400ms
    const MAX_RETRIES: u32 = 5;
    let mut last_error = None;

    for attempt in 0..MAX_RETRIES {
        match file.try_lock_exclusive() {
            Ok(()) => {
                last_error = None;
                break;
            }
            Err(e) => {
                last_error = Some(e);
                if attempt < MAX_RETRIES - 1 {
                    std::thread::sleep(Duration::from_millis(50 * (1 << attempt)));
                }
            }
        }
    }

    if let Some(e) = last_error {
        return Err(Error::LockUnavailable(format!(
            "another setup run may be in progress ({e})"
        )));
    }

    Ok(RunLock { file })
}

/// Applies execution plans transactionally
pub struct Executor<'a> {
    workspace_root: &'a Path,
    registry: &'a Registry,
}

impl<'a> Executor<'a> {
    pub fn new(workspace_root: &'a Path, registry: &'a Registry) -> Self {
        Self {
            workspace_root,
            registry,
        }
    }

    /// Execute with a fresh snapshotting journal
    pub fn execute(&self, plan: &ExecutionPlan, options: ExecuteOptions) -> Result<ExecutionResult> {
        let mut journal = ChangeJournal::new(self.workspace_root);
        self.execute_with(plan, options, &mut journal)
    }

    /// Execute against a caller-supplied journal
    pub fn execute_with(
        &self,
        plan: &ExecutionPlan,
        options: ExecuteOptions,
        journal: &mut dyn Journal,
    ) -> Result<ExecutionResult> {
        let backup_dir = options
            .backup_dir
            .clone()
            .unwrap_or_else(|| self.workspace_root.join(DEFAULT_BACKUP_DIR));

        let _lock = if options.dry_run {
            None
        } else {
            fs::create_dir_all(&backup_dir)?;
            Some(acquire_lock(&backup_dir)?)
        };

        let ctx = ExecuteContext {
            workspace_root: self.workspace_root,
            backup_dir: &backup_dir,
            auto_confirm: options.auto_confirm,
        };

        let mut mutations: Vec<MutationRecord> = Vec::new();
        let mut applied: Vec<SetupOperation> = Vec::new();

        for stage in &plan.stages {
            journal.start_stage(&stage.id);

            for op in &stage.operations {
                emit(
                    &options,
                    stage,
                    op,
                    if options.dry_run {
                        ProgressStatus::Pending
                    } else {
                        ProgressStatus::Running
                    },
                    None,
                );

                if options.dry_run {
                    if let Err(e) = self.simulate(op, &ctx) {
                        let message = e.to_string();
                        warn!(id = op.id(), error = %message, "dry-run validation failed");
                        emit(&options, stage, op, ProgressStatus::Failed, Some(message.clone()));
                        return Ok(ExecutionResult {
                            success: false,
                            applied,
                            failed: vec![FailedOperation {
                                operation: op.clone(),
                                error: message,
                            }],
                            rollback_available: false,
                            log_path: None,
                            artifacts: journal.artifacts(),
                        });
                    }
                    emit(&options, stage, op, ProgressStatus::Skipped, None);
                    continue;
                }

                let outcome = apply_journalled(journal, op, |op| {
                    self.dispatch(op, &ctx, &mut mutations)
                });

                match outcome {
                    Ok(outcome) => {
                        if outcome.changed {
                            applied.push(op.clone());
                        }
                        emit(&options, stage, op, ProgressStatus::Completed, None);
                    }
                    Err(e) => {
                        let message = e.to_string();
                        error!(id = op.id(), error = %message, "operation failed; rolling back");
                        emit(&options, stage, op, ProgressStatus::Failed, Some(message.clone()));

                        rollback_mutations(&mutations);
                        journal.rollback(&applied);

                        return Ok(ExecutionResult {
                            success: false,
                            applied,
                            failed: vec![FailedOperation {
                                operation: op.clone(),
                                error: message,
                            }],
                            rollback_available: !options.dry_run,
                            log_path: journal.log_path().map(Path::to_path_buf),
                            artifacts: journal.artifacts(),
                        });
                    }
                }
            }

            journal.commit_stage(&stage.id);
        }

        let log_path = if options.dry_run {
            None
        } else {
            journal.persist(&backup_dir)?
        };

        info!(
            applied = applied.len(),
            dry_run = options.dry_run,
            "setup run complete"
        );

        Ok(ExecutionResult {
            success: true,
            applied,
            failed: Vec::new(),
            rollback_available: !options.dry_run,
            log_path,
            artifacts: journal.artifacts(),
        })
    }

    /// Route one operation to its applier: registry override first, then
    /// the built-ins; kinds with neither fail as unsupported
    fn dispatch(
        &self,
        op: &SetupOperation,
        ctx: &ExecuteContext<'_>,
        mutations: &mut Vec<MutationRecord>,
    ) -> Result<ApplyOutcome> {
        if let Some(handlers) = self.registry.executor(op.kind()) {
            return (handlers.execute)(op, ctx);
        }

        match &op.operation {
            Operation::File(file) => file::apply_file(file, &op.metadata, ctx, mutations),
            Operation::Config(config) => config::apply_config(config, &op.metadata, ctx, mutations),
            Operation::Script(script) => script::apply_script(script, &op.metadata, ctx, mutations),
            other => Err(Error::UnsupportedKind {
                kind: other.kind().to_string(),
                id: op.id().to_string(),
            }),
        }
    }

    /// Dry-run validation: registry `simulate` if present; for file
    /// operations, check that content is resolvable without touching disk
    fn simulate(&self, op: &SetupOperation, ctx: &ExecuteContext<'_>) -> Result<()> {
        if let Some(handlers) = self.registry.executor(op.kind())
            && let Some(simulate) = &handlers.simulate
        {
            return simulate(op, ctx);
        }

        match &op.operation {
            Operation::File(file) if file.action != FileAction::Delete => {
                content::resolve_content(file, &op.metadata, ctx.workspace_root)?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Run one applier between the journal's before/after hooks
fn apply_journalled(
    journal: &mut dyn Journal,
    op: &SetupOperation,
    apply: impl FnOnce(&SetupOperation) -> Result<ApplyOutcome>,
) -> Result<ApplyOutcome> {
    journal.before_operation(op)?;
    let outcome = apply(op)?;
    journal.after_operation(op, outcome.backup_path.as_deref())?;
    Ok(outcome)
}

/// Undo recorded mutations in reverse order
///
/// Targets with a backup are restored from it; targets without one were
/// created by this run and are removed. Pre-existing files that were never
/// mutated are untouched.
fn rollback_mutations(mutations: &[MutationRecord]) {
    for record in mutations.iter().rev() {
        if let Some(backup) = &record.backup {
            if let Some(parent) = record.target.parent() {
                let _ = fs::create_dir_all(parent);
            }
            match fs::copy(backup, &record.target) {
                Ok(_) => debug!(target = %record.target.display(), "restored from backup"),
                Err(e) => warn!(
                    target = %record.target.display(),
                    backup = %backup.display(),
                    error = %e,
                    "failed to restore backup"
                ),
            }
        } else if record.target.exists()
            && let Err(e) = fs::remove_file(&record.target)
        {
            warn!(
                target = %record.target.display(),
                error = %e,
                "failed to remove created file"
            );
        }
    }
}

fn emit(
    options: &ExecuteOptions,
    stage: &Stage,
    op: &SetupOperation,
    status: ProgressStatus,
    error: Option<String>,
) {
    if let Some(callback) = &options.on_progress {
        callback(&ProgressEvent {
            stage_id: stage.id.clone(),
            operation: op.clone(),
            status,
            error,
        });
    }
}
