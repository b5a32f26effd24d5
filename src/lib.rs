// src/lib.rs

//! Setforge: declarative workspace setup engine
//!
//! Takes a list of declarative setup operations (create files, merge JSON
//! configuration, add package scripts), analyses the current workspace
//! state, produces a dependency-ordered execution plan with a diff and
//! risk assessment, and applies the plan transactionally with
//! per-operation backups and a replayable journal for rollback.
//!
//! # Architecture
//!
//! Data flows strictly left to right through four stages:
//!
//! ```text
//! Operations -> Analyzer -> AnalysisMap -> Planner -> Plan -> Executor -> Result
//!                                                                |
//!                                                                +-> Journal -> Log file
//! ```
//!
//! - **Analyzer**: classifies each operation as needed or not by reading
//!   disk state, with conflict diagnostics and a risk level
//! - **Planner**: resolves dependencies into topologically ordered stages
//!   and computes the resulting workspace diff
//! - **Executor**: applies the plan with content-equality short-circuits,
//!   backup-before-overwrite, and full reverse-order rollback on failure
//! - **Journal**: captures before/after snapshots and persists a log a
//!   rollback pass can replay
//!
//! A [`Registry`] of per-kind handlers lets callers override analysis,
//! diff rendering, and execution for custom operation kinds.
//!
//! The engine is a library with no ambient state: every run is
//! parameterised by a workspace root and a backup directory.

pub mod analyzer;
pub mod engine;
mod error;
pub mod executor;
pub mod hash;
pub mod journal;
pub mod json;
pub mod operation;
pub mod path;
pub mod planner;
pub mod pointer;
pub mod progress;
pub mod recovery;
pub mod registry;

pub use analyzer::{AnalysisResult, Analyzer, Conflict, ConflictKind, RiskLevel};
pub use engine::{EngineConfig, SetupEngine, engine_for};
pub use error::{Error, Result};
pub use executor::{
    DEFAULT_BACKUP_DIR, ExecuteOptions, ExecutionResult, Executor, FailedOperation,
};
pub use journal::{
    Artifacts, ChangeJournal, DEFAULT_SNAPSHOT_CAP, Journal, JournalEntry, MemoryJournal,
    Snapshot, load_log,
};
pub use operation::{
    CodeOperation, ConfigAction, ConfigConflictResolution, ConfigOperation, Encoding, FileAction,
    FileOperation, MergeStrategy, Operation, OperationMetadata, RAW_CONTENT_ANNOTATION,
    ScriptAction, ScriptConflictResolution, ScriptOperation, SetupOperation, TemplateSpec,
};
pub use planner::{
    ConfigDiff, DiffEntry, DiffPreview, DiffSummary, ExecutionPlan, FileDiff, FileDiffStatus,
    PlanDiff, Planner, RiskAssessment, Stage,
};
pub use progress::{ProgressCallback, ProgressEvent, ProgressStatus};
pub use recovery::{ReplayOutcome, replay_entries, replay_rollback};
pub use registry::{
    AnalyzeContext, AnalyzerFn, ApplyOutcome, DiffBuilderFn, ExecuteContext, ExecuteFn,
    ExecutorHandlers, Registry, SimulateFn,
};
