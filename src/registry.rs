// src/registry.rs

//! Per-kind handler registry
//!
//! The registry is the engine's pluggability contract: a per-run lookup
//! table keyed by operation kind. For each kind it may hold an analyzer, a
//! diff builder, and an executor pair (simulate + execute). Custom handlers
//! always take precedence over the built-ins, so callers can override
//! behavior for the core kinds or teach the engine new ones (the core
//! ships no `code` executor, for example).

use crate::analyzer::AnalysisResult;
use crate::error::Result;
use crate::operation::SetupOperation;
use crate::planner::DiffEntry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Context handed to analyzers and diff builders
#[derive(Debug, Clone, Copy)]
pub struct AnalyzeContext<'a> {
    pub workspace_root: &'a Path,
}

/// Context handed to simulate/execute handlers
#[derive(Debug, Clone, Copy)]
pub struct ExecuteContext<'a> {
    pub workspace_root: &'a Path,
    pub backup_dir: &'a Path,
    pub auto_confirm: bool,
}

/// What an executor reports back after applying one operation
#[derive(Debug, Clone, Default)]
pub struct ApplyOutcome {
    /// False when the workspace already matched the declared target
    pub changed: bool,
    /// Backup taken before mutating, when the target pre-existed
    pub backup_path: Option<PathBuf>,
}

impl ApplyOutcome {
    /// The no-mutation outcome
    pub fn unchanged() -> Self {
        Self::default()
    }

    /// A mutation outcome with an optional backup
    pub fn changed(backup_path: Option<PathBuf>) -> Self {
        Self {
            changed: true,
            backup_path,
        }
    }
}

/// Custom analyzer: inspects the workspace for one operation
pub type AnalyzerFn =
    Box<dyn Fn(&SetupOperation, &AnalyzeContext<'_>) -> Result<AnalysisResult> + Send + Sync>;

/// Custom diff builder: renders one operation's plan diff entry
pub type DiffBuilderFn = Box<
    dyn Fn(&SetupOperation, Option<&AnalysisResult>, &AnalyzeContext<'_>) -> Option<DiffEntry>
        + Send
        + Sync,
>;

/// Custom dry-run validator
pub type SimulateFn =
    Box<dyn Fn(&SetupOperation, &ExecuteContext<'_>) -> Result<()> + Send + Sync>;

/// Custom applier
pub type ExecuteFn =
    Box<dyn Fn(&SetupOperation, &ExecuteContext<'_>) -> Result<ApplyOutcome> + Send + Sync>;

/// Executor pair registered for a kind
pub struct ExecutorHandlers {
    pub simulate: Option<SimulateFn>,
    pub execute: ExecuteFn,
}

/// Lookup table of per-kind handler overrides
#[derive(Default)]
pub struct Registry {
    analyzers: HashMap<String, AnalyzerFn>,
    diff_builders: HashMap<String, DiffBuilderFn>,
    executors: HashMap<String, ExecutorHandlers>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_analyzer(&mut self, kind: impl Into<String>, handler: AnalyzerFn) {
        self.analyzers.insert(kind.into(), handler);
    }

    pub fn register_diff_builder(&mut self, kind: impl Into<String>, handler: DiffBuilderFn) {
        self.diff_builders.insert(kind.into(), handler);
    }

    pub fn register_executor(&mut self, kind: impl Into<String>, handlers: ExecutorHandlers) {
        self.executors.insert(kind.into(), handlers);
    }

    pub fn analyzer(&self, kind: &str) -> Option<&AnalyzerFn> {
        self.analyzers.get(kind)
    }

    pub fn diff_builder(&self, kind: &str) -> Option<&DiffBuilderFn> {
        self.diff_builders.get(kind)
    }

    pub fn executor(&self, kind: &str) -> Option<&ExecutorHandlers> {
        self.executors.get(kind)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("analyzers", &self.analyzers.keys().collect::<Vec<_>>())
            .field("diff_builders", &self.diff_builders.keys().collect::<Vec<_>>())
            .field("executors", &self.executors.keys().collect::<Vec<_>>())
            .finish()
    }
}
