// src/engine.rs

//! Engine configuration and pipeline facade
//!
//! [`SetupEngine`] wires the four pipeline stages together for the common
//! case: analyze the operations, plan them, execute the plan with a
//! snapshotting journal. Each stage stays independently usable for callers
//! that want to inspect the plan before applying it.

use crate::analyzer::{AnalysisResult, Analyzer};
use crate::error::Result;
use crate::executor::{DEFAULT_BACKUP_DIR, ExecuteOptions, ExecutionResult, Executor};
use crate::journal::{ChangeJournal, DEFAULT_SNAPSHOT_CAP, Journal};
use crate::operation::SetupOperation;
use crate::planner::{ExecutionPlan, Planner};
use crate::registry::Registry;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Per-run engine configuration with derived defaults
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Absolute directory all operation paths resolve under
    pub workspace_root: PathBuf,
    /// Where backups and setup logs land
    pub backup_dir: PathBuf,
    /// Snapshot content cap in bytes
    pub snapshot_cap: usize,
}

impl EngineConfig {
    /// Create a config with defaults derived from the workspace root
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        let workspace_root = workspace_root.into();
        let backup_dir = workspace_root.join(DEFAULT_BACKUP_DIR);
        Self {
            workspace_root,
            backup_dir,
            snapshot_cap: DEFAULT_SNAPSHOT_CAP,
        }
    }

    pub fn with_backup_dir(mut self, backup_dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = backup_dir.into();
        self
    }

    pub fn with_snapshot_cap(mut self, cap: usize) -> Self {
        self.snapshot_cap = cap;
        self
    }
}

/// The assembled pipeline: analyzer, planner, executor, journal
pub struct SetupEngine {
    config: EngineConfig,
    registry: Registry,
}

impl SetupEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            registry: Registry::new(),
        }
    }

    pub fn with_registry(config: EngineConfig, registry: Registry) -> Self {
        Self { config, registry }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Register custom handlers before running
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Analyze operations against the current workspace
    pub fn analyze(&self, operations: &[SetupOperation]) -> BTreeMap<String, AnalysisResult> {
        Analyzer::new(&self.config.workspace_root, &self.registry).analyze_all(operations)
    }

    /// Analyze and plan in one step
    pub fn plan(&self, operations: &[SetupOperation]) -> ExecutionPlan {
        let analysis = self.analyze(operations);
        Planner::new(&self.config.workspace_root, &self.registry).plan(operations, &analysis)
    }

    /// Execute a previously computed plan
    pub fn execute(
        &self,
        plan: &ExecutionPlan,
        options: ExecuteOptions,
    ) -> Result<ExecutionResult> {
        let options = self.fill_backup_dir(options);
        let mut journal = ChangeJournal::new(&self.config.workspace_root)
            .with_snapshot_cap(self.config.snapshot_cap);
        Executor::new(&self.config.workspace_root, &self.registry).execute_with(
            plan,
            options,
            &mut journal,
        )
    }

    /// Execute a plan against a caller-supplied journal
    pub fn execute_with(
        &self,
        plan: &ExecutionPlan,
        options: ExecuteOptions,
        journal: &mut dyn Journal,
    ) -> Result<ExecutionResult> {
        let options = self.fill_backup_dir(options);
        Executor::new(&self.config.workspace_root, &self.registry).execute_with(
            plan,
            options,
            journal,
        )
    }

    /// Analyze, plan, and execute in one call
    pub fn run(
        &self,
        operations: &[SetupOperation],
        options: ExecuteOptions,
    ) -> Result<ExecutionResult> {
        let plan = self.plan(operations);
        self.execute(&plan, options)
    }

    fn fill_backup_dir(&self, mut options: ExecuteOptions) -> ExecuteOptions {
        if options.backup_dir.is_none() {
            options.backup_dir = Some(self.config.backup_dir.clone());
        }
        options
    }
}

impl std::fmt::Debug for SetupEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetupEngine")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish()
    }
}

/// Shorthand for a default engine rooted at `workspace_root`
pub fn engine_for(workspace_root: impl AsRef<Path>) -> SetupEngine {
    SetupEngine::new(EngineConfig::new(workspace_root.as_ref()))
}
