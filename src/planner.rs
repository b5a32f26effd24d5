// src/planner.rs

//! Execution planning
//!
//! The planner turns a flat operation list plus its analysis into an
//! ordered [`ExecutionPlan`]: dependency-resolved stages (Kahn's
//! algorithm), a workspace diff preview, and a risk rollup. Planning never
//! touches the filesystem and never fails: graph problems (missing
//! dependency ids, cycles) degrade to warnings with a sequential fallback,
//! so a plan is always produced.

use crate::analyzer::{AnalysisResult, RiskLevel};
use crate::operation::{ConfigAction, FileAction, Operation, SetupOperation};
use crate::pointer;
use crate::registry::{AnalyzeContext, Registry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::warn;

/// One level of the dependency topological sort
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    /// `stage-1`, `stage-2`, … in production order
    pub id: String,
    pub operations: Vec<SetupOperation>,
    /// Advisory: operations in this stage are mutually independent. The
    /// executor still applies them sequentially.
    pub parallel: bool,
}

/// How a planned file operation changes the workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileDiffStatus {
    Created,
    Modified,
    Deleted,
}

/// Before/after content preview for a file diff
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffPreview {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

/// Planned change to one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDiff {
    pub path: String,
    pub status: FileDiffStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<DiffPreview>,
}

/// Planned change to one configuration value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDiff {
    pub path: String,
    pub pointer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
}

/// A diff entry produced by a registered diff builder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DiffEntry {
    File(FileDiff),
    Config(ConfigDiff),
}

/// Totals across file and config diffs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub created: usize,
    pub modified: usize,
    pub deleted: usize,
}

/// The full workspace diff a plan would produce
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDiff {
    pub files: Vec<FileDiff>,
    pub configs: Vec<ConfigDiff>,
    pub summary: DiffSummary,
}

/// Risk rollup across the plan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub overall: RiskLevel,
    pub by_operation: BTreeMap<String, RiskLevel>,
}

/// Dependency-ordered stages plus diff and risk summaries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub stages: Vec<Stage>,
    pub diff: PlanDiff,
    pub risks: RiskAssessment,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ExecutionPlan {
    /// All operations in execution order
    pub fn operations(&self) -> impl Iterator<Item = &SetupOperation> {
        self.stages.iter().flat_map(|stage| stage.operations.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Builds execution plans from operations and their analysis
pub struct Planner<'a> {
    workspace_root: &'a Path,
    registry: &'a Registry,
}

impl<'a> Planner<'a> {
    pub fn new(workspace_root: &'a Path, registry: &'a Registry) -> Self {
        Self {
            workspace_root,
            registry,
        }
    }

    /// Produce the plan for `operations` given their analysis
    pub fn plan(
        &self,
        operations: &[SetupOperation],
        analysis: &BTreeMap<String, AnalysisResult>,
    ) -> ExecutionPlan {
        let mut warnings = Vec::new();

        let stages = self.build_stages(operations, &mut warnings);
        self.warn_root_pointer_ops(operations, &mut warnings);
        let diff = self.build_diff(operations, analysis);
        let risks = roll_up_risks(operations, analysis);

        for warning in &warnings {
            warn!("{warning}");
        }

        ExecutionPlan {
            stages,
            diff,
            risks,
            warnings,
        }
    }

    /// Kahn's algorithm over the id → dependencies graph, restricted to ids
    /// present in the input
    fn build_stages(
        &self,
        operations: &[SetupOperation],
        warnings: &mut Vec<String>,
    ) -> Vec<Stage> {
        let ids: Vec<&str> = operations.iter().map(|op| op.id()).collect();
        let id_set: HashSet<&str> = ids.iter().copied().collect();
        if id_set.len() != ids.len() {
            let mut seen = HashSet::new();
            for id in &ids {
                if !seen.insert(*id) {
                    warnings.push(format!(
                        "Duplicate operation id '{id}'; later occurrences shadow earlier ones."
                    ));
                }
            }
        }

        let mut in_degree: HashMap<&str, usize> = ids.iter().map(|id| (*id, 0)).collect();
        let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();

        for op in operations {
            for dep in &op.metadata.dependencies {
                if !id_set.contains(dep.as_str()) {
                    warnings.push(format!(
                        "Operation {} depends on missing operation {}. It will run anyway.",
                        op.id(),
                        dep
                    ));
                    continue;
                }
                if let Some(degree) = in_degree.get_mut(op.id()) {
                    *degree += 1;
                }
                successors.entry(dep.as_str()).or_default().push(op.id());
            }
        }

        let by_id: HashMap<&str, &SetupOperation> =
            operations.iter().map(|op| (op.id(), op)).collect();

        let mut placed: HashSet<&str> = HashSet::new();
        let mut stages: Vec<Stage> = Vec::new();

        loop {
            // Zero in-degree nodes in declaration order form the next stage
            let round: Vec<&str> = ids
                .iter()
                .copied()
                .filter(|id| !placed.contains(id) && in_degree.get(id) == Some(&0))
                .collect();
            if round.is_empty() {
                break;
            }

            for id in &round {
                placed.insert(id);
                if let Some(next) = successors.get(id) {
                    for succ in next {
                        if let Some(degree) = in_degree.get_mut(succ) {
                            *degree = degree.saturating_sub(1);
                        }
                    }
                }
            }

            stages.push(Stage {
                id: format!("stage-{}", stages.len() + 1),
                operations: round.iter().map(|id| (*by_id[id]).clone()).collect(),
                parallel: round.len() >= 2,
            });
        }

        // Anything left is part of a cycle: run sequentially in declaration order
        let remaining: Vec<&str> = ids
            .iter()
            .copied()
            .filter(|id| !placed.contains(id))
            .collect();
        if !remaining.is_empty() {
            warnings.push(format!(
                "Dependency cycle detected involving: {}. Running them sequentially.",
                remaining.join(", ")
            ));
            for id in remaining {
                stages.push(Stage {
                    id: format!("stage-{}", stages.len() + 1),
                    operations: vec![(*by_id[id]).clone()],
                    parallel: false,
                });
            }
        }

        // Degenerate fallback: never lose operations
        if stages.is_empty() && !operations.is_empty() {
            stages.push(Stage {
                id: "stage-1".to_string(),
                operations: operations.to_vec(),
                parallel: operations.len() >= 2,
            });
        }

        stages
    }

    fn warn_root_pointer_ops(&self, operations: &[SetupOperation], warnings: &mut Vec<String>) {
        for op in operations {
            if let Operation::Config(config) = &op.operation
                && config.action != ConfigAction::Merge
                && pointer::decode(&config.pointer).is_ok_and(|tokens| tokens.is_empty())
            {
                warnings.push(format!(
                    "Operation {} addresses the document root; root set/unset are ignored.",
                    op.id()
                ));
            }
        }
    }

    fn build_diff(
        &self,
        operations: &[SetupOperation],
        analysis: &BTreeMap<String, AnalysisResult>,
    ) -> PlanDiff {
        let ctx = AnalyzeContext {
            workspace_root: self.workspace_root,
        };

        let mut files = Vec::new();
        let mut configs = Vec::new();

        for op in operations {
            let result = analysis.get(op.id());

            if let Some(builder) = self.registry.diff_builder(op.kind()) {
                match builder(op, result, &ctx) {
                    Some(DiffEntry::File(diff)) => files.push(diff),
                    Some(DiffEntry::Config(diff)) => configs.push(diff),
                    None => {}
                }
                continue;
            }

            match &op.operation {
                Operation::File(file) => files.push(build_file_diff(file, result)),
                Operation::Config(config) => configs.push(ConfigDiff {
                    path: config.path.clone(),
                    pointer: config.pointer.clone(),
                    before: result.and_then(|r| r.current.clone()),
                    after: match config.action {
                        ConfigAction::Unset => None,
                        ConfigAction::Set | ConfigAction::Merge => {
                            Some(config.value.clone().unwrap_or(Value::Null))
                        }
                    },
                }),
                _ => {}
            }
        }

        let summary = summarize(&files, &configs);

        PlanDiff {
            files,
            configs,
            summary,
        }
    }
}

fn build_file_diff(
    file: &crate::operation::FileOperation,
    analysis: Option<&AnalysisResult>,
) -> FileDiff {
    let current_exists = analysis
        .and_then(|r| r.current.as_ref())
        .and_then(|current| current.get("exists"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let status = if file.action == FileAction::Delete {
        FileDiffStatus::Deleted
    } else if !current_exists {
        FileDiffStatus::Created
    } else {
        FileDiffStatus::Modified
    };

    let before = analysis
        .and_then(|r| r.current.as_ref())
        .and_then(|current| current.get("content"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let after = if file.action == FileAction::Delete {
        None
    } else if let Some(content) = &file.content {
        Some(content.clone())
    } else {
        file.template
            .as_ref()
            .map(|template| format!("{{{{template:{}}}}}", template.source))
    };

    FileDiff {
        path: file.path.clone(),
        status,
        preview: Some(DiffPreview { before, after }),
    }
}

fn summarize(files: &[FileDiff], configs: &[ConfigDiff]) -> DiffSummary {
    let mut summary = DiffSummary::default();

    for file in files {
        match file.status {
            FileDiffStatus::Created => summary.created += 1,
            FileDiffStatus::Modified => summary.modified += 1,
            FileDiffStatus::Deleted => summary.deleted += 1,
        }
    }

    for config in configs {
        match (&config.before, &config.after) {
            (None, Some(_)) => summary.created += 1,
            (_, None) => summary.deleted += 1,
            _ => summary.modified += 1,
        }
    }

    summary
}

fn roll_up_risks(
    operations: &[SetupOperation],
    analysis: &BTreeMap<String, AnalysisResult>,
) -> RiskAssessment {
    let by_operation: BTreeMap<String, RiskLevel> = operations
        .iter()
        .map(|op| {
            let risk = analysis
                .get(op.id())
                .map_or(RiskLevel::Moderate, |r| r.risk);
            (op.id().to_string(), risk)
        })
        .collect();

    let overall = by_operation
        .values()
        .copied()
        .max()
        .unwrap_or(RiskLevel::Safe);

    RiskAssessment {
        overall,
        by_operation,
    }
}
