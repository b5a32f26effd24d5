// src/analyzer.rs

//! Workspace state analysis
//!
//! The analyzer classifies each operation as needed or not by reading the
//! current workspace, without mutating anything. Its output feeds the
//! planner (diff previews, risk rollup) and is the basis for idempotency:
//! an operation whose declared target already matches the workspace is
//! reported as not needed.
//!
//! Analysis never fails a run. I/O problems and malformed documents are
//! folded into conflict diagnostics on the operation's result; only the
//! executor turns them into hard errors.

use crate::error::Error;
use crate::hash;
use crate::json;
use crate::operation::{
    ConfigAction, ConfigOperation, Encoding, FileAction, FileOperation, ScriptAction,
    ScriptOperation, SetupOperation,
};
use crate::path::resolve_in_workspace;
use crate::pointer;
use crate::registry::{AnalyzeContext, Registry};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// How risky applying an operation is, ordered `safe < moderate < high`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Safe,
    Moderate,
    High,
}

/// Classification of a conflict found during analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictKind {
    Modified,
    Missing,
    Incompatible,
    Permission,
    Unknown,
}

/// A diagnostic attached to an operation's analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    #[serde(rename = "type")]
    pub kind: ConflictKind,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Per-operation inspection result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub needed: bool,
    /// Observed state: for files `{exists, size?, mode?, mtime?, content?}`,
    /// for configs the value at the pointer, for scripts the current command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<Conflict>,
    pub risk: RiskLevel,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl AnalysisResult {
    fn not_needed(note: impl Into<String>) -> Self {
        Self {
            needed: false,
            current: None,
            conflicts: Vec::new(),
            risk: RiskLevel::Safe,
            notes: vec![note.into()],
        }
    }

    fn unknown_io(path: &str, error: &std::io::Error) -> Self {
        Self {
            needed: true,
            current: None,
            conflicts: vec![Conflict {
                kind: ConflictKind::Unknown,
                path: path.to_string(),
                expected: None,
                actual: Some(json!(error.to_string())),
                suggestion: None,
            }],
            risk: RiskLevel::Moderate,
            notes: Vec::new(),
        }
    }

    fn path_escape(path: &str) -> Self {
        Self {
            needed: true,
            current: None,
            conflicts: vec![Conflict {
                kind: ConflictKind::Incompatible,
                path: path.to_string(),
                expected: None,
                actual: Some(json!("path escapes workspace root")),
                suggestion: Some("Keep operation paths inside the workspace".to_string()),
            }],
            risk: RiskLevel::High,
            notes: Vec::new(),
        }
    }

    fn invalid_json(path: &str) -> Self {
        Self {
            needed: true,
            current: None,
            conflicts: vec![Conflict {
                kind: ConflictKind::Incompatible,
                path: path.to_string(),
                expected: None,
                actual: Some(json!("invalid-json")),
                suggestion: Some("Fix or remove the malformed JSON file".to_string()),
            }],
            risk: RiskLevel::Moderate,
            notes: Vec::new(),
        }
    }
}

/// Classifies operations against the current workspace state
pub struct Analyzer<'a> {
    workspace_root: &'a Path,
    registry: &'a Registry,
}

impl<'a> Analyzer<'a> {
    pub fn new(workspace_root: &'a Path, registry: &'a Registry) -> Self {
        Self {
            workspace_root,
            registry,
        }
    }

    /// Analyze every operation, strictly in declaration order
    ///
    /// Returns a map from operation id to its result. Nothing is cached
    /// across calls; each invocation re-reads the workspace.
    pub fn analyze_all(&self, operations: &[SetupOperation]) -> BTreeMap<String, AnalysisResult> {
        let mut results = BTreeMap::new();
        for op in operations {
            let result = self.analyze_one(op);
            debug!(
                id = op.id(),
                kind = op.kind(),
                needed = result.needed,
                "analyzed operation"
            );
            results.insert(op.id().to_string(), result);
        }
        results
    }

    fn analyze_one(&self, op: &SetupOperation) -> AnalysisResult {
        if let Some(handler) = self.registry.analyzer(op.kind()) {
            let ctx = AnalyzeContext {
                workspace_root: self.workspace_root,
            };
            return match handler(op, &ctx) {
                Ok(result) => result,
                Err(e) => AnalysisResult {
                    needed: true,
                    current: None,
                    conflicts: vec![Conflict {
                        kind: ConflictKind::Unknown,
                        path: op.operation.target_path().unwrap_or_default().to_string(),
                        expected: None,
                        actual: Some(json!(e.to_string())),
                        suggestion: None,
                    }],
                    risk: RiskLevel::Moderate,
                    notes: vec![format!("Custom analyzer for kind '{}' failed", op.kind())],
                },
            };
        }

        match &op.operation {
            crate::operation::Operation::File(file) => self.analyze_file(file),
            crate::operation::Operation::Config(config) => self.analyze_config(config),
            crate::operation::Operation::Script(script) => self.analyze_script(script),
            other => AnalysisResult {
                needed: true,
                current: None,
                conflicts: Vec::new(),
                risk: RiskLevel::Moderate,
                notes: vec![format!(
                    "No analyzer registered for kind '{}'",
                    other.kind()
                )],
            },
        }
    }

    fn analyze_file(&self, op: &FileOperation) -> AnalysisResult {
        let target = match resolve_in_workspace(self.workspace_root, &op.path) {
            Ok(target) => target,
            Err(_) => return AnalysisResult::path_escape(&op.path),
        };

        let metadata = match fs::metadata(&target) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if op.action == FileAction::Delete {
                    return AnalysisResult::not_needed("already removed");
                }
                return AnalysisResult {
                    needed: true,
                    current: Some(json!({"exists": false})),
                    conflicts: Vec::new(),
                    risk: RiskLevel::Safe,
                    notes: Vec::new(),
                };
            }
            Err(e) => return AnalysisResult::unknown_io(&op.path, &e),
        };

        let bytes = match fs::read(&target) {
            Ok(bytes) => bytes,
            Err(e) => return AnalysisResult::unknown_io(&op.path, &e),
        };

        let current = Some(file_state(&metadata, &bytes, op.encoding));

        if op.action == FileAction::Delete {
            return AnalysisResult {
                needed: true,
                current,
                conflicts: Vec::new(),
                risk: RiskLevel::Moderate,
                notes: Vec::new(),
            };
        }

        // ensure / update on an existing file: short-circuit when the
        // declared target already matches
        let content_match = op.content.as_ref().is_some_and(|content| {
            content_bytes(content, op.encoding)
                .is_some_and(|desired| bytes == desired && mode_matches(op.mode, &metadata))
        });
        let checksum_match = !content_match
            && op
                .checksum
                .as_ref()
                .is_some_and(|checksum| hash::matches_checksum(&bytes, checksum));
        if content_match || checksum_match {
            return AnalysisResult {
                needed: false,
                current,
                conflicts: Vec::new(),
                risk: RiskLevel::Safe,
                notes: Vec::new(),
            };
        }

        let mut notes = Vec::new();
        if op.template.is_some() && op.content.is_none() {
            notes.push("Template content cannot be analyzed without rendering".to_string());
        }

        AnalysisResult {
            needed: true,
            current,
            conflicts: Vec::new(),
            risk: RiskLevel::Moderate,
            notes,
        }
    }

    fn analyze_config(&self, op: &ConfigOperation) -> AnalysisResult {
        let target = match resolve_in_workspace(self.workspace_root, &op.path) {
            Ok(target) => target,
            Err(_) => return AnalysisResult::path_escape(&op.path),
        };

        let doc = match json::read_document(&target) {
            Ok(doc) => doc,
            Err(Error::InvalidJson { .. }) => return AnalysisResult::invalid_json(&op.path),
            Err(Error::Io(e)) => return AnalysisResult::unknown_io(&op.path, &e),
            Err(e) => return AnalysisResult::unknown_io(
                &op.path,
                &std::io::Error::other(e.to_string()),
            ),
        };

        if doc.is_none() && op.action == ConfigAction::Unset {
            return AnalysisResult::not_needed("file absent, nothing to unset");
        }

        let tokens = match pointer::decode(&op.pointer) {
            Ok(tokens) => tokens,
            Err(_) => {
                return AnalysisResult {
                    needed: true,
                    current: None,
                    conflicts: vec![Conflict {
                        kind: ConflictKind::Incompatible,
                        path: op.path.clone(),
                        expected: None,
                        actual: Some(json!(op.pointer.clone())),
                        suggestion: Some("Use an RFC 6901 pointer starting with '/'".to_string()),
                    }],
                    risk: RiskLevel::Moderate,
                    notes: Vec::new(),
                };
            }
        };

        // Root set/unset are no-ops; the planner warns about them
        if tokens.is_empty() && op.action != ConfigAction::Merge {
            return AnalysisResult::not_needed("root pointer operations are ignored");
        }

        let file_exists = doc.is_some();
        let doc = doc.unwrap_or_else(|| json!({}));
        let current = pointer::resolve(&doc, &tokens).cloned();

        let needed = match op.action {
            ConfigAction::Unset => current.is_some(),
            ConfigAction::Set => {
                let value = op.value.clone().unwrap_or(Value::Null);
                current.as_ref() != Some(&value)
            }
            ConfigAction::Merge => {
                let value = op.value.clone().unwrap_or(Value::Null);
                if value.is_object() {
                    let existing = current.clone().unwrap_or(Value::Null);
                    !json::is_subset(&value, &existing)
                } else {
                    current.as_ref() != Some(&value)
                }
            }
        };

        let risk = if needed && file_exists {
            RiskLevel::Moderate
        } else {
            RiskLevel::Safe
        };

        AnalysisResult {
            needed,
            current,
            conflicts: Vec::new(),
            risk,
            notes: Vec::new(),
        }
    }

    fn analyze_script(&self, op: &ScriptOperation) -> AnalysisResult {
        let target = match resolve_in_workspace(self.workspace_root, &op.file) {
            Ok(target) => target,
            Err(_) => return AnalysisResult::path_escape(&op.file),
        };

        let doc = match json::read_document(&target) {
            Ok(doc) => doc,
            Err(Error::InvalidJson { .. }) => return AnalysisResult::invalid_json(&op.file),
            Err(Error::Io(e)) => return AnalysisResult::unknown_io(&op.file, &e),
            Err(e) => return AnalysisResult::unknown_io(
                &op.file,
                &std::io::Error::other(e.to_string()),
            ),
        };

        let Some(doc) = doc else {
            if op.action == ScriptAction::Delete {
                return AnalysisResult::not_needed("manifest absent, nothing to delete");
            }
            return AnalysisResult {
                needed: true,
                current: None,
                conflicts: vec![Conflict {
                    kind: ConflictKind::Missing,
                    path: op.file.clone(),
                    expected: None,
                    actual: None,
                    suggestion: Some(format!("Create {} before adding scripts", op.file)),
                }],
                risk: RiskLevel::Moderate,
                notes: Vec::new(),
            };
        };

        let current = doc
            .get("scripts")
            .and_then(|scripts| scripts.get(&op.name))
            .cloned();

        if op.action == ScriptAction::Delete {
            let needed = current.is_some();
            return AnalysisResult {
                needed,
                current,
                conflicts: Vec::new(),
                risk: if needed {
                    RiskLevel::Moderate
                } else {
                    RiskLevel::Safe
                },
                notes: Vec::new(),
            };
        }

        let desired = op.command.clone().map(Value::String);
        if desired.is_some() && current == desired {
            return AnalysisResult {
                needed: false,
                current,
                conflicts: Vec::new(),
                risk: RiskLevel::Safe,
                notes: Vec::new(),
            };
        }

        let mut conflicts = Vec::new();
        if current.is_some() {
            conflicts.push(Conflict {
                kind: ConflictKind::Modified,
                path: op.file.clone(),
                expected: desired,
                actual: current.clone(),
                suggestion: Some(
                    "Set conflictResolution to 'replace' or 'keep' to resolve".to_string(),
                ),
            });
        }

        AnalysisResult {
            needed: true,
            current,
            conflicts,
            risk: RiskLevel::Moderate,
            notes: Vec::new(),
        }
    }
}

/// Observed file state as the analyzer reports it
fn file_state(metadata: &fs::Metadata, bytes: &[u8], encoding: Encoding) -> Value {
    let mtime = metadata
        .modified()
        .ok()
        .map(|t| DateTime::<Utc>::from(t).to_rfc3339());

    let content = match encoding {
        Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        Encoding::Base64 => base64::engine::general_purpose::STANDARD.encode(bytes),
    };

    let mut state = json!({
        "exists": true,
        "size": metadata.len(),
        "content": content,
    });
    if let Some(mtime) = mtime {
        state["mtime"] = json!(mtime);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        state["mode"] = json!(metadata.permissions().mode() & 0o777);
    }
    state
}

/// Decode declared content into the bytes it would write
fn content_bytes(content: &str, encoding: Encoding) -> Option<Vec<u8>> {
    match encoding {
        Encoding::Utf8 => Some(content.as_bytes().to_vec()),
        Encoding::Base64 => base64::engine::general_purpose::STANDARD
            .decode(content.as_bytes())
            .ok(),
    }
}

fn mode_matches(declared: Option<u32>, metadata: &fs::Metadata) -> bool {
    let Some(declared) = declared else {
        return true;
    };
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o777 == declared & 0o777
    }
    #[cfg(not(unix))]
    {
        let _ = declared;
        true
    }
}
