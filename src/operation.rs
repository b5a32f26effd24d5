// src/operation.rs

//! Declarative setup operation model
//!
//! An [`Operation`] is one declarative mutation of the workspace, tagged by
//! `kind` on the wire. Operations are immutable inputs to the pipeline and
//! always travel with their [`OperationMetadata`] as a [`SetupOperation`]
//! pair, the shape the journal persists.
//!
//! The `code` kind exists in the type system so plans and logs can carry
//! such operations, but the core ships no executor for it; applying one
//! fails as unsupported unless a custom handler is registered.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Annotation key carrying file bytes as base64, alternative to inline content
pub const RAW_CONTENT_ANNOTATION: &str = "rawContentBase64";

/// One declarative workspace mutation, tagged by kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Operation {
    /// Create, overwrite, or delete a file
    File(FileOperation),
    /// Merge, set, or unset a value in a JSON configuration file
    Config(ConfigOperation),
    /// Add, update, or remove an entry in a JSON manifest's `scripts` map
    Script(ScriptOperation),
    /// Source-code patch; declared but not implemented by the core executor
    Code(CodeOperation),
}

impl Operation {
    /// The wire tag for this operation's kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Config(_) => "config",
            Self::Script(_) => "script",
            Self::Code(_) => "code",
        }
    }

    /// The workspace-relative path this operation targets, if it has one
    pub fn target_path(&self) -> Option<&str> {
        match self {
            Self::File(op) => Some(&op.path),
            Self::Config(op) => Some(&op.path),
            Self::Script(op) => Some(&op.file),
            Self::Code(op) => Some(&op.path),
        }
    }
}

/// File action selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Ensure,
    Update,
    Delete,
}

/// Text encoding for inline file content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Encoding {
    #[default]
    #[serde(rename = "utf-8", alias = "utf8")]
    Utf8,
    #[serde(rename = "base64")]
    Base64,
}

/// Template source plus substitution variables
///
/// Rendering replaces each `{{ key }}` occurrence (surrounding whitespace
/// optional) with the corresponding variable; unknown keys are left as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSpec {
    /// Template file, absolute or workspace-relative
    pub source: String,
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
}

/// Create, overwrite, or delete a file in the workspace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOperation {
    pub action: FileAction,
    /// Workspace-relative target path
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<TemplateSpec>,
    #[serde(default)]
    pub encoding: Encoding,
    /// POSIX permission bits, applied after writing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
    /// SHA-256 hex of the desired content, for analysis short-circuits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Config action selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigAction {
    Merge,
    Set,
    Unset,
}

/// How `merge` combines an incoming object with the existing value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    Shallow,
    #[default]
    Deep,
    Replace,
}

/// Conflict policy declared on config operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigConflictResolution {
    Ours,
    Theirs,
    Prompt,
    Fail,
}

/// Merge, set, or unset a value at a JSON pointer in a configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigOperation {
    pub action: ConfigAction,
    /// Workspace-relative path of the JSON file
    pub path: String,
    /// RFC 6901 pointer into the document
    pub pointer: String,
    /// Value for `merge`/`set`; absent for `unset`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default)]
    pub strategy: MergeStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_resolution: Option<ConfigConflictResolution>,
}

/// Script action selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptAction {
    Ensure,
    Update,
    Delete,
}

/// What to do when the manifest already has a different command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptConflictResolution {
    Keep,
    Replace,
    /// Overwrite only under auto-confirm; fail otherwise
    #[default]
    Prompt,
}

/// Add, update, or remove a `scripts` entry in a JSON manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptOperation {
    pub action: ScriptAction,
    /// Workspace-relative path of the manifest, typically `package.json`
    pub file: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub conflict_resolution: ScriptConflictResolution,
}

/// Source-code patch declaration; the core executor rejects these
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeOperation {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<Value>,
}

/// Per-operation metadata, always paired with the operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationMetadata {
    /// Unique within a single plan
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub idempotent: bool,
    #[serde(default)]
    pub reversible: bool,
    /// Ids of operations that must run first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Arbitrary string-keyed values; see [`RAW_CONTENT_ANNOTATION`]
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, Value>,
}

impl OperationMetadata {
    /// Create metadata with the given id and description and empty extras
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            idempotent: false,
            reversible: false,
            dependencies: Vec::new(),
            tags: Vec::new(),
            annotations: BTreeMap::new(),
        }
    }

    /// Declare dependencies on other operation ids
    pub fn with_dependencies<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = ids.into_iter().map(Into::into).collect();
        self
    }

    /// The raw content annotation, if present and a string
    pub fn raw_content_base64(&self) -> Option<&str> {
        self.annotations
            .get(RAW_CONTENT_ANNOTATION)
            .and_then(Value::as_str)
    }
}

/// An operation paired with its metadata, the unit the pipeline works on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupOperation {
    pub operation: Operation,
    pub metadata: OperationMetadata,
}

impl SetupOperation {
    pub fn new(operation: Operation, metadata: OperationMetadata) -> Self {
        Self {
            operation,
            metadata,
        }
    }

    /// The metadata id, unique within a plan
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    /// The operation's wire kind
    pub fn kind(&self) -> &'static str {
        self.operation.kind()
    }
}
