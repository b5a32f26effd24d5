// src/journal.rs

//! Change journal: before/after snapshots and the persisted setup log
//!
//! The journal is an append-only per-run record. Every mutation passes
//! through [`Journal::before_operation`] (snapshot of whatever the
//! operation targets) and [`Journal::after_operation`] (second snapshot
//! plus the backup path the applier took). On a successful run the
//! executor persists the entries as a pretty-printed JSON log that a
//! rollback pass can replay.
//!
//! Snapshot content above the byte cap is replaced with a
//! `<truncated N bytes>` placeholder; the checksum is always computed over
//! the full bytes so a truncated log still identifies the exact content.

use crate::error::Result;
use crate::hash::sha256_hex;
use crate::operation::SetupOperation;
use crate::path::resolve_in_workspace;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Default cap on snapshot content, in bytes
pub const DEFAULT_SNAPSHOT_CAP: usize = 256 * 1024;

/// Point-in-time record of one target path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// SHA-256 of the full bytes, even when `content` is truncated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Snapshot {
    /// Snapshot of a path that does not exist
    pub fn absent() -> Self {
        Self {
            exists: false,
            content: None,
            checksum: None,
            metadata: None,
        }
    }
}

/// One journalled mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    /// Deep clone of the operation as submitted
    pub operation: SetupOperation,
    pub before: Snapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Snapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
}

/// Files a run produced besides the workspace itself
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Artifacts {
    pub backups: Vec<PathBuf>,
    pub logs: Vec<PathBuf>,
}

/// Append-only record of a run's mutations
pub trait Journal {
    fn start_stage(&mut self, stage_id: &str);

    /// Capture the pre-mutation snapshot of the operation's target
    fn before_operation(&mut self, op: &SetupOperation) -> Result<()>;

    /// Capture the post-mutation snapshot and the backup the applier took
    fn after_operation(&mut self, op: &SetupOperation, backup_path: Option<&Path>) -> Result<()>;

    fn commit_stage(&mut self, stage_id: &str);

    /// Note that the run rolled back the given applied operations
    fn rollback(&mut self, applied: &[SetupOperation]);

    /// Deep clones of all entries, oldest first
    fn entries(&self) -> Vec<JournalEntry>;

    fn artifacts(&self) -> Artifacts;

    fn log_path(&self) -> Option<&Path>;

    fn set_log_path(&mut self, path: PathBuf);

    /// Write the setup log under `backup_dir` if there is anything to write
    /// and no log has been written yet; returns the log path
    fn persist(&mut self, backup_dir: &Path) -> Result<Option<PathBuf>>;
}

/// Journal that snapshots file content and persists a replayable log
pub struct ChangeJournal {
    workspace_root: PathBuf,
    run_id: String,
    snapshot_cap: usize,
    entries: Vec<JournalEntry>,
    log_path: Option<PathBuf>,
}

impl ChangeJournal {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            run_id: Uuid::new_v4().to_string(),
            snapshot_cap: DEFAULT_SNAPSHOT_CAP,
            entries: Vec::new(),
            log_path: None,
        }
    }

    /// Override the snapshot content cap
    pub fn with_snapshot_cap(mut self, cap: usize) -> Self {
        self.snapshot_cap = cap;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn snapshot_target(&self, op: &SetupOperation) -> Result<Snapshot> {
        let Some(rel) = op.operation.target_path() else {
            return Ok(Snapshot::absent());
        };
        let Ok(target) = resolve_in_workspace(&self.workspace_root, rel) else {
            // Escaping paths never reach disk; record them as absent
            return Ok(Snapshot::absent());
        };
        snapshot_path(&target, self.snapshot_cap)
    }
}

/// Snapshot an absolute path, truncating content above `cap`
pub fn snapshot_path(path: &Path, cap: usize) -> Result<Snapshot> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Snapshot::absent()),
        Err(e) => return Err(e.into()),
    };

    let bytes = fs::read(path)?;
    let checksum = sha256_hex(&bytes);
    let content = if bytes.len() > cap {
        format!("<truncated {} bytes>", bytes.len())
    } else {
        String::from_utf8_lossy(&bytes).into_owned()
    };

    let mut extra = json!({ "size": metadata.len() });
    if let Ok(mtime) = metadata.modified() {
        extra["mtime"] = json!(DateTime::<Utc>::from(mtime).to_rfc3339());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        extra["mode"] = json!(metadata.permissions().mode() & 0o777);
    }

    Ok(Snapshot {
        exists: true,
        content: Some(content),
        checksum: Some(checksum),
        metadata: Some(extra),
    })
}

impl Journal for ChangeJournal {
    fn start_stage(&mut self, stage_id: &str) {
        debug!(run_id = %self.run_id, stage_id, "stage started");
    }

    fn before_operation(&mut self, op: &SetupOperation) -> Result<()> {
        let before = self.snapshot_target(op)?;
        self.entries.push(JournalEntry {
            timestamp: Utc::now(),
            operation: op.clone(),
            before,
            after: None,
            backup_path: None,
        });
        Ok(())
    }

    fn after_operation(&mut self, op: &SetupOperation, backup_path: Option<&Path>) -> Result<()> {
        let after = self.snapshot_target(op)?;
        if let Some(entry) = self
            .entries
            .iter_mut()
            .rev()
            .find(|entry| entry.operation.id() == op.id() && entry.after.is_none())
        {
            entry.after = Some(after);
            entry.backup_path = backup_path.map(Path::to_path_buf);
        }
        Ok(())
    }

    fn commit_stage(&mut self, stage_id: &str) {
        debug!(run_id = %self.run_id, stage_id, "stage committed");
    }

    fn rollback(&mut self, applied: &[SetupOperation]) {
        warn!(
            run_id = %self.run_id,
            rolled_back = applied.len(),
            "run failed; applied operations rolled back"
        );
    }

    fn entries(&self) -> Vec<JournalEntry> {
        self.entries.clone()
    }

    fn artifacts(&self) -> Artifacts {
        let backups = self
            .entries
            .iter()
            .filter_map(|entry| entry.backup_path.clone())
            .collect();
        let logs = self.log_path.clone().into_iter().collect();
        Artifacts { backups, logs }
    }

    fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    fn set_log_path(&mut self, path: PathBuf) {
        self.log_path = Some(path);
    }

    fn persist(&mut self, backup_dir: &Path) -> Result<Option<PathBuf>> {
        if self.entries.is_empty() {
            return Ok(None);
        }
        if let Some(existing) = &self.log_path {
            return Ok(Some(existing.clone()));
        }

        fs::create_dir_all(backup_dir)?;
        let path = backup_dir.join(format!("{}-setup-log.json", Utc::now().timestamp_millis()));
        let mut rendered = serde_json::to_string_pretty(&self.entries)?;
        rendered.push('\n');
        fs::write(&path, rendered)?;

        debug!(run_id = %self.run_id, path = %path.display(), "setup log written");
        self.log_path = Some(path.clone());
        Ok(Some(path))
    }
}

/// Load a persisted setup log back into entries
///
/// Inverse of [`Journal::persist`]: entries round-trip exactly, including
/// truncation placeholders.
pub fn load_log(path: &Path) -> Result<Vec<JournalEntry>> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Journal that records entries without snapshots; intended for tests
#[derive(Default)]
pub struct MemoryJournal {
    entries: Vec<JournalEntry>,
    log_path: Option<PathBuf>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Journal for MemoryJournal {
    fn start_stage(&mut self, _stage_id: &str) {}

    fn before_operation(&mut self, op: &SetupOperation) -> Result<()> {
        self.entries.push(JournalEntry {
            timestamp: Utc::now(),
            operation: op.clone(),
            before: Snapshot::absent(),
            after: None,
            backup_path: None,
        });
        Ok(())
    }

    fn after_operation(&mut self, op: &SetupOperation, backup_path: Option<&Path>) -> Result<()> {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .rev()
            .find(|entry| entry.operation.id() == op.id() && entry.after.is_none())
        {
            entry.after = Some(Snapshot::absent());
            entry.backup_path = backup_path.map(Path::to_path_buf);
        }
        Ok(())
    }

    fn commit_stage(&mut self, _stage_id: &str) {}

    fn rollback(&mut self, _applied: &[SetupOperation]) {}

    fn entries(&self) -> Vec<JournalEntry> {
        self.entries.clone()
    }

    fn artifacts(&self) -> Artifacts {
        Artifacts {
            backups: self
                .entries
                .iter()
                .filter_map(|entry| entry.backup_path.clone())
                .collect(),
            logs: Vec::new(),
        }
    }

    fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    fn set_log_path(&mut self, path: PathBuf) {
        self.log_path = Some(path);
    }

    fn persist(&mut self, _backup_dir: &Path) -> Result<Option<PathBuf>> {
        Ok(None)
    }
}
