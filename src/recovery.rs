// src/recovery.rs

//! Setup log replay
//!
//! A persisted setup log is replayable: walking its entries in reverse
//! restores every mutated path to its pre-run state. Entries that recorded
//! a backup are restored byte-for-byte from it; entries whose before
//! snapshot shows the target did not exist were created by the run and are
//! removed. Anything else is left alone: replay never re-creates files it
//! has no backup for and never deletes files that pre-existed the run.
//!
//! This is the library half of an external rollback tool: load the log the
//! executor wrote, point at the same workspace, replay.

use crate::error::Result;
use crate::journal::{JournalEntry, load_log};
use crate::path::resolve_in_workspace;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// What replay did with one log entry
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayOutcome {
    /// Target restored from its backup
    Restored { path: PathBuf },
    /// Run-created target removed
    Removed { path: PathBuf },
    /// Entry left alone
    Skipped { path: PathBuf, reason: String },
}

/// Roll a workspace back by replaying a persisted setup log
pub fn replay_rollback(log_path: &Path, workspace_root: &Path) -> Result<Vec<ReplayOutcome>> {
    let entries = load_log(log_path)?;
    info!(
        log = %log_path.display(),
        entries = entries.len(),
        "replaying setup log for rollback"
    );
    Ok(replay_entries(&entries, workspace_root))
}

/// Roll back already-loaded entries, newest first
pub fn replay_entries(entries: &[JournalEntry], workspace_root: &Path) -> Vec<ReplayOutcome> {
    let mut outcomes = Vec::new();
    let mut created_parents: Vec<PathBuf> = Vec::new();

    for entry in entries.iter().rev() {
        let Some(rel) = entry.operation.operation.target_path() else {
            continue;
        };
        let target = match resolve_in_workspace(workspace_root, rel) {
            Ok(target) => target,
            Err(e) => {
                outcomes.push(ReplayOutcome::Skipped {
                    path: PathBuf::from(rel),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        if let Some(backup) = &entry.backup_path {
            if backup.exists() {
                if let Some(parent) = target.parent() {
                    let _ = fs::create_dir_all(parent);
                }
                match fs::copy(backup, &target) {
                    Ok(_) => outcomes.push(ReplayOutcome::Restored { path: target }),
                    Err(e) => {
                        warn!(target = %target.display(), error = %e, "restore failed");
                        outcomes.push(ReplayOutcome::Skipped {
                            path: target,
                            reason: e.to_string(),
                        });
                    }
                }
            } else {
                outcomes.push(ReplayOutcome::Skipped {
                    path: target,
                    reason: format!("backup missing: {}", backup.display()),
                });
            }
        } else if !entry.before.exists {
            // Created by the run: remove it if it is still there
            if target.exists() {
                match fs::remove_file(&target) {
                    Ok(()) => {
                        if let Some(parent) = target.parent() {
                            created_parents.push(parent.to_path_buf());
                        }
                        outcomes.push(ReplayOutcome::Removed { path: target });
                    }
                    Err(e) => {
                        warn!(target = %target.display(), error = %e, "remove failed");
                        outcomes.push(ReplayOutcome::Skipped {
                            path: target,
                            reason: e.to_string(),
                        });
                    }
                }
            } else {
                outcomes.push(ReplayOutcome::Skipped {
                    path: target,
                    reason: "already absent".to_string(),
                });
            }
        } else {
            // Pre-existing target without a backup: the run never mutated it
            outcomes.push(ReplayOutcome::Skipped {
                path: target,
                reason: "no mutation recorded".to_string(),
            });
        }
    }

    prune_empty_dirs(created_parents, workspace_root);

    outcomes
}

/// Remove directories left empty by removals, deepest first, never the root
fn prune_empty_dirs(mut dirs: Vec<PathBuf>, workspace_root: &Path) {
    dirs.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));
    dirs.dedup();

    for dir in dirs {
        if dir == workspace_root || !dir.starts_with(workspace_root) {
            continue;
        }
        if dir.is_dir()
            && let Ok(mut entries) = fs::read_dir(&dir)
            && entries.next().is_none()
        {
            let _ = fs::remove_dir(&dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Analyzer;
    use crate::executor::{ExecuteOptions, Executor};
    use crate::operation::{
        Encoding, FileAction, FileOperation, Operation, OperationMetadata, SetupOperation,
    };
    use crate::planner::Planner;
    use crate::registry::Registry;
    use tempfile::TempDir;

    fn file_op(id: &str, path: &str, content: &str) -> SetupOperation {
        SetupOperation::new(
            Operation::File(FileOperation {
                action: FileAction::Ensure,
                path: path.to_string(),
                content: Some(content.to_string()),
                template: None,
                encoding: Encoding::Utf8,
                mode: None,
                checksum: None,
            }),
            OperationMetadata::new(id, "test file"),
        )
    }

    fn run(ws: &Path, ops: &[SetupOperation]) -> PathBuf {
        let registry = Registry::new();
        let analysis = Analyzer::new(ws, &registry).analyze_all(ops);
        let plan = Planner::new(ws, &registry).plan(ops, &analysis);
        let result = Executor::new(ws, &registry)
            .execute(&plan, ExecuteOptions::new())
            .unwrap();
        assert!(result.success);
        result.log_path.unwrap()
    }

    #[test]
    fn test_replay_removes_created_files() {
        let ws = TempDir::new().unwrap();
        let log = run(ws.path(), &[file_op("file-1", "fresh/new.txt", "created")]);
        assert!(ws.path().join("fresh/new.txt").exists());

        let outcomes = replay_rollback(&log, ws.path()).unwrap();

        assert!(matches!(outcomes[0], ReplayOutcome::Removed { .. }));
        assert!(!ws.path().join("fresh/new.txt").exists());
        // the directory the run created is pruned once empty
        assert!(!ws.path().join("fresh").exists());
    }

    #[test]
    fn test_replay_restores_overwritten_files() {
        let ws = TempDir::new().unwrap();
        fs::write(ws.path().join("config.txt"), "original").unwrap();

        let log = run(ws.path(), &[file_op("file-1", "config.txt", "changed")]);
        assert_eq!(
            fs::read_to_string(ws.path().join("config.txt")).unwrap(),
            "changed"
        );

        let outcomes = replay_rollback(&log, ws.path()).unwrap();

        assert!(matches!(outcomes[0], ReplayOutcome::Restored { .. }));
        assert_eq!(
            fs::read_to_string(ws.path().join("config.txt")).unwrap(),
            "original"
        );
    }

    #[test]
    fn test_replay_skips_unmutated_entries() {
        let ws = TempDir::new().unwrap();
        fs::write(ws.path().join("same.txt"), "demo").unwrap();

        // Content already matches, so the run records no backup
        let log = run(ws.path(), &[file_op("file-1", "same.txt", "demo")]);
        let outcomes = replay_rollback(&log, ws.path()).unwrap();

        assert!(matches!(outcomes[0], ReplayOutcome::Skipped { .. }));
        assert_eq!(
            fs::read_to_string(ws.path().join("same.txt")).unwrap(),
            "demo"
        );
    }
}
