// src/executor/file.rs

//! File operation applier
//!
//! Mutations follow backup-before-overwrite: when the target pre-exists it
//! is copied into the backup directory before any byte is changed, and the
//! mutation is recorded so a failed run can be rolled back in reverse.

use super::content::resolve_content;
use super::{MutationRecord, create_backup};
use crate::error::Result;
use crate::operation::{FileAction, FileOperation, OperationMetadata};
use crate::path::resolve_in_workspace;
use crate::registry::{ApplyOutcome, ExecuteContext};
use std::fs;
use tracing::debug;

pub(crate) fn apply_file(
    op: &FileOperation,
    metadata: &OperationMetadata,
    ctx: &ExecuteContext<'_>,
    mutations: &mut Vec<MutationRecord>,
) -> Result<ApplyOutcome> {
    let target = resolve_in_workspace(ctx.workspace_root, &op.path)?;

    if op.action == FileAction::Delete {
        if !target.exists() {
            return Ok(ApplyOutcome::unchanged());
        }
        let backup = create_backup(ctx.backup_dir, &metadata.id, &op.path, &target)?;
        mutations.push(MutationRecord {
            target: target.clone(),
            backup: Some(backup.clone()),
            existed_before: true,
        });
        fs::remove_file(&target)?;
        debug!(path = %op.path, "file removed");
        return Ok(ApplyOutcome::changed(Some(backup)));
    }

    let next = resolve_content(op, metadata, ctx.workspace_root)?;
    let existed = target.exists();

    if existed && fs::read(&target)? == next {
        return Ok(ApplyOutcome::unchanged());
    }

    let backup = if existed {
        Some(create_backup(ctx.backup_dir, &metadata.id, &op.path, &target)?)
    } else {
        None
    };

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    mutations.push(MutationRecord {
        target: target.clone(),
        backup: backup.clone(),
        existed_before: existed,
    });

    fs::write(&target, &next)?;

    #[cfg(unix)]
    if let Some(mode) = op.mode {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&target, fs::Permissions::from_mode(mode))?;
    }

    debug!(path = %op.path, bytes = next.len(), existed, "file written");
    Ok(ApplyOutcome::changed(backup))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Encoding;
    use std::path::Path;
    use tempfile::TempDir;

    fn op(action: FileAction, path: &str, content: Option<&str>) -> FileOperation {
        FileOperation {
            action,
            path: path.to_string(),
            content: content.map(str::to_string),
            template: None,
            encoding: Encoding::Utf8,
            mode: None,
            checksum: None,
        }
    }

    fn ctx<'a>(ws: &'a Path, backups: &'a Path) -> ExecuteContext<'a> {
        ExecuteContext {
            workspace_root: ws,
            backup_dir: backups,
            auto_confirm: false,
        }
    }

    #[test]
    fn test_create_new_file_without_backup() {
        let ws = TempDir::new().unwrap();
        let backups = ws.path().join("backups");
        let mut mutations = Vec::new();

        let outcome = apply_file(
            &op(FileAction::Ensure, ".kb/demo.txt", Some("demo")),
            &OperationMetadata::new("file-1", "create"),
            &ctx(ws.path(), &backups),
            &mut mutations,
        )
        .unwrap();

        assert!(outcome.changed);
        assert!(outcome.backup_path.is_none());
        assert_eq!(
            fs::read_to_string(ws.path().join(".kb/demo.txt")).unwrap(),
            "demo"
        );
        assert_eq!(mutations.len(), 1);
        assert!(!mutations[0].existed_before);
    }

    #[test]
    fn test_byte_equal_content_short_circuits() {
        let ws = TempDir::new().unwrap();
        fs::write(ws.path().join("demo.txt"), "demo").unwrap();
        let backups = ws.path().join("backups");
        let mut mutations = Vec::new();

        let outcome = apply_file(
            &op(FileAction::Ensure, "demo.txt", Some("demo")),
            &OperationMetadata::new("file-1", "noop"),
            &ctx(ws.path(), &backups),
            &mut mutations,
        )
        .unwrap();

        assert!(!outcome.changed);
        assert!(outcome.backup_path.is_none());
        assert!(mutations.is_empty());
        assert!(!backups.exists());
    }

    #[test]
    fn test_overwrite_backs_up_prior_bytes() {
        let ws = TempDir::new().unwrap();
        fs::write(ws.path().join("demo.txt"), "old").unwrap();
        let backups = ws.path().join("backups");
        let mut mutations = Vec::new();

        let outcome = apply_file(
            &op(FileAction::Update, "demo.txt", Some("new")),
            &OperationMetadata::new("file-1", "overwrite"),
            &ctx(ws.path(), &backups),
            &mut mutations,
        )
        .unwrap();

        assert!(outcome.changed);
        let backup = outcome.backup_path.unwrap();
        assert_eq!(fs::read_to_string(&backup).unwrap(), "old");
        assert_eq!(
            fs::read_to_string(ws.path().join("demo.txt")).unwrap(),
            "new"
        );
        let name = backup.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with("-file-1-demo.txt.bak"));
    }

    #[test]
    fn test_delete_existing_backs_up_then_removes() {
        let ws = TempDir::new().unwrap();
        fs::write(ws.path().join("demo.txt"), "bytes").unwrap();
        let backups = ws.path().join("backups");
        let mut mutations = Vec::new();

        let outcome = apply_file(
            &op(FileAction::Delete, "demo.txt", None),
            &OperationMetadata::new("file-1", "delete"),
            &ctx(ws.path(), &backups),
            &mut mutations,
        )
        .unwrap();

        assert!(outcome.changed);
        assert!(!ws.path().join("demo.txt").exists());
        assert_eq!(
            fs::read_to_string(outcome.backup_path.unwrap()).unwrap(),
            "bytes"
        );
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let ws = TempDir::new().unwrap();
        let backups = ws.path().join("backups");
        let mut mutations = Vec::new();

        let outcome = apply_file(
            &op(FileAction::Delete, "missing.txt", None),
            &OperationMetadata::new("file-1", "delete missing"),
            &ctx(ws.path(), &backups),
            &mut mutations,
        )
        .unwrap();

        assert!(!outcome.changed);
        assert!(mutations.is_empty());
    }

    #[test]
    fn test_path_escape_rejected_before_io() {
        let ws = TempDir::new().unwrap();
        let backups = ws.path().join("backups");
        let mut mutations = Vec::new();

        let err = apply_file(
            &op(FileAction::Ensure, "../outside.txt", Some("x")),
            &OperationMetadata::new("file-1", "escape"),
            &ctx(ws.path(), &backups),
            &mut mutations,
        )
        .unwrap_err();

        assert!(matches!(err, crate::error::Error::PathEscape(_)));
        assert!(mutations.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_mode_applied_after_write() {
        use std::os::unix::fs::PermissionsExt;

        let ws = TempDir::new().unwrap();
        let backups = ws.path().join("backups");
        let mut mutations = Vec::new();

        let mut file_op = op(FileAction::Ensure, "run.sh", Some("#!/bin/sh\n"));
        file_op.mode = Some(0o755);

        apply_file(
            &file_op,
            &OperationMetadata::new("file-1", "executable"),
            &ctx(ws.path(), &backups),
            &mut mutations,
        )
        .unwrap();

        let mode = fs::metadata(ws.path().join("run.sh"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
