// src/executor/script.rs

//! Script operation applier
//!
//! Edits the `scripts` map of a JSON manifest (typically `package.json`).
//! When the manifest already carries a different command for the name, the
//! operation's conflict resolution decides: `keep` leaves it alone,
//! `replace` overwrites, and `prompt` overwrites only under auto-confirm.

use super::{MutationRecord, create_backup};
use crate::error::{Error, Result};
use crate::json::{read_document, write_document};
use crate::operation::{
    OperationMetadata, ScriptAction, ScriptConflictResolution, ScriptOperation,
};
use crate::path::resolve_in_workspace;
use crate::registry::{ApplyOutcome, ExecuteContext};
use serde_json::{Map, Value};
use tracing::debug;

pub(crate) fn apply_script(
    op: &ScriptOperation,
    metadata: &OperationMetadata,
    ctx: &ExecuteContext<'_>,
    mutations: &mut Vec<MutationRecord>,
) -> Result<ApplyOutcome> {
    let target = resolve_in_workspace(ctx.workspace_root, &op.file)?;
    let existing = read_document(&target)?;
    let existed = existing.is_some();
    let doc = existing.unwrap_or_else(|| Value::Object(Map::new()));

    if !doc.is_object() {
        return Err(Error::InvalidJson {
            path: op.file.clone(),
            reason: "manifest root is not an object".to_string(),
        });
    }

    let current = doc
        .get("scripts")
        .and_then(|scripts| scripts.get(&op.name))
        .cloned();

    let mut updated = doc.clone();

    match op.action {
        ScriptAction::Delete => {
            if current.is_none() {
                return Ok(ApplyOutcome::unchanged());
            }
            if let Some(scripts) = updated.get_mut("scripts").and_then(Value::as_object_mut) {
                scripts.remove(&op.name);
            }
        }
        ScriptAction::Ensure | ScriptAction::Update => {
            let Some(command) = &op.command else {
                return Err(Error::MissingContent {
                    id: metadata.id.clone(),
                });
            };
            let desired = Value::String(command.clone());

            if current.as_ref() == Some(&desired) {
                return Ok(ApplyOutcome::unchanged());
            }

            if current.is_some() {
                match op.conflict_resolution {
                    ScriptConflictResolution::Keep => return Ok(ApplyOutcome::unchanged()),
                    ScriptConflictResolution::Replace => {}
                    ScriptConflictResolution::Prompt => {
                        if !ctx.auto_confirm {
                            return Err(Error::ScriptConflict {
                                name: op.name.clone(),
                                file: op.file.clone(),
                            });
                        }
                    }
                }
            }

            if let Some(map) = updated.as_object_mut() {
                let scripts = map
                    .entry("scripts".to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !scripts.is_object() {
                    *scripts = Value::Object(Map::new());
                }
                if let Some(scripts) = scripts.as_object_mut() {
                    scripts.insert(op.name.clone(), desired);
                }
            }
        }
    }

    if updated == doc {
        return Ok(ApplyOutcome::unchanged());
    }

    let backup = if existed {
        Some(create_backup(ctx.backup_dir, &metadata.id, &op.file, &target)?)
    } else {
        None
    };

    mutations.push(MutationRecord {
        target: target.clone(),
        backup: backup.clone(),
        existed_before: existed,
    });

    write_document(&target, &updated)?;
    debug!(file = %op.file, name = %op.name, action = ?op.action, "script entry updated");
    Ok(ApplyOutcome::changed(backup))
}
