// src/executor/config.rs

//! Configuration operation applier
//!
//! Applies `merge`/`set`/`unset` at a JSON pointer. Writing actions create
//! missing intermediate objects on the way to the pointer's parent; `unset`
//! never creates anything. If the resulting document deep-equals the prior
//! one, nothing is written and the operation reports unchanged.

use super::{MutationRecord, create_backup};
use crate::error::Result;
use crate::json::{merge_values, read_document, write_document};
use crate::operation::{ConfigAction, ConfigOperation, OperationMetadata};
use crate::path::resolve_in_workspace;
use crate::pointer;
use crate::registry::{ApplyOutcome, ExecuteContext};
use serde_json::{Map, Value};
use tracing::debug;

pub(crate) fn apply_config(
    op: &ConfigOperation,
    metadata: &OperationMetadata,
    ctx: &ExecuteContext<'_>,
    mutations: &mut Vec<MutationRecord>,
) -> Result<ApplyOutcome> {
    let target = resolve_in_workspace(ctx.workspace_root, &op.path)?;
    let existing = read_document(&target)?;
    let existed = existing.is_some();
    let doc = existing.unwrap_or_else(|| Value::Object(Map::new()));

    let tokens = pointer::decode(&op.pointer)?;

    let updated = match op.action {
        ConfigAction::Unset => {
            if tokens.is_empty() {
                // Root unset is a no-op
                return Ok(ApplyOutcome::unchanged());
            }
            match remove_at(&doc, &tokens) {
                Some(updated) => updated,
                None => return Ok(ApplyOutcome::unchanged()),
            }
        }
        ConfigAction::Set => {
            if tokens.is_empty() {
                // Root set is a no-op
                return Ok(ApplyOutcome::unchanged());
            }
            set_at(&doc, &tokens, op.value.clone().unwrap_or(Value::Null))
        }
        ConfigAction::Merge => {
            let incoming = op.value.clone().unwrap_or(Value::Null);
            if tokens.is_empty() {
                merge_values(&doc, &incoming, op.strategy)
            } else {
                let prior = pointer::resolve(&doc, &tokens).cloned().unwrap_or(Value::Null);
                let combined = if prior.is_object() && incoming.is_object() {
                    merge_values(&prior, &incoming, op.strategy)
                } else {
                    incoming
                };
                set_at(&doc, &tokens, combined)
            }
        }
    };

    if updated == doc {
        return Ok(ApplyOutcome::unchanged());
    }

    let backup = if existed {
        Some(create_backup(ctx.backup_dir, &metadata.id, &op.path, &target)?)
    } else {
        None
    };

    mutations.push(MutationRecord {
        target: target.clone(),
        backup: backup.clone(),
        existed_before: existed,
    });

    write_document(&target, &updated)?;
    debug!(path = %op.path, pointer = %op.pointer, action = ?op.action, "config updated");
    Ok(ApplyOutcome::changed(backup))
}

/// Replace the value at `tokens`, creating intermediate objects as needed
fn set_at(doc: &Value, tokens: &[String], value: Value) -> Value {
    let Some((last, parents)) = tokens.split_last() else {
        return value;
    };

    let mut updated = doc.clone();
    let mut cursor = &mut updated;
    for token in parents {
        if !cursor.is_object() {
            *cursor = Value::Object(Map::new());
        }
        cursor = cursor
            .as_object_mut()
            .expect("cursor was just made an object")
            .entry(token.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    if !cursor.is_object() {
        *cursor = Value::Object(Map::new());
    }
    if let Some(map) = cursor.as_object_mut() {
        map.insert(last.clone(), value);
    }

    updated
}

/// Remove the value at `tokens`; `None` when the path or key is absent
fn remove_at(doc: &Value, tokens: &[String]) -> Option<Value> {
    let (last, parents) = tokens.split_last()?;

    let mut updated = doc.clone();
    let mut cursor = &mut updated;
    for token in parents {
        cursor = cursor.as_object_mut()?.get_mut(token)?;
    }
    cursor.as_object_mut()?.remove(last)?;

    Some(updated)
}
