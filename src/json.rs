// src/json.rs

//! JSON document I/O and structural value helpers
//!
//! Configuration and manifest files are always read leniently (a missing or
//! empty file is an empty document) and written back pretty-printed with a
//! trailing newline. Equality is structural: arrays are order-sensitive,
//! object keys are not.

use crate::error::{Error, Result};
use crate::operation::MergeStrategy;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// Read a JSON document from disk
///
/// Returns `Ok(None)` when the file does not exist. An empty or
/// whitespace-only file reads as an empty object. Anything else must parse
/// as JSON or the read fails with [`Error::InvalidJson`].
pub fn read_document(path: &Path) -> Result<Option<Value>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if raw.trim().is_empty() {
        return Ok(Some(Value::Object(Map::new())));
    }

    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| Error::InvalidJson {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}

/// Write a JSON document pretty-printed with a trailing newline
pub fn write_document(path: &Path, value: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut rendered = serde_json::to_string_pretty(value)?;
    rendered.push('\n');
    fs::write(path, rendered)?;
    Ok(())
}

/// Check whether `value` is a deep subset of `target`
///
/// An object is a subset when every key it carries recursively equals (or
/// is a subset of) the target's value for that key. Everything else,
/// including arrays, compares by deep equality.
pub fn is_subset(value: &Value, target: &Value) -> bool {
    match value {
        Value::Object(map) => map.iter().all(|(key, inner)| {
            target
                .as_object()
                .and_then(|t| t.get(key))
                .is_some_and(|t| is_subset(inner, t))
        }),
        _ => value == target,
    }
}

/// Combine two values per the merge strategy
///
/// Both sides are expected to be objects; anything else makes the incoming
/// value win, which matches `set` semantics.
pub fn merge_values(existing: &Value, incoming: &Value, strategy: MergeStrategy) -> Value {
    let (Some(existing_map), Some(incoming_map)) = (existing.as_object(), incoming.as_object())
    else {
        return incoming.clone();
    };

    match strategy {
        MergeStrategy::Replace => incoming.clone(),
        MergeStrategy::Shallow => {
            let mut merged = existing_map.clone();
            for (key, value) in incoming_map {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        MergeStrategy::Deep => {
            let mut merged = existing_map.clone();
            for (key, value) in incoming_map {
                let combined = match merged.get(key) {
                    Some(prior) if prior.is_object() && value.is_object() => {
                        merge_values(prior, value, MergeStrategy::Deep)
                    }
                    _ => value.clone(),
                };
                merged.insert(key.clone(), combined);
            }
            Value::Object(merged)
        }
    }
}
