// src/executor/content.rs

//! File content resolution
//!
//! A file operation's bytes come from the first available source: inline
//! `content` decoded with the declared encoding, the `rawContentBase64`
//! metadata annotation, or a template file rendered with `{{ var }}`
//! substitution. An operation with none of the three fails as
//! missing-content.

use crate::error::{Error, Result};
use crate::operation::{Encoding, FileOperation, OperationMetadata};
use base64::Engine as _;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Resolve the bytes a file operation would write
pub(crate) fn resolve_content(
    op: &FileOperation,
    metadata: &OperationMetadata,
    workspace_root: &Path,
) -> Result<Vec<u8>> {
    if let Some(content) = &op.content {
        return decode_declared(content, op.encoding, &metadata.id);
    }

    if let Some(encoded) = metadata.raw_content_base64() {
        return base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| Error::InvalidBase64 {
                id: metadata.id.clone(),
                reason: e.to_string(),
            });
    }

    if let Some(template) = &op.template {
        let source = if Path::new(&template.source).is_absolute() {
            PathBuf::from(&template.source)
        } else {
            workspace_root.join(&template.source)
        };
        let raw = fs::read_to_string(&source)?;
        return Ok(render_template(&raw, &template.variables).into_bytes());
    }

    Err(Error::MissingContent {
        id: metadata.id.clone(),
    })
}

fn decode_declared(content: &str, encoding: Encoding, id: &str) -> Result<Vec<u8>> {
    match encoding {
        Encoding::Utf8 => Ok(content.as_bytes().to_vec()),
        Encoding::Base64 => base64::engine::general_purpose::STANDARD
            .decode(content.as_bytes())
            .map_err(|e| Error::InvalidBase64 {
                id: id.to_string(),
                reason: e.to_string(),
            }),
    }
}

/// Substitute `{{ key }}` occurrences with the matching variable
///
/// Whitespace around the key is optional. Unknown keys are left untouched.
fn render_template(raw: &str, variables: &BTreeMap<String, Value>) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_.-]+)\s*\}\}").expect("template pattern is valid")
    });

    pattern
        .replace_all(raw, |caps: &Captures<'_>| match variables.get(&caps[1]) {
            Some(Value::String(s)) => s.clone(),
            Some(value) => value.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}
