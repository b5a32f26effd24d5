// src/error.rs

//! Crate-wide error type
//!
//! Every fallible operation in the engine returns [`Result`]. Plan-time
//! diagnostics (missing dependencies, cycles) are surfaced as plan warnings
//! rather than errors; everything here is fatal to the operation that
//! raised it and triggers rollback during execution.

use thiserror::Error;

/// Errors raised by the setup engine
#[derive(Debug, Error)]
pub enum Error {
    /// Operation path resolves outside the workspace root
    #[error("Path escapes workspace root: {0}")]
    PathEscape(String),

    /// Path is empty or otherwise unusable after sanitization
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// No built-in or registered executor for the operation kind
    #[error("Unsupported operation kind '{kind}' for operation '{id}'")]
    UnsupportedKind { kind: String, id: String },

    /// File operation carries no inline content, annotation bytes, or template
    #[error(
        "Operation '{id}' has no content source: expected inline content, \
         a rawContentBase64 annotation, or a template"
    )]
    MissingContent { id: String },

    /// A configuration or manifest file failed to parse as JSON
    #[error("Invalid JSON in {path}: {reason}")]
    InvalidJson { path: String, reason: String },

    /// Existing script differs and resolution is `prompt` without auto-confirm
    #[error(
        "Script '{name}' in {file} already has a different command. \
         Re-run with auto-confirm, or set conflictResolution to 'replace' or 'keep'"
    )]
    ScriptConflict { name: String, file: String },

    /// JSON pointer does not follow the RFC 6901 subset
    #[error("Invalid JSON pointer '{0}': must be empty or start with '/'")]
    InvalidPointer(String),

    /// Base64 payload (inline content or annotation) failed to decode
    #[error("Invalid base64 content in operation '{id}': {reason}")]
    InvalidBase64 { id: String, reason: String },

    /// Another run holds the backup-directory lock
    #[error("Failed to acquire setup lock: {0}")]
    LockUnavailable(String),

    /// Underlying filesystem call failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;
