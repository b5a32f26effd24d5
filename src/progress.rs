// src/progress.rs

//! Per-operation progress events
//!
//! Callers opt into progress reporting by attaching a callback to the
//! execute options. The executor emits one `running` (or `pending` under
//! dry-run) event before each operation and a terminal event after it;
//! `skipped` is the terminal status of every dry-run operation.

use crate::operation::SetupOperation;
use serde::Serialize;

/// Lifecycle status of an operation inside a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Pending,
    Running,
    Completed,
    Skipped,
    Failed,
}

/// One progress notification
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub stage_id: String,
    pub operation: SetupOperation,
    pub status: ProgressStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Opt-in callback invoked for every progress event
pub type ProgressCallback = Box<dyn Fn(&ProgressEvent) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{CodeOperation, Operation, OperationMetadata};

    #[test]
    fn test_event_serializes_with_camel_case_keys() {
        let event = ProgressEvent {
            stage_id: "stage-1".to_string(),
            operation: SetupOperation::new(
                Operation::Code(CodeOperation {
                    path: "src/lib.rs".to_string(),
                    patch: None,
                }),
                OperationMetadata::new("code-1", "patch"),
            ),
            status: ProgressStatus::Failed,
            error: Some("unsupported".to_string()),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["stageId"], "stage-1");
        assert_eq!(value["status"], "failed");
        assert_eq!(value["operation"]["metadata"]["id"], "code-1");
    }
}
