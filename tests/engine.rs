// tests/engine.rs

//! End-to-end pipeline tests
//!
//! Each test drives the full analyze -> plan -> execute pipeline against a
//! temporary workspace and checks the on-disk outcome: idempotency,
//! dependency ordering, transactional rollback, backup coverage, and the
//! persisted setup log.

use serde_json::json;
use setforge::{
    ConfigAction, ConfigOperation, EngineConfig, ExecuteOptions, FileAction, FileDiffStatus,
    FileOperation, MergeStrategy, Operation, OperationMetadata, RiskLevel, SetupEngine,
    SetupOperation, engine_for, load_log, replay_rollback,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn file_ensure(id: &str, path: &str, content: &str) -> SetupOperation {
    SetupOperation::new(
        Operation::File(FileOperation {
            action: FileAction::Ensure,
            path: path.to_string(),
            content: Some(content.to_string()),
            template: None,
            encoding: Default::default(),
            mode: None,
            checksum: None,
        }),
        OperationMetadata::new(id, format!("ensure {path}")),
    )
}

fn config_merge(id: &str, path: &str, pointer: &str, value: serde_json::Value) -> SetupOperation {
    SetupOperation::new(
        Operation::Config(ConfigOperation {
            action: ConfigAction::Merge,
            path: path.to_string(),
            pointer: pointer.to_string(),
            value: Some(value),
            strategy: MergeStrategy::Deep,
            conflict_resolution: None,
        }),
        OperationMetadata::new(id, format!("merge {pointer} in {path}")),
    )
}

fn code_op(id: &str) -> SetupOperation {
    SetupOperation::new(
        Operation::Code(setforge::CodeOperation {
            path: "src/lib.rs".to_string(),
            patch: None,
        }),
        OperationMetadata::new(id, "unsupported code patch"),
    )
}

fn with_deps(mut op: SetupOperation, deps: &[&str]) -> SetupOperation {
    op.metadata.dependencies = deps.iter().map(|d| d.to_string()).collect();
    op
}

#[test]
fn create_new_file_in_empty_workspace() {
    let ws = TempDir::new().unwrap();
    let engine = engine_for(ws.path());
    let ops = [file_ensure("file-1", ".kb/demo.txt", "demo")];

    let plan = engine.plan(&ops);
    assert_eq!(plan.stages.len(), 1);
    assert_eq!(plan.diff.files.len(), 1);
    assert_eq!(plan.diff.files[0].status, FileDiffStatus::Created);
    assert_eq!(plan.diff.summary.created, 1);

    let result = engine.execute(&plan, ExecuteOptions::new()).unwrap();

    assert!(result.success);
    assert_eq!(result.applied.len(), 1);
    assert_eq!(
        fs::read_to_string(ws.path().join(".kb/demo.txt")).unwrap(),
        "demo"
    );
    assert!(result.artifacts.backups.is_empty());

    let log_path = result.log_path.expect("log file written");
    assert!(log_path.exists());
    let entries = load_log(&log_path).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].operation.metadata.id, "file-1");
    assert!(!entries[0].before.exists);
    assert!(entries[0].after.as_ref().unwrap().exists);
}

#[test]
fn idempotent_rerun_applies_nothing() {
    let ws = TempDir::new().unwrap();
    fs::create_dir_all(ws.path().join(".kb")).unwrap();
    fs::write(ws.path().join(".kb/demo.txt"), "demo").unwrap();

    let engine = engine_for(ws.path());
    let ops = [file_ensure("file-1", ".kb/demo.txt", "demo")];

    let analysis = engine.analyze(&ops);
    assert!(!analysis["file-1"].needed);

    // the planner is not short-circuited by analysis
    let plan = engine.plan(&ops);
    assert_eq!(plan.diff.files[0].status, FileDiffStatus::Modified);

    let before_mtime = fs::metadata(ws.path().join(".kb/demo.txt"))
        .unwrap()
        .modified()
        .unwrap();

    let result = engine.execute(&plan, ExecuteOptions::new()).unwrap();

    assert!(result.success);
    assert!(result.applied.is_empty());
    assert!(result.artifacts.backups.is_empty());
    assert_eq!(
        fs::read_to_string(ws.path().join(".kb/demo.txt")).unwrap(),
        "demo"
    );
    assert_eq!(
        fs::metadata(ws.path().join(".kb/demo.txt"))
            .unwrap()
            .modified()
            .unwrap(),
        before_mtime
    );
}

#[test]
fn deep_config_merge_subset_is_noop() {
    let ws = TempDir::new().unwrap();
    fs::create_dir_all(ws.path().join(".kb")).unwrap();
    fs::write(
        ws.path().join(".kb/kb-labs.config.json"),
        r#"{"plugins":{"demo":{"enabled":true,"level":"strict"}}}"#,
    )
    .unwrap();

    let engine = engine_for(ws.path());
    let ops = [config_merge(
        "config-1",
        ".kb/kb-labs.config.json",
        "/plugins/demo",
        json!({"enabled": true}),
    )];

    let analysis = engine.analyze(&ops);
    assert!(!analysis["config-1"].needed);

    let raw_before = fs::read_to_string(ws.path().join(".kb/kb-labs.config.json")).unwrap();
    let result = engine.run(&ops, ExecuteOptions::new()).unwrap();

    assert!(result.success);
    assert!(result.applied.is_empty());
    assert_eq!(
        fs::read_to_string(ws.path().join(".kb/kb-labs.config.json")).unwrap(),
        raw_before
    );
}

#[test]
fn dependencies_order_stages() {
    let ws = TempDir::new().unwrap();
    let engine = engine_for(ws.path());

    let ops = [
        with_deps(
            config_merge("config-1", ".kb/config.json", "/demo", json!({"on": true})),
            &["file-1"],
        ),
        file_ensure("file-1", ".kb/demo.txt", "demo"),
    ];

    let plan = engine.plan(&ops);

    assert_eq!(plan.stages.len(), 2);
    assert_eq!(plan.stages[0].operations.len(), 1);
    assert_eq!(plan.stages[0].operations[0].metadata.id, "file-1");
    assert_eq!(plan.stages[1].operations.len(), 1);
    assert_eq!(plan.stages[1].operations[0].metadata.id, "config-1");

    let result = engine.execute(&plan, ExecuteOptions::new()).unwrap();
    assert!(result.success);
    assert_eq!(result.applied.len(), 2);
}

#[test]
fn failure_rolls_back_earlier_operations() {
    let ws = TempDir::new().unwrap();
    let engine = engine_for(ws.path());

    let ops = [file_ensure("file-1", ".kb/demo.txt", "demo"), code_op("code-1")];
    let result = engine.run(&ops, ExecuteOptions::new()).unwrap();

    assert!(!result.success);
    assert_eq!(result.failed[0].operation.metadata.id, "code-1");
    assert!(result.rollback_available);
    // the file created by file-1 is gone again
    assert!(!ws.path().join(".kb/demo.txt").exists());
}

#[test]
fn missing_dependency_warns_but_runs() {
    let ws = TempDir::new().unwrap();
    let engine = engine_for(ws.path());

    let ops = [with_deps(
        file_ensure("file-1", ".kb/demo.txt", "demo"),
        &["missing-op"],
    )];
    let plan = engine.plan(&ops);

    assert!(plan.warnings[0].contains("missing-op"));
    assert_eq!(plan.stages.len(), 1);
    assert_eq!(plan.stages[0].operations[0].metadata.id, "file-1");

    let result = engine.execute(&plan, ExecuteOptions::new()).unwrap();
    assert!(result.success);
    assert_eq!(result.applied.len(), 1);
}

#[test]
fn path_escape_fails_without_touching_anything() {
    let ws = TempDir::new().unwrap();
    let outside = ws.path().join("outside");
    let inner = ws.path().join("inner");
    fs::create_dir_all(&inner).unwrap();

    let engine = engine_for(&inner);
    let result = engine
        .run(
            &[file_ensure("file-1", "../outside/evil.txt", "x")],
            ExecuteOptions::new(),
        )
        .unwrap();

    assert!(!result.success);
    assert!(!outside.exists());
}

#[test]
fn backups_cover_every_mutated_existing_file() {
    let ws = TempDir::new().unwrap();
    fs::write(ws.path().join("one.txt"), "one-before").unwrap();
    fs::write(ws.path().join("two.txt"), "two-before").unwrap();

    let engine = engine_for(ws.path());
    let ops = [
        file_ensure("file-1", "one.txt", "one-after"),
        file_ensure("file-2", "two.txt", "two-after"),
        file_ensure("file-3", "three.txt", "created"),
    ];

    let result = engine.run(&ops, ExecuteOptions::new()).unwrap();
    assert!(result.success);

    // one backup per mutated pre-existing file, byte-equal to the prior state
    assert_eq!(result.artifacts.backups.len(), 2);
    let mut contents: Vec<String> = result
        .artifacts
        .backups
        .iter()
        .map(|b| fs::read_to_string(b).unwrap())
        .collect();
    contents.sort();
    assert_eq!(contents, vec!["one-before", "two-before"]);

    // a backup exists on disk iff its journal entry records it
    let entries = load_log(&result.log_path.unwrap()).unwrap();
    for entry in &entries {
        match &entry.backup_path {
            Some(path) => assert!(path.exists()),
            None => assert_eq!(entry.operation.metadata.id, "file-3"),
        }
    }
}

#[test]
fn diff_matches_apply_outcome() {
    let ws = TempDir::new().unwrap();
    fs::write(ws.path().join("existing.txt"), "before").unwrap();
    fs::write(ws.path().join("doomed.txt"), "bytes").unwrap();

    let engine = engine_for(ws.path());
    let delete = SetupOperation::new(
        Operation::File(FileOperation {
            action: FileAction::Delete,
            path: "doomed.txt".to_string(),
            content: None,
            template: None,
            encoding: Default::default(),
            mode: None,
            checksum: None,
        }),
        OperationMetadata::new("file-3", "delete doomed"),
    );
    let ops = [
        file_ensure("file-1", "fresh.txt", "fresh"),
        file_ensure("file-2", "existing.txt", "after"),
        delete,
    ];

    let plan = engine.plan(&ops);
    let by_path: std::collections::HashMap<_, _> = plan
        .diff
        .files
        .iter()
        .map(|f| (f.path.clone(), f.clone()))
        .collect();

    assert_eq!(by_path["fresh.txt"].status, FileDiffStatus::Created);
    assert_eq!(by_path["existing.txt"].status, FileDiffStatus::Modified);
    assert_eq!(by_path["doomed.txt"].status, FileDiffStatus::Deleted);
    assert_eq!(plan.diff.summary.created, 1);
    assert_eq!(plan.diff.summary.modified, 1);
    assert_eq!(plan.diff.summary.deleted, 1);

    let result = engine.execute(&plan, ExecuteOptions::new()).unwrap();
    assert!(result.success);

    // created: did not exist before; deleted: gone after; modified: equals preview.after
    assert!(!ws.path().join("doomed.txt").exists());
    assert_eq!(
        fs::read_to_string(ws.path().join("existing.txt")).unwrap(),
        by_path["existing.txt"]
            .preview
            .as_ref()
            .unwrap()
            .after
            .as_deref()
            .unwrap()
    );
}

#[test]
fn risk_rollup_is_max_over_operations() {
    let ws = TempDir::new().unwrap();
    fs::write(ws.path().join("existing.txt"), "before").unwrap();

    let engine = engine_for(ws.path());
    let ops = [
        file_ensure("file-1", "fresh.txt", "safe create"),
        file_ensure("file-2", "existing.txt", "moderate overwrite"),
    ];

    let plan = engine.plan(&ops);
    assert_eq!(plan.risks.by_operation["file-1"], RiskLevel::Safe);
    assert_eq!(plan.risks.by_operation["file-2"], RiskLevel::Moderate);
    assert_eq!(
        plan.risks.overall,
        plan.risks.by_operation.values().copied().max().unwrap()
    );
}

#[test]
fn persisted_log_replays_into_full_rollback() {
    let ws = TempDir::new().unwrap();
    fs::write(ws.path().join("tracked.json"), "{\n  \"old\": true\n}\n").unwrap();

    let engine = engine_for(ws.path());
    let ops = [
        file_ensure("file-1", "generated/new.txt", "created by run"),
        config_merge("config-1", "tracked.json", "/plugins", json!({"demo": true})),
    ];

    let result = engine.run(&ops, ExecuteOptions::new()).unwrap();
    assert!(result.success);
    let log_path = result.log_path.unwrap();

    replay_rollback(&log_path, ws.path()).unwrap();

    assert!(!ws.path().join("generated/new.txt").exists());
    assert_eq!(
        fs::read_to_string(ws.path().join("tracked.json")).unwrap(),
        "{\n  \"old\": true\n}\n"
    );
}

#[test]
fn custom_backup_dir_and_snapshot_cap() {
    let ws = TempDir::new().unwrap();
    let backups = ws.path().join("alt-backups");
    let config = EngineConfig::new(ws.path())
        .with_backup_dir(&backups)
        .with_snapshot_cap(8);
    let engine = SetupEngine::new(config);

    let long_content = "0123456789abcdef";
    let result = engine
        .run(
            &[file_ensure("file-1", "big.txt", long_content)],
            ExecuteOptions::new(),
        )
        .unwrap();

    let log_path = result.log_path.unwrap();
    assert!(log_path.starts_with(&backups));

    let entries = load_log(&log_path).unwrap();
    let after = entries[0].after.as_ref().unwrap();
    assert_eq!(after.content.as_deref(), Some("<truncated 16 bytes>"));
    // checksum still covers the full bytes
    assert_eq!(
        after.checksum.as_deref(),
        Some(setforge::hash::sha256_hex(long_content.as_bytes()).as_str())
    );
}

#[test]
fn second_run_after_mutation_converges() {
    // run once, mutate by hand, run again: the engine converges the
    // workspace back to the declared state and backs up the manual edit
    let ws = TempDir::new().unwrap();
    let engine = engine_for(ws.path());
    let ops = [file_ensure("file-1", ".kb/demo.txt", "demo")];

    engine.run(&ops, ExecuteOptions::new()).unwrap();
    fs::write(ws.path().join(".kb/demo.txt"), "hand edited").unwrap();

    let result = engine.run(&ops, ExecuteOptions::new()).unwrap();
    assert!(result.success);
    assert_eq!(result.applied.len(), 1);
    assert_eq!(
        fs::read_to_string(ws.path().join(".kb/demo.txt")).unwrap(),
        "demo"
    );
    assert_eq!(result.artifacts.backups.len(), 1);
    assert_eq!(
        fs::read_to_string(&result.artifacts.backups[0]).unwrap(),
        "hand edited"
    );
}

#[test]
fn dry_run_reports_without_mutating() {
    let ws = TempDir::new().unwrap();
    let engine = engine_for(ws.path());
    let ops = [
        file_ensure("file-1", ".kb/demo.txt", "demo"),
        config_merge("config-1", ".kb/config.json", "/demo", json!({"on": true})),
    ];

    let result = engine.run(&ops, ExecuteOptions::new().dry_run(true)).unwrap();

    assert!(result.success);
    assert!(result.applied.is_empty());
    assert!(!result.rollback_available);
    assert!(result.log_path.is_none());
    assert!(fs::read_dir(ws.path()).unwrap().next().is_none());
}

fn workspace_snapshot(root: &Path) -> Vec<(String, Vec<u8>)> {
    fn walk(dir: &Path, root: &Path, out: &mut Vec<(String, Vec<u8>)>) {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(&path, root, out);
            } else {
                let rel = path.strip_prefix(root).unwrap().display().to_string();
                out.push((rel, fs::read(&path).unwrap()));
            }
        }
    }
    let mut out = Vec::new();
    walk(root, root, &mut out);
    out.sort();
    out
}

#[test]
fn failed_run_leaves_workspace_byte_identical() {
    let ws = TempDir::new().unwrap();
    fs::create_dir_all(ws.path().join("src")).unwrap();
    fs::write(ws.path().join("src/app.txt"), "app before").unwrap();
    fs::write(ws.path().join("package.json"), "{\"name\":\"pkg\"}\n").unwrap();

    // Backups land outside the workspace so the snapshot comparison only
    // sees operation targets
    let backups = TempDir::new().unwrap();
    let engine = SetupEngine::new(EngineConfig::new(ws.path()).with_backup_dir(backups.path()));

    let before = workspace_snapshot(ws.path());

    let ops = [
        file_ensure("file-1", "src/app.txt", "app after"),
        file_ensure("file-2", "src/new.txt", "brand new"),
        config_merge("config-1", "package.json", "/setforge", json!({"managed": true})),
        code_op("code-1"),
    ];
    let result = engine.run(&ops, ExecuteOptions::new()).unwrap();

    assert!(!result.success);
    assert_eq!(result.failed[0].operation.metadata.id, "code-1");
    assert_eq!(workspace_snapshot(ws.path()), before);
}
