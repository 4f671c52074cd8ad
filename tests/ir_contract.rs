//! Golden IR contract
//!
//! The canonical JSON of a fixed fixture workspace is compared against
//! `tests/snapshots/ir_contract.json`. Regenerate after an intended IR change
//! with: UPDATE_IR_CONTRACT=1 cargo test --test ir_contract

mod common;

use std::path::PathBuf;

use ang::diagnostics::CollectingSink;
use ang::ir::{to_canonical_json, IR_VERSION_CURRENT};
use ang::pipeline::{build_ir, run_pipeline};
use common::{options, write, USER_API, USER_ENTITY};
use pretty_assertions::assert_eq;

fn snapshot_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("snapshots")
        .join("ir_contract.json")
}

fn fixture_ir() -> String {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "cue/domain/user.cue", USER_ENTITY);
    write(dir.path(), "cue/api/http.cue", USER_API);
    write(
        dir.path(),
        "cue/repo/repositories.cue",
        "package repo\n\nRepositories: {\n\tUser: {\n\t\tfinders: [{name: \"FindByEmail\", returns: \"one\", where: [{field: \"email\", op: \"=\"}]}]\n\t}\n}\n",
    );
    let sink = CollectingSink::new();
    let model = run_pipeline(dir.path(), &options(&sink)).unwrap();
    let mut schema = build_ir(&model).unwrap();
    to_canonical_json(&mut schema).unwrap()
}

#[test]
fn test_ir_contract_snapshot() {
    let actual = fixture_ir();
    let value: serde_json::Value = serde_json::from_str(&actual).unwrap();
    assert_eq!(value["ir_version"], IR_VERSION_CURRENT);

    let path = snapshot_path();
    let update = std::env::var("UPDATE_IR_CONTRACT").is_ok_and(|v| v == "1");
    if update || !path.exists() {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, &actual).unwrap();
        return;
    }
    let expected = std::fs::read_to_string(&path).unwrap();
    assert_eq!(actual, expected, "IR contract changed; rerun with UPDATE_IR_CONTRACT=1 if intended");
}

#[test]
fn test_canonical_json_is_stable_across_runs() {
    assert_eq!(fixture_ir(), fixture_ir());
}
