//! End-to-end scenarios
//!
//! Each test builds a throwaway workspace under a temp dir and drives the
//! public API the way a caller would: pipeline, IR, plan and merge.
//!
//! Run with: cargo test --test scenarios

mod common;

use ang::diagnostics::CollectingSink;
use ang::error::{IR_SERVICE_DEPENDENCY_ERROR, IR_SEMANTIC_VALIDATE_ERROR};
use ang::ir::validate_ir_semantics;
use ang::merge::{get_merged_content, merge_file};
use ang::normalizer::NormalizedModel;
use ang::pipeline::{build_ir, run_pipeline};
use ang::plan::{apply_plan, build_plan, ChangeOp, PlanOptions, PlanStatus};
use common::{options, write, USER_API, USER_ENTITY};
use pretty_assertions::assert_eq;

const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

#[test]
fn test_empty_workspace() {
    let dir = tempfile::tempdir().unwrap();
    let sink = CollectingSink::new();

    let model = run_pipeline(dir.path(), &options(&sink)).unwrap();
    assert_eq!(model, NormalizedModel::default());
    assert!(sink.warnings().is_empty());

    let plan = build_plan(dir.path(), &PlanOptions::default()).unwrap();
    assert_eq!(plan.status, PlanStatus::Ok);
    assert!(plan.changes.is_empty());
    assert!(plan.diagnostics.is_empty());
    assert_eq!(plan.input_hash, EMPTY_SHA256);
    assert_eq!(plan.summary.add + plan.summary.update + plan.summary.delete, 0);
}

#[test]
fn test_single_entity_single_get_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "cue/domain/user.cue", USER_ENTITY);
    write(dir.path(), "cue/api/http.cue", USER_API);
    let sink = CollectingSink::new();

    let model = run_pipeline(dir.path(), &options(&sink)).unwrap();
    let schema = build_ir(&model).unwrap();

    assert_eq!(schema.entities.len(), 1);
    assert_eq!(schema.entities[0].name, "User");
    assert_eq!(schema.services.len(), 1);
    let svc = &schema.services[0];
    assert_eq!(svc.name, "svc1");
    let methods: Vec<&str> = svc.methods.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(methods, vec!["Op1"]);

    assert_eq!(schema.endpoints.len(), 1);
    let ep = &schema.endpoints[0];
    assert_eq!(
        (ep.method.as_str(), ep.path.as_str(), ep.service.as_str(), ep.rpc.as_str()),
        ("GET", "/api/svc1/1/{id}", "svc1", "Op1")
    );
    assert!(validate_ir_semantics(&schema).is_ok());
    assert!(sink.warnings().iter().all(|w| !w.is_error()));
}

#[test]
fn test_partial_projection_synthesis() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "cue/domain/user.cue",
        "package domain\n\n#User: {\n\tid: string\n\temail: string\n\tbio: string\n}\n",
    );
    write(
        dir.path(),
        "cue/repo/repositories.cue",
        r#"package repo

Repositories: {
	User: {
		finders: [
			{name: "FindSummaries", returns: "many", select: ["id", "email"]},
			{name: "ListSummaries", returns: "many", select: ["email", "id"]},
		]
	}
}
"#,
    );
    let sink = CollectingSink::new();
    let model = run_pipeline(dir.path(), &options(&sink)).unwrap();

    let projections: Vec<&str> = model
        .entities
        .iter()
        .map(|e| e.name.as_str())
        .filter(|n| n.ends_with("_Proj"))
        .collect();
    assert_eq!(projections, vec!["User_email_id_Proj"]);

    let repo = model.repos.iter().find(|r| r.entity == "User").unwrap();
    let types: Vec<&str> = repo.finders.iter().map(|f| f.return_type.as_str()).collect();
    assert_eq!(types, vec!["[]domain.User_email_id_Proj", "[]domain.User_email_id_Proj"]);
    assert!(sink.warnings().iter().all(|w| w.code != "ENTITY_PARTIAL_SELECT_ERROR"));
}

#[test]
fn test_service_cycle_detection() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "cue/api/ops.cue",
        r#"package api

DoA: {
	service: "A"
	uses: ["B"]
}

DoB: {
	service: "B"
	uses: ["A"]
}
"#,
    );
    let sink = CollectingSink::new();
    let model = run_pipeline(dir.path(), &options(&sink)).unwrap();

    let err = build_ir(&model).unwrap_err();
    assert!([IR_SERVICE_DEPENDENCY_ERROR, IR_SEMANTIC_VALIDATE_ERROR].contains(&err.code));
    let msg = err.to_string();
    assert!(msg.contains("cycle"), "{msg}");
    assert!(msg.contains("A, B"), "{msg}");
}

#[test]
fn test_fsm_undefined_state() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "cue/domain/order.cue",
        r#"package domain

#Order: {
	id: string
	status: string
	fsm: {
		field: "status"
		states: ["draft", "paid"]
		transitions: {
			paid: ["shipped"]
		}
	}
}
"#,
    );
    let sink = CollectingSink::new();
    run_pipeline(dir.path(), &options(&sink)).unwrap();

    let fsm: Vec<_> = sink
        .warnings()
        .into_iter()
        .filter(|w| w.code == "E_FSM_UNDEFINED_STATE")
        .collect();
    assert_eq!(fsm.len(), 1);
    let w = &fsm[0];
    assert_eq!(w.severity, "error");
    assert!(w.message.contains("shipped"), "{}", w.message);
    assert_eq!((w.file.as_str(), w.line), ("cue/domain/order.cue", 3));

    let plan = build_plan(dir.path(), &PlanOptions::default()).unwrap();
    assert_eq!(plan.status, PlanStatus::Fail);
}

#[test]
fn test_structural_merge_anti_reduction() {
    let dir = tempfile::tempdir().unwrap();
    let mut original = String::from("settings: {\n");
    for i in 0..38 {
        original.push_str(&format!("\tkey{i}: \"v{i}\"\n"));
    }
    original.push_str("}\n");
    write(dir.path(), "cue/project/settings.cue", &original);

    let mut patch = String::from("settings: {\n");
    for i in 0..10 {
        patch.push_str(&format!("\tkey{i}: \"w{i}\"\n"));
    }
    patch.push_str("}\n");

    let path = dir.path().join("cue/project/settings.cue");
    let err = get_merged_content(&path, "", &patch, true).unwrap_err();
    assert_eq!(err.to_string(), "CRITICAL_REDUCTION_DETECTED: file reduced from 40 to 12 lines");

    assert!(merge_file(dir.path(), "cue/project/settings.cue", "", &patch, true).is_err());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
}

#[test]
fn test_empty_string_default_loads() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "cue/domain/user.cue",
        "package domain\n\n#User: {\n\tid: string\n\tbio: string | *\"\"\n}\n",
    );
    let sink = CollectingSink::new();
    let model = run_pipeline(dir.path(), &options(&sink)).unwrap();

    let user = model.entities.iter().find(|e| e.name == "User").unwrap();
    let bio = user.fields.iter().find(|f| f.name == "bio").unwrap();
    assert_eq!(bio.type_name, "string");
    assert!(bio.default.is_empty());
    assert!(sink.warnings().iter().all(|w| !w.is_error()));
}

#[test]
fn test_applied_artifacts_are_deleted_once_no_longer_generated() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "cue/domain/user.cue", USER_ENTITY);
    write(dir.path(), "cue/api/http.cue", USER_API);

    let first = build_plan(dir.path(), &PlanOptions::default()).unwrap();
    assert_ne!(first.status, PlanStatus::Fail);
    let added: Vec<String> = first
        .changes
        .iter()
        .filter(|c| c.op == ChangeOp::Add)
        .map(|c| c.path.clone())
        .collect();
    assert!(!added.is_empty());
    assert_eq!(apply_plan(dir.path(), &first).unwrap(), first.changes.len());

    std::fs::remove_dir_all(dir.path().join("cue")).unwrap();
    let second = build_plan(dir.path(), &PlanOptions::default()).unwrap();
    let deleted: Vec<String> = second
        .changes
        .iter()
        .filter(|c| c.op == ChangeOp::Delete)
        .map(|c| c.path.clone())
        .collect();
    assert_eq!(deleted, added);
    assert_eq!(second.summary.delete, added.len());
}
