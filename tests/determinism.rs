//! Identical source trees must compile to identical results

mod common;

use std::collections::BTreeSet;

use ang::diagnostics::CollectingSink;
use ang::ir::to_canonical_json;
use ang::pipeline::{build_ir, run_pipeline};
use ang::plan::{build_plan, PlanOptions};
use common::{options, write};
use proptest::prelude::*;

/// Labels the normalizer or the parser treat specially
const RESERVED: &[&str] = &[
    "id", "fsm", "indexes", "methods", "description", "let", "if", "for", "in", "null", "true", "false", "import",
    "package",
];

fn entity_src(name: &str, fields: &BTreeSet<String>) -> String {
    let mut src = format!("package domain\n\n#{name}: {{\n\tid: string\n");
    for f in fields {
        src.push_str(&format!("\t{f}: string\n"));
    }
    src.push_str("}\n");
    src
}

fn api_src(entity: &str, service: &str) -> String {
    format!(
        "package api\n\nGet{entity}: {{\n\tservice: \"{service}\"\n\toutput: {{id: string}}\n}}\n\nHTTP: {{\n\tGet{entity}: {{method: \"GET\", path: \"/{service}/{{id}}\"}}\n}}\n"
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn test_pipeline_is_deterministic(
        entity in "[A-Z][a-z]{2,8}",
        service in "[a-z]{3,8}",
        fields in prop::collection::btree_set("[a-z]{2,6}", 0..5),
    ) {
        let fields: BTreeSet<String> = fields.into_iter().filter(|f| !RESERVED.contains(&f.as_str())).collect();
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), &format!("cue/domain/{}.cue", entity.to_lowercase()), &entity_src(&entity, &fields));
        write(dir.path(), "cue/api/http.cue", &api_src(&entity, &service));

        let first_sink = CollectingSink::new();
        let first = run_pipeline(dir.path(), &options(&first_sink)).unwrap();
        let second_sink = CollectingSink::new();
        let second = run_pipeline(dir.path(), &options(&second_sink)).unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first_sink.warnings(), second_sink.warnings());

        let mut ir_a = build_ir(&first).unwrap();
        let mut ir_b = build_ir(&second).unwrap();
        prop_assert_eq!(to_canonical_json(&mut ir_a).unwrap(), to_canonical_json(&mut ir_b).unwrap());

        let mut plan_a = build_plan(dir.path(), &PlanOptions::default()).unwrap();
        let mut plan_b = build_plan(dir.path(), &PlanOptions::default()).unwrap();
        plan_a.generated_at_utc.clear();
        plan_b.generated_at_utc.clear();
        for step in plan_a.steps.iter_mut().chain(plan_b.steps.iter_mut()) {
            step.duration_ms = 0;
        }
        prop_assert_eq!(plan_a, plan_b);
    }
}
