//! Behavioural scenarios: labels starting with `Scenario`

use anyhow::Result;
use ang_cue::Value;

use super::helpers::{clean_name, format_pos, get_int, get_string};
use super::types::{ScenarioDef, ScenarioExpect, ScenarioStep};
use super::Normalizer;

const DEFAULT_EXPECT_STATUS: i64 = 200;

fn json_object(v: Option<&Value>) -> serde_json::Map<String, serde_json::Value> {
    match v.map(Value::to_json) {
        Some(serde_json::Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    }
}

impl Normalizer<'_> {
    pub fn extract_scenarios(&self, val: &Value) -> Result<Vec<ScenarioDef>> {
        Ok(val
            .fields()
            .iter()
            .filter(|fv| fv.label.starts_with("Scenario"))
            .map(|fv| parse_scenario(&fv.label, &fv.value))
            .collect())
    }
}

fn parse_scenario(name: &str, val: &Value) -> ScenarioDef {
    let steps = val
        .lookup("steps")
        .and_then(Value::list)
        .unwrap_or_default()
        .iter()
        .map(|sv| {
            let expect = match sv.lookup("expect") {
                Some(exp) => ScenarioExpect {
                    status: get_int(exp, "status").unwrap_or(DEFAULT_EXPECT_STATUS),
                    body: json_object(exp.lookup("body")),
                },
                None => ScenarioExpect {
                    status: DEFAULT_EXPECT_STATUS,
                    body: serde_json::Map::new(),
                },
            };
            ScenarioStep {
                name: get_string(sv, "name"),
                action: get_string(sv, "action"),
                input: json_object(sv.lookup("input")),
                expect,
                export: sv
                    .lookup("export")
                    .map(Value::fields)
                    .unwrap_or_default()
                    .iter()
                    .map(|e| (clean_name(&e.label), e.value.as_str().unwrap_or_default().to_string()))
                    .collect(),
            }
        })
        .collect();
    ScenarioDef {
        name: name.to_string(),
        description: get_string(val, "description"),
        steps,
        source: format_pos(val),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingSink;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_extract_scenarios() {
        let sink = CollectingSink::new();
        let n = Normalizer::new(&sink);
        let src = r#"package api

ScenarioSignup: {
	description: "user signs up"
	steps: [
		{name: "register", action: "Register", input: {email: "a@b.c"}, export: {token: "body.token"}},
		{name: "me", action: "GetMe", expect: {status: 401, body: {error: "unauthorized"}}},
	]
}

Register: {service: "auth"}
"#;
        let val = ang_cue::load_package(&[("cue/api/s.cue".to_string(), src.to_string())]).unwrap();
        let scenarios = n.extract_scenarios(&val).unwrap();
        assert_eq!(scenarios.len(), 1);
        let steps = &scenarios[0].steps;
        assert_eq!(steps[0].expect.status, 200);
        assert_eq!(steps[0].input["email"], "a@b.c");
        assert_eq!(steps[0].export["token"], "body.token");
        assert_eq!(steps[1].expect.status, 401);
        assert_eq!(steps[1].expect.body["error"], "unauthorized");
    }
}
