//! Message template catalog (`#Templates`)

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{bail, Result};
use ang_cue::{Value, ValueKind};

use super::helpers::{format_pos, get_string, string_list};
use super::types::TemplateDef;
use super::Normalizer;

pub const DEFAULT_ENGINE: &str = "go_template";

/// Trimmed, non-empty, first occurrence wins
fn normalize_vars(items: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}

fn under_dir(dir: &str, file: String) -> String {
    if dir.is_empty() || file.is_empty() || Path::new(&file).is_absolute() {
        return file;
    }
    format!("{}/{}", dir.trim_end_matches('/'), file)
}

impl Normalizer<'_> {
    /// `#Templates` as a list, or `{dir, items}`
    pub fn extract_templates(&self, val: &Value) -> Result<Vec<TemplateDef>> {
        let Some(catalog) = val.lookup("#Templates") else {
            return Ok(Vec::new());
        };
        let (dir, items) = if catalog.kind() == ValueKind::Struct {
            let Some(items) = catalog.lookup("items") else {
                bail!("#Templates.items is required when #Templates is a struct");
            };
            (get_string(catalog, "dir"), items)
        } else {
            (String::new(), catalog)
        };
        let Some(items) = items.list() else {
            bail!("templates must be a list");
        };

        let mut templates = Vec::with_capacity(items.len());
        for v in items {
            let mut id = get_string(v, "id");
            if id.is_empty() {
                id = get_string(v, "name");
            }
            if id.is_empty() {
                bail!("template id/name is required");
            }
            let mut kind = get_string(v, "kind");
            if kind.is_empty() {
                kind = "generic".to_string();
            }
            let mut channel = get_string(v, "channel");
            if channel.is_empty() && kind.eq_ignore_ascii_case("email") {
                channel = "email".to_string();
            }
            let mut engine = get_string(v, "engine");
            if engine.is_empty() {
                engine = DEFAULT_ENGINE.to_string();
            }
            let mut required = string_list(v.lookup("requiredVars"));
            if required.is_empty() {
                required = string_list(v.lookup("vars.required"));
            }
            let mut optional = string_list(v.lookup("optionalVars"));
            if optional.is_empty() {
                optional = string_list(v.lookup("vars.optional"));
            }
            let raw = |key: &str| v.lookup(key).and_then(Value::as_str).unwrap_or_default().to_string();

            let item = TemplateDef {
                kind,
                channel,
                engine,
                locale: get_string(v, "locale"),
                version: get_string(v, "version"),
                subject: raw("subject"),
                text: raw("text"),
                html: raw("html"),
                body: raw("body"),
                subject_file: under_dir(&dir, get_string(v, "subjectFile")),
                text_file: under_dir(&dir, get_string(v, "textFile")),
                html_file: under_dir(&dir, get_string(v, "htmlFile")),
                body_file: under_dir(&dir, get_string(v, "bodyFile")),
                required_vars: normalize_vars(required),
                optional_vars: normalize_vars(optional),
                source: format_pos(v),
                id,
            };
            let has_inline = [&item.subject, &item.text, &item.html, &item.body]
                .iter()
                .any(|s| !s.is_empty());
            let has_file = [&item.subject_file, &item.text_file, &item.html_file, &item.body_file]
                .iter()
                .any(|s| !s.is_empty());
            if !has_inline && !has_file {
                bail!(
                    "template {:?} has no content (subject/text/html/body or corresponding *File)",
                    item.id
                );
            }
            templates.push(item);
        }
        Ok(templates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingSink;
    use pretty_assertions::assert_eq;

    fn load(src: &str) -> Value {
        ang_cue::load_package(&[("cue/infra/templates.cue".to_string(), src.to_string())]).unwrap()
    }

    #[test]
    fn test_extract_templates_with_dir() {
        let sink = CollectingSink::new();
        let n = Normalizer::new(&sink);
        let src = r#"package infra

#Templates: {
	dir: "emails"
	items: [{
		id: "tender_created_email"
		kind: "email"
		subject: "Tender created"
		textFile: "tender_created.txt"
		requiredVars: ["temporary_token", "ttl_minutes", "ttl_minutes"]
	}]
}
"#;
        let templates = n.extract_templates(&load(src)).unwrap();
        let t = &templates[0];
        assert_eq!(t.channel, "email");
        assert_eq!(t.engine, DEFAULT_ENGINE);
        assert_eq!(t.text_file, "emails/tender_created.txt");
        assert_eq!(t.required_vars, vec!["temporary_token", "ttl_minutes"]);
    }

    #[test]
    fn test_vars_block_and_missing_content() {
        let sink = CollectingSink::new();
        let n = Normalizer::new(&sink);
        let ok = load("package infra\n\n#Templates: [{id: \"a\", body: \"{{.x}}\", vars: {required: [\"x\"], optional: [\"y\"]}}]\n");
        let templates = n.extract_templates(&ok).unwrap();
        assert_eq!(templates[0].required_vars, vec!["x"]);
        assert_eq!(templates[0].optional_vars, vec!["y"]);
        assert_eq!(templates[0].kind, "generic");

        let empty = load("package infra\n\n#Templates: [{id: \"b\"}]\n");
        let err = n.extract_templates(&empty).unwrap_err();
        assert!(err.to_string().contains("has no content"));
    }
}
