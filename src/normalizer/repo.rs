//! Repository and finder extraction

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{bail, Result};
use ang_cue::Value;

use super::helpers::{clean_name, format_pos, get_bool, get_int, get_string, string_list};
use super::types::{FinderWhere, Repository, RepositoryFinder};
use super::Normalizer;

impl Normalizer<'_> {
    /// Repositories named by `Services.*.owns`, `Repositories` keys and the
    /// members of legacy `*Repository` blocks, in that order
    pub fn extract_repositories(&self, val: &Value) -> Result<Vec<Repository>> {
        let mut repos = Vec::new();
        let mut seen = BTreeSet::new();
        let mut add = |entity: &str, source: String| {
            let entity = entity.trim();
            if entity.is_empty() {
                return;
            }
            let name = format!("{entity}Repository");
            if seen.insert(name.clone()) {
                repos.push(Repository {
                    name,
                    entity: entity.to_string(),
                    finders: Vec::new(),
                    source,
                });
            }
        };

        if let Some(services) = val.lookup("Services") {
            for svc in services.fields() {
                for entity in string_list(svc.value.lookup("owns")) {
                    add(&entity, format_pos(&svc.value));
                }
            }
        }
        if let Some(declared) = val.lookup("Repositories") {
            for fv in declared.fields() {
                add(&clean_name(&fv.label), format_pos(&fv.value));
            }
        }
        for fv in val.fields() {
            if !fv.label.ends_with("Repository") || fv.label == "Repositories" {
                continue;
            }
            for member in fv.value.fields() {
                add(&clean_name(&member.label), format_pos(&member.value));
            }
        }
        Ok(repos)
    }

    /// Finders declared under `Repositories.<Entity>.finders`, keyed by entity
    pub fn extract_repo_finders(&self, val: &Value) -> Result<BTreeMap<String, Vec<RepositoryFinder>>> {
        let mut result: BTreeMap<String, Vec<RepositoryFinder>> = BTreeMap::new();
        let Some(declared) = val.lookup("Repositories") else {
            return Ok(result);
        };
        for repo in declared.fields() {
            let entity = clean_name(&repo.label);
            let Some(finders) = repo.value.lookup("finders") else {
                continue;
            };
            let Some(items) = finders.list() else {
                bail!("Repositories.{entity}.finders must be a list");
            };
            for fv in items {
                let name = get_string(fv, "name");
                if name.is_empty() {
                    continue;
                }
                let finder = RepositoryFinder {
                    action: get_string(fv, "action"),
                    returns: get_string(fv, "returns"),
                    return_type: get_string(fv, "return_type"),
                    select: string_list(fv.lookup("select")),
                    scan_fields: string_list(fv.lookup("scan_fields")),
                    where_clauses: parse_where(fv),
                    order_by: get_string(fv, "order_by"),
                    limit: get_int(fv, "limit").filter(|l| *l > 0).unwrap_or(0),
                    for_update: get_bool(fv, "for_update").unwrap_or(false),
                    custom_sql: get_string(fv, "sql"),
                    source: format_pos(fv),
                    name,
                };
                result.entry(entity.clone()).or_default().push(finder);
            }
        }
        Ok(result)
    }
}

fn parse_where(finder: &Value) -> Vec<FinderWhere> {
    finder
        .lookup("where")
        .and_then(Value::list)
        .unwrap_or_default()
        .iter()
        .filter_map(|w| {
            let field = get_string(w, "field");
            if field.is_empty() {
                return None;
            }
            let mut param = get_string(w, "param");
            if param.is_empty() {
                param = field.clone();
            }
            let mut param_type = get_string(w, "param_type");
            if param_type.is_empty() {
                param_type = "string".to_string();
            }
            Some(FinderWhere {
                op: get_string(w, "op"),
                field,
                param,
                param_type,
            })
        })
        .collect()
}
