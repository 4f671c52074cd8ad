//! Implicit projections for finders that select part of an entity
//!
//! A finder that returns its entity but selects a strict subset of the
//! entity's columns cannot scan into the full domain struct. For such finders
//! a projection entity is synthesized and the return type rewritten to it.
//! Projections are keyed by the sorted column set, so two finders selecting
//! the same columns in a different order share one projection.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::json;

use super::helpers::{snake_case, split_source};
use super::types::{Entity, Field, RepositoryFinder};
use crate::diagnostics::{Warning, WarningSink, SEVERITY_ERROR};

pub const ENTITY_PARTIAL_SELECT_ERROR: &str = "ENTITY_PARTIAL_SELECT_ERROR";

fn returns_entity(finder: &RepositoryFinder, entity: &str) -> bool {
    if !matches!(finder.returns.trim(), "one" | "many") {
        return false;
    }
    let ret = finder.return_type.trim();
    ret.is_empty()
        || ret
            .trim_start_matches('*')
            .trim_start_matches("[]")
            .trim_start_matches("domain.")
            == entity
}

/// Columns of the entity's domain struct, keyed by snake_case name
fn domain_columns(entity: &Entity) -> BTreeMap<String, &Field> {
    entity
        .fields
        .iter()
        .filter(|f| !f.skip_domain)
        .map(|f| (snake_case(&f.name), f))
        .collect()
}

pub fn projection_name(entity: &str, columns: &BTreeSet<String>) -> String {
    let joined: Vec<&str> = columns.iter().map(String::as_str).collect();
    format!("{entity}_{}_Proj", joined.join("_"))
}

/// Rewrite partial-select finders of `entity` to projection types.
///
/// `proj_names` maps a sorted column key to an already synthesized projection
/// name and is shared across calls for the same entity. Returns the rewritten
/// finders and the projections created by this call.
pub fn synthesize_implicit_projections(
    entity: &Entity,
    finders: &[RepositoryFinder],
    proj_names: &mut BTreeMap<String, String>,
) -> (Vec<RepositoryFinder>, Vec<Entity>) {
    let columns = domain_columns(entity);
    let mut out = Vec::with_capacity(finders.len());
    let mut projections = Vec::new();

    for finder in finders {
        let mut finder = finder.clone();
        if finder.select.is_empty() || !finder.return_type.trim().is_empty() || !returns_entity(&finder, &entity.name) {
            out.push(finder);
            continue;
        }
        let selected: BTreeSet<String> = finder.select.iter().map(|c| snake_case(c.trim())).collect();
        let known = selected.iter().all(|c| columns.contains_key(c));
        if !known || selected.len() >= columns.len() {
            out.push(finder);
            continue;
        }

        let key = selected.iter().cloned().collect::<Vec<_>>().join(",");
        let name = match proj_names.get(&key) {
            Some(name) => name.clone(),
            None => {
                let name = projection_name(&entity.name, &selected);
                proj_names.insert(key, name.clone());
                let mut metadata = BTreeMap::new();
                metadata.insert("projection".to_string(), json!(true));
                metadata.insert("projection_of".to_string(), json!(entity.name));
                projections.push(Entity {
                    name: name.clone(),
                    description: format!("Projection of {} ({})", entity.name, finder.name),
                    owner: entity.owner.clone(),
                    fields: selected.iter().filter_map(|c| columns.get(c)).map(|f| (*f).clone()).collect(),
                    metadata,
                    source: finder.source.clone(),
                    ..Default::default()
                });
                name
            }
        };
        finder.return_type = if finder.returns.trim() == "many" {
            format!("[]domain.{name}")
        } else {
            format!("*domain.{name}")
        };
        out.push(finder);
    }
    (out, projections)
}

/// Report finders that still return the full entity from a partial select
pub fn emit_partial_select_diagnostics(entity: &Entity, finders: &[RepositoryFinder], sink: &dyn WarningSink) {
    let columns = domain_columns(entity);
    for finder in finders {
        if finder.select.is_empty() || !returns_entity(finder, &entity.name) {
            continue;
        }
        let selected: BTreeSet<String> = finder.select.iter().map(|c| snake_case(c.trim())).collect();
        if columns.keys().all(|c| selected.contains(c)) {
            continue;
        }
        let missing: Vec<&str> = columns
            .keys()
            .filter(|c| !selected.contains(*c))
            .map(String::as_str)
            .collect();
        let (file, line) = split_source(&finder.source);
        let mut w = Warning::new(
            "repository",
            ENTITY_PARTIAL_SELECT_ERROR,
            SEVERITY_ERROR,
            format!(
                "Finder {}.{} selects a subset of {} but returns the full entity (missing: {})",
                entity.name,
                finder.name,
                entity.name,
                missing.join(", ")
            ),
        )
        .with_op(finder.name.clone())
        .with_hint("select every domain field, or drop return_type so a projection is synthesized");
        w.file = file;
        w.line = line;
        sink.warn(w);
    }
}

/// Synthesize projections for every entity with finders, then report the
/// partial selects that could not be resolved. Projection entities are
/// appended to `entities`.
pub fn apply_projections(
    entities: &mut Vec<Entity>,
    finders: &mut BTreeMap<String, Vec<RepositoryFinder>>,
    sink: &dyn WarningSink,
) {
    let mut synthesized = Vec::new();
    for (entity_name, entity_finders) in finders.iter_mut() {
        let Some(entity) = entities.iter().find(|e| &e.name == entity_name) else {
            continue;
        };
        let mut proj_names = BTreeMap::new();
        let (rewritten, projections) = synthesize_implicit_projections(entity, entity_finders, &mut proj_names);
        emit_partial_select_diagnostics(entity, &rewritten, sink);
        *entity_finders = rewritten;
        synthesized.extend(projections);
    }
    entities.extend(synthesized);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingSink;
    use pretty_assertions::assert_eq;

    fn user() -> Entity {
        Entity {
            name: "User".into(),
            fields: vec![Field::new("ID", "string"), Field::new("Email", "string"), Field::new("Bio", "string")],
            ..Default::default()
        }
    }

    fn finder(name: &str, returns: &str, select: &[&str]) -> RepositoryFinder {
        RepositoryFinder {
            name: name.into(),
            returns: returns.into(),
            select: select.iter().map(|s| s.to_string()).collect(),
            source: "cue/repo/repositories.cue:12".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_projection_dedup_by_sorted_fields() {
        let finders = vec![finder("A", "many", &["id", "email"]), finder("B", "one", &["email", "id"])];
        let (out, projections) = synthesize_implicit_projections(&user(), &finders, &mut BTreeMap::new());
        assert_eq!(projections.len(), 1);
        assert_eq!(projections[0].name, "User_email_id_Proj");
        assert_eq!(projections[0].fields.len(), 2);
        assert_eq!(out[0].return_type, "[]domain.User_email_id_Proj");
        assert_eq!(out[1].return_type, "*domain.User_email_id_Proj");
    }

    #[test]
    fn test_projection_synthesis_is_deterministic() {
        let finders = vec![finder("A", "many", &["bio", "id"]), finder("B", "one", &["email"])];
        let first = synthesize_implicit_projections(&user(), &finders, &mut BTreeMap::new());
        let second = synthesize_implicit_projections(&user(), &finders, &mut BTreeMap::new());
        assert_eq!(first, second);
    }

    #[test]
    fn test_full_select_is_left_alone() {
        let finders = vec![finder("All", "many", &["id", "email", "bio"])];
        let (out, projections) = synthesize_implicit_projections(&user(), &finders, &mut BTreeMap::new());
        assert!(projections.is_empty());
        assert_eq!(out[0].return_type, "");
    }

    #[test]
    fn test_explicit_entity_return_type_is_partial_select_error() {
        let mut f = finder("FindByEmail", "one", &["id"]);
        f.return_type = "*domain.User".into();
        let sink = CollectingSink::new();
        let mut entities = vec![user()];
        let mut finders = BTreeMap::from([("User".to_string(), vec![f])]);
        apply_projections(&mut entities, &mut finders, &sink);

        assert_eq!(entities.len(), 1);
        let warnings = sink.warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, ENTITY_PARTIAL_SELECT_ERROR);
        assert_eq!(warnings[0].severity, SEVERITY_ERROR);
        assert_eq!(warnings[0].file, "cue/repo/repositories.cue");
        assert_eq!(warnings[0].line, 12);
    }

    #[test]
    fn test_unknown_column_is_partial_select_error() {
        let sink = CollectingSink::new();
        let mut entities = vec![user()];
        let mut finders = BTreeMap::from([("User".to_string(), vec![finder("Odd", "many", &["id", "nickname"])])]);
        apply_projections(&mut entities, &mut finders, &sink);
        assert_eq!(entities.len(), 1);
        assert_eq!(sink.warnings()[0].code, ENTITY_PARTIAL_SELECT_ERROR);
    }

    #[test]
    fn test_custom_return_type_is_not_reported() {
        let mut f = finder("Report", "many", &["id"]);
        f.return_type = "[]domain.UserRow".into();
        let sink = CollectingSink::new();
        emit_partial_select_diagnostics(&user(), &[f], &sink);
        assert!(sink.warnings().is_empty());
    }
}
