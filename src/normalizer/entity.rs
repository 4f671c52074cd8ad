//! Entity extraction: `#Name: {...}` definitions in the domain package

use std::path::Path;

use anyhow::{Context, Result};
use ang_cue::{Value, ValueKind};
use serde_json::json;

use super::helpers::{
    attr_has, clean_name, detect_type, export_name, format_pos, get_bool, get_string, inline_list_elem,
    parse_attributes, scalar_default,
};
use super::types::{CrudDef, DbMeta, Entity, EntityUi, Field, FileMeta, Fsm, IndexDef, UiHints};
use super::Normalizer;

/// Labels that never describe an entity
fn is_reserved_label(label: &str) -> bool {
    label.ends_with("Service") || label.ends_with("API") || label == "AppConfig" || label == "RBAC"
}

/// File basenames whose entities have no owning service
const SHARED_OWNERS: &[&str] = &["domain", "types", "common"];

/// Entity keys that are structure, not columns
const ENTITY_META_KEYS: &[&str] = &["fsm", "indexes", "methods"];

impl Normalizer<'_> {
    pub fn extract_entities(&self, val: &Value) -> Result<Vec<Entity>> {
        let mut entities = Vec::new();
        for fv in val.fields() {
            let label = fv.label.trim_start_matches('#');
            if fv.is_hidden() || is_reserved_label(label) {
                continue;
            }
            if fv.value.kind() != ValueKind::Struct {
                continue;
            }
            let entity = self
                .parse_entity(label, &fv.value)
                .with_context(|| format!("failed to parse entity {label}"))?;
            entities.push(entity);
        }
        Ok(entities)
    }

    pub(crate) fn parse_entity(&self, name: &str, val: &Value) -> Result<Entity> {
        let mut entity = Entity {
            name: name.to_string(),
            description: get_string(val, "description"),
            source: format_pos(val),
            ..Default::default()
        };

        if let Some(owner) = val.attribute("owner").and_then(|a| a.lookup(0, "").map(str::to_string)) {
            entity.owner = owner;
        }
        if entity.owner.is_empty() && val.pos().is_valid() {
            let stem = Path::new(&val.pos().file)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            if !SHARED_OWNERS.contains(&stem) {
                entity.owner = stem.to_string();
            }
        }

        if let Some(storage) = val.attribute("storage").and_then(|a| a.lookup(0, "").map(str::to_string)) {
            if !storage.is_empty() {
                entity.metadata.insert("storage".into(), json!(storage));
            }
        }
        let dto_attr = val.attribute("dto").is_some_and(|a| a.lookup(0, "only") == Some("true"));
        if dto_attr || get_bool(val, "_dto") == Some(true) {
            entity.metadata.insert("dto".into(), json!(true));
        }
        if val.attribute("timestamps").is_some() {
            entity.metadata.insert("timestamps".into(), json!(true));
        }
        if val.attribute("softDelete").or_else(|| val.attribute("soft_delete")).is_some() {
            entity.metadata.insert("soft_delete".into(), json!(true));
        }

        for fv in val.fields() {
            let label = clean_name(&fv.label);
            if fv.is_definition() || fv.is_hidden() || ENTITY_META_KEYS.contains(&label.as_str()) {
                continue;
            }
            if label == "description" && fv.value.kind() == ValueKind::String && fv.value.is_concrete() {
                continue;
            }
            let field = self.parse_field(name, &label, fv.is_optional(), &fv.value)?;
            entity.fields.push(field);
        }

        entity.fsm = parse_fsm(val);
        entity.indexes = parse_indexes(val);
        entity.ui = parse_entity_ui(val);
        Ok(entity)
    }

    fn parse_field(&self, entity: &str, name: &str, optional: bool, val: &Value) -> Result<Field> {
        let mut field = self.parse_basic_field(name, optional, val);

        if name == "ui" || val.attribute("dto").is_some_and(|a| a.lookup(0, "only") == Some("true")) {
            field.skip_domain = true;
        }
        let lower = name.to_lowercase();
        if val.attribute("secret").is_some() || lower.contains("password") || lower.contains("token") {
            field.secret = true;
        }
        if let Some(attr) = val.attribute("pii") {
            field.pii = true;
            if let Some(class) = attr.lookup(0, "classification") {
                field.metadata.insert("pii_classification".into(), json!(class));
            }
        }

        if val.attribute("image").is_some() {
            field.file_meta = Some(FileMeta {
                kind: "image".into(),
                thumbnail: true,
            });
        } else if let Some(attr) = val.attribute("file") {
            field.file_meta = Some(FileMeta {
                kind: attr.lookup(0, "kind").unwrap_or("auto").to_string(),
                thumbnail: attr.lookup(0, "thumbnail").and_then(|t| t.parse().ok()).unwrap_or(false),
            });
        }

        if val.kind() == ValueKind::List {
            field.list = true;
            if let Some(item) = field.type_name.strip_prefix("[]domain.") {
                field.item_type_name = item.to_string();
            }
            if let Some(elem) = inline_list_elem(val) {
                let item_name = if name.eq_ignore_ascii_case("data") {
                    format!("{}Data", export_name(entity))
                } else {
                    format!("{}{}Item", export_name(entity), export_name(name))
                };
                let item_fields = self.parse_inline_fields(elem);
                if !item_fields.is_empty() {
                    field.type_name = format!("[]{item_name}");
                    field.item_type_name = item_name;
                    field.item_fields = item_fields;
                }
            }
        }
        Ok(field)
    }

    /// Columns shared by entity fields and inline list items
    fn parse_basic_field(&self, name: &str, optional: bool, val: &Value) -> Field {
        let mut field = Field {
            name: name.to_string(),
            optional,
            type_name: detect_type(name, val),
            default: scalar_default(val),
            db: parse_db_tags(val),
            validate_tag: infer_validate_tag(name, val),
            env_var: parse_env_tag(val),
            ui: parse_ui_hints(val),
            attributes: parse_attributes(val),
            source: format_pos(val),
            ..Default::default()
        };
        if let Some(attr) = val.attribute("encrypt") {
            let mode = attr.lookup(0, "mode").unwrap_or("randomized");
            field.metadata.insert("encrypt".into(), json!(mode));
        }
        if val.attribute("redact").is_some() {
            field.metadata.insert("redact".into(), json!(true));
        }
        let options = val.string_options();
        if options.len() > 1 {
            field.metadata.insert("enum".into(), json!(options));
        }
        field
    }

    fn parse_inline_fields(&self, val: &Value) -> Vec<Field> {
        val.fields()
            .iter()
            .filter(|fv| !fv.is_definition() && !fv.is_hidden())
            .filter_map(|fv| {
                let name = clean_name(&fv.label);
                if name.is_empty() {
                    return None;
                }
                let mut field = self.parse_basic_field(&name, fv.is_optional(), &fv.value);
                field.secret = fv.value.attribute("secret").is_some() || name.to_lowercase().contains("password");
                field.pii = fv.value.attribute("pii").is_some();
                field.list = fv.value.kind() == ValueKind::List;
                Some(field)
            })
            .collect()
    }
}

fn parse_env_tag(val: &Value) -> String {
    val.attribute("env")
        .map(|a| a.contents().trim().trim_matches('"').to_string())
        .unwrap_or_default()
}

fn infer_validate_tag(name: &str, val: &Value) -> String {
    if let Some(attr) = val.attribute("validate") {
        return attr.contents().trim().trim_matches('"').to_string();
    }
    let lower = name.to_lowercase();
    if lower == "email" {
        "email".into()
    } else if lower.contains("url") {
        "url".into()
    } else {
        String::new()
    }
}

fn parse_db_tags(val: &Value) -> DbMeta {
    let mut meta = DbMeta::default();
    let Some(attr) = val.attribute("db") else {
        return meta;
    };
    if let Some(t) = attr.lookup(0, "type") {
        meta.db_type = t.to_string();
    }
    meta.primary_key = attr_has(&attr, "primary_key");
    meta.unique = attr_has(&attr, "unique");
    meta.index = attr_has(&attr, "index");
    meta
}

pub(crate) fn parse_ui_hints(val: &Value) -> Option<UiHints> {
    let attr = val.attribute("ui")?;
    let text = |key: &str| attr.lookup(0, key).unwrap_or_default().to_string();
    let int = |key: &str| attr.lookup(0, key).and_then(|v| v.trim().parse::<i64>().ok());
    let float = |key: &str| attr.lookup(0, key).and_then(|v| v.trim().parse::<f64>().ok());

    Some(UiHints {
        ui_type: text("type"),
        label: text("label"),
        placeholder: text("placeholder"),
        helper_text: text("helperText"),
        order: int("order").unwrap_or(0),
        hidden: attr_has(&attr, "hidden"),
        disabled: attr_has(&attr, "disabled"),
        full_width: attr.lookup(0, "fullWidth").map_or(true, |v| v != "false"),
        rows: int("rows").unwrap_or(0),
        min: float("min"),
        max: float("max"),
        step: float("step"),
        currency: text("currency"),
        source: text("source"),
        options: attr
            .lookup(0, "options")
            .map(|o| {
                o.split('|')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        multiple: attr_has(&attr, "multiple"),
        accept: text("accept"),
        max_size: int("maxSize").unwrap_or(0),
        component: text("component"),
        columns: int("columns"),
        importance: text("importance"),
        input_kind: text("inputKind"),
        intent: text("intent"),
        density: text("density"),
        label_mode: text("labelMode"),
        surface: text("surface"),
    })
}

fn parse_fsm(val: &Value) -> Option<Fsm> {
    let fsm_val = val.lookup("fsm")?;
    let mut fsm = Fsm {
        field: get_string(fsm_val, "field"),
        source: format_pos(fsm_val),
        ..Default::default()
    };
    if let Some(states) = fsm_val.lookup("states").and_then(Value::list) {
        fsm.states = states.iter().filter_map(Value::as_str).map(|s| s.trim().to_string()).collect();
    } else if let Some(field) = val.lookup(&fsm.field) {
        // `status: "draft" | "paid"` declares the states
        let options = field.string_options();
        if options.len() > 1 {
            fsm.states = options;
        }
    }
    if let Some(transitions) = fsm_val.lookup("transitions") {
        for fv in transitions.fields() {
            let targets = fv
                .value
                .list()
                .unwrap_or_default()
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_string())
                .collect();
            fsm.transitions.insert(clean_name(&fv.label), targets);
        }
    }
    Some(fsm)
}

fn parse_indexes(val: &Value) -> Vec<IndexDef> {
    let Some(items) = val.lookup("indexes").and_then(Value::list) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|iv| {
            let fields: Vec<String> = iv
                .lookup("fields")
                .and_then(Value::list)
                .unwrap_or_default()
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            (!fields.is_empty()).then(|| IndexDef {
                fields,
                unique: get_bool(iv, "unique").unwrap_or(false),
            })
        })
        .collect()
}

fn parse_entity_ui(val: &Value) -> Option<EntityUi> {
    let ui = val.lookup("ui")?;
    if ui.kind() != ValueKind::Struct {
        return None;
    }
    let crud = ui.lookup("crud").map(|crud_val| {
        let mut crud = CrudDef {
            enabled: get_bool(crud_val, "enabled").unwrap_or(false),
            custom: get_bool(crud_val, "custom").unwrap_or(false),
            ..Default::default()
        };
        for view in ["list", "details", "create", "edit"] {
            crud.views.insert(view.to_string(), true);
        }
        if let Some(views) = crud_val.lookup("views") {
            for fv in views.fields() {
                if let Some(b) = fv.value.as_bool() {
                    crud.views.insert(clean_name(&fv.label), b);
                }
            }
        }
        if let Some(perms) = crud_val.lookup("permissions") {
            for fv in perms.fields() {
                if let Some(s) = fv.value.as_str() {
                    crud.permissions.insert(clean_name(&fv.label), s.to_string());
                }
            }
        }
        crud
    });
    Some(EntityUi { crud })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingSink;
    use pretty_assertions::assert_eq;

    fn load(file: &str, src: &str) -> Value {
        ang_cue::load_package(&[(file.to_string(), src.to_string())]).unwrap()
    }

    const USER: &str = r#"package domain

#User: {
	description: "A registered account"
	id: string @db(type="UUID", primary_key)
	email: string @validate("required,email")
	avatarUrl?: string @image()
	password: string
	role: *"member" | "admin"
	tags: [...string]
	addresses: [...{
		street: string
		zip?: string
	}]
	fsm: {
		field: "status"
		transitions: {
			active: ["banned"]
		}
	}
	status: "active" | "banned"
	indexes: [{fields: ["email"], unique: true}]
}

#UserService: {
	id: string
}
"#;

    #[test]
    fn test_extract_entities_skips_services_and_reads_fields() {
        let sink = CollectingSink::new();
        let n = Normalizer::new(&sink);
        let entities = n.extract_entities(&load("cue/domain/user.cue", USER)).unwrap();
        assert_eq!(entities.len(), 1);
        let user = &entities[0];
        assert_eq!(user.name, "User");
        assert_eq!(user.owner, "user");
        assert_eq!(user.description, "A registered account");
        assert_eq!(user.source, "cue/domain/user.cue:3");

        let id = user.field("id").unwrap();
        assert_eq!(id.db.db_type, "UUID");
        assert!(id.db.primary_key);
        assert!(!id.db.unique);

        assert_eq!(user.field("email").unwrap().validate_tag, "required,email");
        let avatar = user.field("avatarUrl").unwrap();
        assert!(avatar.optional);
        assert_eq!(avatar.validate_tag, "url");
        assert_eq!(avatar.file_meta.as_ref().unwrap().kind, "image");
        assert!(user.field("password").unwrap().secret);
        assert_eq!(user.field("role").unwrap().default, "member");
        assert_eq!(user.field("tags").unwrap().type_name, "[]string");

        let addresses = user.field("addresses").unwrap();
        assert!(addresses.list);
        assert_eq!(addresses.type_name, "[]UserAddressesItem");
        assert_eq!(addresses.item_fields.len(), 2);
        assert!(addresses.item_fields[1].optional);

        let fsm = user.fsm.as_ref().unwrap();
        assert_eq!(fsm.field, "status");
        assert_eq!(fsm.states, vec!["active", "banned"]);
        assert_eq!(user.indexes, vec![IndexDef { fields: vec!["email".into()], unique: true }]);
        assert!(user.field("fsm").is_none());
    }

    #[test]
    fn test_shared_file_has_no_owner_and_dto_flag() {
        let sink = CollectingSink::new();
        let n = Normalizer::new(&sink);
        let src = "package domain\n\n#Money: {\n\t_dto: true\n\tamount: int\n}\n";
        let entities = n.extract_entities(&load("cue/domain/common.cue", src)).unwrap();
        assert_eq!(entities[0].owner, "");
        assert!(entities[0].is_dto());
    }

    #[test]
    fn test_ui_hints_and_crud() {
        let sink = CollectingSink::new();
        let n = Normalizer::new(&sink);
        let src = r#"package domain

#Post: {
	title: string @ui(type="text", label="Title", order=1, hidden, options="a|b")
	ui: {
		crud: {
			enabled: true
			views: {edit: false}
			permissions: {create: "posts.create"}
		}
	}
}
"#;
        let entities = n.extract_entities(&load("cue/domain/post.cue", src)).unwrap();
        let post = &entities[0];
        let hints = post.field("title").unwrap().ui.as_ref().unwrap();
        assert_eq!(hints.ui_type, "text");
        assert_eq!(hints.order, 1);
        assert!(hints.hidden);
        assert!(hints.full_width);
        assert_eq!(hints.options, vec!["a", "b"]);

        assert!(post.field("ui").unwrap().skip_domain);
        let crud = post.ui.as_ref().unwrap().crud.as_ref().unwrap();
        assert!(crud.enabled);
        assert_eq!(crud.views.get("edit"), Some(&false));
        assert_eq!(crud.views.get("list"), Some(&true));
        assert_eq!(crud.permissions.get("create").map(String::as_str), Some("posts.create"));
    }
}
