//! Cross-record semantic checks over a built schema
//!
//! Every violation is collected before failing so a single run reports the
//! whole picture. Messages are sorted, which keeps the error text stable.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use regex::Regex;

use super::graph::{cycle_message, service_order};
use super::types::{Entity, Field, Schema, Template, TypeRef};
use crate::normalizer::fsm::{undefined_states, E_FSM_UNDEFINED_STATE};

static TEMPLATE_VAR_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").expect("valid regex"));
static UI_COMPONENT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").expect("valid regex"));
static UI_IMPORT_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(@?[A-Za-z0-9._-]+)(/[A-Za-z0-9._@-]+)*$").expect("valid regex"));
static TEMPLATE_ACTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{\{(.*?)\}\}").expect("valid regex"));
// A field chain such as `.User.Name` that is not the tail of another chain
static TEMPLATE_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[\s(|,])\.([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)").expect("valid regex")
});

const UI_TYPES: &[&str] = &[
    "text",
    "textarea",
    "number",
    "currency",
    "email",
    "password",
    "phone",
    "url",
    "date",
    "datetime",
    "time",
    "select",
    "autocomplete",
    "checkbox",
    "switch",
    "file",
    "image",
    "custom",
];
const UI_IMPORTANCE: &[&str] = &["high", "normal", "low"];
const UI_INPUT_KINDS: &[&str] = &["sensitive", "email", "phone", "money", "search", "none"];
const UI_INTENTS: &[&str] = &["danger", "warning", "success", "info", "neutral"];
const UI_DENSITIES: &[&str] = &["compact", "normal", "spacious"];
const UI_LABEL_MODES: &[&str] = &["static", "floating", "hidden"];
const UI_SURFACES: &[&str] = &["paper", "flat", "raised"];

/// Run every semantic rule and fail with the sorted list of violations
pub fn validate_ir_semantics(schema: &Schema) -> Result<()> {
    let errs = collect_violations(schema);
    if errs.is_empty() {
        return Ok(());
    }
    bail!("ir semantic validation failed:\n - {}", errs.join("\n - "))
}

/// Sorted violation messages; empty when the schema is consistent
pub fn collect_violations(schema: &Schema) -> Vec<String> {
    let entities: BTreeMap<&str, &Entity> = schema.entities.iter().map(|e| (e.name.as_str(), e)).collect();
    let mut errs = Vec::new();

    for ent in &schema.entities {
        for f in &ent.fields {
            let where_ = format!("entity {} field {}", ent.name, f.name);
            validate_type_ref(&mut errs, &entities, &where_, &f.type_ref);
            validate_field_ui(&mut errs, &where_, f);
        }
        if let Some(fsm) = &ent.fsm {
            for u in undefined_states(&fsm.states, &fsm.transitions) {
                errs.push(format!("[{E_FSM_UNDEFINED_STATE}] {}", u.message(&ent.name)));
            }
        }
    }

    for svc in &schema.services {
        for m in &svc.methods {
            for (side, ent) in [("input", &m.input), ("output", &m.output)] {
                for f in ent.iter().flat_map(|e| e.fields.iter()) {
                    let where_ = format!("service {} method {} {side} field {}", svc.name, m.name, f.name);
                    validate_type_ref(&mut errs, &entities, &where_, &f.type_ref);
                    validate_field_ui(&mut errs, &where_, f);
                }
            }
            for src in &m.sources {
                let name = src.entity.trim();
                if !name.is_empty() && !entities.contains_key(name) {
                    errs.push(format!(
                        "service {} method {} source references unknown entity {:?}",
                        svc.name, m.name, src.entity
                    ));
                }
            }
        }
    }

    validate_repositories(&mut errs, schema, &entities);
    validate_endpoints(&mut errs, schema);

    if let Err(leftover) = service_order(&schema.services) {
        errs.push(cycle_message(&leftover));
    }

    validate_template_catalog(&mut errs, &schema.templates);
    validate_notification_template_refs(&mut errs, schema);

    errs.sort();
    errs
}

fn finder_field_key(s: &str) -> String {
    s.trim().to_lowercase().replace(['_', '-'], "")
}

fn validate_repositories(errs: &mut Vec<String>, schema: &Schema, entities: &BTreeMap<&str, &Entity>) {
    for repo in &schema.repos {
        let Some(ent) = entities.get(repo.entity.as_str()) else {
            errs.push(format!("repository {} references unknown entity {:?}", repo.name, repo.entity));
            continue;
        };
        let keys: BTreeSet<String> = ent.fields.iter().map(|f| finder_field_key(&f.name)).collect();
        for finder in &repo.finders {
            for w in &finder.where_clauses {
                if !w.field.trim().is_empty() && !keys.contains(&finder_field_key(&w.field)) {
                    errs.push(format!(
                        "repository {} finder {} where field {:?} does not exist on entity {}",
                        repo.name, finder.name, w.field, repo.entity
                    ));
                }
            }
            for col in &finder.select {
                if !col.trim().is_empty() && !keys.contains(&finder_field_key(col)) {
                    errs.push(format!(
                        "repository {} finder {} select field {:?} does not exist on entity {}",
                        repo.name, finder.name, col, repo.entity
                    ));
                }
            }
        }
    }
}

fn validate_endpoints(errs: &mut Vec<String>, schema: &Schema) {
    for ep in &schema.endpoints {
        let Some(svc) = schema.service(&ep.service) else {
            errs.push(format!(
                "endpoint {} {} references unknown service {:?}",
                ep.method, ep.path, ep.service
            ));
            continue;
        };
        if svc.method(&ep.rpc).is_none() {
            errs.push(format!(
                "endpoint {} {} references unknown RPC {:?} on service {}",
                ep.method, ep.path, ep.rpc, ep.service
            ));
        }
    }
}

fn validate_type_ref(errs: &mut Vec<String>, entities: &BTreeMap<&str, &Entity>, where_: &str, t: &TypeRef) {
    match t {
        TypeRef::Entity { name } => {
            if name.trim().is_empty() {
                errs.push(format!("{where_} has entity type without name"));
            } else if !entities.contains_key(name.as_str()) {
                errs.push(format!("{where_} references unknown entity type {name:?}"));
            }
        }
        TypeRef::List { item } => validate_type_ref(errs, entities, &format!("{where_}[]"), item),
        TypeRef::Map { key, item } => {
            validate_type_ref(errs, entities, &format!("{where_}<key>"), key);
            validate_type_ref(errs, entities, &format!("{where_}<value>"), item);
        }
        _ => {}
    }
}

fn lower(s: &str) -> String {
    s.trim().to_lowercase()
}

fn check_vocab(errs: &mut Vec<String>, code: &str, where_: &str, key: &str, raw: &str, allowed: &[&str]) {
    let v = lower(raw);
    if !v.is_empty() && !allowed.contains(&v.as_str()) {
        errs.push(format!("[{code}] {where_} has unsupported ui.{key} {raw:?}"));
    }
}

fn validate_field_ui(errs: &mut Vec<String>, where_: &str, field: &Field) {
    let ui = &field.ui;
    let ui_type = lower(&ui.ui_type);
    if !ui_type.is_empty() && !UI_TYPES.contains(&ui_type.as_str()) {
        errs.push(format!("[E_UI_UNKNOWN_TYPE] {where_} uses unknown ui.type {:?}", ui.ui_type));
    }

    let component = ui.component.trim();
    let source = ui.source.trim();
    if ui_type == "custom" && component.is_empty() {
        errs.push(format!(
            "[E_UI_CUSTOM_COMPONENT_REQUIRED] {where_} uses ui.type=custom but ui.component is empty"
        ));
    }
    if !component.is_empty() && !UI_COMPONENT_NAME.is_match(component) {
        errs.push(format!("[E_UI_INVALID_COMPONENT] {where_} has invalid ui.component {component:?}"));
    }
    // Import paths are only meaningful for custom components
    if ui_type == "custom" && !source.is_empty() && !UI_IMPORT_PATH.is_match(source) {
        errs.push(format!("[E_UI_INVALID_SOURCE] {where_} has invalid ui.source {source:?}"));
    }
    if ui_type == "select" && ui.options.is_empty() && source.is_empty() {
        errs.push(format!(
            "[E_UI_SELECT_SOURCE_OR_OPTIONS_REQUIRED] {where_} uses ui.type=select but neither ui.options nor ui.source is set"
        ));
    }
    if ui.hidden && field.is_required() {
        errs.push(format!("[E_UI_HIDDEN_REQUIRED_CONFLICT] {where_} is hidden but required"));
    }
    if ui.columns < 0 {
        errs.push(format!(
            "[E_UI_COLUMNS_INVALID] {where_} has negative ui.columns={}",
            ui.columns
        ));
    }
    check_vocab(errs, "E_UI_IMPORTANCE_INVALID", where_, "importance", &ui.importance, UI_IMPORTANCE);
    check_vocab(errs, "E_UI_INPUT_KIND_INVALID", where_, "inputKind", &ui.input_kind, UI_INPUT_KINDS);
    check_vocab(errs, "E_UI_INTENT_INVALID", where_, "intent", &ui.intent, UI_INTENTS);
    check_vocab(errs, "E_UI_DENSITY_INVALID", where_, "density", &ui.density, UI_DENSITIES);
    check_vocab(errs, "E_UI_LABEL_MODE_INVALID", where_, "labelMode", &ui.label_mode, UI_LABEL_MODES);
    check_vocab(errs, "E_UI_SURFACE_INVALID", where_, "surface", &ui.surface, UI_SURFACES);
}

// ============================================================================
// Templates
// ============================================================================

fn supported_engine(engine: &str) -> bool {
    matches!(engine, "go_template" | "plain" | "json")
}

fn engine_fits_channel(engine: &str, channel: &str) -> bool {
    if engine.is_empty() || channel.is_empty() {
        return true;
    }
    match channel {
        "email" | "in_app" => matches!(engine, "go_template" | "plain"),
        "nats" | "kafka" | "webhook" => matches!(engine, "go_template" | "plain" | "json"),
        _ => true,
    }
}

fn trimmed_vars(vars: &[String]) -> Vec<&str> {
    vars.iter().map(|v| v.trim()).filter(|v| !v.is_empty()).collect()
}

/// Field chains referenced inside `{{ ... }}` actions. Fails on an action
/// that is opened but never closed.
fn template_var_paths(contents: &[&str]) -> Result<BTreeSet<String>, String> {
    let mut used = BTreeSet::new();
    for content in contents {
        let closed = TEMPLATE_ACTION.replace_all(content, "");
        if closed.contains("{{") {
            return Err("unclosed action".to_string());
        }
        for action in TEMPLATE_ACTION.captures_iter(content) {
            let inner = action[1].trim_matches('-');
            for cap in TEMPLATE_FIELD.captures_iter(inner) {
                used.insert(cap[1].to_string());
            }
        }
    }
    Ok(used)
}

fn var_is_used(required: &str, used: &BTreeSet<String>) -> bool {
    let prefix = format!("{required}.");
    used.contains(required) || used.iter().any(|u| u.starts_with(&prefix))
}

fn validate_var_lists(errs: &mut Vec<String>, id: &str, required: &[&str], optional: &[&str]) {
    let mut seen_req = BTreeSet::new();
    for v in required {
        if !TEMPLATE_VAR_PATH.is_match(v) {
            errs.push(format!("template {id:?} has invalid requiredVars name {v:?}"));
            continue;
        }
        if !seen_req.insert(*v) {
            errs.push(format!("template {id:?} has duplicate requiredVars {v:?}"));
        }
    }
    let mut seen_opt = BTreeSet::new();
    for v in optional {
        if !TEMPLATE_VAR_PATH.is_match(v) {
            errs.push(format!("template {id:?} has invalid optionalVars name {v:?}"));
            continue;
        }
        if !seen_opt.insert(*v) {
            errs.push(format!("template {id:?} has duplicate optionalVars {v:?}"));
        }
        if seen_req.contains(v) {
            errs.push(format!(
                "template {id:?} declares var {v:?} in both requiredVars and optionalVars"
            ));
        }
    }
}

fn validate_template_catalog(errs: &mut Vec<String>, templates: &[Template]) {
    let mut seen = BTreeSet::new();
    for (i, t) in templates.iter().enumerate() {
        let id = t.id.trim();
        if id.is_empty() {
            errs.push(format!("template[{i}] has empty id"));
            continue;
        }
        if !seen.insert(id) {
            errs.push(format!("template {id:?} is duplicated"));
        }

        let mut engine = lower(&t.engine);
        if engine.is_empty() {
            engine = "go_template".to_string();
        }
        if !supported_engine(&engine) {
            errs.push(format!("template {id:?} uses unsupported engine {:?}", t.engine));
        }
        let channel = lower(&t.channel);
        if !engine_fits_channel(&engine, &channel) {
            errs.push(format!(
                "template {id:?} uses engine {engine:?} incompatible with channel {channel:?}"
            ));
        }

        let (subject, text, html, body) = (t.subject.trim(), t.text.trim(), t.html.trim(), t.body.trim());
        let no_content = text.is_empty() && html.is_empty() && body.is_empty();
        if channel == "email" || lower(&t.kind) == "email" {
            if subject.is_empty() {
                errs.push(format!("email template {id:?} requires non-empty subject"));
            }
            if no_content {
                errs.push(format!("email template {id:?} requires text/html/body content"));
            }
        } else if no_content {
            errs.push(format!(
                "template {id:?} requires at least one content field: text/html/body"
            ));
        }

        let required = trimmed_vars(&t.required_vars);
        let optional = trimmed_vars(&t.optional_vars);
        validate_var_lists(errs, id, &required, &optional);

        if engine == "go_template" {
            match template_var_paths(&[subject, text, html, body]) {
                Ok(used) => {
                    for rv in &required {
                        if !var_is_used(rv, &used) {
                            errs.push(format!(
                                "template {id:?} requiredVars contains {rv:?} but template content does not reference it"
                            ));
                        }
                    }
                }
                Err(e) => errs.push(format!("template {id:?} parse error: {e}")),
            }
        }
    }
}

fn channels_compatible(template_channel: &str, usage_channel: &str) -> bool {
    let (t, u) = (lower(template_channel), lower(usage_channel));
    t.is_empty() || u.is_empty() || t == u
}

fn validate_notification_template_refs(errs: &mut Vec<String>, schema: &Schema) {
    let Some(notifications) = &schema.notifications else {
        return;
    };
    let by_id: BTreeMap<&str, &Template> = schema
        .templates
        .iter()
        .map(|t| (t.id.trim(), t))
        .filter(|(id, _)| !id.is_empty())
        .collect();
    if by_id.is_empty() {
        return;
    }

    if let Some(channels) = &notifications.channels {
        for (name, spec) in &channels.channels {
            let tpl = spec.template.trim();
            if tpl.is_empty() {
                continue;
            }
            match by_id.get(tpl) {
                None => errs.push(format!(
                    "notifications channel {name:?} references unknown template {tpl:?}"
                )),
                Some(t) if !channels_compatible(&t.channel, name) => errs.push(format!(
                    "notifications channel {name:?} uses template {tpl:?} with incompatible channel {:?}",
                    t.channel
                )),
                Some(_) => {}
            }
        }
    }

    let Some(policies) = &notifications.policies else {
        return;
    };
    let defaults: Vec<&str> = notifications
        .channels
        .as_ref()
        .map(|c| trimmed_vars(&c.default_channels))
        .unwrap_or_default();
    for (i, rule) in policies.rules.iter().enumerate() {
        let tpl = rule.template.trim();
        if tpl.is_empty() {
            continue;
        }
        let Some(t) = by_id.get(tpl) else {
            errs.push(format!(
                "notifications policy rule[{i}] references unknown template {tpl:?}"
            ));
            continue;
        };
        let mut check = trimmed_vars(&rule.channels);
        if check.is_empty() {
            check = defaults.clone();
        }
        for ch in check {
            if !channels_compatible(&t.channel, ch) {
                errs.push(format!(
                    "notifications policy rule[{i}] channel {ch:?} uses template {tpl:?} with incompatible channel {:?}",
                    t.channel
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::*;
    use pretty_assertions::assert_eq;

    fn user_entity() -> Entity {
        Entity {
            name: "User".into(),
            fields: vec![
                Field::new("id", TypeRef::Uuid),
                Field::new("email", TypeRef::String),
                Field::new("created_at", TypeRef::Time),
            ],
            ..Default::default()
        }
    }

    fn users_service() -> Service {
        Service {
            name: "users".into(),
            methods: vec![Method {
                name: "GetUser".into(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_consistent_schema_passes() {
        let schema = Schema {
            entities: vec![user_entity()],
            services: vec![users_service()],
            endpoints: vec![Endpoint {
                method: "GET".into(),
                path: "/users/{id}".into(),
                service: "users".into(),
                rpc: "GetUser".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        validate_ir_semantics(&schema).unwrap();
    }

    #[test]
    fn test_reference_violations_are_sorted() {
        let mut owner = user_entity();
        owner.name = "Order".into();
        owner.fields.push(Field::new("buyer", TypeRef::list(TypeRef::entity("Buyer"))));
        let schema = Schema {
            entities: vec![user_entity(), owner],
            services: vec![users_service()],
            endpoints: vec![Endpoint {
                method: "GET".into(),
                path: "/x".into(),
                service: "users".into(),
                rpc: "Missing".into(),
                ..Default::default()
            }],
            repos: vec![Repository {
                name: "UserRepository".into(),
                entity: "User".into(),
                finders: vec![Finder {
                    name: "FindByMail".into(),
                    where_clauses: vec![WhereClause {
                        field: "mail".into(),
                        ..Default::default()
                    }],
                    select: vec!["createdAt".into()],
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        };
        let err = validate_ir_semantics(&schema).unwrap_err().to_string();
        assert_eq!(
            err,
            "ir semantic validation failed:\n \
             - endpoint GET /x references unknown RPC \"Missing\" on service users\n \
             - entity Order field buyer[] references unknown entity type \"Buyer\"\n \
             - repository UserRepository finder FindByMail where field \"mail\" does not exist on entity User"
        );
    }

    #[test]
    fn test_service_cycle_is_reported() {
        let a = Service {
            name: "A".into(),
            uses: vec!["B".into()],
            ..Default::default()
        };
        let b = Service {
            name: "B".into(),
            uses: vec!["A".into()],
            ..Default::default()
        };
        let schema = Schema {
            services: vec![a, b],
            ..Default::default()
        };
        assert_eq!(
            collect_violations(&schema),
            vec!["service dependency cycle detected: A, B".to_string()]
        );
    }

    #[test]
    fn test_email_template_rules() {
        let schema = Schema {
            templates: vec![
                Template {
                    id: "welcome".into(),
                    channel: "email".into(),
                    text: "Hi {{ .User.Name }}".into(),
                    required_vars: vec!["User".into(), "Code".into()],
                    optional_vars: vec!["Code".into()],
                    ..Default::default()
                },
                Template {
                    id: "welcome".into(),
                    channel: "email".into(),
                    engine: "json".into(),
                    subject: "Hi".into(),
                    body: "{}".into(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let errs = collect_violations(&schema);
        assert_eq!(
            errs,
            vec![
                "email template \"welcome\" requires non-empty subject".to_string(),
                "template \"welcome\" declares var \"Code\" in both requiredVars and optionalVars".to_string(),
                "template \"welcome\" is duplicated".to_string(),
                "template \"welcome\" requiredVars contains \"Code\" but template content does not reference it"
                    .to_string(),
                "template \"welcome\" uses engine \"json\" incompatible with channel \"email\"".to_string(),
            ]
        );
    }

    #[test]
    fn test_template_var_paths_follow_field_chains() {
        let used = template_var_paths(&["{{ if .Order.Total }}{{ printf \"%d\" .Count }}{{ end }}"]).unwrap();
        assert_eq!(
            used.into_iter().collect::<Vec<_>>(),
            vec!["Count".to_string(), "Order.Total".to_string()]
        );
        assert!(template_var_paths(&["{{ .Open "]).is_err());
    }

    #[test]
    fn test_notification_refs() {
        let mut channels = NotificationChannels {
            default_channels: vec!["sms".into()],
            ..Default::default()
        };
        channels.channels.insert(
            "email".into(),
            NotificationChannelSpec {
                template: "missing".into(),
                ..Default::default()
            },
        );
        let schema = Schema {
            templates: vec![Template {
                id: "t".into(),
                channel: "email".into(),
                subject: "s".into(),
                text: "x".into(),
                ..Default::default()
            }],
            notifications: Some(NotificationsConfig {
                channels: Some(channels),
                policies: Some(NotificationPolicies {
                    enabled: true,
                    rules: vec![NotificationPolicyRule {
                        template: "t".into(),
                        ..Default::default()
                    }],
                }),
                muting: None,
            }),
            ..Default::default()
        };
        assert_eq!(
            collect_violations(&schema),
            vec![
                "notifications channel \"email\" references unknown template \"missing\"".to_string(),
                "notifications policy rule[0] channel \"sms\" uses template \"t\" with incompatible channel \"email\""
                    .to_string(),
            ]
        );
    }

    #[test]
    fn test_ui_hint_codes() {
        let mut hidden = Field::new("secret", TypeRef::String);
        hidden.ui.hidden = true;
        let mut custom = Field::new("avatar", TypeRef::String);
        custom.optional = true;
        custom.ui.ui_type = "custom".into();
        custom.ui.density = "tight".into();
        let schema = Schema {
            entities: vec![Entity {
                name: "Profile".into(),
                fields: vec![hidden, custom],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(
            collect_violations(&schema),
            vec![
                "[E_UI_CUSTOM_COMPONENT_REQUIRED] entity Profile field avatar uses ui.type=custom but ui.component is empty"
                    .to_string(),
                "[E_UI_DENSITY_INVALID] entity Profile field avatar has unsupported ui.density \"tight\"".to_string(),
                "[E_UI_HIDDEN_REQUIRED_CONFLICT] entity Profile field secret is hidden but required".to_string(),
            ]
        );
    }

    #[test]
    fn test_fsm_undefined_state_in_ir() {
        let mut transitions = BTreeMap::new();
        transitions.insert("pending".to_string(), vec!["paid".to_string()]);
        let schema = Schema {
            entities: vec![Entity {
                name: "Order".into(),
                fsm: Some(Fsm {
                    field: "status".into(),
                    states: vec!["pending".into()],
                    transitions,
                }),
                ..Default::default()
            }],
            ..Default::default()
        };
        let errs = collect_violations(&schema);
        assert_eq!(errs.len(), 1);
        assert!(errs[0].starts_with("[E_FSM_UNDEFINED_STATE] Entity 'Order'"));
        assert!(errs[0].ends_with("references undefined state 'paid'"));
    }
}
