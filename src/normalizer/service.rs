//! Service extraction from API operations
//!
//! Every non-definition label of the api package that names a `service` is an
//! operation; operations are grouped into services by that name.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use ang_cue::{Value, ValueKind};
use serde_json::json;

use super::helpers::{clean_name, format_pos, get_bool, get_int, get_string, parse_attributes, string_list};
use super::types::{Entity, Field, FlowStep, Method, MethodImpl, PaginationDef, Service, Source};
use super::Normalizer;
use crate::diagnostics::{Warning, SEVERITY_ERROR};

pub const UNKNOWN_ENTITY: &str = "UNKNOWN_ENTITY";
pub const DTO_AS_REPO: &str = "DTO_AS_REPO";
pub const TX_REQUIRED: &str = "TX_REQUIRED";
pub const MISSING_METHOD: &str = "MISSING_METHOD";

/// Keys of a flow step that hold nested step lists
const FLOW_BLOCKS: &[&str] = &["then", "else", "do", "default", "ifNew", "ifExists", "steps"];

const REPO_ACTIONS: &[&str] = &[
    "repo.Find",
    "repo.Get",
    "repo.GetForUpdate",
    "repo.Save",
    "repo.Delete",
    "repo.List",
    "repo.Query",
    "repo.Upsert",
];

/// Entity lookup used by source and flow checks
struct EntityIndex {
    known: BTreeSet<String>,
    dto: BTreeSet<String>,
}

impl EntityIndex {
    fn new(entities: &[Entity]) -> Self {
        Self {
            known: entities.iter().map(|e| e.name.clone()).collect(),
            dto: entities.iter().filter(|e| e.is_dto()).map(|e| e.name.clone()).collect(),
        }
    }
}

/// Operations of an api package: label and value of every entry with a `service`
pub(crate) fn operations(val: &Value) -> Vec<(String, &Value)> {
    val.fields()
        .iter()
        .filter(|fv| !fv.is_definition() && fv.label != "HTTP")
        .filter(|fv| !get_string(&fv.value, "service").is_empty())
        .map(|fv| (clean_name(&fv.label), &fv.value))
        .collect()
}

/// Input or output block of an operation (`input`/`in`, `output`/`out`)
pub(crate) fn io_block<'v>(op: &'v Value, long: &str, short: &str) -> Option<&'v Value> {
    op.lookup(long).or_else(|| op.lookup(short))
}

pub(crate) fn parse_pagination(op: &Value) -> Option<PaginationDef> {
    let pg = op.lookup("pagination")?;
    let kind = get_string(pg, "type");
    if kind.is_empty() {
        return None;
    }
    Some(PaginationDef {
        kind,
        default_limit: get_int(pg, "default_limit").unwrap_or(0),
        max_limit: get_int(pg, "max_limit").unwrap_or(0),
    })
}

impl Normalizer<'_> {
    pub fn extract_services(&self, val: &Value, entities: &[Entity]) -> Result<Vec<Service>> {
        let index = EntityIndex::new(entities);

        let mut cache_by_op: BTreeMap<String, (String, Vec<String>)> = BTreeMap::new();
        if let Some(http) = val.lookup("HTTP") {
            for fv in http.fields() {
                let ttl = get_string(&fv.value, "cache.ttl");
                let tags = string_list(fv.value.lookup("cache.tags"));
                if !ttl.is_empty() || !tags.is_empty() {
                    cache_by_op.insert(clean_name(&fv.label), (ttl, tags));
                }
            }
        }

        let mut services: BTreeMap<String, Service> = BTreeMap::new();
        for (op_name, value) in operations(val) {
            let svc_name = get_string(value, "service");
            let svc = services.entry(svc_name.clone()).or_insert_with(|| Service {
                name: svc_name.clone(),
                source: format_pos(value),
                ..Default::default()
            });
            let method = self
                .parse_method(svc, &op_name, value, &index, &cache_by_op)
                .with_context(|| format!("failed to parse operation {op_name}"))?;
            svc.methods.push(method);
        }

        Ok(services
            .into_values()
            .map(|mut svc| {
                svc.methods.sort_by(|a, b| a.name.cmp(&b.name));
                svc
            })
            .collect())
    }

    fn parse_method(
        &self,
        svc: &mut Service,
        op_name: &str,
        value: &Value,
        index: &EntityIndex,
        cache_by_op: &BTreeMap<String, (String, Vec<String>)>,
    ) -> Result<Method> {
        let mut method = Method {
            name: op_name.to_string(),
            description: get_string(value, "description"),
            source: format_pos(value),
            attributes: parse_attributes(value),
            ..Default::default()
        };

        if get_bool(value, "requiresS3") == Some(true) {
            svc.requires_s3 = true;
        }
        if let Some((ttl, tags)) = cache_by_op.get(op_name) {
            method.cache_ttl = ttl.clone();
            method.cache_tags = tags.clone();
            if !ttl.is_empty() {
                svc.requires_redis = true;
            }
        }

        for attr in value.attributes() {
            match attr.name.as_str() {
                "idempotent" => method.idempotent = true,
                "dedupeKey" => {
                    method.dedupe_key = attr
                        .args()
                        .iter()
                        .map(|a| a.value.as_str())
                        .collect::<Vec<_>>()
                        .join(", ");
                }
                "outbox" => {
                    method.outbox = true;
                    svc.requires_sql = true;
                }
                "audit" => {
                    method.metadata.insert("audit".into(), json!(true));
                    if let Some(event) = attr.lookup(0, "") {
                        method.metadata.insert("audit_event".into(), json!(event));
                    }
                }
                _ => {}
            }
        }
        if value.lookup("testHints").is_some() {
            method.metadata.insert("testHints".into(), json!(true));
        }

        if let Some(input) = io_block(value, "input", "in") {
            method.input = self.parse_entity(&format!("{op_name}Request"), input)?;
        }
        if let Some(output) = io_block(value, "output", "out") {
            method.output = self.parse_entity(&format!("{op_name}Response"), output)?;
        }

        if let Some(sources) = value.lookup("sources") {
            for fv in sources.fields() {
                let source = self.parse_source(op_name, &fv.label, &fv.value, index);
                match source.kind.as_str() {
                    "sql" => svc.requires_sql = true,
                    "mongo" => svc.requires_mongo = true,
                    "redis" => svc.requires_redis = true,
                    "s3" => svc.requires_s3 = true,
                    _ => {}
                }
                method.sources.push(source);
            }
        }

        for dep in string_list(value.lookup("uses")) {
            if dep != svc.name && !svc.uses.contains(&dep) {
                svc.uses.push(dep);
            }
        }

        method.implementation = parse_impl(value);

        if let Some(flow) = value.lookup("flow") {
            if flow.kind() == ValueKind::List {
                method.flow = parse_flow_steps(flow, &format!("{op_name}.flow"));
                self.validate_flow(op_name, &method.flow, index);
            }
        }

        method.throws = string_list(value.lookup("throws"));
        method.broadcasts = string_list(value.lookup("broadcasts"));
        for event in string_list(value.lookup("publishes")) {
            if !svc.publishes.contains(&event) {
                svc.publishes.push(event.clone());
            }
            method.publishes.push(event);
            svc.requires_nats = true;
        }
        if let Some(subs) = value.lookup("subscribes") {
            for fv in subs.fields() {
                let handler = fv.value.as_str().unwrap_or_default().trim().to_string();
                svc.subscribes.insert(clean_name(&fv.label), handler);
                svc.requires_nats = true;
            }
        }

        method.pagination = parse_pagination(value);
        if method.pagination.is_none() && method.output.fields.iter().any(|f| f.list) {
            method.pagination = Some(PaginationDef::inferred());
        }
        add_pagination_fields(&mut method);
        Ok(method)
    }

    fn parse_source(&self, op_name: &str, name: &str, val: &Value, index: &EntityIndex) -> Source {
        let kind = get_string(val, "kind");
        let entity = get_string(val, "entity");
        if !entity.is_empty() && kind == "sql" {
            let cue_path = format!("{op_name}.sources.{name}");
            if !index.known.contains(&entity) {
                self.warn(
                    Warning::new(
                        "architecture",
                        UNKNOWN_ENTITY,
                        SEVERITY_ERROR,
                        format!("Source '{name}' in operation '{op_name}' refers to unknown entity '{entity}'"),
                    )
                    .at(val.pos())
                    .with_op(op_name)
                    .with_cue_path(cue_path)
                    .with_hint("Define the entity in cue/domain/ or check spelling"),
                );
            } else if index.dto.contains(&entity) {
                self.warn(
                    Warning::new(
                        "architecture",
                        DTO_AS_REPO,
                        SEVERITY_ERROR,
                        format!("Source '{name}' in operation '{op_name}' refers to DTO-only entity '{entity}'"),
                    )
                    .at(val.pos())
                    .with_op(op_name)
                    .with_cue_path(cue_path)
                    .with_hint("Repository access is not allowed for DTOs. Remove @dto(only=true) or use a real domain entity"),
                );
            }
        }

        let string_map = |key: &str| -> BTreeMap<String, String> {
            val.lookup(key)
                .map(|m| {
                    m.fields()
                        .iter()
                        .map(|fv| {
                            let v = fv.value.as_str().unwrap_or_default().trim().to_string();
                            (clean_name(&fv.label), v)
                        })
                        .collect()
                })
                .unwrap_or_default()
        };

        Source {
            name: name.to_string(),
            collection: get_string(val, "collection"),
            by: string_map("by"),
            filter: string_map("filter"),
            kind,
            entity,
            metadata: Default::default(),
        }
    }

    fn validate_flow(&self, op_name: &str, steps: &[FlowStep], index: &EntityIndex) {
        self.validate_flow_block(op_name, steps, index, false);
    }

    fn validate_flow_block(&self, op_name: &str, steps: &[FlowStep], index: &EntityIndex, in_tx: bool) {
        for (i, step) in steps.iter().enumerate() {
            let report = |code: &str, message: String, hint: &str| {
                let mut w = Warning::new("flow", code, SEVERITY_ERROR, message)
                    .with_op(op_name)
                    .with_cue_path(step.cue_path.clone())
                    .with_hint(hint);
                w.step = (i + 1) as u32;
                w.action = step.action.clone();
                w.file = step.file.clone();
                w.line = step.line;
                w.column = step.column;
                self.warn(w);
            };

            if REPO_ACTIONS.contains(&step.action.as_str()) {
                let source = step.args.get("source").and_then(|v| v.as_str()).unwrap_or_default();
                if !source.is_empty() {
                    if !index.known.contains(source) {
                        report(
                            UNKNOWN_ENTITY,
                            format!("Entity '{source}' is not defined in any domain CUE file"),
                            "Define the entity in cue/domain/ or check spelling",
                        );
                    } else if index.dto.contains(source) {
                        report(
                            DTO_AS_REPO,
                            format!("Entity '{source}' is a DTO-only entity and cannot be accessed via repository"),
                            "Remove @dto(only=true) or use a real domain entity",
                        );
                    }
                }
                if step.action == "repo.Query"
                    && step.args.get("method").and_then(|v| v.as_str()).unwrap_or_default().is_empty()
                {
                    report(
                        MISSING_METHOD,
                        "repo.Query missing 'method'".to_string(),
                        r#"{action: "repo.Query", source: "Entity", method: "ListBy...", output: "items"}"#,
                    );
                }
                if step.action == "repo.GetForUpdate" && !in_tx {
                    report(
                        TX_REQUIRED,
                        "repo.GetForUpdate outside tx.Block".to_string(),
                        r#"{action: "tx.Block", do: [ ... ]}"#,
                    );
                }
            }

            let nested_tx = in_tx || step.action == "tx.Block";
            for block in step.blocks.values() {
                self.validate_flow_block(op_name, block, index, nested_tx);
            }
            for block in step.cases.values() {
                self.validate_flow_block(op_name, block, index, nested_tx);
            }
        }
    }
}

fn parse_impl(op: &Value) -> Option<MethodImpl> {
    let impl_val = op
        .lookup("impls.go")
        .or_else(|| op.lookup("_impl").filter(|v| !v.is_bottom()))
        .or_else(|| op.lookup("impl"))?;
    let code = impl_val.lookup("code").and_then(Value::as_str).unwrap_or_default();
    if code.is_empty() {
        return None;
    }
    Some(MethodImpl {
        lang: get_string(impl_val, "lang"),
        code: code.to_string(),
        imports: string_list(impl_val.lookup("imports")),
        requires_tx: get_bool(impl_val, "tx").unwrap_or(false),
    })
}

/// Parse a list of flow steps; entries without an `action` are ignored
pub(crate) fn parse_flow_steps(val: &Value, path: &str) -> Vec<FlowStep> {
    let Some(items) = val.list() else {
        return Vec::new();
    };
    items
        .iter()
        .enumerate()
        .filter_map(|(i, step_val)| parse_flow_step(step_val, &format!("{path}[{i}]")))
        .collect()
}

fn parse_flow_step(val: &Value, path: &str) -> Option<FlowStep> {
    let action = get_string(val, "action");
    if action.is_empty() {
        return None;
    }
    let pos = val.pos();
    let mut step = FlowStep {
        action,
        attributes: parse_attributes(val),
        file: pos.file.clone(),
        line: pos.line,
        column: pos.column,
        cue_path: path.to_string(),
        ..Default::default()
    };

    for fv in val.fields() {
        let label = fv.label.as_str();
        if label == "action" || label == "cases" || fv.is_definition() || FLOW_BLOCKS.contains(&label) {
            continue;
        }
        let v = &fv.value;
        let arg = match v.kind() {
            ValueKind::String if v.is_concrete() => json!(v.as_str().unwrap_or_default()),
            ValueKind::Bool if v.is_concrete() => json!(v.as_bool().unwrap_or_default()),
            ValueKind::Int if v.is_concrete() => json!(v.as_int().unwrap_or_default()),
            ValueKind::List => {
                let items: Vec<String> = v
                    .list()
                    .unwrap_or_default()
                    .iter()
                    .map(|item| item.as_str().map_or_else(|| item.to_cue_string(), str::to_string))
                    .collect();
                if label == "params" {
                    step.params = items;
                    continue;
                }
                json!(items)
            }
            ValueKind::Struct if label == "fields" => v.to_json(),
            _ => continue,
        };
        if let Some(bare) = label.strip_prefix('_') {
            step.args.insert(bare.to_string(), arg.clone());
        }
        step.args.insert(label.to_string(), arg);
    }

    for block in FLOW_BLOCKS {
        if let Some(sub) = val.lookup(block).filter(|v| v.kind() == ValueKind::List) {
            step.blocks
                .insert(block.to_string(), parse_flow_steps(sub, &format!("{path}.{block}")));
        }
    }
    if let Some(cases) = val.lookup("cases") {
        for fv in cases.fields() {
            if fv.value.kind() == ValueKind::List {
                let label = clean_name(fv.label.trim_matches('"'));
                let sub = parse_flow_steps(&fv.value, &format!("{path}.cases.{label}"));
                step.cases.insert(label, sub);
            }
        }
    }
    Some(step)
}

/// Append the request fields a paginated method needs
pub(crate) fn add_pagination_fields(method: &mut Method) {
    let Some(kind) = method.pagination.as_ref().map(|p| p.kind.clone()) else {
        return;
    };
    let wanted: &[(&str, &str)] = match kind.as_str() {
        "offset" => &[("limit", "int"), ("offset", "int")],
        "cursor" => &[("cursor", "string"), ("limit", "int")],
        _ => &[],
    };
    for (name, ty) in wanted {
        if method.input.field(name).is_none() {
            method.input.fields.push(Field::new(*name, *ty).optional());
        }
    }
}
