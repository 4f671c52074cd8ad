//! Normalized records to IR
//!
//! Conversion copies records and maps the neutral type strings produced by
//! the normalizer to [`TypeRef`]. Templates, notification infra and the
//! target capability annotation are attached afterwards by the pipeline.

use std::collections::BTreeMap;

use serde_json::json;

use super::graph::build_dependency_graph;
use super::types::*;
use super::versioning::IR_VERSION_V1;
use crate::normalizer as n;

/// Map a neutral type string (`int64`, `domain.User`, `[]string`,
/// `map[string]int`) to a [`TypeRef`]
pub fn parse_type_ref(raw: &str) -> TypeRef {
    let t = raw.trim().trim_start_matches('*');
    if let Some(item) = t.strip_prefix("[]") {
        return TypeRef::list(parse_type_ref(item));
    }
    if let Some(rest) = t.strip_prefix("map[") {
        if let Some((key, item)) = rest.split_once(']') {
            return TypeRef::map(parse_type_ref(key), parse_type_ref(item));
        }
    }
    if let Some(name) = t.strip_prefix("domain.") {
        return TypeRef::entity(name);
    }
    match t {
        "string" => TypeRef::String,
        "int" | "int32" => TypeRef::Int,
        "int64" => TypeRef::Int64,
        "float" | "float32" | "float64" => TypeRef::Float,
        "bool" => TypeRef::Bool,
        "time" | "time.Time" => TypeRef::Time,
        "uuid" => TypeRef::Uuid,
        "json" | "json.RawMessage" => TypeRef::Json,
        "file" => TypeRef::File,
        "enum" => TypeRef::Enum,
        _ => TypeRef::Any,
    }
}

fn field_type_ref(f: &n::Field) -> TypeRef {
    if !f.item_fields.is_empty() {
        // Inline item structs are not entities; the name lives on the field
        return TypeRef::list(TypeRef::Any);
    }
    let mut t = parse_type_ref(&f.type_name);
    if f.list && !t.is_list() {
        t = TypeRef::list(t);
    }
    if t == TypeRef::String {
        if f.metadata.contains_key("enum") {
            return TypeRef::Enum;
        }
        if f.file_meta.is_some() {
            return TypeRef::File;
        }
    }
    t
}

fn default_value(raw: &str, t: &TypeRef) -> Option<serde_json::Value> {
    if raw.is_empty() {
        return None;
    }
    let parsed = match t {
        TypeRef::Int | TypeRef::Int64 => raw.parse::<i64>().ok().map(|v| json!(v)),
        TypeRef::Float => raw.parse::<f64>().ok().map(|v| json!(v)),
        TypeRef::Bool => raw.parse::<bool>().ok().map(|v| json!(v)),
        _ => None,
    };
    Some(parsed.unwrap_or_else(|| json!(raw)))
}

fn convert_ui(ui: &n::UiHints) -> FieldUi {
    FieldUi {
        ui_type: ui.ui_type.clone(),
        label: ui.label.clone(),
        placeholder: ui.placeholder.clone(),
        helper_text: ui.helper_text.clone(),
        order: ui.order,
        hidden: ui.hidden,
        disabled: ui.disabled,
        full_width: ui.full_width,
        rows: ui.rows,
        min: ui.min,
        max: ui.max,
        step: ui.step,
        currency: ui.currency.clone(),
        source: ui.source.clone(),
        options: ui.options.clone(),
        multiple: ui.multiple,
        accept: ui.accept.clone(),
        max_size: ui.max_size,
        component: ui.component.clone(),
        columns: ui.columns.unwrap_or(0),
        importance: ui.importance.clone(),
        input_kind: ui.input_kind.clone(),
        intent: ui.intent.clone(),
        density: ui.density.clone(),
        label_mode: ui.label_mode.clone(),
        surface: ui.surface.clone(),
    }
}

/// Typed attributes derived from the field's metadata, followed by any
/// other raw attribute not already represented
fn field_attributes(f: &n::Field) -> Vec<Attribute> {
    let mut attrs = Vec::new();
    let db = &f.db;
    if db.primary_key || db.unique || db.index || db.db_type != n::DbMeta::default().db_type {
        attrs.push(
            Attribute::new("db")
                .arg("type", db.db_type.clone())
                .arg("primary_key", db.primary_key)
                .arg("unique", db.unique)
                .arg("index", db.index),
        );
    }
    if !f.validate_tag.is_empty() {
        attrs.push(Attribute::new("validate").arg("rule", f.validate_tag.clone()));
    }
    if !f.env_var.is_empty() {
        attrs.push(Attribute::new("env").arg("name", f.env_var.clone()));
    }
    if let Some(meta) = &f.file_meta {
        let name = if meta.kind == "image" { "image" } else { "file" };
        attrs.push(
            Attribute::new(name)
                .arg("kind", meta.kind.clone())
                .arg("thumbnail", meta.thumbnail),
        );
    }
    if let Some(mode) = f.metadata.get("encrypt") {
        attrs.push(Attribute::new("encrypt").arg("mode", mode.clone()));
    }
    if f.metadata.contains_key("redact") {
        attrs.push(Attribute::new("redact"));
    }
    for raw in &f.attributes {
        if attrs.iter().any(|a| a.name == raw.name) {
            continue;
        }
        attrs.push(Attribute {
            name: raw.name.clone(),
            args: raw.args.iter().map(|(k, v)| (k.clone(), json!(v))).collect(),
        });
    }
    attrs
}

pub fn convert_field(f: &n::Field) -> Field {
    let type_ref = field_type_ref(f);
    Field {
        name: f.name.clone(),
        default: default_value(&f.default, &type_ref),
        type_ref,
        optional: f.optional,
        secret: f.secret,
        pii: f.pii,
        skip_domain: f.skip_domain,
        validate_tag: f.validate_tag.clone(),
        env_var: f.env_var.clone(),
        item_type_name: f.item_type_name.clone(),
        item_fields: f.item_fields.iter().map(convert_field).collect(),
        attributes: field_attributes(f),
        ui: f.ui.as_ref().map(convert_ui).unwrap_or_default(),
        metadata: f.metadata.clone(),
        source: f.source.clone(),
    }
}

pub fn convert_entity(e: &n::Entity) -> Entity {
    Entity {
        name: e.name.clone(),
        description: e.description.clone(),
        owner: e.owner.clone(),
        fields: e.fields.iter().map(convert_field).collect(),
        fsm: e.fsm.as_ref().map(|f| Fsm {
            field: f.field.clone(),
            states: f.states.clone(),
            transitions: f.transitions.clone(),
        }),
        indexes: e
            .indexes
            .iter()
            .map(|i| Index {
                fields: i.fields.clone(),
                unique: i.unique,
                name: String::new(),
            })
            .collect(),
        ui: EntityUi {
            crud: e.ui.as_ref().and_then(|ui| ui.crud.as_ref()).map(|c| CrudConfig {
                enabled: c.enabled,
                custom: c.custom,
                views: c.views.clone(),
                permissions: c.permissions.clone(),
            }),
        },
        metadata: e.metadata.clone(),
        source: e.source.clone(),
    }
}

fn convert_pagination(p: &n::PaginationDef) -> Pagination {
    Pagination {
        kind: p.kind.clone(),
        default_limit: p.default_limit,
        max_limit: p.max_limit,
    }
}

fn convert_flow(steps: &[n::FlowStep]) -> Vec<FlowStep> {
    let nested = |m: &BTreeMap<String, Vec<n::FlowStep>>| -> BTreeMap<String, Vec<FlowStep>> {
        m.iter().map(|(k, v)| (k.clone(), convert_flow(v))).collect()
    };
    steps
        .iter()
        .map(|s| FlowStep {
            action: s.action.clone(),
            params: s.params.clone(),
            args: s.args.clone(),
            blocks: nested(&s.blocks),
            cases: nested(&s.cases),
            source: if s.file.is_empty() {
                String::new()
            } else {
                format!("{}:{}", s.file, s.line)
            },
        })
        .collect()
}

fn non_empty_entity(e: &n::Entity) -> Option<Entity> {
    (!e.name.is_empty() || !e.fields.is_empty()).then(|| convert_entity(e))
}

pub fn convert_method(m: &n::Method) -> Method {
    Method {
        name: m.name.clone(),
        description: m.description.clone(),
        input: non_empty_entity(&m.input),
        output: non_empty_entity(&m.output),
        sources: m
            .sources
            .iter()
            .map(|s| Source {
                name: s.name.clone(),
                kind: s.kind.clone(),
                entity: s.entity.clone(),
                collection: s.collection.clone(),
                query: s.by.clone(),
                filter: s.filter.clone(),
                metadata: s.metadata.clone(),
            })
            .collect(),
        cache_ttl: m.cache_ttl.clone(),
        cache_tags: m.cache_tags.clone(),
        throws: m.throws.clone(),
        publishes: m.publishes.clone(),
        broadcasts: m.broadcasts.clone(),
        pagination: m.pagination.as_ref().map(convert_pagination),
        idempotent: m.idempotent,
        dedupe_key: m.dedupe_key.clone(),
        outbox: m.outbox,
        implementation: m.implementation.as_ref().map(|i| Impl {
            lang: i.lang.clone(),
            code: i.code.clone(),
            imports: i.imports.clone(),
            requires_tx: i.requires_tx,
        }),
        flow: convert_flow(&m.flow),
        attributes: m
            .attributes
            .iter()
            .map(|a| Attribute {
                name: a.name.clone(),
                args: a.args.iter().map(|(k, v)| (k.clone(), json!(v))).collect(),
            })
            .collect(),
        metadata: m.metadata.clone(),
        source: m.source.clone(),
    }
}

pub fn convert_service(s: &n::Service) -> Service {
    Service {
        name: s.name.clone(),
        description: s.description.clone(),
        methods: s.methods.iter().map(convert_method).collect(),
        publishes: s.publishes.clone(),
        subscribes: s.subscribes.clone(),
        uses: s.uses.clone(),
        metadata: s.metadata.clone(),
        source: s.source.clone(),
        requires_sql: s.requires_sql,
        requires_mongo: s.requires_mongo,
        requires_redis: s.requires_redis,
        requires_nats: s.requires_nats,
        requires_s3: s.requires_s3,
    }
}

pub fn convert_endpoint(ep: &n::Endpoint) -> Endpoint {
    let has_auth = !ep.auth_type.is_empty()
        || !ep.permission.is_empty()
        || !ep.roles.is_empty()
        || !ep.auth_check.is_empty()
        || !ep.auth_inject.is_empty();
    Endpoint {
        method: ep.method.clone(),
        path: ep.path.clone(),
        service: ep.service.clone(),
        rpc: ep.rpc.clone(),
        description: ep.description.clone(),
        messages: ep.messages.clone(),
        room_param: ep.room_param.clone(),
        auth: has_auth.then(|| EndpointAuth {
            auth_type: ep.auth_type.clone(),
            permission: ep.permission.clone(),
            roles: ep.roles.clone(),
            check: ep.auth_check.clone(),
            inject: ep.auth_inject.clone(),
        }),
        cache_ttl: ep.cache_ttl.clone(),
        cache_tags: ep.cache_tags.clone(),
        invalidate: ep.invalidate.clone(),
        optimistic_update: ep.optimistic_update.clone(),
        rate_limit: ep.rate_limit.as_ref().map(|r| RateLimit {
            rps: r.rps,
            burst: r.burst,
        }),
        circuit_breaker: ep.circuit_breaker.as_ref().map(|c| CircuitBreaker {
            threshold: c.threshold,
            timeout: c.timeout.clone(),
            half_open_max: c.half_open_max,
        }),
        timeout: ep.timeout.clone(),
        max_body_size: ep.max_body_size,
        idempotent: ep.idempotent,
        dedupe_key: ep.dedupe_key.clone(),
        errors: ep.errors.clone(),
        pagination: ep.pagination.as_ref().map(convert_pagination),
        view: ep.view.clone(),
        test_hints: ep.test_hints.as_ref().map(|t| TestHints {
            happy_path: t.happy_path.clone(),
            error_cases: t.error_cases.clone(),
        }),
        metadata: ep.metadata.clone(),
        source: ep.source.clone(),
    }
}

pub fn convert_repository(r: &n::Repository) -> Repository {
    Repository {
        name: r.name.clone(),
        entity: r.entity.clone(),
        finders: r
            .finders
            .iter()
            .map(|f| Finder {
                name: f.name.clone(),
                action: f.action.clone(),
                returns: f.returns.clone(),
                return_type: f.return_type.clone(),
                select: f.select.clone(),
                scan_fields: f.scan_fields.clone(),
                where_clauses: f
                    .where_clauses
                    .iter()
                    .map(|w| WhereClause {
                        field: w.field.clone(),
                        op: w.op.clone(),
                        param: w.param.clone(),
                        param_type: w.param_type.clone(),
                    })
                    .collect(),
                order_by: f.order_by.clone(),
                limit: f.limit,
                for_update: f.for_update,
                custom_sql: f.custom_sql.clone(),
                source: f.source.clone(),
            })
            .collect(),
        source: r.source.clone(),
    }
}

pub fn convert_auth(a: &n::AuthDef) -> Auth {
    Auth {
        algorithm: a.alg.clone(),
        issuer: a.issuer.clone(),
        audience: a.audience.clone(),
        access_ttl: a.access_ttl.clone(),
        refresh_ttl: a.refresh_ttl.clone(),
        rotation: a.rotation,
        refresh_store: a.refresh_store.clone(),
        claims: AuthClaims {
            user_id: a.user_id_claim.clone(),
            company_id: a.company_id_claim.clone(),
            roles: a.roles_claim.clone(),
            permissions: a.permissions_claim.clone(),
        },
        operations: AuthOps {
            service: a.service.clone(),
            login_op: a.login_op.clone(),
            login_access_field: a.login_access_field.clone(),
            login_refresh_field: a.login_refresh_field.clone(),
            refresh_op: a.refresh_op.clone(),
            refresh_token_field: a.refresh_token_field.clone(),
            refresh_access_field: a.refresh_access_field.clone(),
            refresh_refresh_field: a.refresh_refresh_field.clone(),
            logout_op: a.logout_op.clone(),
            logout_token_field: a.logout_token_field.clone(),
        },
    }
}

pub fn convert_schedule(s: &n::ScheduleDef) -> Schedule {
    Schedule {
        name: s.name.clone(),
        service: s.service.clone(),
        action: s.action.clone(),
        at: s.at.clone(),
        every: s.every.clone(),
        publish: s.publish.clone(),
        payload: s
            .payload
            .iter()
            .map(|p| {
                let type_ref = parse_type_ref(&p.type_name);
                Field {
                    name: p.name.clone(),
                    default: default_value(&p.value, &type_ref),
                    type_ref,
                    ..Default::default()
                }
            })
            .collect(),
    }
}

pub fn convert_target(t: &n::TargetDef) -> Target {
    Target {
        name: t.name.clone(),
        lang: t.lang.clone(),
        framework: t.framework.clone(),
        db: t.db.clone(),
        cache: t.cache.clone(),
        queue: t.queue.clone(),
        storage: t.storage.clone(),
    }
}

/// Build a v1 schema from the normalized model; the pipeline migrates it
pub fn convert_from_normalizer(model: &n::NormalizedModel) -> Schema {
    let mut schema = Schema {
        ir_version: IR_VERSION_V1.to_string(),
        project: model
            .project
            .as_ref()
            .map(|p| Project {
                name: p.name.clone(),
                version: p.version.clone(),
                plugins: p.plugins.clone(),
            })
            .unwrap_or_default(),
        targets: model.targets.iter().map(convert_target).collect(),
        entities: model.entities.iter().map(convert_entity).collect(),
        services: model.services.iter().map(convert_service).collect(),
        events: model
            .events
            .iter()
            .map(|e| Event {
                name: e.name.clone(),
                fields: e.fields.iter().map(convert_field).collect(),
                metadata: e.metadata.clone(),
                source: e.source.clone(),
            })
            .collect(),
        errors: model
            .errors
            .iter()
            .map(|e| ErrorDef {
                name: e.name.clone(),
                code: e.code,
                http_status: e.http_status,
                message: e.message.clone(),
                source: e.source.clone(),
            })
            .collect(),
        endpoints: model.endpoints.iter().map(convert_endpoint).collect(),
        repos: model.repos.iter().map(convert_repository).collect(),
        config: Config {
            fields: model
                .config
                .as_ref()
                .map(|c| c.fields.iter().map(convert_field).collect())
                .unwrap_or_default(),
        },
        auth: model.auth.as_ref().map(convert_auth),
        rbac: model.rbac.as_ref().map(|r| Rbac {
            roles: r.roles.clone(),
            permissions: r.permissions.clone(),
        }),
        schedules: model.schedules.iter().map(convert_schedule).collect(),
        views: model
            .views
            .iter()
            .map(|v| View {
                name: v.name.clone(),
                roles: v.roles.clone(),
            })
            .collect(),
        ..Default::default()
    };
    schema.graph = Some(build_dependency_graph(&schema));
    schema
}

/// Copy the template catalog; entries without an id are dropped
pub fn attach_templates(schema: &mut Schema, templates: &[n::TemplateDef]) {
    let out: Vec<Template> = templates
        .iter()
        .filter(|t| !t.id.trim().is_empty())
        .map(|t| Template {
            id: t.id.trim().to_string(),
            kind: t.kind.trim().to_string(),
            channel: t.channel.trim().to_string(),
            locale: t.locale.trim().to_string(),
            version: t.version.trim().to_string(),
            engine: t.engine.trim().to_string(),
            subject: t.subject.clone(),
            text: t.text.clone(),
            html: t.html.clone(),
            body: t.body.clone(),
            required_vars: t.required_vars.clone(),
            optional_vars: t.optional_vars.clone(),
            source: t.source.clone(),
        })
        .collect();
    if !out.is_empty() {
        schema.templates = out;
    }
}

pub fn attach_notifications(
    schema: &mut Schema,
    channels: Option<&n::NotificationChannelsDef>,
    policies: Option<&n::NotificationPoliciesDef>,
    muting: Option<&n::NotificationMutingDef>,
) {
    if channels.is_none() && policies.is_none() && muting.is_none() {
        return;
    }
    let cfg = schema.notifications.get_or_insert_with(NotificationsConfig::default);
    if let Some(c) = channels {
        cfg.channels = Some(NotificationChannels {
            enabled: c.enabled,
            default_channels: c.default_channels.clone(),
            channels: c
                .channels
                .iter()
                .map(|(name, spec)| {
                    (
                        name.clone(),
                        NotificationChannelSpec {
                            enabled: spec.enabled,
                            driver: spec.driver.clone(),
                            topic: spec.topic.clone(),
                            subject: spec.subject.clone(),
                            template: spec.template.clone(),
                            dsn_env: spec.dsn_env.clone(),
                            brokers_env: spec.brokers_env.clone(),
                        },
                    )
                })
                .collect(),
        });
    }
    if let Some(p) = policies {
        cfg.policies = Some(NotificationPolicies {
            enabled: p.enabled,
            rules: p
                .rules
                .iter()
                .map(|r| NotificationPolicyRule {
                    enabled: r.enabled,
                    event: r.event.clone(),
                    kind: r.kind.clone(),
                    audience: r.audience.clone(),
                    channels: r.channels.clone(),
                    template: r.template.clone(),
                    mute_key: r.mute_key.clone(),
                })
                .collect(),
        });
    }
    if let Some(m) = muting {
        cfg.muting = Some(NotificationMuting {
            enabled: m.enabled,
            storage: m.storage.clone(),
            default_ttl: m.default_ttl.clone(),
        });
    }
}

/// Record the capabilities of the target being generated
pub fn attach_capabilities(schema: &mut Schema, capabilities: Vec<String>) {
    schema.capabilities = Some(capabilities);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_type_ref() {
        assert_eq!(parse_type_ref("string"), TypeRef::String);
        assert_eq!(parse_type_ref("int64"), TypeRef::Int64);
        assert_eq!(parse_type_ref("time.Time"), TypeRef::Time);
        assert_eq!(parse_type_ref("domain.User"), TypeRef::entity("User"));
        assert_eq!(parse_type_ref("*domain.User"), TypeRef::entity("User"));
        assert_eq!(parse_type_ref("[]domain.User"), TypeRef::list(TypeRef::entity("User")));
        assert_eq!(
            parse_type_ref("map[string]int"),
            TypeRef::map(TypeRef::String, TypeRef::Int)
        );
        assert_eq!(parse_type_ref("widget"), TypeRef::Any);
    }

    #[test]
    fn test_convert_field_enum_default_and_attributes() {
        let mut f = n::Field::new("status", "string");
        f.default = "draft".into();
        f.metadata.insert("enum".into(), json!(["draft", "paid"]));
        f.validate_tag = "required".into();
        let ir = convert_field(&f);
        assert_eq!(ir.type_ref, TypeRef::Enum);
        assert_eq!(ir.default, Some(json!("draft")));
        assert_eq!(ir.attribute("validate").and_then(|a| a.str_arg("rule")), Some("required"));
        assert!(ir.attribute("db").is_none());

        let mut count = n::Field::new("count", "int");
        count.default = "3".into();
        assert_eq!(convert_field(&count).default, Some(json!(3)));
    }

    #[test]
    fn test_inline_list_items_are_not_entity_refs() {
        let mut f = n::Field::new("items", "[]OrderItemsItem");
        f.list = true;
        f.item_type_name = "OrderItemsItem".into();
        f.item_fields = vec![n::Field::new("sku", "string")];
        let ir = convert_field(&f);
        assert_eq!(ir.type_ref, TypeRef::list(TypeRef::Any));
        assert_eq!(ir.item_fields.len(), 1);
    }

    #[test]
    fn test_attach_templates_trims_and_skips_empty_ids() {
        let mut schema = Schema::default();
        let templates = vec![
            n::TemplateDef {
                id: "  welcome ".into(),
                channel: " email ".into(),
                ..Default::default()
            },
            n::TemplateDef::default(),
        ];
        attach_templates(&mut schema, &templates);
        assert_eq!(schema.templates.len(), 1);
        assert_eq!(schema.templates[0].id, "welcome");
        assert_eq!(schema.templates[0].channel, "email");
    }

    #[test]
    fn test_convert_model_builds_graph_and_auth() {
        let model = n::NormalizedModel {
            entities: vec![n::Entity {
                name: "User".into(),
                ..Default::default()
            }],
            endpoints: vec![n::Endpoint {
                method: "GET".into(),
                path: "/users".into(),
                service: "users".into(),
                rpc: "ListUsers".into(),
                auth_type: "jwt".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let schema = convert_from_normalizer(&model);
        assert_eq!(schema.ir_version, IR_VERSION_V1);
        assert_eq!(schema.graph.as_ref().map(|g| g.nodes.len()), Some(1));
        assert_eq!(schema.endpoints[0].auth.as_ref().map(|a| a.auth_type.as_str()), Some("jwt"));
    }
}
