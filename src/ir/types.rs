//! Language-neutral IR records

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Root of the IR tree
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Schema {
    pub ir_version: String,
    pub project: Project,
    pub targets: Vec<Target>,
    pub entities: Vec<Entity>,
    pub services: Vec<Service>,
    pub events: Vec<Event>,
    pub errors: Vec<ErrorDef>,
    pub endpoints: Vec<Endpoint>,
    pub repos: Vec<Repository>,
    pub config: Config,
    pub auth: Option<Auth>,
    pub rbac: Option<Rbac>,
    pub schedules: Vec<Schedule>,
    pub views: Vec<View>,
    pub templates: Vec<Template>,
    pub notifications: Option<NotificationsConfig>,
    /// Capabilities of the target being generated, set by the build
    pub capabilities: Option<Vec<String>>,
    pub graph: Option<DependencyGraph>,
    pub metadata: Metadata,
}

impl Schema {
    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.name == name)
    }

    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Project {
    pub name: String,
    pub version: String,
    pub plugins: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Target {
    pub name: String,
    pub lang: String,
    pub framework: String,
    pub db: String,
    pub cache: String,
    pub queue: String,
    pub storage: String,
}

// ============================================================================
// Types
// ============================================================================

/// What kind of data a field holds, independent of any target language
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeRef {
    String,
    Int,
    Int64,
    Float,
    Bool,
    Time,
    Uuid,
    Json,
    File,
    Enum,
    #[default]
    Any,
    Entity { name: String },
    List { item: Box<TypeRef> },
    Map { key: Box<TypeRef>, item: Box<TypeRef> },
}

impl TypeRef {
    pub fn entity(name: impl Into<String>) -> Self {
        TypeRef::Entity { name: name.into() }
    }

    pub fn list(item: TypeRef) -> Self {
        TypeRef::List { item: Box::new(item) }
    }

    pub fn map(key: TypeRef, item: TypeRef) -> Self {
        TypeRef::Map {
            key: Box::new(key),
            item: Box::new(item),
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, TypeRef::List { .. })
    }

    /// Entity named by this type or by its list item
    pub fn entity_name(&self) -> Option<&str> {
        match self {
            TypeRef::Entity { name } => Some(name),
            TypeRef::List { item } => item.entity_name(),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            TypeRef::String => "string",
            TypeRef::Int => "int",
            TypeRef::Int64 => "int64",
            TypeRef::Float => "float",
            TypeRef::Bool => "bool",
            TypeRef::Time => "time",
            TypeRef::Uuid => "uuid",
            TypeRef::Json => "json",
            TypeRef::File => "file",
            TypeRef::Enum => "enum",
            TypeRef::Any => "any",
            TypeRef::Entity { .. } => "entity",
            TypeRef::List { .. } => "list",
            TypeRef::Map { .. } => "map",
        }
    }
}

// ============================================================================
// Entities
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Entity {
    pub name: String,
    pub description: String,
    pub owner: String,
    pub fields: Vec<Field>,
    pub fsm: Option<Fsm>,
    pub indexes: Vec<Index>,
    pub ui: EntityUi,
    pub metadata: Metadata,
    pub source: String,
}

impl Entity {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityUi {
    pub crud: Option<CrudConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CrudConfig {
    pub enabled: bool,
    pub custom: bool,
    pub views: BTreeMap<String, bool>,
    pub permissions: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub type_ref: TypeRef,
    pub optional: bool,
    pub default: Option<serde_json::Value>,
    pub secret: bool,
    pub pii: bool,
    pub skip_domain: bool,
    pub validate_tag: String,
    pub env_var: String,
    pub item_type_name: String,
    pub item_fields: Vec<Field>,
    pub attributes: Vec<Attribute>,
    pub ui: FieldUi,
    pub metadata: Metadata,
    pub source: String,
}

impl Field {
    pub fn new(name: impl Into<String>, type_ref: TypeRef) -> Self {
        Self {
            name: name.into(),
            type_ref,
            ..Default::default()
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Non-optional, or optional with a `required` validate rule
    pub fn is_required(&self) -> bool {
        if !self.optional {
            return true;
        }
        self.validate_tag
            .split(',')
            .any(|part| part.trim().eq_ignore_ascii_case("required"))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FieldUi {
    #[serde(rename = "type")]
    pub ui_type: String,
    pub label: String,
    pub placeholder: String,
    pub helper_text: String,
    pub order: i64,
    pub hidden: bool,
    pub disabled: bool,
    pub full_width: bool,
    pub rows: i64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
    pub currency: String,
    pub source: String,
    pub options: Vec<String>,
    pub multiple: bool,
    pub accept: String,
    pub max_size: i64,
    pub component: String,
    pub columns: i64,
    pub importance: String,
    pub input_kind: String,
    pub intent: String,
    pub density: String,
    pub label_mode: String,
    pub surface: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Attribute {
    pub name: String,
    pub args: BTreeMap<String, serde_json::Value>,
}

impl Attribute {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.args.insert(key.to_string(), value.into());
        self
    }

    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Fsm {
    pub field: String,
    pub states: Vec<String>,
    pub transitions: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Index {
    pub fields: Vec<String>,
    pub unique: bool,
    pub name: String,
}

// ============================================================================
// Services
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Service {
    pub name: String,
    pub description: String,
    pub methods: Vec<Method>,
    pub publishes: Vec<String>,
    pub subscribes: BTreeMap<String, String>,
    pub uses: Vec<String>,
    pub metadata: Metadata,
    pub source: String,
    pub requires_sql: bool,
    pub requires_mongo: bool,
    pub requires_redis: bool,
    pub requires_nats: bool,
    pub requires_s3: bool,
}

impl Service {
    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Method {
    pub name: String,
    pub description: String,
    pub input: Option<Entity>,
    pub output: Option<Entity>,
    pub sources: Vec<Source>,
    pub cache_ttl: String,
    pub cache_tags: Vec<String>,
    pub throws: Vec<String>,
    pub publishes: Vec<String>,
    pub broadcasts: Vec<String>,
    pub pagination: Option<Pagination>,
    pub idempotent: bool,
    pub dedupe_key: String,
    pub outbox: bool,
    #[serde(rename = "impl")]
    pub implementation: Option<Impl>,
    pub flow: Vec<FlowStep>,
    pub attributes: Vec<Attribute>,
    pub metadata: Metadata,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowStep {
    pub action: String,
    pub params: Vec<String>,
    pub args: BTreeMap<String, serde_json::Value>,
    pub blocks: BTreeMap<String, Vec<FlowStep>>,
    pub cases: BTreeMap<String, Vec<FlowStep>>,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Source {
    pub name: String,
    pub kind: String,
    pub entity: String,
    pub collection: String,
    pub query: BTreeMap<String, String>,
    pub filter: BTreeMap<String, String>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Pagination {
    #[serde(rename = "type")]
    pub kind: String,
    pub default_limit: i64,
    pub max_limit: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Impl {
    pub lang: String,
    pub code: String,
    pub imports: Vec<String>,
    pub requires_tx: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Event {
    pub name: String,
    pub fields: Vec<Field>,
    pub metadata: Metadata,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorDef {
    pub name: String,
    pub code: i64,
    pub http_status: i64,
    pub message: String,
    pub source: String,
}

// ============================================================================
// Endpoints
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoint {
    pub method: String,
    pub path: String,
    pub service: String,
    pub rpc: String,
    pub description: String,
    pub messages: Vec<String>,
    pub room_param: String,
    pub auth: Option<EndpointAuth>,
    pub cache_ttl: String,
    pub cache_tags: Vec<String>,
    pub invalidate: Vec<String>,
    pub optimistic_update: String,
    pub rate_limit: Option<RateLimit>,
    pub circuit_breaker: Option<CircuitBreaker>,
    pub timeout: String,
    pub max_body_size: i64,
    pub idempotent: bool,
    pub dedupe_key: String,
    pub errors: Vec<String>,
    pub pagination: Option<Pagination>,
    pub view: String,
    pub test_hints: Option<TestHints>,
    pub metadata: Metadata,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointAuth {
    #[serde(rename = "type")]
    pub auth_type: String,
    pub permission: String,
    pub roles: Vec<String>,
    pub check: String,
    pub inject: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimit {
    pub rps: i64,
    pub burst: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreaker {
    pub threshold: i64,
    pub timeout: String,
    pub half_open_max: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TestHints {
    pub happy_path: String,
    pub error_cases: Vec<String>,
}

// ============================================================================
// Repositories
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Repository {
    pub name: String,
    pub entity: String,
    pub finders: Vec<Finder>,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Finder {
    pub name: String,
    pub action: String,
    pub returns: String,
    pub return_type: String,
    pub select: Vec<String>,
    pub scan_fields: Vec<String>,
    #[serde(rename = "where")]
    pub where_clauses: Vec<WhereClause>,
    pub order_by: String,
    pub limit: i64,
    pub for_update: bool,
    pub custom_sql: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WhereClause {
    pub field: String,
    pub op: String,
    pub param: String,
    pub param_type: String,
}

// ============================================================================
// Infrastructure
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Auth {
    pub algorithm: String,
    pub issuer: String,
    pub audience: String,
    pub access_ttl: String,
    pub refresh_ttl: String,
    pub rotation: bool,
    pub refresh_store: String,
    pub claims: AuthClaims,
    pub operations: AuthOps,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthClaims {
    pub user_id: String,
    pub company_id: String,
    pub roles: String,
    pub permissions: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthOps {
    pub service: String,
    pub login_op: String,
    pub login_access_field: String,
    pub login_refresh_field: String,
    pub refresh_op: String,
    pub refresh_token_field: String,
    pub refresh_access_field: String,
    pub refresh_refresh_field: String,
    pub logout_op: String,
    pub logout_token_field: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Rbac {
    pub roles: BTreeMap<String, Vec<String>>,
    pub permissions: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Schedule {
    pub name: String,
    pub service: String,
    pub action: String,
    pub at: String,
    pub every: String,
    pub publish: String,
    pub payload: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct View {
    pub name: String,
    pub roles: BTreeMap<String, Vec<String>>,
}

// ============================================================================
// Templates and notifications
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Template {
    pub id: String,
    pub kind: String,
    pub channel: String,
    pub locale: String,
    pub version: String,
    pub engine: String,
    pub subject: String,
    pub text: String,
    pub html: String,
    pub body: String,
    pub required_vars: Vec<String>,
    pub optional_vars: Vec<String>,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub channels: Option<NotificationChannels>,
    pub policies: Option<NotificationPolicies>,
    pub muting: Option<NotificationMuting>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationChannels {
    pub enabled: bool,
    pub default_channels: Vec<String>,
    pub channels: BTreeMap<String, NotificationChannelSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationChannelSpec {
    pub enabled: bool,
    pub driver: String,
    pub topic: String,
    pub subject: String,
    pub template: String,
    pub dsn_env: String,
    pub brokers_env: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationPolicies {
    pub enabled: bool,
    pub rules: Vec<NotificationPolicyRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationPolicyRule {
    pub enabled: bool,
    pub event: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub audience: String,
    pub channels: Vec<String>,
    pub template: String,
    pub mute_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationMuting {
    pub enabled: bool,
    pub storage: String,
    pub default_ttl: String,
}

// ============================================================================
// Graph
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphNode {
    pub id: String,
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: String,
}
