//! Normalized records extracted from CUE packages
//!
//! Types are carried as language-neutral strings: `string`, `int`, `int64`,
//! `float`, `bool`, `time`, `json`, `any`, `domain.<Entity>` for entity
//! references and `[]<T>` for lists. The IR builder maps them to `TypeRef`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Free-form plugin metadata
pub type Metadata = BTreeMap<String, serde_json::Value>;

// ============================================================================
// Entities
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub description: String,
    pub owner: String,
    pub fields: Vec<Field>,
    pub fsm: Option<Fsm>,
    pub indexes: Vec<IndexDef>,
    pub ui: Option<EntityUi>,
    pub metadata: Metadata,
    pub source: String,
}

impl Entity {
    pub fn is_dto(&self) -> bool {
        self.metadata.get("dto").and_then(|v| v.as_bool()) == Some(true)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntityUi {
    pub crud: Option<CrudDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CrudDef {
    pub enabled: bool,
    pub custom: bool,
    pub views: BTreeMap<String, bool>,
    pub permissions: BTreeMap<String, String>,
}

/// State machine over one entity field
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Fsm {
    pub field: String,
    /// Explicitly declared states; empty means "derived from transitions"
    pub states: Vec<String>,
    pub transitions: BTreeMap<String, Vec<String>>,
    pub source: String,
}

impl Fsm {
    /// Declared states, or every state named by a transition
    pub fn all_states(&self) -> Vec<String> {
        if !self.states.is_empty() {
            return self.states.clone();
        }
        let mut states: Vec<String> = self
            .transitions
            .iter()
            .flat_map(|(from, to)| std::iter::once(from).chain(to.iter()))
            .cloned()
            .collect();
        states.sort();
        states.dedup();
        states
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexDef {
    pub fields: Vec<String>,
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub default: String,
    pub optional: bool,
    pub list: bool,
    pub file_meta: Option<FileMeta>,
    pub db: DbMeta,
    pub validate_tag: String,
    pub env_var: String,
    pub secret: bool,
    pub pii: bool,
    /// Excluded from domain structs (DTO or UI only)
    pub skip_domain: bool,
    pub item_type_name: String,
    pub item_fields: Vec<Field>,
    pub metadata: Metadata,
    pub ui: Option<UiHints>,
    pub attributes: Vec<Attribute>,
    pub source: String,
}

impl Field {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            db: DbMeta::default(),
            ..Default::default()
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileMeta {
    pub kind: String,
    pub thumbnail: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbMeta {
    #[serde(rename = "type")]
    pub db_type: String,
    pub primary_key: bool,
    pub unique: bool,
    pub index: bool,
}

impl Default for DbMeta {
    fn default() -> Self {
        Self {
            db_type: "TEXT".to_string(),
            primary_key: false,
            unique: false,
            index: false,
        }
    }
}

/// Hints for generated forms and tables, from `@ui(...)`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiHints {
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
    pub columns: Option<i64>,
    pub importance: String,
    pub input_kind: String,
    pub intent: String,
    pub density: String,
    pub label_mode: String,
    pub surface: String,
}

/// Parsed CUE attribute; positional arguments use the key `_`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub args: BTreeMap<String, String>,
}

// ============================================================================
// Services
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
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

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Method {
    pub name: String,
    pub description: String,
    pub input: Entity,
    pub output: Entity,
    pub sources: Vec<Source>,
    pub cache_ttl: String,
    pub cache_tags: Vec<String>,
    pub throws: Vec<String>,
    pub publishes: Vec<String>,
    pub broadcasts: Vec<String>,
    pub pagination: Option<PaginationDef>,
    pub idempotent: bool,
    pub dedupe_key: String,
    pub outbox: bool,
    #[serde(rename = "impl")]
    pub implementation: Option<MethodImpl>,
    pub flow: Vec<FlowStep>,
    pub attributes: Vec<Attribute>,
    pub metadata: Metadata,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FlowStep {
    pub action: String,
    pub params: Vec<String>,
    pub args: BTreeMap<String, serde_json::Value>,
    /// Nested blocks keyed by `then`, `else`, `do`, `default`, `ifNew`, `ifExists`
    pub blocks: BTreeMap<String, Vec<FlowStep>>,
    pub cases: BTreeMap<String, Vec<FlowStep>>,
    pub attributes: Vec<Attribute>,
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub cue_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MethodImpl {
    pub lang: String,
    pub code: String,
    pub imports: Vec<String>,
    pub requires_tx: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    pub kind: String,
    pub entity: String,
    pub collection: String,
    pub by: BTreeMap<String, String>,
    pub filter: BTreeMap<String, String>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PaginationDef {
    #[serde(rename = "type")]
    pub kind: String,
    pub default_limit: i64,
    pub max_limit: i64,
}

impl PaginationDef {
    pub fn inferred() -> Self {
        Self {
            kind: "offset".to_string(),
            default_limit: 20,
            max_limit: 100,
        }
    }
}

// ============================================================================
// Endpoints
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Endpoint {
    pub method: String,
    pub path: String,
    pub service: String,
    pub rpc: String,
    pub description: String,
    pub messages: Vec<String>,
    pub room_param: String,
    pub auth_type: String,
    pub permission: String,
    pub roles: Vec<String>,
    pub auth_check: String,
    pub auth_inject: Vec<String>,
    pub cache_ttl: String,
    pub cache_tags: Vec<String>,
    pub invalidate: Vec<String>,
    pub optimistic_update: String,
    pub rate_limit: Option<RateLimitDef>,
    pub circuit_breaker: Option<CircuitBreakerDef>,
    pub timeout: String,
    pub max_body_size: i64,
    pub idempotent: bool,
    pub dedupe_key: String,
    pub errors: Vec<String>,
    pub pagination: Option<PaginationDef>,
    pub view: String,
    pub test_hints: Option<TestHints>,
    pub metadata: Metadata,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RateLimitDef {
    pub rps: i64,
    pub burst: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerDef {
    pub threshold: i64,
    pub timeout: String,
    pub half_open_max: i64,
}

impl Default for CircuitBreakerDef {
    fn default() -> Self {
        Self {
            threshold: 5,
            timeout: "30s".to_string(),
            half_open_max: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TestHints {
    pub happy_path: String,
    pub error_cases: Vec<String>,
}

// ============================================================================
// Repositories
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub entity: String,
    pub finders: Vec<RepositoryFinder>,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RepositoryFinder {
    pub name: String,
    pub action: String,
    /// `one`, `many`, `count`, ...
    pub returns: String,
    /// Explicit return type such as `*domain.Report` or `[]domain.Row`
    pub return_type: String,
    pub select: Vec<String>,
    pub scan_fields: Vec<String>,
    #[serde(rename = "where")]
    pub where_clauses: Vec<FinderWhere>,
    pub order_by: String,
    pub limit: i64,
    pub for_update: bool,
    pub custom_sql: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FinderWhere {
    pub field: String,
    pub op: String,
    pub param: String,
    pub param_type: String,
}

// ============================================================================
// Events, errors, schedules, views, scenarios
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EventDef {
    pub name: String,
    pub fields: Vec<Field>,
    pub metadata: Metadata,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ErrorDef {
    pub name: String,
    pub code: i64,
    pub http_status: i64,
    pub message: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScheduleDef {
    pub name: String,
    pub service: String,
    pub action: String,
    pub at: String,
    pub publish: String,
    pub every: String,
    pub payload: Vec<SchedulePayloadField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchedulePayloadField {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ViewDef {
    pub name: String,
    pub roles: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScenarioDef {
    pub name: String,
    pub description: String,
    pub steps: Vec<ScenarioStep>,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScenarioStep {
    pub name: String,
    pub action: String,
    pub input: serde_json::Map<String, serde_json::Value>,
    pub expect: ScenarioExpect,
    pub export: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScenarioExpect {
    pub status: i64,
    pub body: serde_json::Map<String, serde_json::Value>,
}

// ============================================================================
// Infrastructure and project
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfigDef {
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthDef {
    pub alg: String,
    pub issuer: String,
    pub audience: String,
    pub user_id_claim: String,
    pub company_id_claim: String,
    pub roles_claim: String,
    pub permissions_claim: String,
    pub access_ttl: String,
    pub refresh_ttl: String,
    pub rotation: bool,
    pub refresh_store: String,
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
pub struct RbacDef {
    pub roles: BTreeMap<String, Vec<String>>,
    pub permissions: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProjectDef {
    pub name: String,
    pub version: String,
    /// Target plugins to enable; empty means all built-ins
    pub plugins: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDef {
    pub name: String,
    pub lang: String,
    pub framework: String,
    pub db: String,
    pub cache: String,
    pub queue: String,
    pub storage: String,
}

impl Default for TargetDef {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            lang: "go".to_string(),
            framework: "chi".to_string(),
            db: "postgres".to_string(),
            cache: "redis".to_string(),
            queue: "nats".to_string(),
            storage: "s3".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformersConfig {
    pub timestamps: bool,
    pub soft_delete: bool,
    pub image: bool,
    pub thumb_suffix: String,
    pub validation: bool,
    pub tracing: bool,
    pub caching: bool,
    pub field_security: bool,
}

impl Default for TransformersConfig {
    fn default() -> Self {
        Self {
            timestamps: true,
            soft_delete: false,
            image: true,
            thumb_suffix: "_thumb".to_string(),
            validation: true,
            tracing: true,
            caching: true,
            field_security: true,
        }
    }
}

// ============================================================================
// Templates and notifications
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TemplateDef {
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
    /// Content files, relative to the catalog `dir`
    pub subject_file: String,
    pub text_file: String,
    pub html_file: String,
    pub body_file: String,
    pub required_vars: Vec<String>,
    pub optional_vars: Vec<String>,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NotificationChannelsDef {
    pub enabled: bool,
    pub default_channels: Vec<String>,
    pub channels: BTreeMap<String, NotificationChannelDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NotificationChannelDef {
    pub enabled: bool,
    pub driver: String,
    pub topic: String,
    pub subject: String,
    pub template: String,
    pub dsn_env: String,
    pub brokers_env: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NotificationPoliciesDef {
    pub enabled: bool,
    pub rules: Vec<NotificationRuleDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NotificationRuleDef {
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
pub struct NotificationMutingDef {
    pub enabled: bool,
    pub storage: String,
    pub default_ttl: String,
}

/// Everything the normalizer produced for one workspace
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NormalizedModel {
    pub entities: Vec<Entity>,
    pub services: Vec<Service>,
    pub endpoints: Vec<Endpoint>,
    pub repos: Vec<Repository>,
    pub events: Vec<EventDef>,
    pub errors: Vec<ErrorDef>,
    pub schedules: Vec<ScheduleDef>,
    pub scenarios: Vec<ScenarioDef>,
    pub views: Vec<ViewDef>,
    pub config: Option<ConfigDef>,
    pub auth: Option<AuthDef>,
    pub rbac: Option<RbacDef>,
    pub project: Option<ProjectDef>,
    pub targets: Vec<TargetDef>,
    pub transformers: TransformersConfig,
    pub templates: Vec<TemplateDef>,
    pub notification_channels: Option<NotificationChannelsDef>,
    pub notification_policies: Option<NotificationPoliciesDef>,
    pub notification_muting: Option<NotificationMutingDef>,
}
