//! Compilation pipeline
//!
//! ```text
//! load ─► normalize ─► IR ─► migrate ─► transformers ─► hooks ─► validate
//!                                                                  │
//!                        artifacts ◄─ steps ◄─ plugins ◄─ caps ◄───┘ (per target)
//! ```
//!
//! Every stage failure leaves the pipeline as a [`ContractError`]. Non-fatal
//! findings flow through the run's [`Diagnostics`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use ang_cue::Value;
use tracing::{debug, info};

use crate::capabilities::resolve_target_capabilities;
use crate::config::CompilerConfig;
use crate::diagnostics::{CollectingSink, Diagnostics, LatestDiagnostics, TeeSink, Warning, WarningSink};
use crate::error::*;
use crate::generator::{write_manifest, ArtifactManifest, ArtifactSink, StepEventSink, StepRegistry};
use crate::ir::{self, Schema};
use crate::loader::SourceLoader;
use crate::normalizer::infra_registry::{
    infra_auth, infra_config, infra_notification_channels, infra_notification_muting,
    infra_notification_policies, InfraRegistry, InfraValues,
};
use crate::normalizer::projection::apply_projections;
use crate::normalizer::{fsm, Entity, NormalizedModel, Normalizer, Repository, RepositoryFinder, TargetDef, TemplateDef};
use crate::render::{ContextRenderer, Renderer};
use crate::targets::{backend_dir_for, resolve_plugins, BuildContext};
use crate::transformers::{HookRegistry, TransformerRegistry};

/// Per-run knobs. Everything is optional; defaults come from `ang.yaml`.
#[derive(Clone, Default)]
pub struct PipelineOptions {
    /// Receiver of diagnostics; `None` routes to [`LatestDiagnostics`]
    pub warning_sink: Option<Arc<dyn WarningSink>>,
    pub config: Option<CompilerConfig>,
    /// Source unit renderer; defaults to [`ContextRenderer`]
    pub renderer: Option<Arc<dyn Renderer>>,
    pub step_events: Option<Arc<dyn StepEventSink>>,
}

/// Result of a full compile
pub struct CompileOutput {
    pub model: NormalizedModel,
    /// Migrated, transformed and validated IR
    pub schema: Schema,
    pub artifacts: ArtifactSink,
    /// Diagnostics reported during this run, deduplicated
    pub diagnostics: Vec<Warning>,
}

struct Normalized {
    model: NormalizedModel,
    infra: InfraValues,
}

fn resolve_config(base: &Path, opts: &PipelineOptions) -> Result<CompilerConfig, ContractError> {
    match &opts.config {
        Some(cfg) => Ok(cfg.clone()),
        None => CompilerConfig::load(base).map_err(|e| cue_error(CUE_PIPELINE_ERROR, "load compiler config", e)),
    }
}

fn run_diagnostics(opts: &PipelineOptions) -> (Diagnostics, CollectingSink) {
    let tee = TeeSink::new(opts.warning_sink.clone());
    let collected = tee.collected();
    (Diagnostics::new(Some(Arc::new(tee))), collected)
}

/// Load and normalize every source package. Returns the DTO snapshot.
pub fn run_pipeline(base: &Path, opts: &PipelineOptions) -> Result<NormalizedModel, ContractError> {
    LatestDiagnostics::global().clear();
    let config = resolve_config(base, opts)?;
    let (diags, _) = run_diagnostics(opts);
    normalize_workspace(base, &config, &diags).map(|n| n.model)
}

fn load(
    loader: &SourceLoader,
    diags: &Diagnostics,
    dir: &str,
    code: &'static str,
) -> Result<Option<Value>, ContractError> {
    loader
        .load_optional(dir, diags)
        .map_err(|e| cue_error(code, format!("load cue/{dir}"), e))
}

/// Run `f` on a present package; an absent one yields the default
fn extract<T: Default>(
    val: Option<&Value>,
    code: &'static str,
    op: &str,
    f: impl FnOnce(&Value) -> anyhow::Result<T>,
) -> Result<T, ContractError> {
    match val {
        Some(v) => f(v).map_err(|e| cue_error(code, op, e)),
        None => Ok(T::default()),
    }
}

fn normalize_workspace(base: &Path, config: &CompilerConfig, diags: &Diagnostics) -> Result<Normalized, ContractError> {
    let loader = SourceLoader::new(base, config.cue_root.as_str(), config.large_file_lines);
    let n = Normalizer::new(diags);

    let domain = load(&loader, diags, "domain", CUE_DOMAIN_LOAD_ERROR)?;
    let arch = load(&loader, diags, "architecture", CUE_ARCH_LOAD_ERROR)?;
    let api = load(&loader, diags, "api", CUE_API_LOAD_ERROR)?;
    let repo = load(&loader, diags, "repo", CUE_PIPELINE_ERROR)?;
    let events = load(&loader, diags, "events", CUE_PIPELINE_ERROR)?;
    let errors = load(&loader, diags, "errors", CUE_PIPELINE_ERROR)?;

    let mut model = NormalizedModel::default();
    model.entities = extract(domain.as_ref(), CUE_ENTITY_NORMALIZE_ERROR, "extract entities", |v| {
        n.extract_entities(v)
    })?;
    model.services = extract(api.as_ref(), CUE_SERVICE_NORMALIZE_ERROR, "extract services", |v| {
        n.extract_services(v, &model.entities)
    })?;
    model.endpoints = extract(api.as_ref(), CUE_ENDPOINT_NORMALIZE_ERROR, "extract endpoints", |v| {
        n.extract_endpoints(v)
    })?;
    model.schedules = extract(api.as_ref(), CUE_SCHEDULE_NORMALIZE_ERROR, "extract schedules", |v| {
        n.extract_schedules(v)
    })?;
    model.scenarios = extract(api.as_ref(), CUE_PIPELINE_ERROR, "extract scenarios", |v| n.extract_scenarios(v))?;

    let mut repos = extract(arch.as_ref(), CUE_REPO_NORMALIZE_ERROR, "extract repositories", |v| {
        n.extract_repositories(v)
    })?;
    let mut finders = extract(repo.as_ref(), CUE_REPO_NORMALIZE_ERROR, "extract repository finders", |v| {
        n.extract_repo_finders(v)
    })?;
    refine_param_types(&model.entities, &mut finders);
    apply_projections(&mut model.entities, &mut finders, diags);
    attach_finders(&mut repos, finders);
    model.repos = repos;

    model.events = extract(events.as_ref(), CUE_PIPELINE_ERROR, "extract events", |v| n.extract_events(v))?;
    let arch_events = extract(arch.as_ref(), CUE_PIPELINE_ERROR, "extract architecture events", |v| {
        n.extract_events_from_arch(v)
    })?;
    let known: BTreeSet<String> = model.events.iter().map(|e| e.name.clone()).collect();
    model.events.extend(arch_events.into_iter().filter(|e| !known.contains(&e.name)));
    model.errors = extract(errors.as_ref(), CUE_PIPELINE_ERROR, "extract errors", |v| n.extract_errors(v))?;

    model.rbac = match load(&loader, diags, "rbac", CUE_RBAC_LOAD_ERROR)? {
        Some(v) => n.extract_rbac(&v).map_err(|e| cue_error(CUE_RBAC_PARSE_ERROR, "extract rbac", e))?,
        None => {
            let policies = load(&loader, diags, "policies", CUE_POLICIES_LOAD_ERROR)?;
            extract(policies.as_ref(), CUE_POLICIES_PARSE_ERROR, "extract policies as rbac", |v| {
                n.extract_rbac(v)
            })?
        }
    };

    let views = load(&loader, diags, "views", CUE_VIEWS_LOAD_ERROR)?;
    model.views = extract(views.as_ref(), CUE_VIEWS_PARSE_ERROR, "extract views", |v| n.extract_views(v))?;

    let project = load(&loader, diags, "project", CUE_PROJECT_LOAD_ERROR)?;
    model.project = extract(project.as_ref(), CUE_PROJECT_PARSE_ERROR, "extract project", |v| {
        n.extract_project(v)
    })?;
    model.targets = extract(project.as_ref(), CUE_TARGETS_PARSE_ERROR, "extract targets", |v| {
        n.extract_targets(v)
    })?;
    model.transformers = extract(project.as_ref(), CUE_PROJECT_PARSE_ERROR, "extract transformers config", |v| {
        n.extract_transformers_config(v)
    })?;

    let mut infra = InfraValues::new();
    if let Some(val) = load(&loader, diags, "infra", CUE_INFRA_LOAD_ERROR)? {
        infra = InfraRegistry::new()
            .extract_all(&n, &val)
            .map_err(|e| cue_error(e.code, e.op, e.source))?;
        model.config = infra_config(&infra).cloned();
        model.auth = infra_auth(&infra).cloned();
        model.notification_channels = infra_notification_channels(&infra).cloned();
        model.notification_policies = infra_notification_policies(&infra).cloned();
        model.notification_muting = infra_notification_muting(&infra).cloned();
        let templates = n
            .extract_templates(&val)
            .map_err(|e| cue_error(CUE_INFRA_CONFIG_PARSE_ERROR, "extract templates", e))?;
        model.templates = resolve_template_files(base, templates)
            .map_err(|e| cue_error(CUE_INFRA_CONFIG_PARSE_ERROR, "resolve templates", e))?;
    }

    let violations = fsm::check_fsm_integrity(&model.entities, diags);
    debug!(
        entities = model.entities.len(),
        services = model.services.len(),
        endpoints = model.endpoints.len(),
        fsm_violations = violations,
        "normalized workspace"
    );
    Ok(Normalized { model, infra })
}

/// Finder parameters declared as plain strings take the entity field's type
fn refine_param_types(entities: &[Entity], finders: &mut BTreeMap<String, Vec<RepositoryFinder>>) {
    for (entity_name, entity_finders) in finders.iter_mut() {
        let Some(entity) = entities.iter().find(|e| &e.name == entity_name) else {
            continue;
        };
        let types: BTreeMap<String, &str> = entity
            .fields
            .iter()
            .map(|f| (f.name.to_lowercase(), f.type_name.as_str()))
            .collect();
        for finder in entity_finders.iter_mut() {
            for w in &mut finder.where_clauses {
                if !(w.param_type.is_empty() || w.param_type == "string") {
                    continue;
                }
                if let Some(t) = types.get(&w.field.to_lowercase()) {
                    w.param_type = (*t).to_string();
                }
            }
        }
    }
}

/// Merge finders into the matching repository, creating one when the entity
/// has none. Finder names are unique per repository, case-insensitively.
fn attach_finders(repos: &mut Vec<Repository>, finders: BTreeMap<String, Vec<RepositoryFinder>>) {
    for (entity, entity_finders) in finders {
        match repos.iter_mut().find(|r| r.entity == entity) {
            Some(repo) => {
                for f in entity_finders {
                    if !repo.finders.iter().any(|e| e.name.eq_ignore_ascii_case(&f.name)) {
                        repo.finders.push(f);
                    }
                }
            }
            None => repos.push(Repository {
                name: format!("{entity}Repository"),
                entity,
                finders: entity_finders,
                source: String::new(),
            }),
        }
    }
}

/// Inline `*_file` content for templates that do not carry it directly
fn resolve_template_files(base: &Path, templates: Vec<TemplateDef>) -> anyhow::Result<Vec<TemplateDef>> {
    let read = |id: &str, key: &str, rel: &str| -> anyhow::Result<String> {
        let path = base.join(rel.trim());
        std::fs::read_to_string(&path).with_context(|| format!("read #Templates[{id}].{key}: {}", path.display()))
    };
    let mut out = Vec::with_capacity(templates.len());
    for mut t in templates {
        if t.subject.trim().is_empty() && !t.subject_file.trim().is_empty() {
            t.subject = read(&t.id, "subjectFile", &t.subject_file)?;
        }
        if t.text.trim().is_empty() && !t.text_file.trim().is_empty() {
            t.text = read(&t.id, "textFile", &t.text_file)?;
        }
        if t.html.trim().is_empty() && !t.html_file.trim().is_empty() {
            t.html = read(&t.id, "htmlFile", &t.html_file)?;
        }
        if t.body.trim().is_empty() && !t.body_file.trim().is_empty() {
            t.body = read(&t.id, "bodyFile", &t.body_file)?;
        }
        out.push(t);
    }
    Ok(out)
}

/// Build the IR from a normalized model: convert, attach, migrate,
/// transform, hook and validate
pub fn build_ir(model: &NormalizedModel) -> Result<Schema, ContractError> {
    let mut schema = ir::convert_from_normalizer(model);
    ir::attach_templates(&mut schema, &model.templates);
    ir::attach_notifications(
        &mut schema,
        model.notification_channels.as_ref(),
        model.notification_policies.as_ref(),
        model.notification_muting.as_ref(),
    );
    ir::migrate_to_current(&mut schema).map_err(|e| ir_error(IR_VERSION_MIGRATION_ERROR, "MigrateToCurrent", e))?;

    TransformerRegistry::from_config(&model.transformers)
        .apply(&mut schema)
        .map_err(|e| transformer_error(TRANSFORMER_APPLY_ERROR, "apply transformers", e))?;
    HookRegistry::with_builtins()
        .process(&mut schema)
        .map_err(|e| transformer_error(HOOK_PROCESS_ERROR, "process hooks", e))?;

    ir::validate_service_dependencies(&schema)
        .map_err(|e| ir_error(IR_SERVICE_DEPENDENCY_ERROR, "validate service dependencies", e))?;
    ir::validate_ir_semantics(&schema).map_err(|e| ir_error(IR_SEMANTIC_VALIDATE_ERROR, "ValidateIRSemantics", e))?;
    Ok(schema)
}

/// Full sequence up to staged artifacts. Nothing is written to disk.
pub fn compile(base: &Path, opts: &PipelineOptions) -> Result<CompileOutput, ContractError> {
    LatestDiagnostics::global().clear();
    let config = resolve_config(base, opts)?;
    let (diags, collected) = run_diagnostics(opts);
    let Normalized { model, infra } = normalize_workspace(base, &config, &diags)?;
    let schema = build_ir(&model)?;

    let targets = if model.targets.is_empty() {
        vec![TargetDef::default()]
    } else {
        model.targets.clone()
    };
    let plugins = resolve_plugins(model.project.as_ref()).map_err(|e| emitter_error(EMITTER_OPTIONS_ERROR, "resolve plugins", e))?;
    let renderer: Arc<dyn Renderer> = opts.renderer.clone().unwrap_or_else(|| Arc::new(ContextRenderer));
    let scenarios = Arc::new(model.scenarios.clone());
    let infra = Arc::new(infra);

    let mut artifacts = ArtifactSink::new();
    for target in &targets {
        let caps = resolve_target_capabilities(target)
            .map_err(|e| emitter_error(EMITTER_CAPABILITY_RESOLVE_ERROR, format!("resolve capabilities for {}", target.name), e))?;
        let mut target_schema = schema.clone();
        ir::attach_capabilities(&mut target_schema, caps.names());

        let ctx = BuildContext {
            schema: Arc::new(target_schema),
            target: target.clone(),
            project: model.project.clone(),
            scenarios: Arc::clone(&scenarios),
            infra: Arc::clone(&infra),
            renderer: Arc::clone(&renderer),
            backend_dir: backend_dir_for(&config.output.backend_dir, target, targets.len()),
        };
        let mut registry = StepRegistry::new();
        for plugin in &plugins {
            plugin.register_steps(&mut registry, &ctx);
        }
        info!(target = %target.name, steps = registry.len(), caps = ?caps.names(), "running generation steps");
        let mut sink = ArtifactSink::new();
        registry
            .execute(target, &caps, &mut sink, opts.step_events.as_deref())
            .map_err(|e| emitter_error(EMITTER_STEP_ERROR, "execute steps", e))?;
        artifacts.extend(sink);
    }

    Ok(CompileOutput {
        model,
        schema,
        artifacts,
        diagnostics: collected.warnings(),
    })
}

/// Summary of a build written to disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub files_written: usize,
    pub input_hash: String,
}

/// Compile, then write artifacts under the output directory and record
/// their hashes in the artifact manifest. Error diagnostics fail the build
/// before anything is written.
pub fn build(base: &Path, opts: &PipelineOptions) -> anyhow::Result<BuildReport> {
    let config = resolve_config(base, opts)?;
    let opts = PipelineOptions {
        config: Some(config.clone()),
        ..opts.clone()
    };
    let out = compile(base, &opts)?;
    let errors: Vec<&Warning> = out.diagnostics.iter().filter(|w| w.is_error()).collect();
    if let Some(first) = errors.first() {
        anyhow::bail!(
            "build failed with {} error diagnostic(s); first: {}: {}",
            errors.len(),
            first.code,
            first.message
        );
    }

    let input_hash = crate::plan::hash::input_hash(&base.join(&config.cue_root))?;
    let out_root = base.join(&config.output.dir);
    let files_written = out.artifacts.flush_to(&out_root)?;
    let manifest = ArtifactManifest::from_artifacts(&out.schema.ir_version, &input_hash, &out.artifacts);
    write_manifest(base, &manifest)?;
    info!(files = files_written, "build finished");
    Ok(BuildReport {
        files_written,
        input_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::FinderWhere;
    use pretty_assertions::assert_eq;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn opts(sink: &CollectingSink) -> PipelineOptions {
        PipelineOptions {
            warning_sink: Some(Arc::new(sink.clone())),
            ..Default::default()
        }
    }

    #[test]
    fn test_refine_param_types_from_entity_fields() {
        let entities = vec![Entity {
            name: "User".into(),
            fields: vec![crate::normalizer::Field::new("CreatedAt", "time")],
            ..Default::default()
        }];
        let mut finders = BTreeMap::from([(
            "User".to_string(),
            vec![RepositoryFinder {
                name: "Recent".into(),
                where_clauses: vec![FinderWhere {
                    field: "createdat".into(),
                    op: ">".into(),
                    param: "since".into(),
                    param_type: "string".into(),
                }],
                ..Default::default()
            }],
        )]);
        refine_param_types(&entities, &mut finders);
        assert_eq!(finders["User"][0].where_clauses[0].param_type, "time");
    }

    #[test]
    fn test_attach_finders_dedupes_and_creates_repositories() {
        let mut repos = vec![Repository {
            name: "UserRepository".into(),
            entity: "User".into(),
            finders: vec![RepositoryFinder {
                name: "FindByEmail".into(),
                ..Default::default()
            }],
            source: String::new(),
        }];
        let finder = |name: &str| RepositoryFinder {
            name: name.into(),
            ..Default::default()
        };
        attach_finders(
            &mut repos,
            BTreeMap::from([
                ("User".to_string(), vec![finder("findbyemail"), finder("ListActive")]),
                ("Order".to_string(), vec![finder("ListOpen")]),
            ]),
        );
        assert_eq!(repos.len(), 2);
        assert_eq!(repos[0].finders.len(), 2);
        assert_eq!(repos[1].name, "OrderRepository");
    }

    #[test]
    fn test_load_error_is_coded() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "cue/domain/bad.cue", "package domain\n\n#User: {\n");
        let sink = CollectingSink::new();
        let err = run_pipeline(dir.path(), &opts(&sink)).unwrap_err();
        assert_eq!(err.code, CUE_DOMAIN_LOAD_ERROR);
        assert!(err.to_string().starts_with("[CUE:CUE_DOMAIN_LOAD_ERROR] load cue/domain: "));
    }

    #[test]
    fn test_unsupported_target_fails_capability_resolution() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "cue/project/project.cue",
            "package project\n\n#Target: {\n\tlang: \"rust\"\n\tframework: \"axum\"\n\tdb: \"sqlite\"\n}\n",
        );
        let sink = CollectingSink::new();
        let err = compile(dir.path(), &opts(&sink)).err().unwrap();
        assert_eq!(err.code, EMITTER_CAPABILITY_RESOLVE_ERROR);
        assert!(err.to_string().contains("unsupported target profile: rust/axum/sqlite"));
    }

    #[test]
    fn test_template_files_are_inlined() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "templates/welcome.txt", "Hello {{.Name}}");
        let templates = vec![TemplateDef {
            id: "welcome".into(),
            text: String::new(),
            text_file: "templates/welcome.txt".into(),
            ..Default::default()
        }];
        let out = resolve_template_files(dir.path(), templates).unwrap();
        assert_eq!(out[0].text, "Hello {{.Name}}");

        let missing = vec![TemplateDef {
            id: "gone".into(),
            body_file: "templates/none.txt".into(),
            ..Default::default()
        }];
        let err = resolve_template_files(dir.path(), missing).unwrap_err();
        assert!(err.to_string().starts_with("read #Templates[gone].bodyFile"));
    }
}
