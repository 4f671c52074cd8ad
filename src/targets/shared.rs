//! Language-neutral contracts shared by every target

use std::sync::Arc;

use super::{asyncapi, builtin_descriptor, catalog, openapi, sql, BuildContext, PluginDescriptor, TargetPlugin};
use crate::capabilities::Capability;
use crate::generator::{ArtifactSink, Step, StepRegistry};
use crate::ir::Schema;

pub struct SharedPlugin;

/// Register a step that reads only the schema
fn schema_step<F>(
    registry: &mut StepRegistry,
    schema: &Arc<Schema>,
    name: &str,
    key: &str,
    requires: &[Capability],
    run: F,
) where
    F: Fn(&Schema, &mut ArtifactSink) -> anyhow::Result<()> + Send + Sync + 'static,
{
    let schema = Arc::clone(schema);
    registry.register(Step::new(name, requires, move |sink: &mut ArtifactSink| run(&schema, sink)).with_artifact_key(key));
}

impl TargetPlugin for SharedPlugin {
    fn name(&self) -> &str {
        "shared"
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::Http, Capability::Events]
    }

    fn descriptor(&self) -> Option<PluginDescriptor> {
        Some(builtin_descriptor())
    }

    fn register_steps(&self, registry: &mut StepRegistry, ctx: &BuildContext) {
        let schema = &ctx.schema;

        schema_step(registry, schema, "System Manifest", "system_manifest", &[], |s, sink| {
            if s.entities.is_empty() && s.services.is_empty() && s.events.is_empty() {
                return Ok(());
            }
            sink.write_json("ang-manifest.json", &catalog::build_system_manifest(s))
        });

        schema_step(registry, schema, "OpenAPI", "openapi", &[Capability::Http], |s, sink| {
            if s.endpoints.is_empty() {
                return Ok(());
            }
            sink.write_json("api/openapi.json", &openapi::build_openapi(s))
        });

        schema_step(registry, schema, "AsyncAPI", "asyncapi", &[Capability::Events], |s, sink| {
            if s.events.is_empty() {
                return Ok(());
            }
            sink.write_json("api/asyncapi.json", &asyncapi::build_asyncapi(s))
        });

        schema_step(registry, schema, "Error Catalog", "error_catalog", &[], |s, sink| {
            let catalog = catalog::build_error_catalog(s);
            if catalog.is_empty() {
                return Ok(());
            }
            sink.write_json("api/errors.json", &catalog)
        });

        schema_step(registry, schema, "SQL Schema", "sql_schema", &[Capability::SqlRepo], |s, sink| {
            match sql::build_schema_sql(s) {
                Some(ddl) => sink.write("db/schema.sql", ddl),
                None => Ok(()),
            }
        });

        schema_step(registry, schema, "RBAC Policy", "rbac_policy", &[Capability::Auth], |s, sink| {
            match catalog::build_rbac_policy(s) {
                Some(policy) => sink.write_json("api/rbac.json", &policy),
                None => Ok(()),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::CapabilitySet;
    use crate::ir::{Endpoint, Entity, Field, Method, Repository, Service, TypeRef};
    use crate::normalizer::TargetDef;
    use crate::render::ContextRenderer;
    use pretty_assertions::assert_eq;

    fn ctx(schema: Schema) -> BuildContext {
        BuildContext {
            schema: Arc::new(schema),
            target: TargetDef::default(),
            project: None,
            scenarios: Arc::new(Vec::new()),
            infra: Arc::new(Default::default()),
            renderer: Arc::new(ContextRenderer),
            backend_dir: "internal".into(),
        }
    }

    fn run(schema: Schema, caps: CapabilitySet) -> ArtifactSink {
        let ctx = ctx(schema);
        let mut registry = StepRegistry::new();
        SharedPlugin.register_steps(&mut registry, &ctx);
        let mut sink = ArtifactSink::new();
        registry.execute(&ctx.target, &caps, &mut sink, None).unwrap();
        sink
    }

    #[test]
    fn test_empty_schema_writes_nothing() {
        let caps = CapabilitySet::new(Capability::ALL);
        assert!(run(Schema::default(), caps).is_empty());
    }

    #[test]
    fn test_contracts_follow_capabilities() {
        let schema = Schema {
            entities: vec![Entity {
                name: "User".into(),
                fields: vec![Field::new("id", TypeRef::String)],
                ..Default::default()
            }],
            services: vec![Service {
                name: "svc1".into(),
                methods: vec![Method {
                    name: "Op1".into(),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            endpoints: vec![Endpoint {
                method: "GET".into(),
                path: "/api/svc1/1/{id}".into(),
                service: "svc1".into(),
                rpc: "Op1".into(),
                ..Default::default()
            }],
            repos: vec![Repository {
                name: "UserRepository".into(),
                entity: "User".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let all = run(schema.clone(), CapabilitySet::new([Capability::Http, Capability::SqlRepo]));
        assert_eq!(all.paths(), vec!["ang-manifest.json", "api/openapi.json", "db/schema.sql"]);

        let no_http = run(schema, CapabilitySet::default());
        assert_eq!(no_http.paths(), vec!["ang-manifest.json"]);
    }
}
