//! Python FastAPI backend profile

use serde_json::json;

use super::{builtin_descriptor, register_infra_steps, unit_step, BuildContext, PluginDescriptor, TargetPlugin};
use crate::capabilities::Capability;
use crate::generator::StepRegistry;
use crate::normalizer::infra_registry::InfraLanguage;
use crate::render::{pascal_case, snake_case, RenderUnit};

pub struct PythonFastapiPlugin;

const PY: Capability = Capability::ProfilePythonFastapi;

fn path(ctx: &BuildContext, rel: &str) -> String {
    format!("{}/app/{rel}", ctx.backend_dir)
}

fn infra_path(ctx: &BuildContext, key: &str) -> String {
    path(ctx, &format!("infra/{key}.py"))
}

impl TargetPlugin for PythonFastapiPlugin {
    fn name(&self) -> &str {
        "python_fastapi"
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![PY]
    }

    fn descriptor(&self) -> Option<PluginDescriptor> {
        Some(builtin_descriptor())
    }

    fn register_steps(&self, registry: &mut StepRegistry, ctx: &BuildContext) {
        unit_step(registry, ctx, "Python Models", &[PY], |ctx| {
            Ok(ctx
                .schema
                .entities
                .iter()
                .map(|e| {
                    RenderUnit::new(
                        "python/model",
                        path(ctx, &format!("models/{}.py", snake_case(&e.name))),
                        json!({"class_name": pascal_case(&e.name), "entity": e}),
                    )
                })
                .collect())
        });

        unit_step(registry, ctx, "Python Schemas", &[PY], |ctx| {
            Ok(ctx
                .schema
                .services
                .iter()
                .filter(|s| s.methods.iter().any(|m| m.input.is_some() || m.output.is_some()))
                .map(|s| {
                    RenderUnit::new(
                        "python/schemas",
                        path(ctx, &format!("schemas/{}.py", snake_case(&s.name))),
                        json!({"service": s.name, "methods": s.methods}),
                    )
                })
                .collect())
        });

        unit_step(registry, ctx, "Python Repositories", &[PY, Capability::SqlRepo], |ctx| {
            Ok(ctx
                .schema
                .repos
                .iter()
                .map(|r| {
                    RenderUnit::new(
                        "python/repository",
                        path(ctx, &format!("repositories/{}.py", snake_case(&r.name))),
                        json!({
                            "table": super::sql::table_name(&r.entity),
                            "repository": r,
                            "entity": ctx.schema.entity(&r.entity),
                        }),
                    )
                })
                .collect())
        });

        unit_step(registry, ctx, "Python Services", &[PY], |ctx| {
            Ok(ctx
                .schema
                .services
                .iter()
                .map(|s| {
                    RenderUnit::new(
                        "python/service",
                        path(ctx, &format!("services/{}.py", snake_case(&s.name))),
                        json!({"class_name": format!("{}Service", pascal_case(&s.name)), "service": s}),
                    )
                })
                .collect())
        });

        unit_step(registry, ctx, "Python Routers", &[PY, Capability::Http], |ctx| {
            Ok(ctx
                .schema
                .services
                .iter()
                .filter_map(|s| {
                    let endpoints: Vec<_> = ctx.schema.endpoints.iter().filter(|e| e.service == s.name).collect();
                    if endpoints.is_empty() {
                        return None;
                    }
                    Some(RenderUnit::new(
                        "python/router",
                        path(ctx, &format!("routers/{}.py", snake_case(&s.name))),
                        json!({"service": s.name, "endpoints": endpoints}),
                    ))
                })
                .collect())
        });

        unit_step(registry, ctx, "Python App", &[PY, Capability::Http], |ctx| {
            let mut routers: Vec<String> = ctx.schema.endpoints.iter().map(|e| snake_case(&e.service)).collect();
            if routers.is_empty() {
                return Ok(Vec::new());
            }
            routers.sort();
            routers.dedup();
            Ok(vec![RenderUnit::new(
                "python/main",
                path(ctx, "main.py"),
                json!({"project": ctx.schema.project, "routers": routers}),
            )])
        });

        unit_step(registry, ctx, "Python Auth", &[PY, Capability::Auth], |ctx| {
            let Some(auth) = &ctx.schema.auth else {
                return Ok(Vec::new());
            };
            Ok(vec![RenderUnit::new(
                "python/auth",
                path(ctx, "auth/jwt.py"),
                json!({"auth": auth, "rbac": ctx.schema.rbac}),
            )])
        });

        register_infra_steps(registry, ctx, InfraLanguage::Python, "python", infra_path);
    }
}
