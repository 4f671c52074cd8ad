//! Go backend profile
//!
//! Layout under the target's backend directory:
//!
//! ```text
//! domain/<entity>.go             port/<service>.go
//! service/<service>.go           port/<repository>.go
//! adapter/postgres/<repo>.go     transport/http/<service>_handler.go
//! transport/http/router.go       transport/ws/hub.go
//! pkg/auth/jwt.go                port/events.go
//! config/config.go               infra/<key>.go
//! ```

use serde_json::json;

use super::{builtin_descriptor, register_infra_steps, unit_step, BuildContext, PluginDescriptor, TargetPlugin};
use crate::capabilities::Capability;
use crate::generator::StepRegistry;
use crate::normalizer::infra_registry::InfraLanguage;
use crate::render::{pascal_case, snake_case, RenderUnit};

pub struct GoLegacyPlugin;

const GO: Capability = Capability::ProfileGoLegacy;

fn path(ctx: &BuildContext, rel: &str) -> String {
    format!("{}/{rel}", ctx.backend_dir)
}

fn infra_path(ctx: &BuildContext, key: &str) -> String {
    path(ctx, &format!("infra/{key}.go"))
}

impl TargetPlugin for GoLegacyPlugin {
    fn name(&self) -> &str {
        "go_legacy"
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![GO]
    }

    fn descriptor(&self) -> Option<PluginDescriptor> {
        Some(builtin_descriptor())
    }

    fn register_steps(&self, registry: &mut StepRegistry, ctx: &BuildContext) {
        unit_step(registry, ctx, "Go Domain Entities", &[GO], |ctx| {
            Ok(ctx
                .schema
                .entities
                .iter()
                .map(|e| {
                    RenderUnit::new(
                        "go/domain_entity",
                        path(ctx, &format!("domain/{}.go", snake_case(&e.name))),
                        json!({"package": "domain", "type_name": pascal_case(&e.name), "entity": e}),
                    )
                })
                .collect())
        });

        unit_step(registry, ctx, "Go App Config", &[GO], |ctx| {
            if ctx.schema.config.fields.is_empty() {
                return Ok(Vec::new());
            }
            Ok(vec![RenderUnit::new(
                "go/config",
                path(ctx, "config/config.go"),
                json!({"package": "config", "config": ctx.schema.config}),
            )])
        });

        unit_step(registry, ctx, "Go Service Ports", &[GO], |ctx| {
            Ok(ctx
                .schema
                .services
                .iter()
                .map(|s| {
                    RenderUnit::new(
                        "go/service_port",
                        path(ctx, &format!("port/{}.go", snake_case(&s.name))),
                        json!({"package": "port", "interface_name": pascal_case(&s.name), "service": s}),
                    )
                })
                .collect())
        });

        unit_step(registry, ctx, "Go Service Implementations", &[GO], |ctx| {
            Ok(ctx
                .schema
                .services
                .iter()
                .map(|s| {
                    RenderUnit::new(
                        "go/service_impl",
                        path(ctx, &format!("service/{}.go", snake_case(&s.name))),
                        json!({
                            "package": "service",
                            "struct_name": format!("{}Impl", pascal_case(&s.name)),
                            "service": s,
                        }),
                    )
                })
                .collect())
        });

        unit_step(registry, ctx, "Go Repository Ports", &[GO, Capability::SqlRepo], |ctx| {
            Ok(ctx
                .schema
                .repos
                .iter()
                .map(|r| {
                    RenderUnit::new(
                        "go/repository_port",
                        path(ctx, &format!("port/{}.go", snake_case(&r.name))),
                        json!({"package": "port", "repository": r, "entity": ctx.schema.entity(&r.entity)}),
                    )
                })
                .collect())
        });

        unit_step(registry, ctx, "Go Postgres Repositories", &[GO, Capability::SqlRepo], |ctx| {
            Ok(ctx
                .schema
                .repos
                .iter()
                .map(|r| {
                    RenderUnit::new(
                        "go/repository_postgres",
                        path(ctx, &format!("adapter/postgres/{}.go", snake_case(&r.name))),
                        json!({
                            "package": "postgres",
                            "table": super::sql::table_name(&r.entity),
                            "repository": r,
                            "entity": ctx.schema.entity(&r.entity),
                        }),
                    )
                })
                .collect())
        });

        unit_step(registry, ctx, "Go HTTP Handlers", &[GO, Capability::Http], |ctx| {
            Ok(ctx
                .schema
                .services
                .iter()
                .filter_map(|s| {
                    let endpoints: Vec<_> = ctx
                        .schema
                        .endpoints
                        .iter()
                        .filter(|e| e.service == s.name && e.method != "WS")
                        .collect();
                    if endpoints.is_empty() {
                        return None;
                    }
                    Some(RenderUnit::new(
                        "go/http_handler",
                        path(ctx, &format!("transport/http/{}_handler.go", snake_case(&s.name))),
                        json!({"package": "http", "service": s, "endpoints": endpoints}),
                    ))
                })
                .collect())
        });

        unit_step(registry, ctx, "Go HTTP Router", &[GO, Capability::Http], |ctx| {
            if ctx.schema.endpoints.iter().all(|e| e.method == "WS") {
                return Ok(Vec::new());
            }
            Ok(vec![RenderUnit::new(
                "go/http_router",
                path(ctx, "transport/http/router.go"),
                json!({"package": "http", "framework": ctx.target.framework, "endpoints": ctx.schema.endpoints}),
            )])
        });

        unit_step(registry, ctx, "Go WebSocket Hub", &[GO, Capability::Ws], |ctx| {
            let rooms: Vec<_> = ctx.schema.endpoints.iter().filter(|e| e.method == "WS").collect();
            if rooms.is_empty() {
                return Ok(Vec::new());
            }
            Ok(vec![RenderUnit::new(
                "go/ws_hub",
                path(ctx, "transport/ws/hub.go"),
                json!({"package": "ws", "endpoints": rooms}),
            )])
        });

        unit_step(registry, ctx, "Go Auth Middleware", &[GO, Capability::Auth], |ctx| {
            let Some(auth) = &ctx.schema.auth else {
                return Ok(Vec::new());
            };
            Ok(vec![RenderUnit::new(
                "go/auth_jwt",
                path(ctx, "pkg/auth/jwt.go"),
                json!({"package": "auth", "auth": auth, "rbac": ctx.schema.rbac}),
            )])
        });

        unit_step(registry, ctx, "Go Event Publishers", &[GO, Capability::Events], |ctx| {
            if ctx.schema.events.is_empty() {
                return Ok(Vec::new());
            }
            Ok(vec![RenderUnit::new(
                "go/events",
                path(ctx, "port/events.go"),
                json!({"package": "port", "queue": ctx.target.queue, "events": ctx.schema.events}),
            )])
        });

        unit_step(registry, ctx, "Go Scenario Tests", &[GO, Capability::Http], |ctx| {
            Ok(ctx
                .scenarios
                .iter()
                .map(|sc| {
                    RenderUnit::new(
                        "go/scenario_test",
                        format!("tests/e2e/{}_test.go", snake_case(&sc.name)),
                        json!({"package": "e2e", "scenario": sc}),
                    )
                })
                .collect())
        });

        register_infra_steps(registry, ctx, InfraLanguage::Go, "go", infra_path);
    }
}
