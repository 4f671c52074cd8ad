//! Language-neutral JSON artifacts: system manifest, error catalog and RBAC
//! policy

use std::collections::BTreeMap;

use serde::Serialize;

use crate::ir::{Project, Schema};

/// Compact architectural map written to `ang-manifest.json`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemManifest {
    pub project: Project,
    pub services: Vec<ServiceSummary>,
    pub events: Vec<EventSummary>,
    pub entities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceSummary {
    pub name: String,
    pub methods: Vec<String>,
    pub publishes: Vec<String>,
    pub subscribes: BTreeMap<String, String>,
    pub uses: Vec<String>,
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventSummary {
    pub name: String,
    pub fields: Vec<String>,
}

pub fn build_system_manifest(schema: &Schema) -> SystemManifest {
    let services = schema
        .services
        .iter()
        .map(|svc| {
            let mut depends_on = Vec::new();
            for (required, label) in [
                (svc.requires_sql, "Postgres"),
                (svc.requires_mongo, "MongoDB"),
                (svc.requires_redis, "Redis"),
                (svc.requires_nats, "NATS"),
                (svc.requires_s3, "S3"),
            ] {
                if required {
                    depends_on.push(label.to_string());
                }
            }
            ServiceSummary {
                name: svc.name.clone(),
                methods: svc.methods.iter().map(|m| m.name.clone()).collect(),
                publishes: svc.publishes.clone(),
                subscribes: svc.subscribes.clone(),
                uses: svc.uses.clone(),
                depends_on,
            }
        })
        .collect();
    SystemManifest {
        project: schema.project.clone(),
        services,
        events: schema
            .events
            .iter()
            .map(|e| EventSummary {
                name: e.name.clone(),
                fields: e.fields.iter().map(|f| f.name.clone()).collect(),
            })
            .collect(),
        entities: schema.entities.iter().map(|e| e.name.clone()).collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorCatalogEntry {
    pub name: String,
    pub code: i64,
    pub http_status: i64,
    pub message: String,
}

/// Declared errors ordered by numeric code, then name
pub fn build_error_catalog(schema: &Schema) -> Vec<ErrorCatalogEntry> {
    let mut out: Vec<ErrorCatalogEntry> = schema
        .errors
        .iter()
        .map(|e| ErrorCatalogEntry {
            name: e.name.clone(),
            code: e.code,
            http_status: if e.http_status > 0 { e.http_status } else { 500 },
            message: e.message.clone(),
        })
        .collect();
    out.sort_by(|a, b| a.code.cmp(&b.code).then_with(|| a.name.cmp(&b.name)));
    out
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RbacPolicy {
    pub roles: BTreeMap<String, Vec<String>>,
    pub permissions: BTreeMap<String, String>,
    pub endpoints: Vec<EndpointPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointPolicy {
    pub method: String,
    pub path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub permission: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

/// Role grants plus the guard of every authenticated endpoint. `None` when
/// there is neither RBAC nor an authenticated endpoint.
pub fn build_rbac_policy(schema: &Schema) -> Option<RbacPolicy> {
    let mut endpoints: Vec<EndpointPolicy> = schema
        .endpoints
        .iter()
        .filter_map(|ep| {
            let auth = ep.auth.as_ref()?;
            let mut roles = auth.roles.clone();
            roles.sort();
            roles.dedup();
            Some(EndpointPolicy {
                method: ep.method.clone(),
                path: ep.path.clone(),
                permission: auth.permission.clone(),
                roles,
            })
        })
        .collect();
    if schema.rbac.is_none() && endpoints.is_empty() {
        return None;
    }
    endpoints.sort_by(|a, b| (&a.path, &a.method).cmp(&(&b.path, &b.method)));

    let (mut roles, permissions) = match &schema.rbac {
        Some(rbac) => (rbac.roles.clone(), rbac.permissions.clone()),
        None => Default::default(),
    };
    for perms in roles.values_mut() {
        perms.sort();
        perms.dedup();
    }
    Some(RbacPolicy {
        roles,
        permissions,
        endpoints,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Endpoint, EndpointAuth, ErrorDef, Rbac, Service};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_manifest_lists_dependencies() {
        let schema = Schema {
            services: vec![Service {
                name: "orders".into(),
                requires_sql: true,
                requires_nats: true,
                ..Default::default()
            }],
            ..Default::default()
        };
        let m = build_system_manifest(&schema);
        assert_eq!(m.services[0].depends_on, vec!["Postgres", "NATS"]);
    }

    #[test]
    fn test_error_catalog_sorted_with_default_status() {
        let schema = Schema {
            errors: vec![
                ErrorDef {
                    name: "NotFound".into(),
                    code: 404,
                    http_status: 404,
                    ..Default::default()
                },
                ErrorDef {
                    name: "Broken".into(),
                    code: 100,
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let c = build_error_catalog(&schema);
        assert_eq!(c[0].name, "Broken");
        assert_eq!(c[0].http_status, 500);
    }

    #[test]
    fn test_rbac_policy() {
        assert!(build_rbac_policy(&Schema::default()).is_none());
        let schema = Schema {
            rbac: Some(Rbac {
                roles: [("admin".to_string(), vec!["users.write".to_string(), "users.read".to_string()])].into(),
                ..Default::default()
            }),
            endpoints: vec![Endpoint {
                method: "DELETE".into(),
                path: "/users/{id}".into(),
                auth: Some(EndpointAuth {
                    permission: "users.write".into(),
                    roles: vec!["admin".into(), "admin".into()],
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        };
        let p = build_rbac_policy(&schema).unwrap();
        assert_eq!(p.roles["admin"], vec!["users.read", "users.write"]);
        assert_eq!(p.endpoints[0].roles, vec!["admin"]);
    }
}
