//! HTTP endpoint extraction from the `HTTP` block of the api package

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use ang_cue::{Value, ValueKind};

use super::helpers::{clean_name, format_pos, get_bool, get_int, get_string, parse_size, string_list};
use super::service::{io_block, operations, parse_pagination};
use super::types::{CircuitBreakerDef, Endpoint, PaginationDef, RateLimitDef, TestHints};
use super::Normalizer;

/// `HTTP` keys that configure defaults rather than name endpoints
const HTTP_CONFIG_KEYS: &[&str] = &["default_rate_limit", "default_timeout", "default_max_body_size"];

const DEFAULT_MAX_BODY_SIZE: &str = "1mb";

fn parse_rate_limit(val: Option<&Value>) -> Option<RateLimitDef> {
    let val = val?;
    Some(RateLimitDef {
        rps: get_int(val, "rps").unwrap_or(0),
        burst: get_int(val, "burst").unwrap_or(0),
    })
}

impl Normalizer<'_> {
    pub fn extract_endpoints(&self, val: &Value) -> Result<Vec<Endpoint>> {
        let Some(http) = val.lookup("HTTP") else {
            return Ok(Vec::new());
        };

        let default_rate_limit = parse_rate_limit(http.lookup("default_rate_limit"));
        let default_timeout = get_string(http, "default_timeout");
        let default_max_body_size = http
            .lookup("default_max_body_size")
            .and_then(Value::as_str)
            .map_or_else(|| parse_size(DEFAULT_MAX_BODY_SIZE), parse_size);

        let ops: BTreeMap<String, &Value> = operations(val).into_iter().collect();

        let mut endpoints = Vec::new();
        for fv in http.fields() {
            let ep_name = clean_name(&fv.label);
            if HTTP_CONFIG_KEYS.contains(&ep_name.as_str()) {
                continue;
            }
            let ep_val = &fv.value;
            let Some(op) = ops.get(&ep_name).copied() else {
                bail!("HTTP endpoint {ep_name} has no matching operation");
            };
            let svc_name = get_string(op, "service");

            let mut ep = Endpoint {
                method: get_string(ep_val, "method").to_uppercase(),
                path: get_string(ep_val, "path"),
                service: svc_name.clone(),
                rpc: ep_name.clone(),
                description: get_string(ep_val, "description"),
                room_param: get_string(ep_val, "room"),
                auth_type: get_string(ep_val, "auth.type"),
                permission: get_string(ep_val, "auth.permission"),
                auth_check: get_string(ep_val, "auth.check"),
                cache_ttl: get_string(ep_val, "cache.ttl"),
                cache_tags: string_list(ep_val.lookup("cache.tags")),
                invalidate: string_list(ep_val.lookup("invalidate")),
                optimistic_update: get_string(ep_val, "optimistic_update"),
                view: get_string(ep_val, "view"),
                source: format_pos(ep_val),
                ..Default::default()
            };

            if let Some(rbac) = op.attribute("rbac") {
                for arg in rbac.args() {
                    match arg.key.as_str() {
                        "role" => ep.roles.push(arg.value.clone()),
                        "permission" => ep.permission = arg.value.clone(),
                        _ => continue,
                    }
                    if ep.auth_type.is_empty() {
                        ep.auth_type = "jwt".to_string();
                    }
                }
            }

            if let Some(hints) = op.lookup("testHints").or_else(|| ep_val.lookup("testHints")) {
                ep.test_hints = Some(TestHints {
                    happy_path: get_string(hints, "happyPath"),
                    error_cases: string_list(hints.lookup("errorCases")),
                });
            }

            if ep.method != "GET" && ep.method != "WS" && ep.invalidate.is_empty() {
                ep.invalidate = ops
                    .iter()
                    .filter(|(name, other)| {
                        get_string(other, "service") == svc_name
                            && (name.starts_with("List") || name.starts_with("AdminList"))
                    })
                    .map(|(name, _)| name.clone())
                    .collect();
            }
            ep.invalidate.sort();

            if let Some(messages) = ep_val.lookup("messages") {
                ep.messages = match messages.kind() {
                    ValueKind::Struct => messages.fields().iter().map(|m| clean_name(&m.label)).collect(),
                    _ => string_list(Some(messages)),
                };
            }

            ep.pagination = parse_pagination(op).or_else(|| {
                let output = io_block(op, "output", "out")?;
                let response = self.parse_entity(&format!("{ep_name}Response"), output).ok()?;
                response.fields.iter().any(|f| f.list).then(PaginationDef::inferred)
            });

            if ep.permission.is_empty() {
                ep.permission = get_string(ep_val, "auth.action");
            }
            ep.roles.extend(string_list(ep_val.lookup("auth.roles")));
            ep.auth_inject = string_list(ep_val.lookup("auth.inject"));

            ep.idempotent = get_bool(ep_val, "idempotency").unwrap_or(false);
            for attr in ep_val.attributes() {
                match attr.name.as_str() {
                    "idempotent" => ep.idempotent = true,
                    "dedupeKey" => {
                        if let Some(key) = attr.lookup(0, "") {
                            ep.dedupe_key = key.to_string();
                        }
                    }
                    _ => {}
                }
            }

            ep.rate_limit = parse_rate_limit(ep_val.lookup("rate_limit"))
                .filter(|rl| rl.rps > 0 || rl.burst > 0)
                .or_else(|| default_rate_limit.clone());

            ep.timeout = get_string(ep_val, "timeout");
            if ep.timeout.is_empty() {
                ep.timeout = default_timeout.clone();
            }
            ep.max_body_size = ep_val
                .lookup("max_body_size")
                .and_then(Value::as_str)
                .map(parse_size)
                .unwrap_or(0);
            if ep.max_body_size == 0 {
                ep.max_body_size = default_max_body_size;
            }

            if let Some(cb) = ep_val.lookup("circuit_breaker") {
                let defaults = CircuitBreakerDef::default();
                ep.circuit_breaker = Some(CircuitBreakerDef {
                    threshold: get_int(cb, "threshold").unwrap_or(defaults.threshold),
                    timeout: cb
                        .lookup("timeout")
                        .and_then(Value::as_str)
                        .map_or(defaults.timeout, str::to_string),
                    half_open_max: get_int(cb, "half_open_max").unwrap_or(defaults.half_open_max),
                });
            }

            ep.errors = string_list(ep_val.lookup("errors"));
            if ep.errors.is_empty() {
                ep.errors = string_list(op.lookup("throws"));
            }

            if ep.method.is_empty() || ep.path.is_empty() || ep.service.is_empty() {
                bail!("invalid endpoint {ep_name} (HTTP.{ep_name}): method/path/service are required");
            }
            endpoints.push(ep);
        }
        Ok(endpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingSink;
    use pretty_assertions::assert_eq;

    fn load(src: &str) -> Value {
        ang_cue::load_package(&[("cue/api/api.cue".to_string(), src.to_string())]).unwrap()
    }

    const API: &str = r#"package api

GetUser: {
	service: "users"
	throws: ["NotFound"]
	output: {id: string}
} @rbac(role="admin")

UpdateUser: {
	service: "users"
}

ListUsers: {
	service: "users"
	output: {items: [...string]}
}

HTTP: {
	default_rate_limit: {rps: 10, burst: 20}
	default_timeout: "5s"
	GetUser: {method: "GET", path: "/users/{id}"}
	UpdateUser: {
		method: "PUT"
		path: "/users/{id}"
		max_body_size: "2mb"
		circuit_breaker: {threshold: 9}
		auth: {type: "jwt", action: "users.update", inject: "userId"}
	}
	ListUsers: {method: "GET", path: "/users"}
}
"#;

    #[test]
    fn test_extract_endpoints_defaults_and_auth() {
        let sink = CollectingSink::new();
        let n = Normalizer::new(&sink);
        let eps = n.extract_endpoints(&load(API)).unwrap();
        assert_eq!(eps.len(), 3);

        let get = &eps[0];
        assert_eq!(get.rpc, "GetUser");
        assert_eq!(get.service, "users");
        assert_eq!(get.auth_type, "jwt");
        assert_eq!(get.roles, vec!["admin"]);
        assert_eq!(get.errors, vec!["NotFound"]);
        assert_eq!(get.rate_limit, Some(RateLimitDef { rps: 10, burst: 20 }));
        assert_eq!(get.timeout, "5s");
        assert_eq!(get.max_body_size, 1_048_576);
        assert!(get.pagination.is_none());

        let update = &eps[1];
        assert_eq!(update.max_body_size, 2 * 1_048_576);
        assert_eq!(update.permission, "users.update");
        assert_eq!(update.auth_inject, vec!["userId"]);
        assert_eq!(update.invalidate, vec!["ListUsers"]);
        let cb = update.circuit_breaker.as_ref().unwrap();
        assert_eq!((cb.threshold, cb.timeout.as_str(), cb.half_open_max), (9, "30s", 3));

        assert_eq!(eps[2].pagination, Some(PaginationDef::inferred()));
    }

    #[test]
    fn test_endpoint_without_operation_fails() {
        let sink = CollectingSink::new();
        let n = Normalizer::new(&sink);
        let src = "package api\n\nHTTP: {\n\tGhost: {method: \"GET\", path: \"/x\"}\n}\n";
        let err = n.extract_endpoints(&load(src)).unwrap_err();
        assert_eq!(err.to_string(), "HTTP endpoint Ghost has no matching operation");
    }

    #[test]
    fn test_endpoint_without_path_fails() {
        let sink = CollectingSink::new();
        let n = Normalizer::new(&sink);
        let src = "package api\n\nPing: {service: \"health\"}\n\nHTTP: {\n\tPing: {method: \"GET\"}\n}\n";
        let err = n.extract_endpoints(&load(src)).unwrap_err();
        assert!(err.to_string().contains("method/path/service are required"));
    }

    #[test]
    fn test_no_http_block_is_empty() {
        let sink = CollectingSink::new();
        let n = Normalizer::new(&sink);
        assert!(n.extract_endpoints(&load("package api\n\nPing: {service: \"health\"}\n")).unwrap().is_empty());
    }
}
