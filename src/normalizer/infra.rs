//! Infrastructure, project and access-control extraction

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{bail, Result};
use ang_cue::{Value, ValueKind};

use super::helpers::{clean_name, get_bool, get_string, get_string_or, string_list};
use super::types::{
    AuthDef, ConfigDef, NotificationChannelDef, NotificationChannelsDef, NotificationMutingDef,
    NotificationPoliciesDef, NotificationRuleDef, ProjectDef, RbacDef, ScheduleDef, SchedulePayloadField,
    TargetDef, TransformersConfig,
};
use super::Normalizer;

impl Normalizer<'_> {
    /// `#AppConfig` parsed like an entity
    pub fn extract_config(&self, val: &Value) -> Result<Option<ConfigDef>> {
        let Some(cfg) = val.lookup("#AppConfig") else {
            return Ok(None);
        };
        let entity = self.parse_entity("AppConfig", cfg)?;
        Ok(Some(ConfigDef { fields: entity.fields }))
    }

    pub fn extract_auth(&self, val: &Value) -> Result<Option<AuthDef>> {
        let Some(auth) = val.lookup("#Auth") else {
            return Ok(None);
        };
        let Some(jwt) = auth.lookup("jwt") else {
            return Ok(None);
        };
        let claim = |name: &str, default: &str| {
            let s = get_string(jwt, &format!("claims.{name}.field"));
            if s.is_empty() {
                default.to_string()
            } else {
                s
            }
        };
        let mut alg = get_string(jwt, "alg");
        if alg.is_empty() {
            alg = "RS256".to_string();
        }
        Ok(Some(AuthDef {
            alg,
            issuer: get_string(jwt, "issuer"),
            audience: get_string(jwt, "audience"),
            user_id_claim: claim("userId", "sub"),
            company_id_claim: claim("companyId", "cid"),
            roles_claim: claim("roles", "roles"),
            permissions_claim: claim("perms", "perms"),
            access_ttl: get_string(jwt, "tokens.access_ttl"),
            refresh_ttl: get_string(jwt, "tokens.refresh_ttl"),
            rotation: get_bool(jwt, "tokens.rotation").unwrap_or(false),
            refresh_store: get_string(jwt, "tokens.store"),
            service: get_string(auth, "service"),
            login_op: get_string(jwt, "ops.login.op"),
            login_access_field: get_string(jwt, "ops.login.access_field"),
            login_refresh_field: get_string(jwt, "ops.login.refresh_field"),
            refresh_op: get_string(jwt, "ops.refresh.op"),
            refresh_token_field: get_string(jwt, "ops.refresh.token_field"),
            refresh_access_field: get_string(jwt, "ops.refresh.access_field"),
            refresh_refresh_field: get_string(jwt, "ops.refresh.refresh_field"),
            logout_op: get_string(jwt, "ops.logout.op"),
            logout_token_field: get_string(jwt, "ops.logout.token_field"),
        }))
    }

    /// `#RBAC{roles, permissions}`, else the `Roles`/`Actions`/`Policies` style
    pub fn extract_rbac(&self, val: &Value) -> Result<Option<RbacDef>> {
        let Some(rbac_val) = val.lookup("#RBAC") else {
            return Ok(extract_rbac_from_policy(val));
        };
        let mut rbac = RbacDef::default();
        if let Some(roles) = rbac_val.lookup("roles") {
            for fv in roles.fields() {
                rbac.roles
                    .insert(clean_name(&fv.label), string_list(Some(&fv.value)));
            }
        }
        if let Some(perms) = rbac_val.lookup("permissions") {
            for fv in perms.fields() {
                let desc = fv.value.as_str().unwrap_or_default().trim().to_string();
                rbac.permissions.insert(clean_name(&fv.label), desc);
            }
        }
        Ok(Some(rbac))
    }

    pub fn extract_schedules(&self, val: &Value) -> Result<Vec<ScheduleDef>> {
        let Some(schedules) = val.lookup("Schedules") else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for fv in schedules.fields() {
            let v = &fv.value;
            if v.kind() != ValueKind::Struct {
                bail!("schedule {} must be a struct", fv.label);
            }
            let mut schedule = ScheduleDef {
                name: clean_name(&fv.label),
                service: get_string(v, "service"),
                action: get_string(v, "action"),
                at: get_string(v, "at"),
                publish: get_string(v, "publish"),
                every: get_string(v, "every"),
                payload: Vec::new(),
            };
            if let Some(payload) = v.lookup("payload") {
                for pf in payload.fields() {
                    let name = clean_name(&pf.label);
                    if name.is_empty() {
                        continue;
                    }
                    let typed = if let Some(i) = pf.value.as_int() {
                        ("int", i.to_string())
                    } else if let Some(b) = pf.value.as_bool() {
                        ("bool", b.to_string())
                    } else if let Some(s) = pf.value.as_str() {
                        ("string", s.to_string())
                    } else {
                        continue;
                    };
                    schedule.payload.push(SchedulePayloadField {
                        name,
                        type_name: typed.0.to_string(),
                        value: typed.1,
                    });
                }
            }
            out.push(schedule);
        }
        Ok(out)
    }

    pub fn extract_project(&self, val: &Value) -> Result<Option<ProjectDef>> {
        let Some(project) = val.lookup("#Project") else {
            return Ok(None);
        };
        let name = get_string(project, "name");
        let version = get_string(project, "version");
        if name.is_empty() && version.is_empty() {
            return Ok(None);
        }
        Ok(Some(ProjectDef {
            name,
            version,
            plugins: string_list(project.lookup("plugins")),
        }))
    }

    /// Targets from a `#Targets` list, or the single `#Target`.
    ///
    /// Returns an empty list when neither is declared; the pipeline then uses
    /// [`TargetDef::default`].
    pub fn extract_targets(&self, val: &Value) -> Result<Vec<TargetDef>> {
        if let Some(list) = val.lookup("#Targets") {
            let Some(items) = list.list() else {
                bail!("#Targets must be a list");
            };
            let mut seen = BTreeSet::new();
            let mut targets = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let mut target = parse_target(item);
                if target.name.is_empty() || target.name == "default" {
                    target.name = format!("{}-{}", target.lang, i + 1);
                }
                if !seen.insert(target.name.clone()) {
                    bail!("duplicate target name {:?}", target.name);
                }
                targets.push(target);
            }
            return Ok(targets);
        }
        Ok(val.lookup("#Target").map(parse_target).into_iter().collect())
    }

    /// Single-target view: the declared `#Target` or the defaults
    pub fn extract_target(&self, val: &Value) -> Result<TargetDef> {
        Ok(val.lookup("#Target").map(parse_target).unwrap_or_default())
    }

    pub fn extract_transformers_config(&self, val: &Value) -> Result<TransformersConfig> {
        let mut cfg = TransformersConfig::default();
        let Some(tr) = val.lookup("#Transformers") else {
            return Ok(cfg);
        };
        let enabled = |key: &str, current: bool| get_bool(tr, &format!("{key}.enabled")).unwrap_or(current);
        cfg.timestamps = enabled("timestamps", cfg.timestamps);
        cfg.soft_delete = enabled("soft_delete", cfg.soft_delete);
        cfg.image = enabled("image", cfg.image);
        cfg.validation = enabled("validation", cfg.validation);
        cfg.tracing = enabled("tracing", cfg.tracing);
        cfg.caching = enabled("caching", cfg.caching);
        cfg.field_security = enabled("field_security", cfg.field_security);
        if let Some(suffix) = tr.lookup("image.thumb_suffix").and_then(Value::as_str) {
            cfg.thumb_suffix = suffix.to_string();
        }
        Ok(cfg)
    }

    pub fn extract_notification_channels(&self, val: &Value) -> Result<Option<NotificationChannelsDef>> {
        let Some(nc) = val.lookup("#NotificationChannels") else {
            return Ok(None);
        };
        let mut def = NotificationChannelsDef {
            enabled: get_bool(nc, "enabled").unwrap_or(true),
            default_channels: string_list(nc.lookup("default_channels")),
            channels: BTreeMap::new(),
        };
        if let Some(channels) = nc.lookup("channels") {
            for fv in channels.fields() {
                let c = &fv.value;
                if c.kind() != ValueKind::Struct {
                    bail!("notification channel {} must be a struct", fv.label);
                }
                def.channels.insert(
                    clean_name(&fv.label),
                    NotificationChannelDef {
                        enabled: get_bool(c, "enabled").unwrap_or(true),
                        driver: get_string(c, "driver"),
                        topic: get_string(c, "topic"),
                        subject: get_string(c, "subject"),
                        template: get_string(c, "template"),
                        dsn_env: get_string(c, "dsn_env"),
                        brokers_env: get_string(c, "brokers_env"),
                    },
                );
            }
        }
        Ok(Some(def))
    }

    pub fn extract_notification_policies(&self, val: &Value) -> Result<Option<NotificationPoliciesDef>> {
        let Some(np) = val.lookup("#NotificationPolicies") else {
            return Ok(None);
        };
        let mut def = NotificationPoliciesDef {
            enabled: get_bool(np, "enabled").unwrap_or(true),
            rules: Vec::new(),
        };
        if let Some(rules) = np.lookup("rules") {
            let Some(items) = rules.list() else {
                bail!("#NotificationPolicies.rules must be a list");
            };
            for r in items {
                let event = get_string(r, "event");
                if event.is_empty() {
                    bail!("notification rule without event");
                }
                def.rules.push(NotificationRuleDef {
                    enabled: get_bool(r, "enabled").unwrap_or(true),
                    event,
                    kind: get_string(r, "type"),
                    audience: get_string(r, "audience"),
                    channels: string_list(r.lookup("channels")),
                    template: get_string(r, "template"),
                    mute_key: get_string(r, "mute_key"),
                });
            }
        }
        Ok(Some(def))
    }

    pub fn extract_notification_muting(&self, val: &Value) -> Result<Option<NotificationMutingDef>> {
        let Some(nm) = val.lookup("#NotificationMuting") else {
            return Ok(None);
        };
        Ok(Some(NotificationMutingDef {
            enabled: get_bool(nm, "enabled").unwrap_or(true),
            storage: get_string_or(nm, "storage", "memory"),
            default_ttl: get_string(nm, "default_ttl"),
        }))
    }
}

fn parse_target(v: &Value) -> TargetDef {
    let d = TargetDef::default();
    TargetDef {
        name: get_string_or(v, "name", &d.name),
        lang: get_string_or(v, "lang", &d.lang),
        framework: get_string_or(v, "framework", &d.framework),
        db: get_string_or(v, "db", &d.db),
        cache: get_string_or(v, "cache", &d.cache),
        queue: get_string_or(v, "queue", &d.queue),
        storage: get_string_or(v, "storage", &d.storage),
    }
}

fn extract_rbac_from_policy(val: &Value) -> Option<RbacDef> {
    let actions = val.lookup("Actions");
    let policies = val.lookup("Policies");
    if val.lookup("Roles").is_none() && actions.is_none() && policies.is_none() {
        return None;
    }

    let mut all_perms: BTreeSet<String> = BTreeSet::new();
    let mut by_resource: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for res in actions.map(Value::fields).unwrap_or_default() {
        let resource = clean_name(&res.label);
        for action in res.value.fields() {
            let perm = format!("{resource}.{}", clean_name(&action.label));
            all_perms.insert(perm.clone());
            by_resource.entry(resource.clone()).or_default().push(perm);
        }
    }

    let mut rbac = RbacDef::default();
    for role in policies.map(Value::fields).unwrap_or_default() {
        let Some(allow) = role.value.lookup("allow") else {
            continue;
        };
        let granted = rbac.roles.entry(clean_name(&role.label)).or_default();
        for pattern in string_list(Some(allow)) {
            if pattern == "*" {
                granted.extend(all_perms.iter().cloned());
            } else if let Some(resource) = pattern.strip_suffix(".*") {
                granted.extend(by_resource.get(resource).cloned().unwrap_or_default());
            } else {
                all_perms.insert(pattern.clone());
                granted.push(pattern);
            }
        }
    }
    rbac.permissions = all_perms.into_iter().map(|p| (p, String::new())).collect();
    Some(rbac)
}
