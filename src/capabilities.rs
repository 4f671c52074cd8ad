//! Target capabilities
//!
//! A target definition resolves to a fixed set of capabilities. Generation
//! steps declare the capabilities they need and are skipped when the target
//! lacks any of them.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::normalizer::TargetDef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Http,
    SqlRepo,
    Ws,
    Events,
    Auth,
    ProfileGoLegacy,
    ProfilePythonFastapi,
}

impl Capability {
    pub const ALL: [Capability; 7] = [
        Capability::Http,
        Capability::SqlRepo,
        Capability::Ws,
        Capability::Events,
        Capability::Auth,
        Capability::ProfileGoLegacy,
        Capability::ProfilePythonFastapi,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Http => "http",
            Capability::SqlRepo => "sql_repo",
            Capability::Ws => "ws",
            Capability::Events => "events",
            Capability::Auth => "auth",
            Capability::ProfileGoLegacy => "profile_go_legacy",
            Capability::ProfilePythonFastapi => "profile_python_fastapi",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match Capability::ALL.iter().find(|c| c.as_str() == s) {
            Some(c) => Ok(*c),
            None => bail!("unknown capability {s:?}"),
        }
    }
}

/// Resolved capability set of one target
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new(caps: impl IntoIterator<Item = Capability>) -> Self {
        Self(caps.into_iter().collect())
    }

    pub fn has(&self, cap: Capability) -> bool {
        self.0.contains(&cap)
    }

    pub fn has_all(&self, caps: &[Capability]) -> bool {
        caps.iter().all(|c| self.has(*c))
    }

    /// Requested capabilities not in the set, in request order
    pub fn missing(&self, caps: &[Capability]) -> Vec<Capability> {
        caps.iter().copied().filter(|c| !self.has(*c)).collect()
    }

    /// Names in sorted order
    pub fn names(&self) -> Vec<String> {
        let mut out: Vec<String> = self.0.iter().map(|c| c.as_str().to_string()).collect();
        out.sort();
        out
    }
}

const HTTP_FRAMEWORKS: &[&str] = &["chi", "echo", "fiber", "gin", "fastapi", "axum", "actix", "express", "fastify"];
const SQL_DATABASES: &[&str] = &["postgres", "mysql", "sqlite"];

/// Derive the capability set from a target definition. Fails for targets
/// that match no generation profile.
pub fn resolve_target_capabilities(td: &TargetDef) -> Result<CapabilitySet> {
    let norm = |s: &str| s.trim().to_lowercase();
    let (lang, framework, db, queue) = (norm(&td.lang), norm(&td.framework), norm(&td.db), norm(&td.queue));

    let mut caps = BTreeSet::new();
    if HTTP_FRAMEWORKS.contains(&framework.as_str()) {
        caps.insert(Capability::Http);
    }
    if SQL_DATABASES.contains(&db.as_str()) {
        caps.insert(Capability::SqlRepo);
    }
    // websocket transport exists only for Go
    if lang == "go" {
        caps.insert(Capability::Ws);
    }
    if !queue.is_empty() && queue != "none" {
        caps.insert(Capability::Events);
    }
    let python_fastapi = lang == "python" && framework == "fastapi";
    if lang == "go" || python_fastapi {
        caps.insert(Capability::Auth);
    }

    if lang == "go" {
        caps.insert(Capability::ProfileGoLegacy);
    } else if python_fastapi && db == "postgres" {
        caps.insert(Capability::ProfilePythonFastapi);
    } else {
        bail!("unsupported target profile: {}/{}/{}", td.lang, td.framework, td.db);
    }
    Ok(CapabilitySet(caps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn target(lang: &str, framework: &str, db: &str, queue: &str) -> TargetDef {
        TargetDef {
            name: "t".into(),
            lang: lang.into(),
            framework: framework.into(),
            db: db.into(),
            queue: queue.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_capability_table() {
        let cases: Vec<(TargetDef, Vec<&str>)> = vec![
            (
                target("go", "chi", "postgres", "nats"),
                vec!["auth", "events", "http", "profile_go_legacy", "sql_repo", "ws"],
            ),
            (
                target("Go", "Echo", "mongo", "none"),
                vec!["auth", "http", "profile_go_legacy", "ws"],
            ),
            (
                target("python", "fastapi", "postgres", ""),
                vec!["auth", "http", "profile_python_fastapi", "sql_repo"],
            ),
        ];
        for (td, want) in cases {
            let caps = resolve_target_capabilities(&td).unwrap();
            assert_eq!(caps.names(), want, "{td:?}");
        }
    }

    #[test]
    fn test_unsupported_profile() {
        let err = resolve_target_capabilities(&target("python", "fastapi", "mysql", "")).unwrap_err();
        assert_eq!(err.to_string(), "unsupported target profile: python/fastapi/mysql");
        let err = resolve_target_capabilities(&target("node", "express", "postgres", "")).unwrap_err();
        assert_eq!(err.to_string(), "unsupported target profile: node/express/postgres");
    }

    #[test]
    fn test_missing_keeps_request_order() {
        let caps = CapabilitySet::new([Capability::Http]);
        assert!(caps.has_all(&[Capability::Http]));
        assert_eq!(
            caps.missing(&[Capability::Ws, Capability::Http, Capability::Auth]),
            vec![Capability::Ws, Capability::Auth]
        );
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("sql_repo".parse::<Capability>().unwrap(), Capability::SqlRepo);
        assert!("teleport".parse::<Capability>().is_err());
    }
}
