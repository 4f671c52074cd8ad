//! Dependency views over the IR: the summary graph attached to the schema
//! and the service `uses` ordering.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{anyhow, bail, Result};

use super::types::{DependencyGraph, GraphEdge, GraphNode, Schema, Service};

fn node(id: String, kind: &str, name: &str) -> GraphNode {
    GraphNode {
        id,
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

fn edge(from: &str, to: &str, kind: &str) -> GraphEdge {
    GraphEdge {
        from: from.to_string(),
        to: to.to_string(),
        kind: kind.to_string(),
    }
}

/// Entities, services, methods and the edges between them
pub fn build_dependency_graph(schema: &Schema) -> DependencyGraph {
    let mut g = DependencyGraph::default();
    for e in &schema.entities {
        g.nodes.push(node(format!("cue://#{}", e.name), "entity", &e.name));
    }
    for svc in &schema.services {
        let svc_id = format!("svc://{}", svc.name);
        g.nodes.push(node(svc_id.clone(), "service", &svc.name));
        for dep in &svc.uses {
            g.edges.push(edge(&svc_id, &format!("svc://{dep}"), "uses"));
        }
        for m in &svc.methods {
            let m_id = format!("method://{}.{}", svc.name, m.name);
            g.nodes.push(node(m_id.clone(), "method", &m.name));
            g.edges.push(edge(&svc_id, &m_id, "has"));
            if let Some(input) = m.input.as_ref().filter(|e| !e.name.is_empty()) {
                g.edges.push(edge(&m_id, &format!("cue://#{}", input.name), "reads"));
            }
            if let Some(output) = m.output.as_ref().filter(|e| !e.name.is_empty()) {
                g.edges.push(edge(&m_id, &format!("cue://#{}", output.name), "writes"));
            }
        }
    }
    g
}

/// Services with no cycle through them come first, in dependency order.
/// Returns `Err` with the sorted names left over when the `uses` graph has
/// a cycle. Unknown dependencies are ignored here.
pub fn service_order(services: &[Service]) -> Result<Vec<String>, Vec<String>> {
    let known: BTreeSet<&str> = services.iter().map(|s| s.name.as_str()).collect();
    let mut in_degree: BTreeMap<&str, usize> = known.iter().map(|n| (*n, 0)).collect();
    // dependents[dep] = services that use dep
    let mut dependents: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for svc in services {
        let deps: BTreeSet<&str> = svc
            .uses
            .iter()
            .map(String::as_str)
            .filter(|d| known.contains(d) && *d != svc.name)
            .collect();
        for dep in deps {
            if dependents.entry(dep).or_default().insert(svc.name.as_str()) {
                *in_degree.entry(svc.name.as_str()).or_default() += 1;
            }
        }
    }

    // BTreeSet keeps the ready queue sorted, which breaks ties by name
    let mut ready: BTreeSet<&str> = in_degree.iter().filter(|(_, d)| **d == 0).map(|(n, _)| *n).collect();
    let mut order = Vec::with_capacity(known.len());
    while let Some(name) = ready.pop_first() {
        order.push(name.to_string());
        for next in dependents.get(name).into_iter().flatten() {
            if let Some(d) = in_degree.get_mut(next) {
                *d -= 1;
                if *d == 0 {
                    ready.insert(*next);
                }
            }
        }
    }

    if order.len() != known.len() {
        let done: BTreeSet<&str> = order.iter().map(String::as_str).collect();
        return Err(known.iter().filter(|n| !done.contains(*n)).map(|n| n.to_string()).collect());
    }
    Ok(order)
}

pub fn cycle_message(leftover: &[String]) -> String {
    format!("service dependency cycle detected: {}", leftover.join(", "))
}

/// Every `uses` entry names a declared service and the graph is acyclic.
/// Returns the dependency order.
pub fn validate_service_dependencies(schema: &Schema) -> Result<Vec<String>> {
    let known: BTreeSet<&str> = schema.services.iter().map(|s| s.name.as_str()).collect();
    let mut unknown = Vec::new();
    for svc in &schema.services {
        for dep in &svc.uses {
            if !known.contains(dep.as_str()) {
                unknown.push(format!("service {} uses unknown service {dep:?}", svc.name));
            }
        }
    }
    if !unknown.is_empty() {
        unknown.sort();
        bail!("{}", unknown.join("; "));
    }
    service_order(&schema.services).map_err(|leftover| anyhow!(cycle_message(&leftover)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn svc(name: &str, uses: &[&str]) -> Service {
        Service {
            name: name.into(),
            uses: uses.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_service_order_dependencies_first() {
        let services = vec![svc("orders", &["users", "billing"]), svc("users", &[]), svc("billing", &["users"])];
        assert_eq!(service_order(&services).unwrap(), vec!["users", "billing", "orders"]);
    }

    #[test]
    fn test_cycle_lists_leftover_nodes() {
        let services = vec![svc("A", &["B"]), svc("B", &["A"]), svc("C", &[])];
        let leftover = service_order(&services).unwrap_err();
        assert_eq!(leftover, vec!["A", "B"]);
        assert_eq!(cycle_message(&leftover), "service dependency cycle detected: A, B");
    }

    #[test]
    fn test_unknown_dependency_fails() {
        let schema = Schema {
            services: vec![svc("orders", &["ghost"])],
            ..Default::default()
        };
        let err = validate_service_dependencies(&schema).unwrap_err();
        assert_eq!(err.to_string(), "service orders uses unknown service \"ghost\"");
    }

    #[test]
    fn test_graph_has_method_edges() {
        let mut s = svc("users", &[]);
        s.methods.push(crate::ir::types::Method {
            name: "GetUser".into(),
            ..Default::default()
        });
        let schema = Schema {
            services: vec![s],
            ..Default::default()
        };
        let g = build_dependency_graph(&schema);
        assert_eq!(g.nodes.len(), 2);
        assert_eq!(g.edges, vec![edge("svc://users", "method://users.GetUser", "has")]);
    }
}
