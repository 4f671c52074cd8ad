//! AsyncAPI 2 document for domain events

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use super::openapi::type_schema;
use crate::ir::Schema;

pub const ASYNCAPI_VERSION: &str = "2.6.0";

/// One channel per event; publishers and subscribers are listed as
/// `x-publishers` / `x-subscribers`
pub fn build_asyncapi(schema: &Schema) -> Value {
    let mut publishers: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    let mut subscribers: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for svc in &schema.services {
        for event in &svc.publishes {
            publishers.entry(event.as_str()).or_default().push(svc.name.clone());
        }
        for m in &svc.methods {
            for event in &m.publishes {
                publishers.entry(event.as_str()).or_default().push(format!("{}.{}", svc.name, m.name));
            }
        }
        for (event, handler) in &svc.subscribes {
            subscribers.entry(event.as_str()).or_default().push(format!("{}.{handler}", svc.name));
        }
    }

    let mut channels = Map::new();
    let mut messages = Map::new();
    for event in &schema.events {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for f in &event.fields {
            properties.insert(f.name.clone(), type_schema(&f.type_ref));
            if f.is_required() {
                required.push(json!(f.name));
            }
        }
        messages.insert(
            event.name.clone(),
            json!({
                "name": event.name,
                "payload": {"type": "object", "properties": properties, "required": required}
            }),
        );

        let mut channel = Map::new();
        channel.insert(
            "subscribe".into(),
            json!({"message": {"$ref": format!("#/components/messages/{}", event.name)}}),
        );
        let mut pubs = publishers.remove(event.name.as_str()).unwrap_or_default();
        pubs.sort();
        pubs.dedup();
        if !pubs.is_empty() {
            channel.insert("x-publishers".into(), json!(pubs));
        }
        let mut subs = subscribers.remove(event.name.as_str()).unwrap_or_default();
        subs.sort();
        if !subs.is_empty() {
            channel.insert("x-subscribers".into(), json!(subs));
        }
        channels.insert(event.name.clone(), Value::Object(channel));
    }

    let title = if schema.project.name.is_empty() {
        "ANG Events".to_string()
    } else {
        format!("{} Events", schema.project.name)
    };
    json!({
        "asyncapi": ASYNCAPI_VERSION,
        "info": {"title": title, "version": if schema.project.version.is_empty() { "0.1.0" } else { schema.project.version.as_str() }},
        "channels": channels,
        "components": {"messages": messages}
    })
}
