//! Events and business errors

use anyhow::{Context, Result};
use ang_cue::{Value, ValueKind};

use super::helpers::{clean_name, format_pos, get_int, get_string, map_declared_type};
use super::types::{ErrorDef, EventDef, Field};
use super::Normalizer;

impl Normalizer<'_> {
    /// Every `#Name` definition of the events package is an event payload
    pub fn extract_events(&self, val: &Value) -> Result<Vec<EventDef>> {
        let mut events = Vec::new();
        for fv in val.fields().iter().filter(|fv| fv.label.starts_with('#')) {
            let name = fv.name();
            let entity = self
                .parse_entity(name, &fv.value)
                .with_context(|| format!("failed to parse event {name}"))?;
            events.push(EventDef {
                name: entity.name,
                fields: entity.fields,
                metadata: Default::default(),
                source: format_pos(&fv.value),
            });
        }
        Ok(events)
    }

    /// `#Events: {Name: {payload: {field: "type"}}}` in the architecture package
    pub fn extract_events_from_arch(&self, val: &Value) -> Result<Vec<EventDef>> {
        let Some(events) = val.lookup("#Events") else {
            return Ok(Vec::new());
        };
        Ok(events
            .fields()
            .iter()
            .map(|fv| {
                let fields = fv
                    .value
                    .lookup("payload")
                    .map(Value::fields)
                    .unwrap_or_default()
                    .iter()
                    .map(|pf| {
                        let raw = pf.value.as_str().unwrap_or_default();
                        let mapped = map_declared_type(raw);
                        let type_name = if mapped.is_empty() { raw.trim().to_string() } else { mapped };
                        let mut field = Field::new(clean_name(&pf.label), type_name);
                        field.source = format_pos(&pf.value);
                        field
                    })
                    .collect();
                let mut event = EventDef {
                    name: clean_name(&fv.label),
                    fields,
                    source: format_pos(&fv.value),
                    ..Default::default()
                };
                let description = get_string(&fv.value, "description");
                if !description.is_empty() {
                    event.metadata.insert("description".into(), description.into());
                }
                event
            })
            .collect())
    }

    pub fn extract_errors(&self, val: &Value) -> Result<Vec<ErrorDef>> {
        let Some(errors) = val.lookup("#Errors") else {
            return Ok(Vec::new());
        };
        Ok(errors
            .fields()
            .iter()
            .filter(|fv| fv.value.kind() == ValueKind::Struct)
            .map(|fv| ErrorDef {
                name: clean_name(&fv.label),
                code: get_int(&fv.value, "code").unwrap_or(0),
                http_status: get_int(&fv.value, "http").unwrap_or(0),
                message: get_string(&fv.value, "msg"),
                source: format_pos(&fv.value),
            })
            .collect())
    }
}
