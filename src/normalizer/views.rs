//! Role-scoped field views

use anyhow::Result;
use ang_cue::Value;

use super::helpers::clean_name;
use super::types::ViewDef;
use super::Normalizer;

impl Normalizer<'_> {
    /// `View: {role: {field: _}}`; hidden fields are not exposed
    pub fn extract_views(&self, val: &Value) -> Result<Vec<ViewDef>> {
        Ok(val
            .fields()
            .iter()
            .filter(|fv| !fv.is_definition())
            .map(|view| {
                let mut def = ViewDef {
                    name: clean_name(&view.label),
                    ..Default::default()
                };
                for role in view.value.fields() {
                    let fields: Vec<String> = role
                        .value
                        .fields()
                        .iter()
                        .map(|f| clean_name(&f.label))
                        .filter(|f| !f.is_empty() && !f.starts_with('_'))
                        .collect();
                    def.roles.insert(clean_name(&role.label), fields);
                }
                def
            })
            .collect())
    }
}
