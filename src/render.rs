//! Rendering seam for target-language source units
//!
//! Language emitters describe each output file as a [`RenderUnit`]: a
//! template name, a workspace-relative path and a JSON context built from the
//! IR. Turning a unit into source text is the job of a [`Renderer`]. The
//! built-in [`ContextRenderer`] writes the context itself so builds stay
//! deterministic without a template set; [`HandlebarsRenderer`] renders
//! registered templates.

use anyhow::{anyhow, Context as _, Result};
use handlebars::{Context, Handlebars, Helper, HelperResult, Output, RenderContext};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderUnit {
    pub template: String,
    pub path: String,
    pub context: serde_json::Value,
}

impl RenderUnit {
    pub fn new(template: impl Into<String>, path: impl Into<String>, context: serde_json::Value) -> Self {
        Self {
            template: template.into(),
            path: path.into(),
            context,
        }
    }
}

pub trait Renderer: Send + Sync {
    fn render(&self, unit: &RenderUnit) -> Result<Vec<u8>>;
}

/// Emits `{template, context}` as pretty JSON
#[derive(Debug, Default, Clone, Copy)]
pub struct ContextRenderer;

impl Renderer for ContextRenderer {
    fn render(&self, unit: &RenderUnit) -> Result<Vec<u8>> {
        let doc = serde_json::json!({
            "template": unit.template,
            "context": unit.context,
        });
        let mut out = serde_json::to_vec_pretty(&doc).with_context(|| format!("render {}", unit.path))?;
        out.push(b'\n');
        Ok(out)
    }
}

/// Handlebars templates keyed by unit template name
pub struct HandlebarsRenderer {
    handlebars: Handlebars<'static>,
}

impl Default for HandlebarsRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlebarsRenderer {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars.register_escape_fn(handlebars::no_escape);

        handlebars.register_helper("snake", Box::new(snake_helper));
        handlebars.register_helper("pascal", Box::new(pascal_helper));
        handlebars.register_helper("camel", Box::new(camel_helper));
        handlebars.register_helper("json", Box::new(json_helper));

        Self { handlebars }
    }

    pub fn register(&mut self, name: &str, source: &str) -> Result<()> {
        self.handlebars
            .register_template_string(name, source)
            .map_err(|e| anyhow!("template {name:?}: {e}"))
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.handlebars.has_template(name)
    }
}

impl Renderer for HandlebarsRenderer {
    fn render(&self, unit: &RenderUnit) -> Result<Vec<u8>> {
        if !self.has_template(&unit.template) {
            return Err(anyhow!("no template registered for {:?} ({})", unit.template, unit.path));
        }
        let text = self
            .handlebars
            .render(&unit.template, &unit.context)
            .map_err(|e| anyhow!("render {}: {e}", unit.path))?;
        Ok(text.into_bytes())
    }
}

// ============================================================================
// Identifier casing
// ============================================================================

fn words(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let chars: Vec<char> = s.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !cur.is_empty() {
                out.push(std::mem::take(&mut cur));
            }
            continue;
        }
        let boundary = c.is_uppercase()
            && !cur.is_empty()
            && (chars[i - 1].is_lowercase()
                || chars[i - 1].is_ascii_digit()
                || chars.get(i + 1).is_some_and(|n| n.is_lowercase()));
        if boundary {
            out.push(std::mem::take(&mut cur));
        }
        cur.push(c);
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    out
}

pub fn snake_case(s: &str) -> String {
    words(s).iter().map(|w| w.to_lowercase()).collect::<Vec<_>>().join("_")
}

pub fn pascal_case(s: &str) -> String {
    words(s)
        .iter()
        .map(|w| {
            let lower = w.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect()
}

pub fn camel_case(s: &str) -> String {
    let pascal = pascal_case(s);
    let mut chars = pascal.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn str_param<'a>(h: &'a Helper) -> &'a str {
    h.param(0).and_then(|v| v.value().as_str()).unwrap_or("")
}

fn snake_helper(h: &Helper, _: &Handlebars, _: &Context, _: &mut RenderContext, out: &mut dyn Output) -> HelperResult {
    out.write(&snake_case(str_param(h)))?;
    Ok(())
}

fn pascal_helper(h: &Helper, _: &Handlebars, _: &Context, _: &mut RenderContext, out: &mut dyn Output) -> HelperResult {
    out.write(&pascal_case(str_param(h)))?;
    Ok(())
}

fn camel_helper(h: &Helper, _: &Handlebars, _: &Context, _: &mut RenderContext, out: &mut dyn Output) -> HelperResult {
    out.write(&camel_case(str_param(h)))?;
    Ok(())
}

fn json_helper(h: &Helper, _: &Handlebars, _: &Context, _: &mut RenderContext, out: &mut dyn Output) -> HelperResult {
    if let Some(v) = h.param(0) {
        out.write(&serde_json::to_string(v.value()).unwrap_or_default())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_casing() {
        assert_eq!(snake_case("UserProfile"), "user_profile");
        assert_eq!(snake_case("HTTPServer"), "http_server");
        assert_eq!(snake_case("created_at"), "created_at");
        assert_eq!(snake_case("createdAt"), "created_at");
        assert_eq!(snake_case("ID"), "id");
        assert_eq!(snake_case("UserID"), "user_id");
        assert_eq!(snake_case("email"), "email");
        assert_eq!(pascal_case("user_profile"), "UserProfile");
        assert_eq!(camel_case("GetUser"), "getUser");
    }

    #[test]
    fn test_context_renderer_is_stable_json() {
        let unit = RenderUnit::new("go/entity", "internal/domain/user.go", serde_json::json!({"b": 1, "a": 2}));
        let out = String::from_utf8(ContextRenderer.render(&unit).unwrap()).unwrap();
        assert!(out.ends_with("}\n"));
        let a = out.find("\"a\"").unwrap();
        let b = out.find("\"b\"").unwrap();
        assert!(a < b, "keys are sorted");
    }

    #[test]
    fn test_handlebars_renderer() {
        let mut r = HandlebarsRenderer::new();
        r.register("go/entity", "type {{pascal name}} struct{} // {{snake name}}").unwrap();
        let unit = RenderUnit::new("go/entity", "x.go", serde_json::json!({"name": "user_profile"}));
        assert_eq!(
            String::from_utf8(r.render(&unit).unwrap()).unwrap(),
            "type UserProfile struct{} // user_profile"
        );

        let missing = RenderUnit::new("go/service", "y.go", serde_json::json!({}));
        assert!(r.render(&missing).unwrap_err().to_string().contains("no template registered"));
    }
}
