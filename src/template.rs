//! Handlebars rendering for answers computed from the request.
//!
//! Templates see the request as `method`, `url`, `path`, `segments`,
//! `query`, `headers`, `body` and `json`. Header names are lower-cased.

use crate::chain::Request;
use crate::error::TemplateError;
use crate::matcher::{body_text, query_params};
use handlebars::{
    Context, Handlebars, Helper, HelperResult, Output, RenderContext, RenderErrorReason,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// Renders response templates against a request.
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

#[derive(Debug, Serialize)]
struct RequestContext {
    method: String,
    url: String,
    path: String,
    segments: Vec<String>,
    query: HashMap<String, String>,
    headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    json: Option<Value>,
}

impl RequestContext {
    fn new(request: &Request) -> Self {
        let headers = request
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = body_text(request);
        let json = body.as_deref().and_then(|b| serde_json::from_str(b).ok());
        let path = request.uri().path().to_string();

        Self {
            method: request.method().to_string(),
            url: request.uri().to_string(),
            segments: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            path,
            query: query_params(request),
            headers,
            body,
            json,
        }
    }
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.register_helper("now", Box::new(now_helper));
        handlebars.register_helper("random", Box::new(random_helper));
        handlebars.register_helper("default", Box::new(default_helper));
        handlebars.register_helper("upper", Box::new(upper_helper));
        handlebars.register_helper("lower", Box::new(lower_helper));
        // Bodies are not HTML.
        handlebars.register_escape_fn(handlebars::no_escape);
        Self { handlebars }
    }

    /// Render `template` for `request`.
    pub fn render(&self, template: &str, request: &Request) -> Result<String, TemplateError> {
        self.render_with(template, &RequestContext::new(request))
    }

    /// Render every string inside `json` for `request`; other values are
    /// copied as is.
    pub fn render_json(&self, json: &Value, request: &Request) -> Result<Value, TemplateError> {
        self.render_value(json, &RequestContext::new(request))
    }

    fn render_with(&self, template: &str, ctx: &RequestContext) -> Result<String, TemplateError> {
        self.handlebars
            .render_template(template, ctx)
            .map_err(|e| TemplateError(e.to_string()))
    }

    fn render_value(&self, value: &Value, ctx: &RequestContext) -> Result<Value, TemplateError> {
        Ok(match value {
            Value::String(s) if s.contains("{{") => Value::String(self.render_with(s, ctx)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.render_value(v, ctx))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(fields) => {
                let mut rendered = serde_json::Map::with_capacity(fields.len());
                for (key, v) in fields {
                    rendered.insert(key.clone(), self.render_value(v, ctx)?);
                }
                Value::Object(rendered)
            }
            other => other.clone(),
        })
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// `{{now}}` or `{{now "%Y-%m-%d"}}`, in UTC.
fn now_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let format = h
        .param(0)
        .and_then(|p| p.value().as_str())
        .unwrap_or("%Y-%m-%dT%H:%M:%S%.3fZ");
    out.write(&chrono::Utc::now().format(format).to_string())?;
    Ok(())
}

/// `{{random min max}}`, inclusive; defaults to 0..=100.
fn random_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    use rand::Rng;

    let bound = |i: usize, fallback: i64| {
        h.param(i)
            .and_then(|p| p.value().as_i64())
            .unwrap_or(fallback)
    };
    let (min, max) = (bound(0, 0), bound(1, 100));
    if min > max {
        return Err(RenderErrorReason::Other(format!("random: {} > {}", min, max)).into());
    }
    out.write(&rand::thread_rng().gen_range(min..=max).to_string())?;
    Ok(())
}

/// `{{default value "fallback"}}`: the fallback replaces missing, null and
/// empty values.
fn default_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let fallback = h.param(1).and_then(|p| p.value().as_str()).unwrap_or("");
    let value = match h.param(0).map(|p| p.value()) {
        None | Some(Value::Null) => fallback.to_string(),
        Some(Value::String(s)) if s.is_empty() => fallback.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    out.write(&value)?;
    Ok(())
}

fn upper_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    write_converted(h, out, str::to_uppercase)
}

fn lower_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    write_converted(h, out, str::to_lowercase)
}

fn write_converted(h: &Helper, out: &mut dyn Output, convert: fn(&str) -> String) -> HelperResult {
    let value = h.param(0).and_then(|p| p.value().as_str()).unwrap_or("");
    out.write(&convert(value))?;
    Ok(())
}
