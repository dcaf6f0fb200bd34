//! Rule files.
//!
//! Rules can be declared in YAML instead of code and loaded into an
//! interceptor. Each rule definition compiles into the same matchers the
//! builder produces.

use crate::chain::{BoxError, Request, Response};
use crate::error::{ConfigError, RuleError};
use crate::interceptor::{Behavior, MockInterceptor};
use crate::matcher::{self, Matcher, Pattern};
use crate::response::{media_type, MockResponse};
use crate::rule::RuleBuilder;
use crate::template::TemplateEngine;
use http::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// A rule file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct MockConfig {
    /// Rule selection behavior
    #[serde(default)]
    pub behavior: Behavior,

    /// Logging settings
    #[serde(default)]
    pub settings: Settings,

    /// Rules, in declaration order
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

impl MockConfig {
    /// Load and validate a YAML rule file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate YAML rules.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Compile every rule without registering anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.register_all(&MockInterceptor::new())
    }

    /// Build an interceptor holding these rules.
    pub fn build_interceptor(&self) -> Result<MockInterceptor, ConfigError> {
        let interceptor =
            MockInterceptor::with_behavior(self.behavior).with_settings(self.settings.clone());
        self.register_all(&interceptor)?;
        Ok(interceptor)
    }

    /// Append these rules to an existing interceptor. The behavior is left
    /// untouched. Nothing is added unless every rule compiles.
    pub fn register(&self, interceptor: &MockInterceptor) -> Result<(), ConfigError> {
        self.validate()?;
        self.register_all(interceptor)
    }

    fn register_all(&self, interceptor: &MockInterceptor) -> Result<(), ConfigError> {
        let engine = Arc::new(TemplateEngine::new());
        for (index, rule) in self.rules.iter().enumerate() {
            rule.register(interceptor, &engine, index)?;
        }
        Ok(())
    }
}

impl MockInterceptor {
    /// Interceptor holding the rules of a loaded rule file.
    pub fn from_config(config: &MockConfig) -> Result<Self, ConfigError> {
        config.build_interceptor()
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Log every matched call
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log calls no rule could serve
    #[serde(default = "default_true")]
    pub log_unmatched: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_matches: true,
            log_unmatched: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// A single rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDefinition {
    /// Label used in logs and errors
    #[serde(default)]
    pub id: Option<String>,

    /// Request matcher (empty = match everything)
    #[serde(default)]
    pub request: RequestMatcher,

    /// Response to return
    #[serde(default)]
    pub response: ResponseDefinition,

    /// How many calls the rule serves (default 1)
    #[serde(default)]
    pub times: Option<u32>,

    /// Serve any number of calls; overrides `times`
    #[serde(default)]
    pub any_times: bool,

    /// Latency simulation
    #[serde(default)]
    pub delay: Option<DelayConfig>,
}

impl RuleDefinition {
    fn register(
        &self,
        interceptor: &MockInterceptor,
        engine: &Arc<TemplateEngine>,
        index: usize,
    ) -> Result<(), ConfigError> {
        let invalid = |source| ConfigError::Invalid { index, source };

        let mut builder = interceptor
            .rule(self.request.compile().map_err(invalid)?)
            .id(self.id.clone().unwrap_or_else(|| format!("rule-{}", index)));

        builder = match (self.any_times, self.times) {
            (true, _) => builder.any_times(),
            (false, Some(times)) => builder.times(times),
            (false, None) => builder,
        };
        if let Some(delay) = &self.delay {
            builder = delay.apply(builder);
        }

        let mut response = self.response.canned().map_err(|message| ConfigError::Body {
            index,
            message,
        })?;
        if let Some(e) = response.take_error() {
            return Err(invalid(e));
        }

        if self.response.template {
            let engine = Arc::clone(engine);
            let body = self.response.body.clone();
            let status = self.response.status;
            let headers = self.response.headers.clone();
            builder
                .answer(move |request: &Request| {
                    render_response(&engine, request, status, &headers, body.as_ref())
                })
                .map_err(invalid)?;
        } else {
            builder.respond(response).map_err(invalid)?;
        }
        Ok(())
    }
}

/// Request matching configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RequestMatcher {
    /// HTTP method(s) to match (empty = any)
    #[serde(default)]
    pub method: Vec<String>,

    /// Full URL matching
    #[serde(default)]
    pub url: Option<TextMatcher>,

    /// Path matching
    #[serde(default)]
    pub path: Option<TextMatcher>,

    /// Query parameter matching
    #[serde(default)]
    pub query: BTreeMap<String, TextMatcher>,

    /// Header matching
    #[serde(default)]
    pub headers: BTreeMap<String, TextMatcher>,

    /// Body matching
    #[serde(default)]
    pub body: Option<BodyMatcher>,
}

impl RequestMatcher {
    /// Compile into matchers, all of which must match.
    pub fn compile(&self) -> Result<Vec<Matcher>, RuleError> {
        let mut matchers = Vec::new();

        if !self.method.is_empty() {
            let mut methods: Vec<Matcher> = self
                .method
                .iter()
                .map(|m| {
                    Method::from_bytes(m.to_uppercase().as_bytes())
                        .map(matcher::method)
                        .map_err(|_| RuleError::InvalidMethod(m.clone()))
                })
                .collect::<Result<_, _>>()?;
            matchers.push(if methods.len() == 1 {
                methods.remove(0)
            } else {
                matcher::any_of(methods)
            });
        }

        if let Some(url) = &self.url {
            matchers.push(Matcher::Url(url.value_pattern("url")?));
        }
        if let Some(path) = &self.path {
            matchers.push(Matcher::Path(path.value_pattern("path")?));
        }
        for (name, m) in &self.query {
            matchers.push(m.compile_named(name, |name, pattern| Matcher::QueryParam {
                name,
                pattern,
            })?);
        }
        for (name, m) in &self.headers {
            matchers.push(m.compile_named(name, |name, pattern| Matcher::Header {
                name,
                pattern,
            })?);
        }
        if let Some(body) = &self.body {
            matchers.push(body.compile()?);
        }

        Ok(matchers)
    }
}

/// Text matching for URLs, paths, query parameters and headers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextMatcher {
    /// Exact value match
    Exact { value: String },
    /// Prefix match
    Prefix { value: String },
    /// Suffix match
    Suffix { value: String },
    /// Value must contain substring
    Contains { value: String },
    /// Regex pattern match (whole value)
    Regex { pattern: String },
    /// Glob pattern match
    Glob { pattern: String },
    /// Value must be present (any value)
    Present,
    /// Value must be absent
    Absent,
}

impl TextMatcher {
    fn pattern(&self) -> Result<Pattern, RuleError> {
        Ok(match self {
            TextMatcher::Exact { value } => Pattern::Exact(value.clone()),
            TextMatcher::Prefix { value } => Pattern::Prefix(value.clone()),
            TextMatcher::Suffix { value } => Pattern::Suffix(value.clone()),
            TextMatcher::Contains { value } => Pattern::Contains(value.clone()),
            TextMatcher::Regex { pattern } => Pattern::regex(pattern)?,
            TextMatcher::Glob { pattern } => Pattern::glob(pattern)?,
            TextMatcher::Present | TextMatcher::Absent => Pattern::Any,
        })
    }

    /// Pattern for a value every request has; presence checks make no
    /// sense there.
    fn value_pattern(&self, field: &str) -> Result<Pattern, RuleError> {
        match self {
            TextMatcher::Present => Err(RuleError::UnsupportedMatcher {
                field: field.to_string(),
                kind: "present".to_string(),
            }),
            TextMatcher::Absent => Err(RuleError::UnsupportedMatcher {
                field: field.to_string(),
                kind: "absent".to_string(),
            }),
            _ => self.pattern(),
        }
    }

    fn compile_named(
        &self,
        name: &str,
        make: impl Fn(String, Pattern) -> Matcher,
    ) -> Result<Matcher, RuleError> {
        let matcher = make(name.to_string(), self.pattern()?);
        Ok(match self {
            TextMatcher::Absent => matcher.negate(),
            _ => matcher,
        })
    }
}

/// Body matching configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BodyMatcher {
    /// Exact body match
    Exact { value: String },
    /// Regex pattern match (whole body)
    Regex { pattern: String },
    /// JSON path expressions and expected values (`null` = path exists)
    JsonPath {
        expressions: BTreeMap<String, serde_json::Value>,
    },
    /// Body must contain substring
    Contains { value: String },
    /// Body must be valid JSON (any structure)
    Json,
    /// Body must be empty or absent
    Empty,
}

impl BodyMatcher {
    fn compile(&self) -> Result<Matcher, RuleError> {
        match self {
            BodyMatcher::Exact { value } => Ok(matcher::body(value.clone())),
            BodyMatcher::Regex { pattern } => matcher::body_matches(pattern),
            BodyMatcher::JsonPath { expressions } => matcher::json_path(
                expressions
                    .iter()
                    .map(|(path, expected)| (path.clone(), expected.clone())),
            ),
            BodyMatcher::Contains { value } => Ok(matcher::body_contains(value.clone())),
            BodyMatcher::Json => Ok(matcher::predicate("json body", |request: &Request| {
                serde_json::from_slice::<serde_json::Value>(request.body()).is_ok()
            })),
            BodyMatcher::Empty => Ok(matcher::predicate("empty body", |request: &Request| {
                request.body().is_empty()
            })),
        }
    }
}

/// Response definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseDefinition {
    /// HTTP status code
    #[serde(default = "default_status")]
    pub status: u16,

    /// Response headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Response body
    #[serde(default)]
    pub body: Option<ResponseBody>,

    /// Render the body through the template engine on every call
    #[serde(default)]
    pub template: bool,
}

impl Default for ResponseDefinition {
    fn default() -> Self {
        Self {
            status: default_status(),
            headers: BTreeMap::new(),
            body: None,
            template: false,
        }
    }
}

fn default_status() -> u16 {
    200
}

impl ResponseDefinition {
    /// The static response. Also validates body sources for template rules.
    fn canned(&self) -> Result<MockResponse, String> {
        let mut response = MockResponse::new(self.status);
        if let Some(body) = &self.body {
            response = response.with_body(body.to_bytes()?, body.content_type());
        }
        for (name, value) in &self.headers {
            response = if name.eq_ignore_ascii_case("content-type") {
                response.content_type(value)
            } else {
                response.header(name, value)
            };
        }
        Ok(response)
    }
}

/// Response body configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBody {
    /// Plain text body
    Text { content: String },
    /// JSON body
    Json { content: serde_json::Value },
    /// Base64 encoded binary
    Base64 { content: String },
    /// Load from file
    File { path: String },
}

impl ResponseBody {
    /// Get the body content as bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, String> {
        match self {
            ResponseBody::Text { content } => Ok(content.as_bytes().to_vec()),
            ResponseBody::Json { content } => Ok(content.to_string().into_bytes()),
            ResponseBody::Base64 { content } => {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD
                    .decode(content)
                    .map_err(|e| format!("Invalid base64: {}", e))
            }
            ResponseBody::File { path } => {
                std::fs::read(path).map_err(|e| format!("Failed to read file {}: {}", path, e))
            }
        }
    }

    /// Get content type for this body.
    pub fn content_type(&self) -> &'static str {
        match self {
            ResponseBody::Text { .. } => media_type::TEXT,
            ResponseBody::Json { .. } => media_type::JSON,
            ResponseBody::Base64 { .. } => media_type::RAW_DATA,
            ResponseBody::File { path } => crate::response::guess_content_type(path),
        }
    }
}

/// Delay/latency simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DelayConfig {
    /// Fixed delay in milliseconds
    #[serde(default)]
    pub fixed_ms: u64,

    /// Minimum delay for random range (ms)
    #[serde(default)]
    pub min_ms: u64,

    /// Maximum delay for random range (ms)
    #[serde(default)]
    pub max_ms: u64,
}

impl DelayConfig {
    fn apply<'a>(&self, builder: RuleBuilder<'a>) -> RuleBuilder<'a> {
        if self.fixed_ms > 0 {
            builder.delay(Duration::from_millis(self.fixed_ms))
        } else if self.min_ms > 0 || self.max_ms > 0 {
            builder.delay_between(
                Duration::from_millis(self.min_ms),
                Duration::from_millis(self.max_ms),
            )
        } else {
            builder.delay(Duration::ZERO)
        }
    }
}

fn render_response(
    engine: &TemplateEngine,
    request: &Request,
    status: u16,
    headers: &BTreeMap<String, String>,
    body: Option<&ResponseBody>,
) -> Result<Response, BoxError> {
    let mut response = MockResponse::new(status);
    if let Some(body) = body {
        let content = match body {
            ResponseBody::Text { content } => engine.render(content, request)?.into_bytes(),
            ResponseBody::Json { content } => {
                serde_json::to_vec(&engine.render_json(content, request)?)?
            }
            other => other.to_bytes()?,
        };
        response = response.with_body(content, body.content_type());
    }
    for (name, value) in headers {
        let value = engine.render(value, request)?;
        response = if name.eq_ignore_ascii_case("content-type") {
            response.content_type(&value)
        } else {
            response.header(name, &value)
        };
    }
    Ok(response.try_into_response()?)
}
