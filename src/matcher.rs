//! Request matching logic.
//!
//! A [`Matcher`] is an immutable predicate over an intercepted [`Request`].
//! Text-based matchers (URL, path, query parameter, header, body) share a
//! [`Pattern`]; patterns that need compiling (regex, glob, JSON path) are
//! compiled when the matcher is built, so a bad pattern is reported while
//! rules are being declared rather than when a call comes in.

use crate::chain::Request;
use crate::error::RuleError;
use http::Method;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A text predicate used by the URL, path, parameter, header and body matchers.
#[derive(Clone)]
pub enum Pattern {
    /// Any value, as long as one is present
    Any,
    /// Exact text
    Exact(String),
    /// Text starting with the value
    Prefix(String),
    /// Text ending with the value
    Suffix(String),
    /// Text containing the value
    Contains(String),
    /// Regex that must match the whole text
    Regex(Regex),
    /// Glob pattern
    Glob(globset::GlobMatcher),
}

impl Pattern {
    /// Compile a regex matched against the whole text.
    pub fn regex(pattern: &str) -> Result<Self, RuleError> {
        Regex::new(&format!("^(?:{})$", pattern))
            .map(Pattern::Regex)
            .map_err(|source| RuleError::InvalidRegex {
                pattern: pattern.to_string(),
                source,
            })
    }

    /// Compile a glob pattern.
    pub fn glob(pattern: &str) -> Result<Self, RuleError> {
        globset::Glob::new(pattern)
            .map(|glob| Pattern::Glob(glob.compile_matcher()))
            .map_err(|source| RuleError::InvalidGlob {
                pattern: pattern.to_string(),
                source,
            })
    }

    /// Test a value. An absent value never matches.
    pub fn matches(&self, value: Option<&str>) -> bool {
        let Some(value) = value else {
            return false;
        };
        match self {
            Pattern::Any => true,
            Pattern::Exact(expected) => value == expected,
            Pattern::Prefix(prefix) => value.starts_with(prefix.as_str()),
            Pattern::Suffix(suffix) => value.ends_with(suffix.as_str()),
            Pattern::Contains(needle) => value.contains(needle.as_str()),
            Pattern::Regex(regex) => regex.is_match(value),
            Pattern::Glob(glob) => glob.is_match(value),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Any => write!(f, "*"),
            Pattern::Exact(value) => write!(f, "{:?}", value),
            Pattern::Prefix(value) => write!(f, "{:?}*", value),
            Pattern::Suffix(value) => write!(f, "*{:?}", value),
            Pattern::Contains(value) => write!(f, "*{:?}*", value),
            Pattern::Regex(regex) => write!(f, "/{}/", regex.as_str()),
            Pattern::Glob(glob) => write!(f, "glob({})", glob.glob()),
        }
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

type PredicateFn = dyn Fn(&Request) -> bool + Send + Sync;

/// A predicate over an intercepted request.
#[derive(Clone)]
pub enum Matcher {
    /// HTTP method, compared case-insensitively
    Method(Method),
    /// Full request URL
    Url(Pattern),
    /// URL path
    Path(Pattern),
    /// First value of a query parameter
    QueryParam { name: String, pattern: Pattern },
    /// First value of a header
    Header { name: String, pattern: Pattern },
    /// Request body decoded as UTF-8
    Body(Pattern),
    /// JSON body path expressions and their expected values
    /// (`null` only requires the path to resolve)
    JsonPath(Vec<(String, serde_json::Value)>),
    /// Arbitrary predicate
    Predicate {
        label: String,
        predicate: Arc<PredicateFn>,
    },
    /// All inner matchers must match
    And(Vec<Matcher>),
    /// At least one inner matcher must match
    Or(Vec<Matcher>),
    /// The inner matcher must not match
    Not(Box<Matcher>),
}

impl Matcher {
    /// Evaluate the matcher.
    pub fn matches(&self, request: &Request) -> bool {
        match self {
            Matcher::Method(method) => request
                .method()
                .as_str()
                .eq_ignore_ascii_case(method.as_str()),
            Matcher::Url(pattern) => pattern.matches(Some(&request.uri().to_string())),
            Matcher::Path(pattern) => pattern.matches(Some(request.uri().path())),
            Matcher::QueryParam { name, pattern } => {
                pattern.matches(query_param(request, name).as_deref())
            }
            Matcher::Header { name, pattern } => pattern.matches(header_value(request, name)),
            Matcher::Body(pattern) => pattern.matches(body_text(request).as_deref()),
            Matcher::JsonPath(expressions) => matches_json_paths(request, expressions),
            Matcher::Predicate { predicate, .. } => predicate(request),
            Matcher::And(matchers) => matchers.iter().all(|m| m.matches(request)),
            Matcher::Or(matchers) => matchers.iter().any(|m| m.matches(request)),
            Matcher::Not(inner) => !inner.matches(request),
        }
    }

    /// Explain why the matcher does not match `request`.
    pub fn fail_reason(&self, request: &Request) -> String {
        match self {
            Matcher::Method(method) => reason(method.as_str(), request.method().as_str()),
            Matcher::Url(pattern) => reason(pattern, request.uri()),
            Matcher::Path(pattern) => reason(pattern, request.uri().path()),
            Matcher::QueryParam { name, pattern } => {
                reason(pattern, display_opt(query_param(request, name).as_deref()))
            }
            Matcher::Header { name, pattern } => {
                reason(pattern, display_opt(header_value(request, name)))
            }
            Matcher::Body(pattern) => reason(pattern, display_opt(body_text(request).as_deref())),
            Matcher::JsonPath(_) => reason(self, display_opt(body_text(request).as_deref())),
            Matcher::Predicate { label, .. } => format!("predicate {} rejected the request", label),
            Matcher::And(matchers) => join_reasons("and", matchers, request),
            Matcher::Or(matchers) => join_reasons("or", matchers, request),
            Matcher::Not(inner) => format!("expected not {}", inner),
        }
    }

    /// Combine with another matcher; either may match.
    pub fn or(self, other: Matcher) -> Matcher {
        match self {
            Matcher::Or(mut matchers) => {
                matchers.push(other);
                Matcher::Or(matchers)
            }
            left => Matcher::Or(vec![left, other]),
        }
    }

    /// Combine with another matcher; both must match.
    pub fn and(self, other: Matcher) -> Matcher {
        match self {
            Matcher::And(mut matchers) => {
                matchers.push(other);
                Matcher::And(matchers)
            }
            left => Matcher::And(vec![left, other]),
        }
    }

    /// Negate this matcher.
    pub fn negate(self) -> Matcher {
        Matcher::Not(Box::new(self))
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Method(method) => write!(f, "method({})", method),
            Matcher::Url(pattern) => write!(f, "url(~={})", pattern),
            Matcher::Path(pattern) => write!(f, "path(~={})", pattern),
            Matcher::QueryParam { name, pattern } => write!(f, "param({}~={})", name, pattern),
            Matcher::Header { name, pattern } => write!(f, "header({}~={})", name, pattern),
            Matcher::Body(pattern) => write!(f, "body(~={})", pattern),
            Matcher::JsonPath(expressions) => {
                write!(f, "json(")?;
                for (i, (path, expected)) in expressions.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}={}", path, expected)?;
                }
                write!(f, ")")
            }
            Matcher::Predicate { label, .. } => write!(f, "predicate({})", label),
            Matcher::And(matchers) => write_list(f, "and", matchers),
            Matcher::Or(matchers) => write_list(f, "or", matchers),
            Matcher::Not(inner) => write!(f, "not({})", inner),
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, name: &str, matchers: &[Matcher]) -> fmt::Result {
    write!(f, "{}(", name)?;
    for (i, matcher) in matchers.iter().enumerate() {
        if i > 0 {
            write!(f, ",")?;
        }
        write!(f, "{}", matcher)?;
    }
    write!(f, ")")
}

fn join_reasons(name: &str, matchers: &[Matcher], request: &Request) -> String {
    let reasons: Vec<String> = matchers
        .iter()
        .filter(|m| !m.matches(request))
        .map(|m| m.fail_reason(request))
        .collect();
    format!("{}({})", name, reasons.join(", "))
}

fn reason(expected: impl fmt::Display, actual: impl fmt::Display) -> String {
    format!("expected={};actual={}", expected, actual)
}

fn display_opt(value: Option<&str>) -> String {
    value.map_or_else(|| "<none>".to_string(), |v| format!("{:?}", v))
}

fn matches_json_paths(request: &Request, expressions: &[(String, serde_json::Value)]) -> bool {
    use jsonpath_rust::JsonPath;

    let Some(json) = body_text(request).and_then(|b| serde_json::from_str(&b).ok()) else {
        return false;
    };

    expressions.iter().all(|(path_expr, expected)| {
        let path: JsonPath = match JsonPath::try_from(path_expr.as_str()) {
            Ok(p) => p,
            Err(_) => return false,
        };
        let found = path.find(&json);
        let values = match found {
            serde_json::Value::Array(values) => values,
            serde_json::Value::Null => Vec::new(),
            other => vec![other],
        };
        if expected.is_null() {
            !values.is_empty()
        } else {
            values.iter().any(|v| v == expected)
        }
    })
}

/// Case-insensitive lookup of the first value of a header.
pub fn header_value<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    request
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
}

/// First value of a query parameter, percent-decoded.
pub fn query_param(request: &Request, name: &str) -> Option<String> {
    request.uri().query().and_then(|query| {
        parse_query_string(query)
            .into_iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    })
}

/// All query parameters, first occurrence wins.
pub fn query_params(request: &Request) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for (key, value) in parse_query_string(request.uri().query().unwrap_or("")) {
        params.entry(key).or_insert(value);
    }
    params
}

/// Request body as text, if there is one. The body is decoded as UTF-8
/// whatever charset the content type declares; invalid sequences become
/// U+FFFD.
pub fn body_text(request: &Request) -> Option<String> {
    let body = request.body();
    if body.is_empty() && !has_declared_body(request) {
        return None;
    }
    Some(String::from_utf8_lossy(body).into_owned())
}

/// Methods like GET carry no body at all; methods that may carry one are
/// treated as having an empty body.
fn has_declared_body(request: &Request) -> bool {
    !matches!(
        *request.method(),
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    ) || request.headers().contains_key(http::header::CONTENT_LENGTH)
}

/// Parse a query string into ordered key-value pairs.
fn parse_query_string(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((key, value)) => (percent_decode(key), percent_decode(value)),
            None => (percent_decode(part), String::new()),
        })
        .collect()
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                match std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                {
                    Some(byte) => {
                        decoded.push(byte);
                        i += 3;
                    }
                    None => {
                        decoded.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                decoded.push(b' ');
                i += 1;
            }
            other => {
                decoded.push(other);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&decoded).into_owned()
}

// Constructors

/// Match an HTTP method by name.
pub fn method(method: Method) -> Matcher {
    Matcher::Method(method)
}

pub fn get() -> Matcher {
    method(Method::GET)
}

pub fn head() -> Matcher {
    method(Method::HEAD)
}

pub fn post() -> Matcher {
    method(Method::POST)
}

pub fn put() -> Matcher {
    method(Method::PUT)
}

pub fn delete() -> Matcher {
    method(Method::DELETE)
}

pub fn options() -> Matcher {
    method(Method::OPTIONS)
}

pub fn patch() -> Matcher {
    method(Method::PATCH)
}

/// Exact URL.
pub fn url(url: impl Into<String>) -> Matcher {
    Matcher::Url(Pattern::Exact(url.into()))
}

pub fn url_starts(prefix: impl Into<String>) -> Matcher {
    Matcher::Url(Pattern::Prefix(prefix.into()))
}

pub fn url_ends(suffix: impl Into<String>) -> Matcher {
    Matcher::Url(Pattern::Suffix(suffix.into()))
}

/// URL matching a regex (whole URL).
pub fn url_matches(regex: &str) -> Result<Matcher, RuleError> {
    Pattern::regex(regex).map(Matcher::Url)
}

/// Exact path.
pub fn path(path: impl Into<String>) -> Matcher {
    Matcher::Path(Pattern::Exact(path.into()))
}

pub fn path_starts(prefix: impl Into<String>) -> Matcher {
    Matcher::Path(Pattern::Prefix(prefix.into()))
}

pub fn path_ends(suffix: impl Into<String>) -> Matcher {
    Matcher::Path(Pattern::Suffix(suffix.into()))
}

/// Path matching a regex (whole path).
pub fn path_matches(regex: &str) -> Result<Matcher, RuleError> {
    Pattern::regex(regex).map(Matcher::Path)
}

/// Path matching a glob such as `/users/*/posts`.
pub fn path_glob(glob: &str) -> Result<Matcher, RuleError> {
    Pattern::glob(glob).map(Matcher::Path)
}

/// Header with an exact value.
pub fn header(name: impl Into<String>, value: impl Into<String>) -> Matcher {
    Matcher::Header {
        name: name.into(),
        pattern: Pattern::Exact(value.into()),
    }
}

/// Header present with any value.
pub fn has_header(name: impl Into<String>) -> Matcher {
    Matcher::Header {
        name: name.into(),
        pattern: Pattern::Any,
    }
}

pub fn header_matches(name: impl Into<String>, regex: &str) -> Result<Matcher, RuleError> {
    Ok(Matcher::Header {
        name: name.into(),
        pattern: Pattern::regex(regex)?,
    })
}

/// Query parameter with an exact value.
pub fn param(name: impl Into<String>, value: impl Into<String>) -> Matcher {
    Matcher::QueryParam {
        name: name.into(),
        pattern: Pattern::Exact(value.into()),
    }
}

/// Query parameter present with any value.
pub fn has_param(name: impl Into<String>) -> Matcher {
    Matcher::QueryParam {
        name: name.into(),
        pattern: Pattern::Any,
    }
}

pub fn param_matches(name: impl Into<String>, regex: &str) -> Result<Matcher, RuleError> {
    Ok(Matcher::QueryParam {
        name: name.into(),
        pattern: Pattern::regex(regex)?,
    })
}

/// Body with exact content.
pub fn body(content: impl Into<String>) -> Matcher {
    Matcher::Body(Pattern::Exact(content.into()))
}

/// Body containing a substring.
pub fn body_contains(needle: impl Into<String>) -> Matcher {
    Matcher::Body(Pattern::Contains(needle.into()))
}

/// Body matching a regex (whole body).
pub fn body_matches(regex: &str) -> Result<Matcher, RuleError> {
    Pattern::regex(regex).map(Matcher::Body)
}

/// JSON body whose path expressions resolve to the expected values.
pub fn json_path<I, S>(expressions: I) -> Result<Matcher, RuleError>
where
    I: IntoIterator<Item = (S, serde_json::Value)>,
    S: Into<String>,
{
    use jsonpath_rust::JsonPath;

    let expressions: Vec<(String, serde_json::Value)> = expressions
        .into_iter()
        .map(|(path, expected)| (path.into(), expected))
        .collect();
    for (path, _) in &expressions {
        let parsed: Result<JsonPath, _> = JsonPath::try_from(path.as_str());
        if let Err(e) = parsed {
            return Err(RuleError::InvalidJsonPath {
                path: path.clone(),
                message: e.to_string(),
            });
        }
    }
    Ok(Matcher::JsonPath(expressions))
}

/// Custom predicate; `label` shows up in diagnostics.
pub fn predicate<F>(label: impl Into<String>, predicate: F) -> Matcher
where
    F: Fn(&Request) -> bool + Send + Sync + 'static,
{
    Matcher::Predicate {
        label: label.into(),
        predicate: Arc::new(predicate),
    }
}

pub fn not(matcher: Matcher) -> Matcher {
    matcher.negate()
}

pub fn any_of(matchers: impl IntoIterator<Item = Matcher>) -> Matcher {
    Matcher::Or(matchers.into_iter().collect())
}

pub fn all_of(matchers: impl IntoIterator<Item = Matcher>) -> Matcher {
    Matcher::And(matchers.into_iter().collect())
}
