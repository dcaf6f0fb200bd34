//! Rules and the fluent rule builder.

use crate::chain::{BoxError, Request, Response};
use crate::error::RuleError;
use crate::interceptor::MockInterceptor;
use crate::matcher::{self, Matcher};
use crate::response::MockResponse;
use http::Method;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Computes the response for a matched request.
///
/// Errors are handed back to the caller of the intercepted call unchanged.
pub trait Answer: Send + Sync {
    fn respond(&self, request: &Request) -> Result<Response, BoxError>;
}

impl<F> Answer for F
where
    F: Fn(&Request) -> Result<Response, BoxError> + Send + Sync,
{
    fn respond(&self, request: &Request) -> Result<Response, BoxError> {
        self(request)
    }
}

/// Answer returning the same canned response on every call.
struct Canned(MockResponse);

impl Answer for Canned {
    fn respond(&self, _request: &Request) -> Result<Response, BoxError> {
        Ok(self.0.to_response())
    }
}

/// Invocation budget of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Times {
    Limited(u32),
    Unlimited,
}

impl Default for Times {
    fn default() -> Self {
        Times::Limited(1)
    }
}

impl fmt::Display for Times {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Times::Limited(n) => write!(f, "{}", n),
            Times::Unlimited => write!(f, "unlimited"),
        }
    }
}

/// Synthetic latency applied before answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delay {
    Fixed(Duration),
    /// Uniformly random within the closed range
    Between(Duration, Duration),
}

impl Delay {
    /// The delay to apply to one call.
    pub fn sample(&self) -> Duration {
        match *self {
            Delay::Fixed(duration) => duration,
            Delay::Between(min, max) if max > min => {
                use rand::Rng;
                let mut rng = rand::thread_rng();
                rng.gen_range(min..=max)
            }
            Delay::Between(min, _) => min,
        }
    }
}

/// A matcher set, an invocation budget, an optional delay and an answer.
pub struct Rule {
    id: Option<String>,
    matchers: Vec<Matcher>,
    remaining: Times,
    delay: Option<Delay>,
    answer: Arc<dyn Answer>,
}

impl Rule {
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn matchers(&self) -> &[Matcher] {
        &self.matchers
    }

    pub fn remaining(&self) -> Times {
        self.remaining
    }

    pub fn delay(&self) -> Option<Delay> {
        self.delay
    }

    pub fn answer(&self) -> Arc<dyn Answer> {
        Arc::clone(&self.answer)
    }

    /// A rule with no invocations left is never selected again.
    pub fn is_consumed(&self) -> bool {
        self.remaining == Times::Limited(0)
    }

    /// True when every matcher accepts the request.
    pub fn matches(&self, request: &Request) -> bool {
        self.matchers.iter().all(|m| m.matches(request))
    }

    /// The matchers rejecting `request`, with the reason each gives.
    pub fn fail_reasons(&self, request: &Request) -> Vec<(String, String)> {
        self.matchers
            .iter()
            .filter(|m| !m.matches(request))
            .map(|m| (m.to_string(), m.fail_reason(request)))
            .collect()
    }

    pub(crate) fn consume(&mut self) {
        if let Times::Limited(n) = &mut self.remaining {
            *n = n.saturating_sub(1);
        }
    }

    pub fn summary(&self) -> RuleSummary {
        RuleSummary {
            id: self.id.clone(),
            description: self.to_string(),
            remaining: self.remaining,
            consumed: self.is_consumed(),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(id) = &self.id {
            write!(f, "{}: ", id)?;
        }
        write!(f, "[")?;
        for (i, matcher) in self.matchers.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", matcher)?;
        }
        write!(f, "], consumed={}", self.is_consumed())
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("id", &self.id)
            .field("matchers", &self.matchers)
            .field("remaining", &self.remaining)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

/// Snapshot of a rule for introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSummary {
    pub id: Option<String>,
    pub description: String,
    pub remaining: Times,
    pub consumed: bool,
}

/// Fluent builder for a rule, registered on its interceptor by
/// [`respond`](RuleBuilder::respond) or [`answer`](RuleBuilder::answer).
///
/// ```
/// use mock_interceptor::{MockInterceptor, MockResponse};
///
/// let interceptor = MockInterceptor::new();
/// interceptor
///     .add_rule()
///     .get()
///     .url_starts("https://someserver/")
///     .respond(MockResponse::text("hello").header("SomeHeader", "SomeValue"))
///     .unwrap();
/// ```
#[must_use = "a rule is only registered once `respond` or `answer` is called"]
pub struct RuleBuilder<'a> {
    interceptor: &'a MockInterceptor,
    id: Option<String>,
    matchers: Vec<Matcher>,
    times: Times,
    delay: Option<Delay>,
    negate_next: bool,
    or_next: bool,
    error: Option<RuleError>,
}

impl<'a> RuleBuilder<'a> {
    pub(crate) fn new(interceptor: &'a MockInterceptor) -> Self {
        Self {
            interceptor,
            id: None,
            matchers: Vec::new(),
            times: Times::default(),
            delay: None,
            negate_next: false,
            or_next: false,
            error: None,
        }
    }

    /// Label used in logs and diagnostics.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Add a matcher, applying a pending `not()` and `or()`.
    pub fn matches(mut self, matcher: Matcher) -> Self {
        let mut matcher = matcher;
        if self.negate_next {
            self.negate_next = false;
            matcher = matcher.negate();
        }
        if self.or_next {
            self.or_next = false;
            matcher = match self.matchers.pop() {
                Some(previous) => previous.or(matcher),
                None => return self.fail(RuleError::LeadingOr),
            };
        }
        self.matchers.push(matcher);
        self
    }

    /// Add several matchers; all of them must match.
    pub fn all_of(self, matchers: impl IntoIterator<Item = Matcher>) -> Self {
        matchers.into_iter().fold(self, RuleBuilder::matches)
    }

    fn try_matches(self, matcher: Result<Matcher, RuleError>) -> Self {
        match matcher {
            Ok(matcher) => self.matches(matcher),
            Err(e) => self.fail(e),
        }
    }

    fn fail(mut self, error: RuleError) -> Self {
        self.error.get_or_insert(error);
        self
    }

    /// Negate the next matcher.
    pub fn not(mut self) -> Self {
        if self.negate_next {
            return self.fail(RuleError::DoubleNot);
        }
        self.negate_next = true;
        self
    }

    /// OR the next matcher with the previous one.
    pub fn or(mut self) -> Self {
        if self.or_next {
            return self.fail(RuleError::DoubleOr);
        }
        if self.matchers.is_empty() {
            return self.fail(RuleError::LeadingOr);
        }
        self.or_next = true;
        self
    }

    pub fn method(self, method: Method) -> Self {
        self.matches(matcher::method(method))
    }

    pub fn get(self) -> Self {
        self.method(Method::GET)
    }

    pub fn head(self) -> Self {
        self.method(Method::HEAD)
    }

    pub fn post(self) -> Self {
        self.method(Method::POST)
    }

    pub fn put(self) -> Self {
        self.method(Method::PUT)
    }

    pub fn delete(self) -> Self {
        self.method(Method::DELETE)
    }

    pub fn options(self) -> Self {
        self.method(Method::OPTIONS)
    }

    pub fn patch(self) -> Self {
        self.method(Method::PATCH)
    }

    pub fn url(self, url: impl Into<String>) -> Self {
        self.matches(matcher::url(url))
    }

    pub fn url_starts(self, prefix: impl Into<String>) -> Self {
        self.matches(matcher::url_starts(prefix))
    }

    pub fn url_ends(self, suffix: impl Into<String>) -> Self {
        self.matches(matcher::url_ends(suffix))
    }

    pub fn url_matches(self, regex: &str) -> Self {
        self.try_matches(matcher::url_matches(regex))
    }

    pub fn path(self, path: impl Into<String>) -> Self {
        self.matches(matcher::path(path))
    }

    pub fn path_starts(self, prefix: impl Into<String>) -> Self {
        self.matches(matcher::path_starts(prefix))
    }

    pub fn path_ends(self, suffix: impl Into<String>) -> Self {
        self.matches(matcher::path_ends(suffix))
    }

    pub fn path_matches(self, regex: &str) -> Self {
        self.try_matches(matcher::path_matches(regex))
    }

    pub fn path_glob(self, glob: &str) -> Self {
        self.try_matches(matcher::path_glob(glob))
    }

    pub fn has_header(self, name: impl Into<String>) -> Self {
        self.matches(matcher::has_header(name))
    }

    pub fn header(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.matches(matcher::header(name, value))
    }

    pub fn header_matches(self, name: impl Into<String>, regex: &str) -> Self {
        self.try_matches(matcher::header_matches(name, regex))
    }

    pub fn has_param(self, name: impl Into<String>) -> Self {
        self.matches(matcher::has_param(name))
    }

    pub fn param(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.matches(matcher::param(name, value))
    }

    pub fn param_matches(self, name: impl Into<String>, regex: &str) -> Self {
        self.try_matches(matcher::param_matches(name, regex))
    }

    pub fn body(self, content: impl Into<String>) -> Self {
        self.matches(matcher::body(content))
    }

    pub fn body_contains(self, needle: impl Into<String>) -> Self {
        self.matches(matcher::body_contains(needle))
    }

    pub fn body_matches(self, regex: &str) -> Self {
        self.try_matches(matcher::body_matches(regex))
    }

    pub fn json_path(self, path: &str, expected: serde_json::Value) -> Self {
        self.try_matches(matcher::json_path([(path, expected)]))
    }

    /// Number of calls this rule may serve. Defaults to one.
    pub fn times(mut self, times: u32) -> Self {
        self.times = Times::Limited(times);
        self
    }

    pub fn any_times(mut self) -> Self {
        self.times = Times::Unlimited;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(Delay::Fixed(delay));
        self
    }

    /// Random delay within `min..=max`.
    pub fn delay_between(mut self, min: Duration, max: Duration) -> Self {
        if min > max {
            return self.fail(RuleError::InvalidDelayRange {
                min_ms: min.as_millis(),
                max_ms: max.as_millis(),
            });
        }
        self.delay = Some(Delay::Between(min, max));
        self
    }

    /// Register the rule answering with a canned response.
    pub fn respond(self, response: MockResponse) -> Result<&'a MockInterceptor, RuleError> {
        let mut response = response;
        if let Some(e) = response.take_error() {
            return Err(e);
        }
        self.answer_with(Arc::new(Canned(response)))
    }

    /// Register the rule answering with a function of the request.
    pub fn answer<F>(self, answer: F) -> Result<&'a MockInterceptor, RuleError>
    where
        F: Fn(&Request) -> Result<Response, BoxError> + Send + Sync + 'static,
    {
        self.answer_with(Arc::new(answer))
    }

    /// Register the rule with a shared answer.
    pub fn answer_with(self, answer: Arc<dyn Answer>) -> Result<&'a MockInterceptor, RuleError> {
        let interceptor = self.interceptor;
        let rule = self.build(answer)?;
        interceptor.push_rule(rule);
        Ok(interceptor)
    }

    fn build(self, answer: Arc<dyn Answer>) -> Result<Rule, RuleError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        if self.negate_next {
            return Err(RuleError::DanglingNot);
        }
        if self.or_next {
            return Err(RuleError::DanglingOr);
        }
        Ok(Rule {
            id: self.id,
            matchers: self.matchers,
            remaining: self.times,
            delay: self.delay,
            answer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn request(method: Method, uri: &str) -> Request {
        http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Bytes::new())
            .unwrap()
    }

    fn only_rule(interceptor: &MockInterceptor) -> RuleSummary {
        let rules = interceptor.rules();
        assert_eq!(rules.len(), 1);
        rules.into_iter().next().unwrap()
    }

    #[test]
    fn test_defaults() {
        let interceptor = MockInterceptor::new();
        interceptor.add_rule().get().respond(MockResponse::ok()).unwrap();

        let rule = only_rule(&interceptor);
        assert_eq!(rule.remaining, Times::Limited(1));
        assert!(!rule.consumed);
        assert_eq!(rule.description, "[method(GET)], consumed=false");
    }

    #[test]
    fn test_or_and_not_compose() {
        let interceptor = MockInterceptor::new();
        interceptor
            .add_rule()
            .get()
            .or()
            .post()
            .or()
            .put()
            .not()
            .path("/private")
            .id("writes")
            .respond(MockResponse::ok())
            .unwrap();

        let rule = only_rule(&interceptor);
        assert_eq!(
            rule.description,
            r#"writes: [or(method(GET),method(POST),method(PUT)), not(path(~="/private"))], consumed=false"#
        );
    }

    #[test]
    fn test_wrong_or_syntax() {
        let interceptor = MockInterceptor::new();
        let err = interceptor.add_rule().or().get().respond(MockResponse::new(409));
        assert!(matches!(err, Err(RuleError::LeadingOr)));

        let err = interceptor
            .add_rule()
            .get()
            .or()
            .or()
            .post()
            .respond(MockResponse::new(409));
        assert!(matches!(err, Err(RuleError::DoubleOr)));

        let err = interceptor.add_rule().get().or().respond(MockResponse::new(409));
        assert!(matches!(err, Err(RuleError::DanglingOr)));

        assert!(interceptor.rules().is_empty());
    }

    #[test]
    fn test_wrong_not_syntax() {
        let interceptor = MockInterceptor::new();
        let err = interceptor.add_rule().put().not().respond(MockResponse::new(409));
        assert!(matches!(err, Err(RuleError::DanglingNot)));

        let err = interceptor
            .add_rule()
            .not()
            .not()
            .put()
            .respond(MockResponse::new(409));
        assert!(matches!(err, Err(RuleError::DoubleNot)));
    }

    #[test]
    fn test_invalid_pattern_reported_on_respond() {
        let interceptor = MockInterceptor::new();
        let err = interceptor
            .add_rule()
            .path_matches("/users/(")
            .respond(MockResponse::ok());
        assert!(matches!(err, Err(RuleError::InvalidRegex { .. })));
        assert!(interceptor.rules().is_empty());
    }

    #[test]
    fn test_invalid_response_reported_on_respond() {
        let interceptor = MockInterceptor::new();
        let err = interceptor.add_rule().respond(MockResponse::new(42));
        assert!(matches!(err, Err(RuleError::InvalidStatus(42))));
    }

    #[test]
    fn test_invalid_delay_range() {
        let interceptor = MockInterceptor::new();
        let err = interceptor
            .add_rule()
            .delay_between(Duration::from_millis(10), Duration::from_millis(1))
            .respond(MockResponse::ok());
        assert!(matches!(err, Err(RuleError::InvalidDelayRange { .. })));
    }

    #[test]
    fn test_matcher_order_is_irrelevant() {
        let req = request(Method::GET, "https://x/y?page=2");
        let matchers = [
            matcher::get(),
            matcher::path("/y"),
            matcher::param("page", "2"),
        ];

        for rotation in 0..matchers.len() {
            let mut ordered = matchers.to_vec();
            ordered.rotate_left(rotation);
            let interceptor = MockInterceptor::new();
            interceptor.rule(ordered).respond(MockResponse::ok()).unwrap();
            assert!(interceptor.with_rules(|rules| rules[0].matches(&req)));
        }

        let interceptor = MockInterceptor::new();
        interceptor
            .rule([matcher::get(), matcher::path("/z")])
            .respond(MockResponse::ok())
            .unwrap();
        interceptor.with_rules(|rules| {
            assert!(!rules[0].matches(&req));
            let reasons = rules[0].fail_reasons(&req);
            assert_eq!(reasons.len(), 1);
            assert_eq!(reasons[0].0, r#"path(~="/z")"#);
        });
    }

    #[test]
    fn test_consume() {
        let interceptor = MockInterceptor::new();
        interceptor.add_rule().times(2).respond(MockResponse::ok()).unwrap();
        interceptor.add_rule().any_times().respond(MockResponse::ok()).unwrap();
        interceptor.add_rule().times(0).respond(MockResponse::ok()).unwrap();

        interceptor.with_rules_mut(|rules| {
            rules[0].consume();
            assert!(!rules[0].is_consumed());
            rules[0].consume();
            assert!(rules[0].is_consumed());
            rules[0].consume();
            assert_eq!(rules[0].remaining(), Times::Limited(0));

            for _ in 0..100 {
                rules[1].consume();
            }
            assert_eq!(rules[1].remaining(), Times::Unlimited);

            assert!(rules[2].is_consumed());
        });
    }

    #[test]
    fn test_delay_sample() {
        let fixed = Delay::Fixed(Duration::from_millis(100));
        assert_eq!(fixed.sample(), Duration::from_millis(100));

        let range = Delay::Between(Duration::from_millis(50), Duration::from_millis(150));
        let delay = range.sample();
        assert!(delay >= Duration::from_millis(50) && delay <= Duration::from_millis(150));

        let degenerate = Delay::Between(Duration::from_millis(5), Duration::from_millis(5));
        assert_eq!(degenerate.sample(), Duration::from_millis(5));
    }

    #[test]
    fn test_answer_closure() {
        let interceptor = MockInterceptor::new();
        interceptor
            .add_rule()
            .answer(|req: &Request| Ok(MockResponse::text(req.uri().path()).into()))
            .unwrap();

        let req = request(Method::GET, "https://x/aPath/aaa");
        let response = interceptor.with_rules(|rules| rules[0].answer()).respond(&req).unwrap();
        assert_eq!(response.body().as_ref(), b"/aPath/aaa");
    }
}
