//! The mock interceptor.
//!
//! Holds the rule store and selects, for every intercepted call, the rule
//! that serves it according to the current [`Behavior`].

use crate::chain::{BoxError, Chain, Interceptor, Request, Response};
use crate::config::Settings;
use crate::error::MockError;
use crate::matcher::Matcher;
use crate::rule::{Answer, Delay, Rule, RuleBuilder, RuleSummary, Times};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How the interceptor chooses among its rules.
///
/// The behavior is read when a call arrives, so switching it affects every
/// rule not yet consumed, whenever that rule was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Behavior {
    /// Calls must arrive in the order the rules were declared; the first
    /// unconsumed rule has to match.
    Sequential,
    /// Any unconsumed rule may serve a call; the first declared match wins.
    #[default]
    Unordered,
    /// Like `Unordered`, but unmatched calls go on down the chain instead of
    /// failing.
    Relayed,
}

struct State {
    behavior: Behavior,
    rules: Vec<Rule>,
}

enum Selection {
    Matched {
        rule: String,
        delay: Option<Delay>,
        answer: Arc<dyn Answer>,
    },
    Relay,
    Failed(MockError),
}

/// Interceptor answering calls from pre-declared rules.
///
/// Rule selection and the invocation count decrement happen under a single
/// lock. The delay and the answer run after the lock is released, on the
/// calling thread, so a slow rule never holds up other callers. Matchers are
/// evaluated under the lock and must not call back into the interceptor.
pub struct MockInterceptor {
    state: Mutex<State>,
    settings: Settings,
    /// Total calls intercepted.
    requests_total: AtomicU64,
    /// Calls served by a rule.
    requests_matched: AtomicU64,
    /// Calls no rule could serve.
    requests_unmatched: AtomicU64,
}

impl MockInterceptor {
    /// Create an interceptor with the [`Behavior::Unordered`] behavior.
    pub fn new() -> Self {
        Self::with_behavior(Behavior::default())
    }

    pub fn with_behavior(behavior: Behavior) -> Self {
        Self {
            state: Mutex::new(State {
                behavior,
                rules: Vec::new(),
            }),
            settings: Settings::default(),
            requests_total: AtomicU64::new(0),
            requests_matched: AtomicU64::new(0),
            requests_unmatched: AtomicU64::new(0),
        }
    }

    /// Replace the logging settings.
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn behavior(&self) -> Behavior {
        self.state.lock().behavior
    }

    pub fn set_behavior(&self, behavior: Behavior) -> &Self {
        self.state.lock().behavior = behavior;
        self
    }

    /// Start declaring a new rule.
    pub fn add_rule(&self) -> RuleBuilder<'_> {
        RuleBuilder::new(self)
    }

    /// Start declaring a rule that requires all of `matchers`.
    pub fn rule(&self, matchers: impl IntoIterator<Item = Matcher>) -> RuleBuilder<'_> {
        self.add_rule().all_of(matchers)
    }

    pub(crate) fn push_rule(&self, rule: Rule) {
        debug!(rule = %rule, "Rule registered");
        self.state.lock().rules.push(rule);
    }

    /// Snapshot of every rule, consumed ones included.
    pub fn rules(&self) -> Vec<RuleSummary> {
        self.state.lock().rules.iter().map(Rule::summary).collect()
    }

    /// Run `f` with the rule store locked. `f` must not call back into the
    /// interceptor: the lock is not reentrant.
    pub(crate) fn with_rules<R>(&self, f: impl FnOnce(&[Rule]) -> R) -> R {
        f(&self.state.lock().rules)
    }

    #[cfg(test)]
    pub(crate) fn with_rules_mut<R>(&self, f: impl FnOnce(&mut [Rule]) -> R) -> R {
        f(&mut self.state.lock().rules)
    }

    /// True when every limited rule has been used up.
    pub fn is_exhausted(&self) -> bool {
        self.state
            .lock()
            .rules
            .iter()
            .all(|r| r.is_consumed() || r.remaining() == Times::Unlimited)
    }

    /// Drop every rule.
    pub fn reset(&self) -> &Self {
        self.state.lock().rules.clear();
        self
    }

    pub fn total_requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn total_matched(&self) -> u64 {
        self.requests_matched.load(Ordering::Relaxed)
    }

    pub fn total_unmatched(&self) -> u64 {
        self.requests_unmatched.load(Ordering::Relaxed)
    }

    fn select(&self, request: &Request) -> Selection {
        let mut state = self.state.lock();
        let behavior = state.behavior;

        let selected = match behavior {
            Behavior::Sequential => {
                let Some(index) = state.rules.iter().position(|r| !r.is_consumed()) else {
                    return Selection::Failed(no_matching_rule(request, &state.rules));
                };
                let next = &state.rules[index];
                if !next.matches(request) {
                    let matched_later = state.rules[index + 1..]
                        .iter()
                        .find(|r| !r.is_consumed() && r.matches(request))
                        .map(|r| r.to_string());
                    let reasons = next
                        .fail_reasons(request)
                        .into_iter()
                        .enumerate()
                        .map(|(i, (matcher, reason))| {
                            format!("\n\t{}: {}; matcher={}", i + 1, reason, matcher)
                        })
                        .collect();
                    return Selection::Failed(MockError::OutOfOrderRule {
                        request: request_line(request),
                        expected: next.to_string(),
                        reasons,
                        matched_later,
                    });
                }
                Some(index)
            }
            Behavior::Unordered | Behavior::Relayed => state
                .rules
                .iter()
                .position(|r| !r.is_consumed() && r.matches(request)),
        };

        match selected {
            Some(index) => {
                let rule = &mut state.rules[index];
                rule.consume();
                Selection::Matched {
                    rule: rule.to_string(),
                    delay: rule.delay(),
                    answer: rule.answer(),
                }
            }
            None if behavior == Behavior::Relayed => Selection::Relay,
            None => Selection::Failed(no_matching_rule(request, &state.rules)),
        }
    }
}

impl Default for MockInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Interceptor for MockInterceptor {
    fn intercept(&self, chain: &mut dyn Chain) -> Result<Response, BoxError> {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        match self.select(chain.request()) {
            Selection::Matched {
                rule,
                delay,
                answer,
            } => {
                self.requests_matched.fetch_add(1, Ordering::Relaxed);
                let request = chain.request();
                if self.settings.log_matches {
                    info!(
                        rule = %rule,
                        method = %request.method(),
                        uri = %request.uri(),
                        "Request matched rule"
                    );
                }

                if let Some(delay) = delay {
                    let delay = delay.sample();
                    if !delay.is_zero() {
                        debug!(delay_ms = delay.as_millis() as u64, "Applying delay");
                        std::thread::sleep(delay);
                    }
                }

                answer.respond(request)
            }
            Selection::Relay => {
                self.requests_unmatched.fetch_add(1, Ordering::Relaxed);
                let request = chain.request().clone();
                if self.settings.log_unmatched {
                    info!(
                        method = %request.method(),
                        uri = %request.uri(),
                        "No matching rule, relaying request"
                    );
                }
                chain.proceed(request)
            }
            Selection::Failed(err) => {
                self.requests_unmatched.fetch_add(1, Ordering::Relaxed);
                if self.settings.log_unmatched {
                    warn!(error = %err, "Request rejected");
                }
                Err(Box::new(err))
            }
        }
    }
}

fn request_line(request: &Request) -> String {
    format!("{} {}", request.method(), request.uri())
}

/// Consumed rules are left out of the listing.
fn no_matching_rule(request: &Request, rules: &[Rule]) -> MockError {
    let pending: Vec<&Rule> = rules.iter().filter(|r| !r.is_consumed()).collect();
    let remaining = if pending.is_empty() {
        "No remaining rules!".to_string()
    } else {
        let mut listing = String::from("Remaining rules:");
        for (i, rule) in pending.iter().enumerate() {
            listing.push_str(&format!("\n\t{}: {}", i + 1, rule));
        }
        listing
    };
    MockError::NoMatchingRule {
        request: request_line(request),
        remaining,
    }
}
