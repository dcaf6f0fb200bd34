//! Error types.

use thiserror::Error;

/// Failures of an intercepted call.
///
/// These are returned boxed through the chain; callers can recover them with
/// `err.downcast_ref::<MockError>()`.
#[derive(Debug, Error)]
pub enum MockError {
    /// No rule can serve the request.
    #[error("Not matched any rule: request={request}\n{remaining}")]
    NoMatchingRule {
        /// Request line, e.g. `GET https://host/path`
        request: String,
        /// Listing of the rules still in the store
        remaining: String,
    },

    /// The next rule in sequence does not match the request.
    #[error("Not matched next rule: {expected}, request={request}\nFailed to match:{reasons}{}", matched_later_suffix(.matched_later))]
    OutOfOrderRule {
        request: String,
        /// The rule that had to be served next
        expected: String,
        /// One line per failing matcher
        reasons: String,
        /// A later rule that would have matched the request
        matched_later: Option<String>,
    },
}

fn matched_later_suffix(matched_later: &Option<String>) -> String {
    match matched_later {
        Some(rule) => format!("\nEncountered a call matching a later rule: {}", rule),
        None => String::new(),
    }
}

/// Invalid rule construction, reported at configuration time.
#[derive(Debug, Clone, Error)]
pub enum RuleError {
    #[error("invalid regex {pattern:?}: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid glob {pattern:?}: {source}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("invalid JSON path {path:?}: {message}")]
    InvalidJsonPath { path: String, message: String },

    #[error("'not()' can't be followed by another 'not()'")]
    DoubleNot,

    #[error("'or()' can't be followed by another 'or()'")]
    DoubleOr,

    #[error("'or()' can't be the first matcher")]
    LeadingOr,

    #[error("missing a matcher after 'not()'")]
    DanglingNot,

    #[error("missing a matcher after 'or()'")]
    DanglingOr,

    #[error("invalid delay range: min {min_ms}ms is greater than max {max_ms}ms")]
    InvalidDelayRange { min_ms: u128, max_ms: u128 },

    #[error("invalid status code: {0}")]
    InvalidStatus(u16),

    #[error("invalid header {name:?}: {message}")]
    InvalidHeader { name: String, message: String },

    #[error("invalid method {0:?}")]
    InvalidMethod(String),

    #[error("'{kind}' can't be used to match the {field}")]
    UnsupportedMatcher { field: String, kind: String },
}

/// Failures loading a named resource.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("failed to read resource {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// A response template failed to render.
#[derive(Debug, Error)]
#[error("failed to render template: {0}")]
pub struct TemplateError(pub String);

/// Failures loading a rule file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid rule file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("rule {index}: {source}")]
    Invalid {
        index: usize,
        #[source]
        source: RuleError,
    },

    #[error("rule {index}: {message}")]
    Body { index: usize, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_order_message() {
        let err = MockError::OutOfOrderRule {
            request: "POST https://x/y".to_string(),
            expected: "[method(GET)]".to_string(),
            reasons: "\n\t1: expected=GET;actual=POST; matcher=method(GET)".to_string(),
            matched_later: Some("[method(POST)]".to_string()),
        };
        let message = err.to_string();
        assert!(message.starts_with("Not matched next rule: [method(GET)]"));
        assert!(message.contains("expected=GET;actual=POST"));
        assert!(message.ends_with("matching a later rule: [method(POST)]"));
    }

    #[test]
    fn test_rule_error_messages() {
        assert_eq!(
            RuleError::DoubleOr.to_string(),
            "'or()' can't be followed by another 'or()'"
        );
        assert_eq!(
            RuleError::InvalidDelayRange { min_ms: 5, max_ms: 1 }.to_string(),
            "invalid delay range: min 5ms is greater than max 1ms"
        );
    }
}
