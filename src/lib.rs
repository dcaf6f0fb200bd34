//! Mock Interceptor
//!
//! An interceptor for HTTP client pipelines that answers requests from a set
//! of rules instead of the network. Meant for tests: declare what the code
//! under test is expected to call and what it gets back.
//!
//! # Features
//!
//! - **Request Matching**: method, URL, path, query params, headers, body,
//!   JSON paths, with `not()`/`or()` composition
//! - **Call Accounting**: rules serve a fixed number of calls or any number
//! - **Behaviors**: sequential, unordered, or relayed to the real transport
//! - **Latency Simulation**: fixed or random per-rule delays
//! - **Rule Files**: the same rules declared in YAML, with Handlebars
//!   templates for dynamic responses
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use mock_interceptor::{Client, MockInterceptor, MockResponse};
//!
//! let interceptor = Arc::new(MockInterceptor::new());
//! interceptor
//!     .add_rule()
//!     .get()
//!     .url("https://testserver/api/login")
//!     .respond(MockResponse::new(401))
//!     .unwrap();
//!
//! let client = Client::builder().interceptor(interceptor.clone()).build();
//! let request = http::Request::get("https://testserver/api/login")
//!     .body(Bytes::new())
//!     .unwrap();
//! let response = client.execute(request).unwrap();
//! assert_eq!(response.status(), 401);
//! assert!(interceptor.is_exhausted());
//! ```

pub mod chain;
pub mod config;
pub mod error;
pub mod interceptor;
pub mod matcher;
pub mod response;
pub mod rule;
pub mod template;

pub use chain::{BoxError, Chain, Client, Interceptor, NoNetwork, Request, Response, Transport};
pub use config::{MockConfig, Settings};
pub use error::{ConfigError, MockError, ResourceError, RuleError};
pub use interceptor::{Behavior, MockInterceptor};
pub use matcher::Matcher;
pub use response::{media_type, MockResponse, Resources};
pub use rule::{Answer, Delay, Rule, RuleBuilder, RuleSummary, Times};
