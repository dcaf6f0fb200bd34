//! Loading rule files and serving requests from them.

use bytes::Bytes;
use mock_interceptor::{Behavior, Client, ConfigError, MockConfig, MockInterceptor, NoNetwork};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

fn get(url: &str) -> http::Request<Bytes> {
    http::Request::get(url).body(Bytes::new()).unwrap()
}

#[test]
fn default_rules_are_valid() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/default-rules.yaml");
    let config = MockConfig::from_file(&path).unwrap();
    assert_eq!(config.behavior, Behavior::Unordered);
    assert_eq!(config.rules.len(), 4);
}

#[test]
fn default_rules_serve_requests() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/default-rules.yaml");
    let config = MockConfig::from_file(&path).unwrap();
    let interceptor = Arc::new(MockInterceptor::from_config(&config).unwrap());
    let client = Client::builder()
        .interceptor(interceptor.clone())
        .transport(Arc::new(NoNetwork))
        .build();

    let response = client.execute(get("https://x/hello")).unwrap();
    assert_eq!(response.body().as_ref(), b"Hello, World!");

    let login = http::Request::post("https://testserver/api/login")
        .header("Content-Type", "application/json")
        .body(Bytes::from_static(br#"{"user":"admin"}"#))
        .unwrap();
    let response = client.execute(login).unwrap();
    assert_eq!(response.headers()["set-cookie"], "session=abc");

    let response = client.execute(get("https://x/users/42")).unwrap();
    let json: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(json["id"], "42");

    assert!(client.execute(get("https://x/users/42?debug=1")).is_err());
    assert!(client.execute(get("https://x/static/css/site.css")).is_ok());
}

#[test]
fn sequential_rule_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
behavior: sequential
settings:
  log_matches: false
rules:
  - id: first
    request:
      method: [GET]
  - id: second
    request:
      method: [POST]
    response:
      status: 201
"#
    )
    .unwrap();

    let config = MockConfig::from_file(file.path()).unwrap();
    let interceptor = Arc::new(config.build_interceptor().unwrap());
    assert!(!interceptor.settings().log_matches);
    let client = Client::builder().interceptor(interceptor.clone()).build();

    let post = || http::Request::post("https://x/").body(Bytes::new()).unwrap();
    let err = client.execute(post()).unwrap_err();
    assert!(err.to_string().contains("Encountered a call matching a later rule"));

    assert_eq!(client.execute(get("https://x/")).unwrap().status(), 200);
    assert_eq!(client.execute(post()).unwrap().status(), 201);
    assert!(interceptor.is_exhausted());
}

#[test]
fn unknown_fields_are_rejected() {
    let yaml = r#"
rules:
  - request:
      verb: GET
"#;
    assert!(matches!(MockConfig::from_yaml(yaml), Err(ConfigError::Parse(_))));
}

#[test]
fn register_appends_to_existing_interceptor() {
    let interceptor = MockInterceptor::with_behavior(Behavior::Relayed);
    interceptor
        .add_rule()
        .get()
        .respond(mock_interceptor::MockResponse::ok())
        .unwrap();

    let config = MockConfig::from_yaml("rules:\n  - id: extra\n").unwrap();
    config.register(&interceptor).unwrap();

    let rules = interceptor.rules();
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[1].id.as_deref(), Some("extra"));
    assert_eq!(interceptor.behavior(), Behavior::Relayed);
}
