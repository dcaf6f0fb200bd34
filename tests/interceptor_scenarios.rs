//! End-to-end scenarios through a client with the interceptor installed.

use bytes::Bytes;
use mock_interceptor::{
    media_type, Behavior, BoxError, Client, MockError, MockInterceptor, MockResponse, Resources,
    RuleError,
};
use std::sync::Arc;

const TEST_URL: &str = "https://api.github.com/users/gmazzo";
const TEST_RESPONSE: &str = "good!";

fn setup(behavior: Behavior) -> (Arc<MockInterceptor>, Client) {
    let interceptor = Arc::new(MockInterceptor::with_behavior(behavior));
    let client = Client::builder().interceptor(interceptor.clone()).build();
    (interceptor, client)
}

fn request(method: &str, url: &str, body: &str) -> http::Request<Bytes> {
    http::Request::builder()
        .method(method)
        .uri(url)
        .header("Content-Type", media_type::JSON)
        .body(Bytes::from(body.to_string()))
        .unwrap()
}

fn body(response: &http::Response<Bytes>) -> &str {
    std::str::from_utf8(response.body()).unwrap()
}

fn mock_error(err: &BoxError) -> &MockError {
    err.downcast_ref::<MockError>()
        .expect("error should come from the interceptor")
}

#[test]
fn get_any_times_returns_same_body() {
    let (interceptor, client) = setup(Behavior::Unordered);
    interceptor
        .add_rule()
        .get()
        .url(TEST_URL)
        .any_times()
        .respond(MockResponse::text(TEST_RESPONSE))
        .unwrap();

    for _ in 0..10 {
        let response = client.execute(request("GET", TEST_URL, "")).unwrap();
        assert_eq!(body(&response), TEST_RESPONSE);
    }
    assert_eq!(interceptor.total_matched(), 10);
}

#[test]
fn url_prefix_mismatch_fails() {
    let (interceptor, client) = setup(Behavior::Unordered);
    interceptor
        .add_rule()
        .get()
        .url_starts("http://")
        .respond(MockResponse::new(401))
        .unwrap();

    let err = client.execute(request("GET", TEST_URL, "")).unwrap_err();
    match mock_error(&err) {
        MockError::NoMatchingRule { remaining, .. } => {
            assert!(remaining.starts_with("Remaining rules:"));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn bodies_select_rules() {
    let (interceptor, client) = setup(Behavior::Unordered);
    let request1 = r#"{ "id":1, "bio":"bio here" }"#;
    let request2 = r#"{ "id":1 }"#;

    interceptor
        .add_rule()
        .post()
        .url(TEST_URL)
        .body(request1)
        .respond(MockResponse::text(TEST_RESPONSE))
        .unwrap();
    interceptor
        .add_rule()
        .delete()
        .url(TEST_URL)
        .body(request2)
        .respond(MockResponse::text(request1).content_type(media_type::JSON))
        .unwrap();

    let response = client.execute(request("POST", TEST_URL, request1)).unwrap();
    assert_eq!(body(&response), TEST_RESPONSE);

    let response = client.execute(request("DELETE", TEST_URL, request2)).unwrap();
    assert_eq!(body(&response), request1);
    assert_eq!(response.headers()["content-type"], media_type::JSON);
    assert!(interceptor.is_exhausted());
}

#[test]
fn empty_body_rule_rejects_non_empty_body() {
    let (interceptor, client) = setup(Behavior::Unordered);
    interceptor
        .add_rule()
        .post()
        .url(TEST_URL)
        .body("")
        .respond(MockResponse::text(TEST_RESPONSE))
        .unwrap();

    let result = client.execute(request("POST", TEST_URL, r#"{ "id":1 }"#));
    assert!(result.is_err());
}

#[test]
fn no_rules_reports_nothing_left() {
    let (_interceptor, client) = setup(Behavior::Unordered);

    let err = client.execute(request("GET", TEST_URL, "")).unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("Not matched any rule: request=GET https://api.github.com"));
    assert!(message.ends_with("No remaining rules!"));
}

#[test]
fn resource_response() {
    let (interceptor, client) = setup(Behavior::Unordered);
    let resources = Resources::from_manifest_dir("tests/resources");
    interceptor
        .add_rule()
        .respond(resources.response("sample.json").unwrap())
        .unwrap();

    let response = client.execute(request("GET", TEST_URL, "")).unwrap();
    assert_eq!(response.headers()["content-type"], media_type::JSON);
    let json: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(json["login"], "gmazzo");
}

#[test]
fn sequential_or_rule() {
    let (interceptor, client) = setup(Behavior::Unordered);
    let json = r#"{"succeed":true}"#;
    interceptor
        .set_behavior(Behavior::Sequential)
        .add_rule()
        .get()
        .or()
        .post()
        .or()
        .put()
        .respond(MockResponse::text(json).content_type(media_type::JSON))
        .unwrap();

    let response = client.execute(request("GET", TEST_URL, "")).unwrap();
    assert_eq!(body(&response), json);
}

#[test]
fn sequential_fail_reason() {
    let (interceptor, client) = setup(Behavior::Sequential);
    interceptor
        .add_rule()
        .get()
        .or()
        .post()
        .or()
        .put()
        .respond(MockResponse::text("OK"))
        .unwrap();

    let err = client.execute(request("DELETE", TEST_URL, "")).unwrap_err();
    match mock_error(&err) {
        MockError::OutOfOrderRule { reasons, matched_later, .. } => {
            assert!(reasons.contains("expected=GET;actual=DELETE"));
            assert!(matched_later.is_none());
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn customized_response() {
    let (interceptor, client) = setup(Behavior::Unordered);
    interceptor
        .add_rule()
        .respond(
            MockResponse::text(TEST_RESPONSE)
                .with_body("<html/>", media_type::XML)
                .header("Test", "aValue"),
        )
        .unwrap();

    let response = client.execute(request("GET", TEST_URL, "")).unwrap();
    assert_eq!(response.headers()["content-type"], media_type::XML);
    assert_eq!(response.headers()["test"], "aValue");
    assert_eq!(body(&response), "<html/>");
}

#[test]
fn wrong_modifier_syntax() {
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

    let err = interceptor.add_rule().put().not().respond(MockResponse::new(409));
    assert!(matches!(err, Err(RuleError::DanglingNot)));

    let err = interceptor
        .add_rule()
        .not()
        .not()
        .put()
        .respond(MockResponse::new(409));
    assert!(matches!(err, Err(RuleError::DoubleNot)));

    assert!(interceptor.rules().is_empty());
}

#[test]
fn answer_computes_response_from_request() {
    let (interceptor, client) = setup(Behavior::Unordered);
    interceptor
        .add_rule()
        .get()
        .path_matches(r"/aPath/(\w+)")
        .any_times()
        .answer(|request: &http::Request<Bytes>| {
            Ok(MockResponse::text(request.uri().path()).to_response())
        })
        .unwrap();

    for path in ["/aPath/aaa", "/aPath/bbb", "/aPath/ccc"] {
        let url = format!("https://api.github.com{}", path);
        let response = client.execute(request("GET", &url, "")).unwrap();
        assert_eq!(body(&response), path);
    }

    assert!(client
        .execute(request("GET", "https://api.github.com/aPath/a/b", ""))
        .is_err());
}

#[test]
fn negated_matcher() {
    let (interceptor, client) = setup(Behavior::Unordered);
    interceptor
        .add_rule()
        .not()
        .has_header("Authorization")
        .respond(MockResponse::new(401))
        .unwrap();

    let response = client.execute(request("GET", TEST_URL, "")).unwrap();
    assert_eq!(response.status(), 401);
}

#[test]
fn relayed_requests_reach_transport() {
    let interceptor = Arc::new(MockInterceptor::with_behavior(Behavior::Relayed));
    interceptor
        .add_rule()
        .path("/mocked")
        .respond(MockResponse::text("mocked"))
        .unwrap();
    let client = Client::builder()
        .interceptor(interceptor.clone())
        .transport(Arc::new(
            |_: http::Request<Bytes>| -> Result<http::Response<Bytes>, BoxError> {
                Ok(MockResponse::text("real").to_response())
            },
        ))
        .build();

    let response = client
        .execute(request("GET", "https://host/mocked", ""))
        .unwrap();
    assert_eq!(body(&response), "mocked");

    let response = client
        .execute(request("GET", "https://host/mocked", ""))
        .unwrap();
    assert_eq!(body(&response), "real");
    assert_eq!(interceptor.total_unmatched(), 1);
}
