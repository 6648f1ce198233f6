//! Mock server session tests over real HTTP.
//!
//! Each test binds a session to an ephemeral port on 127.0.0.1 and drives
//! it with a plain HTTP client.

use std::sync::Arc;
use std::time::{Duration, Instant};

use pact_mock::{
    CandidatePolicy, Contract, EngineConfig, InteractionBuilder, InteractionPart,
    InteractionRegistry, MockServerSession, PactError, SessionManager, SessionState,
};
use serde_json::{Value, json};
use test_utils::fixtures::{
    COMPLEX_PACT, CONSUMER, ENCODED_PACT, PROVIDER, SIMPLE_PACT, get_foobar_registry,
    provider_state_registry, typed_body_registry,
};
use test_utils::plugin::empty_bridge;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

const LOCALHOST: &str = "127.0.0.1:0";

async fn start(registry: InteractionRegistry) -> (Arc<MockServerSession>, String) {
    start_with(registry, EngineConfig::default()).await
}

async fn start_with(
    registry: InteractionRegistry,
    config: EngineConfig,
) -> (Arc<MockServerSession>, String) {
    test_utils::init_test_tracing();
    let session = Arc::new(MockServerSession::new(registry, empty_bridge(), config));
    let port = session.start(LOCALHOST, false).await.unwrap();
    (session, format!("http://127.0.0.1:{port}"))
}

#[tokio::test]
async fn exercised_interaction_leaves_no_mismatches() {
    let (session, url) = start(get_foobar_registry()).await;

    let response = reqwest::get(format!("{url}/foobar")).await.unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"foo": "bar"}));

    assert!(session.mismatches().await.is_empty());
    let log = session.actual_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].matched.as_deref(), Some("get foobar"));
    session.cleanup().await.unwrap();
}

#[tokio::test]
async fn unexercised_interaction_is_reported() {
    let (session, _url) = start(get_foobar_registry()).await;

    let mismatches = session.mismatches().await;
    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].interaction_description, "get foobar");
    session.cleanup().await.unwrap();
}

#[tokio::test]
async fn unexpected_request_gets_500_and_is_recorded() {
    let (session, url) = start(get_foobar_registry()).await;

    let response = reqwest::get(format!("{url}/nope")).await.unwrap();
    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["path"], "/nope");

    let mismatches = session.mismatches().await;
    assert!(mismatches.iter().any(|m| m.actual == json!("GET /nope")));
    assert!(mismatches.iter().any(|m| m.interaction_description == "get foobar"));
    assert_eq!(session.actual_log()[0].matched, None);
    session.cleanup().await.unwrap();
}

#[tokio::test]
async fn lifecycle_rejects_restart_and_double_cleanup() {
    let (session, _url) = start(get_foobar_registry()).await;
    assert_eq!(session.state(), SessionState::Active);
    assert!(session.port().is_some_and(|port| port > 0));

    assert!(matches!(
        session.start(LOCALHOST, false).await,
        Err(PactError::SessionAlreadyStarted)
    ));

    session.cleanup().await.unwrap();
    assert_eq!(session.state(), SessionState::Stopped);
    assert!(matches!(session.cleanup().await, Err(PactError::SessionAlreadyStopped)));
    assert!(matches!(
        session.start(LOCALHOST, false).await,
        Err(PactError::SessionAlreadyStopped)
    ));
}

#[tokio::test]
async fn concurrent_starts_bind_once() {
    test_utils::init_test_tracing();
    let config = EngineConfig::default();
    let session = MockServerSession::new(get_foobar_registry(), empty_bridge(), config);

    let (first, second) =
        tokio::join!(session.start(LOCALHOST, false), session.start(LOCALHOST, false));
    let results = [first, second];

    let ports: Vec<u16> = results.iter().filter_map(|r| r.as_ref().ok().copied()).collect();
    assert_eq!(ports.len(), 1, "{results:?}");
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(PactError::SessionAlreadyStarted)))
        .count();
    assert_eq!(rejected, 1, "{results:?}");
    assert_eq!(session.port(), Some(ports[0]));
    assert_eq!(session.state(), SessionState::Active);
    session.cleanup().await.unwrap();
}

/// Send the head of a `POST /users` whose body is `{"name":"Bob","age":30}`
/// and only the first `sent` bytes of that body.
async fn partial_post(port: u16, sent: usize) -> (TcpStream, &'static [u8]) {
    let body: &'static [u8] = br#"{"name":"Bob","age":30}"#;
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let head = format!(
        "POST /users HTTP/1.1\r\nhost: 127.0.0.1\r\n\
         content-type: application/json\r\ncontent-length: {}\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await.unwrap();
    stream.write_all(&body[..sent]).await.unwrap();
    (stream, &body[sent..])
}

#[tokio::test]
async fn cleanup_drains_requests_finishing_within_grace() {
    let grace = Duration::from_secs(5);
    let config = EngineConfig::default().with_shutdown_grace(grace);
    let (session, _url) = start_with(typed_body_registry(), config).await;
    let port = session.port().unwrap();

    let (mut stream, rest) = partial_post(port, 14).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let finisher = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        stream.write_all(rest).await.unwrap();
        stream
    });

    let started = Instant::now();
    session.cleanup().await.unwrap();
    assert!(started.elapsed() < grace, "cleanup waited the whole grace period");
    drop(finisher.await.unwrap());

    let log = session.actual_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].matched.as_deref(), Some("create a user"));
}

#[tokio::test]
async fn cleanup_aborts_requests_running_past_grace() {
    let grace = Duration::from_millis(200);
    let config = EngineConfig::default().with_shutdown_grace(grace);
    let (session, _url) = start_with(typed_body_registry(), config).await;
    let port = session.port().unwrap();

    let (mut stream, rest) = partial_post(port, 14).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    session.cleanup().await.unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= grace, "cleanup returned after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "cleanup hung for {elapsed:?}");
    assert_eq!(session.state(), SessionState::Stopped);

    // Completing the body afterwards must not revive the request.
    let _ = stream.write_all(rest).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(session.actual_log().is_empty());
}

#[tokio::test]
async fn stopped_session_refuses_connections() {
    let (session, url) = start(get_foobar_registry()).await;
    session.cleanup().await.unwrap();

    assert!(reqwest::get(format!("{url}/foobar")).await.is_err());
}

#[tokio::test]
async fn verify_writes_pact_file() {
    let (session, url) = start(get_foobar_registry()).await;
    reqwest::get(format!("{url}/foobar")).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let result = session.verify(dir.path()).await;
    assert!(result.is_success(), "{result:?}");

    let path = result.pact_file.unwrap();
    assert_eq!(path, dir.path().join(format!("{CONSUMER}-{PROVIDER}.json")));
    let contract = Contract::from_json(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(contract.consumer.name, CONSUMER);
    assert_eq!(contract.interactions.len(), 1);
    assert_eq!(contract.interactions[0].description(), "get foobar");
    assert_eq!(contract.metadata.pact_specification.version, "4.0");
    session.cleanup().await.unwrap();
}

#[tokio::test]
async fn failed_verification_writes_nothing() {
    let (session, _url) = start(get_foobar_registry()).await;

    let dir = tempfile::tempdir().unwrap();
    let result = session.verify(dir.path()).await;
    assert!(!result.is_success());
    assert_eq!(result.mismatches.len(), 1);
    assert!(result.pact_file.is_none());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

    assert!(matches!(
        session.write_pact_file(dir.path()).await,
        Err(PactError::UnverifiedInteractions { count: 1 })
    ));
    session.cleanup().await.unwrap();
}

#[tokio::test]
async fn provider_state_header_selects_interaction() {
    let (session, url) = start(provider_state_registry()).await;
    let client = reqwest::Client::new();

    let gone = client
        .get(format!("{url}/thing"))
        .header("x-pact-provider-state", "thing is gone")
        .send()
        .await
        .unwrap();
    assert_eq!(gone.status(), 404);

    let default = client.get(format!("{url}/thing")).send().await.unwrap();
    assert_eq!(default.status(), 200);

    assert!(session.mismatches().await.is_empty());
    session.cleanup().await.unwrap();
}

#[tokio::test]
async fn insertion_order_policy_ignores_provider_state_header() {
    let config = EngineConfig::default().with_candidate_policy(CandidatePolicy::InsertionOrder);
    let (session, url) = start_with(provider_state_registry(), config).await;

    let response = reqwest::Client::new()
        .get(format!("{url}/thing"))
        .header("x-pact-provider-state", "thing is gone")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let mismatches = session.mismatches().await;
    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].interaction_description, "get thing when thing is gone");
    session.cleanup().await.unwrap();
}

#[tokio::test]
async fn type_rule_accepts_other_values_but_not_other_fields() {
    let (session, url) = start(typed_body_registry()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{url}/users"))
        .json(&json!({"name": "Bob", "age": 30}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    assert!(session.mismatches().await.is_empty());

    client
        .post(format!("{url}/users"))
        .json(&json!({"name": "Bob", "age": 31}))
        .send()
        .await
        .unwrap();
    let mismatches = session.mismatches().await;
    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].selector, "$.body.age");
    assert_eq!(mismatches[0].expected, json!(30));
    assert_eq!(mismatches[0].actual, json!(31));
    session.cleanup().await.unwrap();
}

#[tokio::test]
async fn response_headers_and_plugin_bytes_are_served_verbatim() {
    let mut registry = InteractionRegistry::new(CONSUMER, PROVIDER);
    let reference = registry
        .add(
            InteractionBuilder::http("get a user as protobuf")
                .with_request("GET", "/users/42")
                .with_status(200)
                .with_response_header("X-Request-Id", "abc"),
        )
        .unwrap();
    let bytes = vec![0x0a, 0x04, b'M', b'a', b'r', b'y', 0x10, 0x2a];
    registry
        .attach_plugin_content(
            reference,
            InteractionPart::Response,
            "application/protobuf",
            bytes.clone(),
        )
        .unwrap();
    let (session, url) = start(registry).await;

    let response = reqwest::get(format!("{url}/users/42")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "application/protobuf");
    assert_eq!(response.headers()["x-request-id"], "abc");
    assert_eq!(response.bytes().await.unwrap().to_vec(), bytes);

    assert!(session.mismatches().await.is_empty());
    session.cleanup().await.unwrap();
}

#[tokio::test]
async fn legacy_document_with_query_string_matches() {
    let manager = SessionManager::with_bridge(empty_bridge(), EngineConfig::default());
    let port = manager.create_session(SIMPLE_PACT, LOCALHOST, false).await.unwrap();

    let response = reqwest::Client::new()
        .get(format!("http://127.0.0.1:{port}/foobar?page=1&size=10"))
        .header("Accept", "application/json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"id": 1, "name": "foobar"}));

    assert!(manager.mismatches(port).await.unwrap().is_empty());
    let log = manager.actual_log(port).unwrap();
    assert_eq!(log[0].query["page"], vec!["1".to_string()]);
    manager.cleanup(port).await.unwrap();
}

#[tokio::test]
async fn percent_encoded_query_and_path_match_declared_values() {
    let manager = SessionManager::with_bridge(empty_bridge(), EngineConfig::default());
    let port = manager.create_session(ENCODED_PACT, LOCALHOST, false).await.unwrap();
    let url = format!("http://127.0.0.1:{port}");

    let search = reqwest::get(format!("{url}/search?q=a%20b&tag=x+y")).await.unwrap();
    assert_eq!(search.status(), 200);
    let user = reqwest::get(format!("{url}/users/john%20doe")).await.unwrap();
    assert_eq!(user.status(), 200);
    assert_eq!(user.json::<Value>().await.unwrap(), json!({"name": "John Doe"}));

    assert!(manager.mismatches(port).await.unwrap().is_empty());
    let log = manager.actual_log(port).unwrap();
    assert_eq!(log[0].query["q"], vec!["a b".to_string()]);
    assert_eq!(log[0].query["tag"], vec!["x y".to_string()]);
    assert_eq!(log[1].path, "/users/john doe");
    manager.cleanup(port).await.unwrap();
}

#[tokio::test]
async fn regex_rule_from_categorised_document() {
    let manager = SessionManager::with_bridge(empty_bridge(), EngineConfig::default());
    let port = manager.create_session(COMPLEX_PACT, LOCALHOST, false).await.unwrap();
    let client = reqwest::Client::new();

    client
        .post(format!("http://127.0.0.1:{port}/users"))
        .json(&json!({"name": "Ann", "email": "not-an-email"}))
        .send()
        .await
        .unwrap();
    client
        .get(format!("http://127.0.0.1:{port}/users"))
        .send()
        .await
        .unwrap();

    let mismatches = manager.mismatches(port).await.unwrap();
    assert_eq!(mismatches.len(), 1, "{mismatches:?}");
    assert_eq!(mismatches[0].selector, "$.body.email");

    let dir = tempfile::tempdir().unwrap();
    let result = manager.verify(port, dir.path()).await.unwrap();
    assert!(!result.is_success());
    manager.cleanup_all().await;
    assert!(manager.ports().is_empty());
}
