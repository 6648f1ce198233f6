//! Plugin bridge, plugin content and plugin transport tests.
//!
//! Plugins are in-process fakes; everything above the RPC boundary is the
//! production code path.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use pact_mock::plugin::proto::{ContentMismatch, MockServerResult};
use pact_mock::{
    Contract, EngineConfig, InteractionBuilder, InteractionPart, InteractionRegistry,
    MockServerSession, PactError, PluginContent, RuleKind, SessionManager, SessionState,
};
use serde_json::{Map, json};
use test_utils::fixtures::{CONSUMER, PROVIDER};
use test_utils::plugin::{FAKE_BASE_PORT, FakePlugin, fake_bridge};

const PROTOBUF: &str = "application/protobuf";
const GRPC: &str = "application/grpc";

fn protobuf_plugin() -> Arc<FakePlugin> {
    Arc::new(FakePlugin::new("protobuf").with_content_type(PROTOBUF))
}

fn grpc_plugin() -> Arc<FakePlugin> {
    Arc::new(
        FakePlugin::new("grpc")
            .with_content_type(GRPC)
            .with_transport("grpc"),
    )
}

#[tokio::test]
async fn load_shares_one_plugin_between_leases() {
    let plugin = protobuf_plugin();
    let bridge = fake_bridge(vec![Arc::clone(&plugin)], &EngineConfig::default());

    let first = bridge.load("protobuf", "").await.unwrap();
    let second = bridge.load("protobuf", "0.1.0").await.unwrap();
    assert_eq!(first.version(), "0.1.0");
    assert_eq!(bridge.lease_count("protobuf").await, 2);
    assert_eq!(plugin.calls.init.load(Ordering::SeqCst), 1);
    assert!(bridge.content_matcher("application/protobuf; message=User").await.is_some());

    bridge.release(&first).await;
    bridge.release(&first).await;
    assert_eq!(bridge.lease_count("protobuf").await, 1);
    assert_eq!(plugin.calls.close.load(Ordering::SeqCst), 0);

    bridge.release(&second).await;
    assert_eq!(bridge.lease_count("protobuf").await, 0);
    assert_eq!(plugin.calls.close.load(Ordering::SeqCst), 1);
    assert!(bridge.catalogue().is_empty());
    assert!(bridge.content_matcher(PROTOBUF).await.is_none());
}

#[tokio::test]
async fn load_failures() {
    let config = EngineConfig::default().with_plugin_startup_timeout(Duration::from_millis(50));
    let bridge = fake_bridge(
        vec![
            Arc::new(FakePlugin::new("future").with_interface_version(2)),
            Arc::new(FakePlugin::new("slow").with_handshake_delay(Duration::from_millis(500))),
            protobuf_plugin(),
        ],
        &config,
    );

    assert!(matches!(
        bridge.load("missing", "").await,
        Err(PactError::PluginUnavailable { .. })
    ));
    assert!(matches!(
        bridge.load("future", "").await,
        Err(PactError::PluginVersionMismatch { expected: 1, actual: 2, .. })
    ));
    assert!(matches!(
        bridge.load("slow", "").await,
        Err(PactError::PluginUnavailable { .. })
    ));

    let loaded = bridge.load("protobuf", "").await.unwrap();
    assert!(matches!(
        bridge.load("protobuf", "9.9.9").await,
        Err(PactError::PluginUnavailable { .. })
    ));
    bridge.release(&loaded).await;
    assert_eq!(bridge.lease_count("slow").await, 0);
}

#[tokio::test]
async fn slow_handshake_leaves_loaded_plugins_usable() {
    let config = EngineConfig::default().with_plugin_startup_timeout(Duration::from_secs(5));
    let slow = Arc::new(
        FakePlugin::new("grpc")
            .with_content_type(GRPC)
            .with_handshake_delay(Duration::from_millis(500)),
    );
    let bridge = fake_bridge(vec![protobuf_plugin(), Arc::clone(&slow)], &config);
    let protobuf = bridge.load("protobuf", "").await.unwrap();

    let loading = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move {
            tokio::join!(bridge.load("grpc", ""), bridge.load("grpc", ""))
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    assert!(bridge.content_matcher(PROTOBUF).await.is_some());
    assert_eq!(bridge.lease_count("protobuf").await, 1);
    bridge.release(&protobuf).await;
    assert!(
        started.elapsed() < Duration::from_millis(250),
        "blocked for {:?}",
        started.elapsed()
    );

    let (first, second) = loading.await.unwrap();
    let (first, second) = (first.unwrap(), second.unwrap());
    assert_eq!(slow.calls.init.load(Ordering::SeqCst), 1);
    assert_eq!(bridge.lease_count("grpc").await, 2);
    bridge.release(&first).await;
    bridge.release(&second).await;
    assert_eq!(slow.calls.close.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn generated_content_and_plugin_errors() {
    let bridge = fake_bridge(vec![protobuf_plugin()], &EngineConfig::default());
    let plugin = bridge.load("protobuf", "").await.unwrap();

    let bytes = bridge
        .generate_content(&plugin, PROTOBUF, &json!({"name": "Mary"}))
        .await
        .unwrap();
    assert_eq!(bytes, br#"{"name":"Mary"}"#);

    let rejected = bridge
        .generate_content(&plugin, PROTOBUF, &json!({"error": "unknown message type"}))
        .await;
    assert!(matches!(
        rejected,
        Err(PactError::PluginContentError { ref reason, .. }) if reason == "unknown message type"
    ));
    assert!(matches!(
        bridge.generate_content(&plugin, PROTOBUF, &json!("not an object")).await,
        Err(PactError::PluginContentError { .. })
    ));
    bridge.release(&plugin).await;
}

#[tokio::test]
async fn slow_plugin_call_times_out() {
    let config = EngineConfig::default().with_plugin_rpc_timeout(Duration::from_millis(50));
    let slow = Arc::new(
        FakePlugin::new("protobuf")
            .with_content_type(PROTOBUF)
            .with_rpc_delay(Duration::from_millis(500)),
    );
    let bridge = fake_bridge(vec![slow], &config);
    let plugin = bridge.load("protobuf", "").await.unwrap();

    let result = bridge.generate_content(&plugin, PROTOBUF, &json!({"name": "Mary"})).await;
    assert!(matches!(result, Err(PactError::PluginTimeout { .. })), "{result:?}");
    bridge.release(&plugin).await;
}

#[tokio::test]
async fn http_session_compares_bodies_through_plugin() {
    test_utils::init_test_tracing();
    let fake = protobuf_plugin();
    let config = EngineConfig::default();
    let bridge = fake_bridge(vec![Arc::clone(&fake)], &config);
    let plugin = bridge.load("protobuf", "").await.unwrap();
    let bytes = bridge
        .generate_content(&plugin, PROTOBUF, &json!({"name": "Mary"}))
        .await
        .unwrap();

    let mut registry = InteractionRegistry::new(CONSUMER, PROVIDER);
    let reference = registry
        .add(
            InteractionBuilder::http("create a user")
                .with_request("POST", "/users")
                .with_status(201),
        )
        .unwrap();
    registry
        .attach_plugin_content(reference, InteractionPart::Request, PROTOBUF, bytes.clone())
        .unwrap();

    let session = MockServerSession::new(registry, Arc::clone(&bridge), config);
    session.adopt_plugin(plugin).await.unwrap();
    let port = session.start("127.0.0.1:0", false).await.unwrap();
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{port}/users");

    let response = client
        .post(&url)
        .header("content-type", PROTOBUF)
        .body(bytes)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    assert!(session.mismatches().await.is_empty());

    client
        .post(&url)
        .header("content-type", PROTOBUF)
        .body(r#"{"name":"Bob"}"#)
        .send()
        .await
        .unwrap();
    let mismatches = session.mismatches().await;
    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].selector, "$.body");
    assert_eq!(mismatches[0].rule_kind, Some(RuleKind::Plugin));
    assert_eq!(fake.calls.compare.load(Ordering::SeqCst), 2);

    session.cleanup().await.unwrap();
    assert_eq!(bridge.lease_count("protobuf").await, 0);
}

#[tokio::test]
async fn plugin_interaction_served_over_http() {
    let fake = grpc_plugin();
    let config = EngineConfig::default();
    let bridge = fake_bridge(vec![fake], &config);
    let request = b"\x0a\x02\x34\x32".to_vec();
    let reply = b"\x0a\x04Mary".to_vec();

    let mut registry = InteractionRegistry::new(CONSUMER, PROVIDER);
    registry
        .add(
            InteractionBuilder::plugin("get a user", GRPC)
                .with_service("UserService/GetUser")
                .with_plugin_content(
                    InteractionPart::Request,
                    PluginContent::new(GRPC, request.clone()),
                )
                .with_plugin_content(
                    InteractionPart::Response,
                    PluginContent::new(GRPC, reply.clone()),
                ),
        )
        .unwrap();

    let session = MockServerSession::new(registry, bridge, config);
    session.using_plugin("grpc", "").await.unwrap();
    let port = session.start("127.0.0.1:0", false).await.unwrap();

    let response = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{port}/UserService/GetUser"))
        .header("content-type", GRPC)
        .body(request)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], GRPC);
    assert_eq!(response.bytes().await.unwrap().to_vec(), reply);

    let dir = tempfile::tempdir().unwrap();
    let result = session.verify(dir.path()).await;
    assert!(result.is_success(), "{result:?}");
    let written = std::fs::read_to_string(result.pact_file.unwrap()).unwrap();
    let contract = Contract::from_json(&written).unwrap();
    assert_eq!(contract.metadata.plugins.len(), 1);
    assert_eq!(contract.metadata.plugins[0].name, "grpc");
    session.cleanup().await.unwrap();
}

fn plugin_registry() -> InteractionRegistry {
    let mut registry = InteractionRegistry::new(CONSUMER, PROVIDER);
    registry
        .add(
            InteractionBuilder::plugin("get a user", GRPC)
                .with_service("UserService/GetUser")
                .with_plugin_content(
                    InteractionPart::Request,
                    PluginContent::new(GRPC, vec![1, 2]),
                ),
        )
        .unwrap();
    registry
}

#[tokio::test]
async fn plugin_transport_serves_and_reports_results() {
    let fake = grpc_plugin();
    let config = EngineConfig::default();
    let bridge = fake_bridge(vec![Arc::clone(&fake)], &config);

    let session = MockServerSession::new(plugin_registry(), Arc::clone(&bridge), config);
    session.using_plugin("grpc", "").await.unwrap();
    let port = session
        .start_transport("grpc", "127.0.0.1", 0, &Map::new())
        .await
        .unwrap();
    assert_eq!(port, FAKE_BASE_PORT);
    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(bridge.lease_count("grpc").await, 2);
    assert!(fake.last_pact().is_some_and(|pact| pact.contains("UserService/GetUser")));
    assert!(session.mismatches().await.is_empty());

    fake.set_results(vec![MockServerResult {
        path: "UserService/GetUser".to_string(),
        error: String::new(),
        mismatches: vec![ContentMismatch {
            expected: Some(b"Mary".to_vec()),
            actual: Some(b"Bob".to_vec()),
            mismatch: "name differs".to_string(),
            path: "$.name".to_string(),
        }],
    }]);
    let mismatches = session.mismatches().await;
    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].interaction_description, "UserService/GetUser");
    assert_eq!(mismatches[0].selector, "$.name");
    assert_eq!(mismatches[0].actual, json!("Bob"));

    session.cleanup().await.unwrap();
    assert_eq!(fake.calls.shutdown.load(Ordering::SeqCst), 1);
    assert_eq!(bridge.lease_count("grpc").await, 0);
    assert_eq!(session.mismatches().await.len(), 1);
}

#[tokio::test]
async fn plugin_transport_failures_leave_session_startable() {
    let failing = Arc::new(
        FakePlugin::new("grpc")
            .with_content_type(GRPC)
            .with_transport("grpc")
            .with_start_error("port busy"),
    );
    let config = EngineConfig::default();
    let bridge = fake_bridge(vec![failing], &config);
    let session = MockServerSession::new(plugin_registry(), Arc::clone(&bridge), config);

    assert!(matches!(
        session.start_transport("grpc", "127.0.0.1", 0, &Map::new()).await,
        Err(PactError::UnknownTransport { .. })
    ));

    session.using_plugin("grpc", "").await.unwrap();
    assert!(matches!(
        session.start_transport("grpc", "127.0.0.1", 0, &Map::new()).await,
        Err(PactError::PluginUnavailable { .. })
    ));
    assert_eq!(bridge.lease_count("grpc").await, 1);
    assert_eq!(session.state(), SessionState::Created);

    let port = session
        .start_transport("HTTP", "127.0.0.1", 0, &Map::new())
        .await
        .unwrap();
    assert!(port > 0);
    session.cleanup().await.unwrap();
    assert_eq!(bridge.lease_count("grpc").await, 0);
}

#[tokio::test]
async fn manager_starts_plugin_transport() {
    let fake = grpc_plugin();
    let config = EngineConfig::default();
    let bridge = fake_bridge(vec![fake], &config);
    let manager = SessionManager::with_bridge(Arc::clone(&bridge), config);
    let plugin = bridge.load("grpc", "").await.unwrap();

    let port = manager
        .start_transport(plugin_registry(), "grpc", "127.0.0.1", 0, &Map::new())
        .await
        .unwrap();
    assert_eq!(manager.ports(), vec![port]);
    assert!(manager.mismatches(port).await.unwrap().is_empty());

    manager.cleanup(port).await.unwrap();
    assert_eq!(bridge.lease_count("grpc").await, 1);
    bridge.release(&plugin).await;
    assert_eq!(bridge.lease_count("grpc").await, 0);
}
