//! Pact documents and registries shared by test suites.

#![allow(clippy::expect_used)]

use serde_json::json;

use pact_mock::{InteractionBuilder, InteractionPart, InteractionRegistry, MatchingRule};

/// Consumer name used by the fixtures.
pub const CONSUMER: &str = "test-consumer";

/// Provider name used by the fixtures.
pub const PROVIDER: &str = "test-provider";

/// One interaction, older layout: string provider state, query string,
/// flat matching rules.
pub const SIMPLE_PACT: &str = r#"{
    "consumer": {"name": "test-consumer"},
    "provider": {"name": "test-provider"},
    "interactions": [{
        "description": "a request for foobar",
        "provider_state": "foobar exists",
        "request": {
            "method": "GET",
            "path": "/foobar",
            "query": "page=1&size=10",
            "headers": {"Accept": "application/json"}
        },
        "response": {
            "status": 200,
            "headers": {"Content-Type": "application/json"},
            "body": {"id": 1, "name": "foobar"},
            "matchingRules": {
                "$.body.name": {"match": "type"}
            }
        }
    }],
    "metadata": {"pactSpecification": {"version": "2.0.0"}}
}"#;

/// Two HTTP interactions with categorised matching rules and provider
/// state parameters.
pub const COMPLEX_PACT: &str = r#"{
    "consumer": {"name": "test-consumer"},
    "provider": {"name": "test-provider"},
    "interactions": [
        {
            "description": "create a user",
            "providerStates": [{"name": "no users", "params": {"tenant": "acme"}}],
            "request": {
                "method": "POST",
                "path": "/users",
                "headers": {"Content-Type": "application/json"},
                "body": {"name": "Mary", "email": "mary@example.com"},
                "matchingRules": {
                    "body": {
                        "$.name": {"matchers": [{"match": "type"}]},
                        "$.email": {"matchers": [{"match": "regex", "regex": "^[^@]+@[^@]+$"}]}
                    }
                }
            },
            "response": {
                "status": 201,
                "headers": {"Content-Type": "application/json"},
                "body": {"id": 42}
            }
        },
        {
            "description": "list users",
            "providerStates": [{"name": "users exist"}],
            "request": {"method": "GET", "path": "/users"},
            "response": {"status": 200, "body": [{"id": 42, "name": "Mary"}]}
        }
    ],
    "metadata": {"pactSpecification": {"version": "3.0.0"}}
}"#;

/// Interactions whose declared query and path need percent-encoding on
/// the wire.
pub const ENCODED_PACT: &str = r#"{
    "consumer": {"name": "test-consumer"},
    "provider": {"name": "test-provider"},
    "interactions": [
        {
            "description": "search for a phrase",
            "request": {"method": "GET", "path": "/search", "query": "q=a%20b&tag=x+y"},
            "response": {"status": 200}
        },
        {
            "description": "get john doe",
            "request": {"method": "GET", "path": "/users/john doe"},
            "response": {"status": 200, "body": {"name": "John Doe"}}
        }
    ],
    "metadata": {"pactSpecification": {"version": "2.0.0"}}
}"#;

/// One asynchronous message interaction.
pub const MESSAGE_PACT: &str = r#"{
    "consumer": {"name": "test-consumer"},
    "provider": {"name": "test-provider"},
    "interactions": [{
        "type": "Asynchronous/Messages",
        "description": "a user created event",
        "providerStates": [{"name": "user 42 exists"}],
        "contents": {"id": 42, "event": "created"},
        "metadata": {"queue": "users"}
    }],
    "metadata": {"pactSpecification": {"version": "4.0"}}
}"#;

/// Registry with a single `GET /foobar` interaction answering 200.
///
/// # Panics
///
/// Never; the fixture interaction is valid.
#[must_use]
pub fn get_foobar_registry() -> InteractionRegistry {
    let mut registry = InteractionRegistry::new(CONSUMER, PROVIDER);
    registry
        .add(
            InteractionBuilder::http("get foobar")
                .with_request("GET", "/foobar")
                .with_status(200)
                .with_json_response_body(json!({"foo": "bar"})),
        )
        .expect("fixture interaction is valid");
    registry
}

/// Registry with two `GET /thing` interactions distinguished only by
/// provider state.
///
/// # Panics
///
/// Never; the fixture interactions are valid.
#[must_use]
pub fn provider_state_registry() -> InteractionRegistry {
    let mut registry = InteractionRegistry::new(CONSUMER, PROVIDER);
    for (state, status) in [("thing exists", 200), ("thing is gone", 404)] {
        registry
            .add(
                InteractionBuilder::http(format!("get thing when {state}"))
                    .given(state)
                    .with_request("GET", "/thing")
                    .with_status(status),
            )
            .expect("fixture interaction is valid");
    }
    registry
}

/// Registry with a `POST /users` interaction whose name is matched by type.
///
/// # Panics
///
/// Never; the fixture interaction is valid.
#[must_use]
pub fn typed_body_registry() -> InteractionRegistry {
    let mut registry = InteractionRegistry::new(CONSUMER, PROVIDER);
    registry
        .add(
            InteractionBuilder::http("create a user")
                .with_request("POST", "/users")
                .with_request_header("Content-Type", "application/json")
                .with_json_request_body(json!({"name": "Mary", "age": 30}))
                .with_matching_rule(InteractionPart::Request, MatchingRule::type_of("$.body.name"))
                .with_status(201),
        )
        .expect("fixture interaction is valid");
    registry
}

/// Registry with one message interaction carrying metadata.
///
/// # Panics
///
/// Never; the fixture interaction is valid.
#[must_use]
pub fn message_registry() -> InteractionRegistry {
    let mut registry = InteractionRegistry::new(CONSUMER, PROVIDER);
    registry
        .add(
            InteractionBuilder::message("a user created event")
                .given("user 42 exists")
                .with_json_contents(json!({"id": 42, "event": "created"}))
                .with_metadata("queue", json!("users")),
        )
        .expect("fixture interaction is valid");
    registry
}
