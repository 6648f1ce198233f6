//! Proptest generators for interactions and bodies.

use proptest::prelude::*;
use serde_json::{Map, Value};

use pact_mock::model::{HttpRequestSpec, HttpResponseSpec};
use pact_mock::{Interaction, ProviderState};

/// Generate non-empty interaction descriptions.
pub fn description_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9 ]{2,30}".prop_map(|s| s.trim_end().to_string())
}

/// Generate absolute request paths.
pub fn path_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z0-9_-]{1,12}", 1..5)
        .prop_map(|segments| format!("/{}", segments.join("/")))
}

/// Generate HTTP methods.
pub fn method_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("GET".to_string()),
        Just("POST".to_string()),
        Just("PUT".to_string()),
        Just("PATCH".to_string()),
        Just("DELETE".to_string()),
    ]
}

/// Generate response status codes.
pub fn status_strategy() -> impl Strategy<Value = u16> {
    prop_oneof![Just(200_u16), Just(201), Just(204), Just(400), Just(404), Just(500)]
}

/// Generate JSON leaves.
pub fn json_leaf_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| Value::from(i64::from(n))),
        "[a-zA-Z0-9 ]{0,16}".prop_map(Value::String),
    ]
}

/// Generate nested JSON bodies.
pub fn json_body_strategy() -> impl Strategy<Value = Value> {
    json_leaf_strategy().prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,8}", inner, 0..4)
                .prop_map(|fields| Value::Object(fields.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

/// Generate JSON object bodies.
pub fn json_object_strategy() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-z]{1,8}", json_body_strategy(), 1..5)
        .prop_map(|fields| Value::Object(fields.into_iter().collect::<Map<_, _>>()))
}

/// Generate provider states.
pub fn provider_state_strategy() -> impl Strategy<Value = ProviderState> {
    "[a-z][a-z0-9 ]{2,20}".prop_map(|name| ProviderState::new(name.trim_end()))
}

/// Generate valid HTTP interactions.
pub fn http_interaction_strategy() -> impl Strategy<Value = Interaction> {
    (
        description_strategy(),
        method_strategy(),
        path_strategy(),
        prop::option::of(json_object_strategy()),
        status_strategy(),
        prop::option::of(json_body_strategy()),
        prop::collection::vec(provider_state_strategy(), 0..3),
    )
        .prop_map(|(description, method, path, request_body, status, response_body, states)| {
            let mut request = HttpRequestSpec::new(method, path);
            request.body = request_body;
            let response = HttpResponseSpec {
                status,
                body: response_body.filter(|body| !body.is_null()),
                ..HttpResponseSpec::default()
            };
            let mut interaction = Interaction::http(description, request, response);
            interaction.provider_states = states;
            interaction
        })
}
