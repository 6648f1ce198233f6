//! Wire messages of the `io.pact.plugin.PactPlugin` service.
//!
//! Only the messages and fields the engine exchanges are declared. Tags
//! follow the published plugin protocol so unknown fields from newer
//! plugins are skipped on decode.

use std::collections::{BTreeMap, HashMap};

use prost_types::value::Kind;
use serde_json::{Map, Number, Value};

/// gRPC method paths.
pub mod paths {
    /// `InitPlugin`
    pub const INIT_PLUGIN: &str = "/io.pact.plugin.PactPlugin/InitPlugin";
    /// `ConfigureInteraction`
    pub const CONFIGURE_INTERACTION: &str = "/io.pact.plugin.PactPlugin/ConfigureInteraction";
    /// `CompareContents`
    pub const COMPARE_CONTENTS: &str = "/io.pact.plugin.PactPlugin/CompareContents";
    /// `StartMockServer`
    pub const START_MOCK_SERVER: &str = "/io.pact.plugin.PactPlugin/StartMockServer";
    /// `GetMockServerResults`
    pub const GET_MOCK_SERVER_RESULTS: &str = "/io.pact.plugin.PactPlugin/GetMockServerResults";
    /// `ShutdownMockServer`
    pub const SHUTDOWN_MOCK_SERVER: &str = "/io.pact.plugin.PactPlugin/ShutdownMockServer";
}

/// Handshake request sent once per plugin process.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct InitPluginRequest {
    /// Name of the calling implementation
    #[prost(string, tag = "1")]
    pub implementation: String,
    /// Version of the calling implementation
    #[prost(string, tag = "2")]
    pub version: String,
}

/// Handshake response carrying the plugin's catalogue.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct InitPluginResponse {
    /// Advertised capabilities
    #[prost(message, repeated, tag = "1")]
    pub catalogue: Vec<CatalogueEntry>,
}

/// Kind of an advertised capability.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum EntryType {
    /// Compares contents of a content type
    ContentMatcher = 0,
    /// Generates contents of a content type
    ContentGenerator = 1,
    /// Serves a transport
    Transport = 2,
    /// Provides a matching rule
    Matcher = 3,
    /// Provides an interaction kind
    Interaction = 4,
}

/// One advertised capability.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct CatalogueEntry {
    /// Capability kind
    #[prost(enumeration = "EntryType", tag = "1")]
    pub r#type: i32,
    /// Capability key, e.g. `protobuf` or `grpc`
    #[prost(string, tag = "2")]
    pub key: String,
    /// Capability attributes, e.g. `content-types`
    #[prost(map = "string, string", tag = "3")]
    pub values: HashMap<String, String>,
}

/// Body with its content type.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct Body {
    /// Content type of the bytes
    #[prost(string, tag = "1")]
    pub content_type: String,
    /// Encoded bytes
    #[prost(message, optional, tag = "2")]
    pub content: Option<Vec<u8>>,
}

/// Content generation request.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConfigureInteractionRequest {
    /// Content type to generate
    #[prost(string, tag = "1")]
    pub content_type: String,
    /// Plugin specific template
    #[prost(message, optional, tag = "2")]
    pub contents_config: Option<prost_types::Struct>,
}

/// Plugin configuration attached to an interaction.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PluginConfiguration {
    /// Interaction level data
    #[prost(message, optional, tag = "1")]
    pub interaction_configuration: Option<prost_types::Struct>,
    /// Contract level data
    #[prost(message, optional, tag = "2")]
    pub pact_configuration: Option<prost_types::Struct>,
}

/// Generated contents of one interaction part.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InteractionResponse {
    /// Generated body
    #[prost(message, optional, tag = "1")]
    pub contents: Option<Body>,
    /// Plugin configuration for this part
    #[prost(message, optional, tag = "5")]
    pub plugin_configuration: Option<PluginConfiguration>,
    /// Human readable rendering of the interaction
    #[prost(string, tag = "6")]
    pub interaction_markup: String,
    /// `request`, `response` or empty
    #[prost(string, tag = "8")]
    pub part_name: String,
}

/// Content generation response.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConfigureInteractionResponse {
    /// Failure reason, empty on success
    #[prost(string, tag = "1")]
    pub error: String,
    /// Generated parts
    #[prost(message, repeated, tag = "2")]
    pub interaction: Vec<InteractionResponse>,
    /// Contract level configuration
    #[prost(message, optional, tag = "3")]
    pub plugin_configuration: Option<PluginConfiguration>,
}

/// Content comparison request.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct CompareContentsRequest {
    /// Declared body
    #[prost(message, optional, tag = "1")]
    pub expected: Option<Body>,
    /// Observed body
    #[prost(message, optional, tag = "2")]
    pub actual: Option<Body>,
    /// Whether keys absent from the expected body are tolerated
    #[prost(bool, tag = "3")]
    pub allow_unexpected_keys: bool,
}

/// Content types that could not be compared.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct ContentTypeMismatch {
    /// Declared content type
    #[prost(string, tag = "1")]
    pub expected: String,
    /// Observed content type
    #[prost(string, tag = "2")]
    pub actual: String,
}

/// One difference found by a plugin.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct ContentMismatch {
    /// Declared bytes at `path`
    #[prost(message, optional, tag = "1")]
    pub expected: Option<Vec<u8>>,
    /// Observed bytes at `path`
    #[prost(message, optional, tag = "2")]
    pub actual: Option<Vec<u8>>,
    /// Description of the difference
    #[prost(string, tag = "3")]
    pub mismatch: String,
    /// Path of the difference
    #[prost(string, tag = "4")]
    pub path: String,
}

/// Differences keyed by path.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct ContentMismatches {
    /// Differences
    #[prost(message, repeated, tag = "1")]
    pub mismatches: Vec<ContentMismatch>,
}

/// Content comparison response.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct CompareContentsResponse {
    /// Failure reason, empty on success
    #[prost(string, tag = "1")]
    pub error: String,
    /// Set when the content types differ
    #[prost(message, optional, tag = "2")]
    pub type_mismatch: Option<ContentTypeMismatch>,
    /// Differences keyed by path
    #[prost(map = "string, message", tag = "3")]
    pub results: HashMap<String, ContentMismatches>,
}

/// Request to start a plugin-served mock server.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StartMockServerRequest {
    /// Interface to bind
    #[prost(string, tag = "1")]
    pub host_interface: String,
    /// Port to bind, 0 for ephemeral
    #[prost(uint32, tag = "2")]
    pub port: u32,
    /// Whether to serve TLS
    #[prost(bool, tag = "3")]
    pub tls: bool,
    /// Contract document as JSON
    #[prost(string, tag = "4")]
    pub pact: String,
    /// Transport configuration
    #[prost(message, optional, tag = "5")]
    pub test_context: Option<prost_types::Struct>,
}

/// Bound plugin mock server.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct MockServerDetails {
    /// Key identifying the server in later calls
    #[prost(string, tag = "1")]
    pub key: String,
    /// Bound port
    #[prost(uint32, tag = "2")]
    pub port: u32,
    /// Bound address
    #[prost(string, tag = "3")]
    pub address: String,
}

/// Response to [`StartMockServerRequest`].
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct StartMockServerResponse {
    /// Error or server details
    #[prost(oneof = "start_mock_server_response::Response", tags = "1, 2")]
    pub response: Option<start_mock_server_response::Response>,
}

/// Nested types of [`StartMockServerResponse`].
pub mod start_mock_server_response {
    /// Error or server details
    #[derive(Clone, PartialEq, Eq, ::prost::Oneof)]
    pub enum Response {
        /// Failure reason
        #[prost(string, tag = "1")]
        Error(String),
        /// Bound server
        #[prost(message, tag = "2")]
        Details(super::MockServerDetails),
    }
}

/// Identifies a plugin mock server.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct MockServerRequest {
    /// Key from [`MockServerDetails`]
    #[prost(string, tag = "1")]
    pub server_key: String,
}

/// Verification result of one request path.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct MockServerResult {
    /// Service/method or path
    #[prost(string, tag = "1")]
    pub path: String,
    /// Error for the whole path
    #[prost(string, tag = "2")]
    pub error: String,
    /// Differences found
    #[prost(message, repeated, tag = "3")]
    pub mismatches: Vec<ContentMismatch>,
}

/// Results of a plugin mock server.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct MockServerResults {
    /// Whether every interaction matched
    #[prost(bool, tag = "1")]
    pub ok: bool,
    /// Per path results
    #[prost(message, repeated, tag = "2")]
    pub results: Vec<MockServerResult>,
}

/// Response to `ShutdownMockServer`.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct ShutdownMockServerResponse {
    /// Whether every interaction matched
    #[prost(bool, tag = "1")]
    pub ok: bool,
    /// Per path results
    #[prost(message, repeated, tag = "2")]
    pub results: Vec<MockServerResult>,
}

/// Convert a JSON object into a protobuf `Struct`.
#[must_use]
pub fn to_struct(map: &Map<String, Value>) -> prost_types::Struct {
    prost_types::Struct {
        fields: map
            .iter()
            .map(|(key, value)| (key.clone(), to_proto_value(value)))
            .collect::<BTreeMap<_, _>>(),
    }
}

fn to_proto_value(value: &Value) -> prost_types::Value {
    let kind = match value {
        Value::Null => Kind::NullValue(0),
        Value::Bool(b) => Kind::BoolValue(*b),
        Value::Number(n) => Kind::NumberValue(n.as_f64().unwrap_or_default()),
        Value::String(s) => Kind::StringValue(s.clone()),
        Value::Array(items) => Kind::ListValue(prost_types::ListValue {
            values: items.iter().map(to_proto_value).collect(),
        }),
        Value::Object(map) => Kind::StructValue(to_struct(map)),
    };
    prost_types::Value { kind: Some(kind) }
}

/// Convert a protobuf `Struct` into a JSON object.
#[must_use]
pub fn from_struct(value: &prost_types::Struct) -> Map<String, Value> {
    value
        .fields
        .iter()
        .map(|(key, value)| (key.clone(), from_proto_value(value)))
        .collect()
}

fn from_proto_value(value: &prost_types::Value) -> Value {
    match &value.kind {
        None | Some(Kind::NullValue(_)) => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(*b),
        Some(Kind::NumberValue(n)) => {
            // Integral values round-trip as JSON integers.
            if n.fract() == 0.0 && n.abs() < 9.0e15 {
                #[allow(clippy::cast_possible_truncation)]
                let integral = *n as i64;
                Value::Number(Number::from(integral))
            } else {
                Number::from_f64(*n).map_or(Value::Null, Value::Number)
            }
        }
        Some(Kind::StringValue(s)) => Value::String(s.clone()),
        Some(Kind::ListValue(list)) => {
            Value::Array(list.values.iter().map(from_proto_value).collect())
        }
        Some(Kind::StructValue(s)) => Value::Object(from_struct(s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message as _;
    use serde_json::json;

    #[test]
    fn test_init_plugin_request_encoding() {
        let request = InitPluginRequest {
            implementation: "pact-mock".to_string(),
            version: "0.1.0".to_string(),
        };
        let bytes = request.encode_to_vec();
        assert_eq!(bytes[0], 0x0a);
        assert_eq!(InitPluginRequest::decode(bytes.as_slice()).unwrap(), request);
    }

    #[test]
    fn test_catalogue_entry_type() {
        let entry = CatalogueEntry {
            r#type: EntryType::Transport as i32,
            key: "grpc".to_string(),
            values: HashMap::new(),
        };
        assert_eq!(entry.r#type(), EntryType::Transport);
    }

    #[test]
    fn test_struct_conversion() {
        let map = json!({
            "pact:content-type": "application/protobuf",
            "count": 3,
            "ratio": 0.5,
            "nested": {"list": [true, null, "x"]}
        });
        let map = map.as_object().unwrap();
        assert_eq!(&from_struct(&to_struct(map)), map);
    }
}
