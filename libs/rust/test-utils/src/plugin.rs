//! In-process fake plugin.
//!
//! [`FakePlugin`] answers the plugin RPCs from memory so bridge, session and
//! transport code can be exercised without launching a plugin process.
//! [`FakeConnector`] hands fakes to a [`PluginBridge`] by name.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tonic::Status;

use pact_mock::plugin::proto::{
    Body, CatalogueEntry, CompareContentsRequest, CompareContentsResponse,
    ConfigureInteractionRequest, ConfigureInteractionResponse, ContentMismatch, ContentMismatches,
    ContentTypeMismatch, EntryType, InitPluginRequest, InitPluginResponse, InteractionResponse,
    MockServerDetails, MockServerRequest, MockServerResult, MockServerResults,
    PluginConfiguration, ShutdownMockServerResponse, StartMockServerRequest,
    StartMockServerResponse, from_struct, start_mock_server_response, to_struct,
};
use pact_mock::plugin::{PLUGIN_INTERFACE_VERSION, PluginChannel, PluginConnection, PluginConnector};
use pact_mock::{EngineConfig, PactError, PluginBridge, Result};

/// Port handed out when a plugin mock server is asked for port 0.
pub const FAKE_BASE_PORT: u16 = 45_000;

/// Call counters of a [`FakePlugin`].
#[derive(Debug, Default)]
pub struct FakeCalls {
    /// `InitPlugin` calls
    pub init: AtomicUsize,
    /// `ConfigureInteraction` calls
    pub configure: AtomicUsize,
    /// `CompareContents` calls
    pub compare: AtomicUsize,
    /// `StartMockServer` calls
    pub start: AtomicUsize,
    /// `ShutdownMockServer` calls
    pub shutdown: AtomicUsize,
    /// Channel closes
    pub close: AtomicUsize,
}

/// A plugin answering from memory.
///
/// Generated contents are the JSON encoding of the template. Comparison is
/// byte equality, reported at `$`.
#[derive(Debug)]
pub struct FakePlugin {
    name: String,
    version: String,
    interface_version: u32,
    concurrent: bool,
    content_types: Vec<String>,
    transport: Option<String>,
    handshake_delay: Duration,
    rpc_delay: Duration,
    start_error: Option<String>,
    results: Mutex<Vec<MockServerResult>>,
    last_pact: Mutex<Option<String>>,
    /// Call counters
    pub calls: FakeCalls,
}

impl FakePlugin {
    /// Fake named `name` at version `0.1.0` with no capabilities.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "0.1.0".to_string(),
            interface_version: PLUGIN_INTERFACE_VERSION,
            concurrent: false,
            content_types: Vec::new(),
            transport: None,
            handshake_delay: Duration::ZERO,
            rpc_delay: Duration::ZERO,
            start_error: None,
            results: Mutex::new(Vec::new()),
            last_pact: Mutex::new(None),
            calls: FakeCalls::default(),
        }
    }

    /// Advertise a content matcher and generator for `content_type`.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_types.push(content_type.into());
        self
    }

    /// Advertise a transport.
    #[must_use]
    pub fn with_transport(mut self, transport: impl Into<String>) -> Self {
        self.transport = Some(transport.into());
        self
    }

    /// Report `version` from the connector.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Declare a plugin interface version.
    #[must_use]
    pub const fn with_interface_version(mut self, version: u32) -> Self {
        self.interface_version = version;
        self
    }

    /// Allow concurrent calls.
    #[must_use]
    pub const fn concurrent(mut self) -> Self {
        self.concurrent = true;
        self
    }

    /// Delay the handshake.
    #[must_use]
    pub const fn with_handshake_delay(mut self, delay: Duration) -> Self {
        self.handshake_delay = delay;
        self
    }

    /// Delay every call after the handshake.
    #[must_use]
    pub const fn with_rpc_delay(mut self, delay: Duration) -> Self {
        self.rpc_delay = delay;
        self
    }

    /// Refuse to start mock servers.
    #[must_use]
    pub fn with_start_error(mut self, error: impl Into<String>) -> Self {
        self.start_error = Some(error.into());
        self
    }

    /// Results reported by the plugin's mock servers.
    pub fn set_results(&self, results: Vec<MockServerResult>) {
        *self.results.lock() = results;
    }

    /// Pact document handed to the last started mock server.
    #[must_use]
    pub fn last_pact(&self) -> Option<String> {
        self.last_pact.lock().clone()
    }

    /// Plugin name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    async fn pause(&self) {
        if !self.rpc_delay.is_zero() {
            tokio::time::sleep(self.rpc_delay).await;
        }
    }

    fn catalogue(&self) -> Vec<CatalogueEntry> {
        let mut entries = Vec::new();
        if !self.content_types.is_empty() {
            let values: HashMap<String, String> =
                HashMap::from([("content-types".to_string(), self.content_types.join(";"))]);
            for kind in [EntryType::ContentMatcher, EntryType::ContentGenerator] {
                entries.push(CatalogueEntry {
                    r#type: kind as i32,
                    key: self.name.clone(),
                    values: values.clone(),
                });
            }
        }
        if let Some(transport) = &self.transport {
            entries.push(CatalogueEntry {
                r#type: EntryType::Transport as i32,
                key: transport.clone(),
                values: HashMap::new(),
            });
        }
        entries
    }
}

fn base_type(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or_default().trim()
}

#[async_trait]
impl PluginChannel for FakePlugin {
    async fn init_plugin(&self, _request: InitPluginRequest) -> Result<InitPluginResponse, Status> {
        self.calls.init.fetch_add(1, Ordering::SeqCst);
        if !self.handshake_delay.is_zero() {
            tokio::time::sleep(self.handshake_delay).await;
        }
        Ok(InitPluginResponse {
            catalogue: self.catalogue(),
        })
    }

    async fn configure_interaction(
        &self,
        request: ConfigureInteractionRequest,
    ) -> Result<ConfigureInteractionResponse, Status> {
        self.calls.configure.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        let template = request.contents_config.as_ref().map(from_struct).unwrap_or_default();
        if let Some(error) = template.get("error") {
            let reason = error.as_str().map_or_else(|| error.to_string(), str::to_string);
            return Ok(ConfigureInteractionResponse {
                error: reason,
                ..ConfigureInteractionResponse::default()
            });
        }

        let bytes = serde_json::to_vec(&Value::Object(template.clone()))
            .map_err(|e| Status::internal(e.to_string()))?;
        Ok(ConfigureInteractionResponse {
            error: String::new(),
            interaction: vec![InteractionResponse {
                contents: Some(Body {
                    content_type: request.content_type,
                    content: Some(bytes),
                }),
                plugin_configuration: Some(PluginConfiguration {
                    interaction_configuration: Some(to_struct(&template)),
                    pact_configuration: None,
                }),
                interaction_markup: format!("generated by {}", self.name),
                part_name: "request".to_string(),
            }],
            plugin_configuration: None,
        })
    }

    async fn compare_contents(
        &self,
        request: CompareContentsRequest,
    ) -> Result<CompareContentsResponse, Status> {
        self.calls.compare.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        let expected = request.expected.unwrap_or_default();
        let actual = request.actual.unwrap_or_default();
        let expected_type = base_type(&expected.content_type);
        if !actual.content_type.is_empty()
            && !expected_type.eq_ignore_ascii_case(base_type(&actual.content_type))
        {
            return Ok(CompareContentsResponse {
                type_mismatch: Some(ContentTypeMismatch {
                    expected: expected.content_type,
                    actual: actual.content_type,
                }),
                ..CompareContentsResponse::default()
            });
        }

        let mut results = HashMap::new();
        if expected.content != actual.content {
            results.insert(
                "$".to_string(),
                ContentMismatches {
                    mismatches: vec![ContentMismatch {
                        expected: expected.content,
                        actual: actual.content,
                        mismatch: "Expected body to equal the generated contents".to_string(),
                        path: "$".to_string(),
                    }],
                },
            );
        }
        Ok(CompareContentsResponse {
            results,
            ..CompareContentsResponse::default()
        })
    }

    async fn start_mock_server(
        &self,
        request: StartMockServerRequest,
    ) -> Result<StartMockServerResponse, Status> {
        let started = self.calls.start.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        if let Some(error) = &self.start_error {
            return Ok(StartMockServerResponse {
                response: Some(start_mock_server_response::Response::Error(error.clone())),
            });
        }

        *self.last_pact.lock() = Some(request.pact);
        let port = if request.port == 0 {
            u32::from(FAKE_BASE_PORT) + u32::try_from(started).unwrap_or(0)
        } else {
            request.port
        };
        Ok(StartMockServerResponse {
            response: Some(start_mock_server_response::Response::Details(MockServerDetails {
                key: format!("{}-{started}", self.name),
                port,
                address: format!("{}:{port}", request.host_interface),
            })),
        })
    }

    async fn get_mock_server_results(
        &self,
        _request: MockServerRequest,
    ) -> Result<MockServerResults, Status> {
        self.pause().await;
        let results = self.results.lock().clone();
        Ok(MockServerResults {
            ok: results.is_empty(),
            results,
        })
    }

    async fn shutdown_mock_server(
        &self,
        _request: MockServerRequest,
    ) -> Result<ShutdownMockServerResponse, Status> {
        self.calls.shutdown.fetch_add(1, Ordering::SeqCst);
        let results = self.results.lock().clone();
        Ok(ShutdownMockServerResponse {
            ok: results.is_empty(),
            results,
        })
    }

    async fn close(&self) {
        self.calls.close.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connector resolving plugin names to registered fakes.
#[derive(Debug, Default)]
pub struct FakeConnector {
    plugins: HashMap<String, Arc<FakePlugin>>,
    connects: AtomicUsize,
}

impl FakeConnector {
    /// Empty connector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fake under its name.
    #[must_use]
    pub fn with_plugin(mut self, plugin: Arc<FakePlugin>) -> Self {
        self.plugins.insert(plugin.name().to_string(), plugin);
        self
    }

    /// Number of connection attempts.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PluginConnector for FakeConnector {
    async fn connect(&self, name: &str, version: &str) -> Result<PluginConnection> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let plugin = self
            .plugins
            .get(name)
            .ok_or_else(|| PactError::plugin_unavailable(name, "plugin is not installed"))?;
        if !version.is_empty() && version != plugin.version {
            return Err(PactError::plugin_unavailable(
                name,
                format!("version {version} is not installed"),
            ));
        }
        Ok(PluginConnection {
            version: plugin.version.clone(),
            interface_version: plugin.interface_version,
            concurrent_calls: plugin.concurrent,
            channel: Arc::clone(plugin) as Arc<dyn PluginChannel>,
        })
    }
}

/// Bridge whose connector serves `plugins`.
#[must_use]
pub fn fake_bridge(plugins: Vec<Arc<FakePlugin>>, config: &EngineConfig) -> Arc<PluginBridge> {
    let connector = plugins
        .into_iter()
        .fold(FakeConnector::new(), FakeConnector::with_plugin);
    Arc::new(PluginBridge::new(Arc::new(connector), config))
}

/// Bridge with no plugins installed.
#[must_use]
pub fn empty_bridge() -> Arc<PluginBridge> {
    fake_bridge(Vec::new(), &EngineConfig::default())
}
