//! Loaded plugins, their leases and the RPCs the engine issues to them.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tonic::{Code, Status};
use tracing::{debug, info, warn};

use super::catalogue::{Capability, Catalogue};
use super::channel::{PLUGIN_INTERFACE_VERSION, PluginChannel, PluginConnector};
use super::grpc::ProcessPluginConnector;
use super::proto::{
    Body, CompareContentsRequest, ConfigureInteractionRequest, InitPluginRequest,
    MockServerDetails, MockServerRequest, MockServerResult, StartMockServerRequest, from_struct,
    start_mock_server_response, to_struct,
};
use crate::config::EngineConfig;
use crate::error::{PactError, Result};
use crate::model::{InteractionPart, PluginContent};

/// Name of the built-in transport.
pub const HTTP_TRANSPORT: &str = "http";

/// Implementation name sent in the handshake.
const IMPLEMENTATION: &str = "pact-mock";

/// Shared handle to a loaded plugin.
#[derive(Clone)]
pub struct PluginHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    name: String,
    version: String,
    channel: Arc<dyn PluginChannel>,
    gate: Option<Mutex<()>>,
    rpc_timeout: Duration,
    capabilities: Vec<Capability>,
}

impl fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginHandle")
            .field("name", &self.inner.name)
            .field("version", &self.inner.version)
            .field("concurrent", &self.inner.gate.is_none())
            .finish_non_exhaustive()
    }
}

/// Content generated for one interaction part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedContent {
    /// Part the plugin generated, `None` when unspecified
    pub part: Option<InteractionPart>,
    /// Generated bytes
    pub content: Option<PluginContent>,
    /// Interaction configuration to persist with the contract
    pub plugin_configuration: Map<String, Value>,
    /// Human readable rendering
    pub markup: String,
}

/// A difference reported by a content matcher plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDifference {
    /// Path of the difference
    pub path: String,
    /// Declared value, rendered as text
    pub expected: Option<String>,
    /// Observed value, rendered as text
    pub actual: Option<String>,
    /// Description
    pub mismatch: String,
}

impl PluginHandle {
    /// Plugin name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Plugin version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.inner.version
    }

    /// Capabilities from the handshake.
    #[must_use]
    pub fn capabilities(&self) -> &[Capability] {
        &self.inner.capabilities
    }

    /// Whether calls bypass the per-plugin serialization gate.
    #[must_use]
    pub fn is_concurrent(&self) -> bool {
        self.inner.gate.is_none()
    }

    /// Issue one RPC under the plugin's gate and deadline.
    async fn call<T, F, Fut>(&self, operation: &'static str, rpc: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn PluginChannel>) -> Fut + Send,
        Fut: Future<Output = Result<T, Status>> + Send,
        T: Send,
    {
        let inner = &self.inner;
        let channel = Arc::clone(&inner.channel);
        let guarded = async {
            let _permit = match &inner.gate {
                Some(gate) => Some(gate.lock().await),
                None => None,
            };
            rpc(channel).await
        };

        match tokio::time::timeout(inner.rpc_timeout, guarded).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(status)) => {
                Err(status_error(&inner.name, operation, inner.rpc_timeout, &status))
            }
            Err(_) => {
                warn!(plugin = %inner.name, operation, "plugin call timed out");
                Err(PactError::PluginTimeout {
                    name: inner.name.clone(),
                    operation,
                    timeout: inner.rpc_timeout,
                })
            }
        }
    }

    /// Ask the plugin to generate contents from `template`.
    ///
    /// # Errors
    ///
    /// Returns [`PactError::PluginContentError`] with the plugin's reason if
    /// it rejects the template, or a transport level plugin error.
    pub async fn configure_interaction(
        &self,
        content_type: &str,
        template: &Map<String, Value>,
    ) -> Result<Vec<GeneratedContent>> {
        let request = ConfigureInteractionRequest {
            content_type: content_type.to_string(),
            contents_config: Some(to_struct(template)),
        };
        let response = self
            .call("ConfigureInteraction", |channel| async move {
                channel.configure_interaction(request).await
            })
            .await?;

        if !response.error.is_empty() {
            return Err(PactError::plugin_content(self.name(), response.error));
        }

        Ok(response
            .interaction
            .into_iter()
            .map(|part| GeneratedContent {
                part: match part.part_name.as_str() {
                    "request" => Some(InteractionPart::Request),
                    "response" => Some(InteractionPart::Response),
                    _ => None,
                },
                content: part.contents.map(|body| {
                    let content_type = if body.content_type.is_empty() {
                        content_type.to_string()
                    } else {
                        body.content_type
                    };
                    PluginContent::new(content_type, body.content.unwrap_or_default())
                }),
                plugin_configuration: part
                    .plugin_configuration
                    .and_then(|config| config.interaction_configuration)
                    .map(|config| from_struct(&config))
                    .unwrap_or_default(),
                markup: part.interaction_markup,
            })
            .collect())
    }

    /// Compare `actual` against `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`PactError::PluginContentError`] if the plugin cannot compare
    /// the contents, or a transport level plugin error.
    pub async fn compare_contents(
        &self,
        expected: &PluginContent,
        actual: &PluginContent,
        allow_unexpected_keys: bool,
    ) -> Result<Vec<ContentDifference>> {
        let request = CompareContentsRequest {
            expected: Some(body(expected)),
            actual: Some(body(actual)),
            allow_unexpected_keys,
        };
        let response = self
            .call("CompareContents", |channel| async move {
                channel.compare_contents(request).await
            })
            .await?;

        if !response.error.is_empty() {
            return Err(PactError::plugin_content(self.name(), response.error));
        }
        if let Some(mismatch) = response.type_mismatch {
            return Ok(vec![ContentDifference {
                path: "$".to_string(),
                expected: Some(mismatch.expected.clone()),
                actual: Some(mismatch.actual.clone()),
                mismatch: format!(
                    "Expected content type '{}' but was '{}'",
                    mismatch.expected, mismatch.actual
                ),
            }]);
        }

        let mut differences: Vec<ContentDifference> = response
            .results
            .into_values()
            .flat_map(|group| group.mismatches)
            .map(|m| ContentDifference {
                path: m.path,
                expected: m.expected.map(|b| String::from_utf8_lossy(&b).into_owned()),
                actual: m.actual.map(|b| String::from_utf8_lossy(&b).into_owned()),
                mismatch: m.mismatch,
            })
            .collect();
        differences.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(differences)
    }

    /// Start a plugin-served mock server for `pact`.
    ///
    /// # Errors
    ///
    /// Returns [`PactError::PluginUnavailable`] if the plugin reports a
    /// failure, or a transport level plugin error.
    pub async fn start_mock_server(
        &self,
        host: &str,
        port: u16,
        tls: bool,
        pact: String,
        test_context: &Map<String, Value>,
    ) -> Result<MockServerDetails> {
        let request = StartMockServerRequest {
            host_interface: host.to_string(),
            port: u32::from(port),
            tls,
            pact,
            test_context: Some(to_struct(test_context)),
        };
        let response = self
            .call("StartMockServer", |channel| async move {
                channel.start_mock_server(request).await
            })
            .await?;

        match response.response {
            Some(start_mock_server_response::Response::Details(details)) => Ok(details),
            Some(start_mock_server_response::Response::Error(error)) => {
                Err(PactError::plugin_unavailable(self.name(), error))
            }
            None => Err(PactError::plugin_unavailable(
                self.name(),
                "StartMockServer returned no details",
            )),
        }
    }

    /// Results recorded so far by a plugin-served mock server.
    ///
    /// # Errors
    ///
    /// Returns a transport level plugin error.
    pub async fn mock_server_results(&self, server_key: &str) -> Result<Vec<MockServerResult>> {
        let request = MockServerRequest {
            server_key: server_key.to_string(),
        };
        let response = self
            .call("GetMockServerResults", |channel| async move {
                channel.get_mock_server_results(request).await
            })
            .await?;
        Ok(response.results)
    }

    /// Stop a plugin-served mock server, returning its final results.
    ///
    /// # Errors
    ///
    /// Returns a transport level plugin error.
    pub async fn shutdown_mock_server(&self, server_key: &str) -> Result<Vec<MockServerResult>> {
        let request = MockServerRequest {
            server_key: server_key.to_string(),
        };
        let response = self
            .call("ShutdownMockServer", |channel| async move {
                channel.shutdown_mock_server(request).await
            })
            .await?;
        Ok(response.results)
    }
}

fn body(content: &PluginContent) -> Body {
    Body {
        content_type: content.content_type.clone(),
        content: Some(content.content.clone()),
    }
}

fn status_error(
    name: &str,
    operation: &'static str,
    timeout: Duration,
    status: &Status,
) -> PactError {
    match status.code() {
        Code::Unavailable | Code::Unimplemented => {
            PactError::plugin_unavailable(name, format!("{operation}: {}", status.message()))
        }
        Code::DeadlineExceeded | Code::Cancelled => PactError::PluginTimeout {
            name: name.to_string(),
            operation,
            timeout,
        },
        _ => PactError::plugin_content(name, format!("{operation}: {}", status.message())),
    }
}

/// A counted reference to a loaded plugin.
///
/// Obtained from [`PluginBridge::load`] and given back with
/// [`PluginBridge::release`].
#[derive(Debug)]
pub struct PluginRef {
    handle: PluginHandle,
    lease: u64,
}

impl PluginRef {
    /// Handle for issuing calls.
    #[must_use]
    pub const fn handle(&self) -> &PluginHandle {
        &self.handle
    }

    /// Plugin name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.handle.name()
    }

    /// Plugin version.
    #[must_use]
    pub fn version(&self) -> &str {
        self.handle.version()
    }
}

/// Serving implementation chosen for a transport name.
#[derive(Debug)]
pub enum TransportFactory {
    /// Built-in HTTP server
    Http,
    /// Transport served by a plugin
    Plugin {
        /// Lease on the plugin, released with the session
        plugin: PluginRef,
        /// Transport key
        transport: String,
    },
}

struct LoadedPlugin {
    handle: PluginHandle,
    leases: HashSet<u64>,
}

/// Loads plugins, merges their catalogues and brokers calls to them.
pub struct PluginBridge {
    connector: Arc<dyn PluginConnector>,
    startup_timeout: Duration,
    rpc_timeout: Duration,
    plugins: Mutex<HashMap<String, LoadedPlugin>>,
    /// One handshake per plugin name at a time
    loading: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    catalogue: RwLock<Catalogue>,
    next_lease: AtomicU64,
}

impl fmt::Debug for PluginBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginBridge")
            .field("startup_timeout", &self.startup_timeout)
            .field("rpc_timeout", &self.rpc_timeout)
            .field("capabilities", &self.catalogue.read().len())
            .finish_non_exhaustive()
    }
}

impl PluginBridge {
    /// Bridge using `connector` with the deadlines from `config`.
    #[must_use]
    pub fn new(connector: Arc<dyn PluginConnector>, config: &EngineConfig) -> Self {
        Self {
            connector,
            startup_timeout: config.plugin_startup_timeout,
            rpc_timeout: config.plugin_rpc_timeout,
            plugins: Mutex::new(HashMap::new()),
            loading: parking_lot::Mutex::new(HashMap::new()),
            catalogue: RwLock::new(Catalogue::new()),
            next_lease: AtomicU64::new(1),
        }
    }

    /// Bridge launching plugins installed under `config.plugin_dir`.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        let connector =
            ProcessPluginConnector::new(config.plugin_dir.clone(), config.plugin_startup_timeout);
        Self::new(Arc::new(connector), config)
    }

    fn lease(&self, loaded: &mut LoadedPlugin) -> PluginRef {
        let lease = self.next_lease.fetch_add(1, Ordering::Relaxed);
        loaded.leases.insert(lease);
        PluginRef {
            handle: loaded.handle.clone(),
            lease,
        }
    }

    /// Lease on an already loaded `name`, if any.
    async fn share(&self, name: &str, version: &str) -> Result<Option<PluginRef>> {
        let mut plugins = self.plugins.lock().await;
        let Some(loaded) = plugins.get_mut(name) else {
            return Ok(None);
        };
        if version.is_empty() || loaded.handle.version() == version {
            debug!(plugin = %name, "plugin already loaded");
            return Ok(Some(self.lease(loaded)));
        }
        Err(PactError::plugin_unavailable(
            name,
            format!("version {} is already loaded", loaded.handle.version()),
        ))
    }

    /// Load `name` at `version` (empty for the latest install) and take a
    /// lease on it. A plugin that is already loaded is shared.
    ///
    /// The handshake runs without holding the plugin table, so calls to
    /// plugins that are already loaded are not held up by a slow start.
    ///
    /// # Errors
    ///
    /// Returns [`PactError::PluginUnavailable`] if the plugin cannot be
    /// started or the handshake does not complete within the startup
    /// timeout, and [`PactError::PluginVersionMismatch`] for an incompatible
    /// interface version.
    pub async fn load(&self, name: &str, version: &str) -> Result<PluginRef> {
        let gate = Arc::clone(self.loading.lock().entry(name.to_string()).or_default());
        let _loading = gate.lock().await;

        if let Some(shared) = self.share(name, version).await? {
            return Ok(shared);
        }

        let handshake = async {
            let connection = self.connector.connect(name, version).await?;
            if connection.interface_version != PLUGIN_INTERFACE_VERSION {
                return Err(PactError::PluginVersionMismatch {
                    name: name.to_string(),
                    expected: PLUGIN_INTERFACE_VERSION,
                    actual: connection.interface_version,
                });
            }
            let response = connection
                .channel
                .init_plugin(InitPluginRequest {
                    implementation: IMPLEMENTATION.to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                })
                .await
                .map_err(|status| PactError::plugin_unavailable(name, status.message()))?;
            Ok::<_, PactError>((connection, response))
        };

        let (connection, response) = tokio::time::timeout(self.startup_timeout, handshake)
            .await
            .map_err(|_| {
                PactError::plugin_unavailable(
                    name,
                    format!("handshake did not complete within {:?}", self.startup_timeout),
                )
            })??;

        let capabilities: Vec<Capability> = response
            .catalogue
            .iter()
            .map(|entry| Capability::from_entry(name, entry))
            .collect();
        self.catalogue.write().merge(capabilities.clone());

        info!(
            plugin = %name,
            version = %connection.version,
            capabilities = capabilities.len(),
            concurrent = connection.concurrent_calls,
            "plugin loaded"
        );

        let handle = PluginHandle {
            inner: Arc::new(HandleInner {
                name: name.to_string(),
                version: connection.version,
                channel: connection.channel,
                gate: (!connection.concurrent_calls).then(|| Mutex::new(())),
                rpc_timeout: self.rpc_timeout,
                capabilities,
            }),
        };
        let mut plugins = self.plugins.lock().await;
        let loaded = plugins.entry(name.to_string()).or_insert(LoadedPlugin {
            handle,
            leases: HashSet::new(),
        });
        Ok(self.lease(loaded))
    }

    /// Give back a lease. Releasing the same lease twice has no effect; the
    /// plugin is shut down when its last lease is released.
    pub async fn release(&self, plugin: &PluginRef) {
        let mut plugins = self.plugins.lock().await;
        let Some(loaded) = plugins.get_mut(plugin.name()) else {
            return;
        };
        if !loaded.leases.remove(&plugin.lease) || !loaded.leases.is_empty() {
            return;
        }

        if let Some(loaded) = plugins.remove(plugin.name()) {
            self.catalogue.write().remove_plugin(loaded.handle.name());
            loaded.handle.inner.channel.close().await;
            info!(plugin = %loaded.handle.name(), "plugin released");
        }
    }

    /// Number of live leases on `name`.
    pub async fn lease_count(&self, name: &str) -> usize {
        self.plugins
            .lock()
            .await
            .get(name)
            .map_or(0, |loaded| loaded.leases.len())
    }

    /// Resolve the serving implementation for a transport. Plugin transports
    /// come with a new lease on their plugin.
    ///
    /// # Errors
    ///
    /// Returns [`PactError::UnknownTransport`] if the name is neither built
    /// in nor advertised by a loaded plugin.
    pub async fn resolve_transport(&self, name: &str) -> Result<TransportFactory> {
        if name.eq_ignore_ascii_case(HTTP_TRANSPORT) {
            return Ok(TransportFactory::Http);
        }

        let owner = self
            .catalogue
            .read()
            .transport(name)
            .map(|capability| capability.plugin.clone());
        let mut plugins = self.plugins.lock().await;
        match owner.and_then(|owner| plugins.get_mut(&owner)) {
            Some(loaded) => Ok(TransportFactory::Plugin {
                plugin: self.lease(loaded),
                transport: name.to_string(),
            }),
            None => Err(PactError::UnknownTransport {
                name: name.to_string(),
            }),
        }
    }

    /// Generate the bytes for `content_type` from `template`.
    ///
    /// # Errors
    ///
    /// Returns [`PactError::PluginContentError`] if the template is not a
    /// JSON object, the plugin rejects it, or the plugin returns no content.
    pub async fn generate_content(
        &self,
        plugin: &PluginRef,
        content_type: &str,
        template: &Value,
    ) -> Result<Vec<u8>> {
        let template = template.as_object().ok_or_else(|| {
            PactError::plugin_content(plugin.name(), "content template must be a JSON object")
        })?;
        plugin
            .handle()
            .configure_interaction(content_type, template)
            .await?
            .into_iter()
            .find_map(|generated| generated.content)
            .map(|content| content.content)
            .ok_or_else(|| PactError::plugin_content(plugin.name(), "plugin returned no content"))
    }

    /// Loaded plugin whose content matcher handles `content_type`.
    pub async fn content_matcher(&self, content_type: &str) -> Option<PluginHandle> {
        let owner = self
            .catalogue
            .read()
            .content_matcher(content_type)
            .map(|capability| capability.plugin.clone())?;
        self.plugins
            .lock()
            .await
            .get(&owner)
            .map(|loaded| loaded.handle.clone())
    }

    /// Snapshot of the merged catalogue.
    #[must_use]
    pub fn catalogue(&self) -> Catalogue {
        self.catalogue.read().clone()
    }
}
