//! Mock server sessions.
//!
//! A [`MockServerSession`] owns the interactions of one registry, serves
//! them on a transport and accumulates what it received. Verification
//! failures are data: they are read with [`MockServerSession::mismatches`]
//! and never abort request handling.

pub mod http;
pub mod ledger;
pub mod state;
pub mod transport;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use self::http::bind_address;
use self::ledger::{Ledger, RecordedRequest};
use self::transport::TransportHandle;
use crate::config::{CandidatePolicy, ConfigError, EngineConfig};
use crate::contract::{Contract, ContractWriter};
use crate::error::{PactError, Result};
use crate::matchers::{MatchRuleEngine, RuleMatcher};
use crate::model::{Interaction, Mismatch, SpecKind};
use crate::plugin::{PluginBridge, PluginHandle, PluginRef, TransportFactory};
use crate::registry::InteractionRegistry;
use crate::verification::VerificationResult;

pub use self::http::{PROVIDER_STATE_HEADER, select_candidate};
pub use self::state::SessionState;
pub use self::transport::PLUGIN_TRANSPORT;

/// State shared with request handlers. Interactions are read-only once the
/// session exists; the ledger is the single per-session lock.
pub(crate) struct SessionCore {
    pub(crate) id: Uuid,
    pub(crate) interactions: Vec<Interaction>,
    pub(crate) ledger: Mutex<Ledger>,
    pub(crate) engine: Arc<dyn MatchRuleEngine>,
    pub(crate) bridge: Arc<PluginBridge>,
    pub(crate) policy: CandidatePolicy,
    /// Flipped once the listener is gone; handlers still running are dropped
    /// without being recorded.
    pub(crate) closed: tokio::sync::watch::Sender<bool>,
}

/// A mock server bound to one registry's interactions.
pub struct MockServerSession {
    core: Arc<SessionCore>,
    consumer: String,
    provider: String,
    config: EngineConfig,
    state: Mutex<SessionState>,
    transport: tokio::sync::Mutex<Option<TransportHandle>>,
    plugins: tokio::sync::Mutex<Vec<PluginRef>>,
    port: Mutex<Option<u16>>,
    final_mismatches: Mutex<Vec<Mismatch>>,
}

impl std::fmt::Debug for MockServerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockServerSession")
            .field("id", &self.core.id)
            .field("consumer", &self.consumer)
            .field("provider", &self.provider)
            .field("state", &*self.state.lock())
            .field("port", &*self.port.lock())
            .finish_non_exhaustive()
    }
}

impl MockServerSession {
    /// Session in [`SessionState::Created`] using the default rule engine.
    #[must_use]
    pub fn new(
        registry: InteractionRegistry,
        bridge: Arc<PluginBridge>,
        config: EngineConfig,
    ) -> Self {
        Self::with_engine(registry, bridge, config, Arc::new(RuleMatcher))
    }

    /// Session with a custom matching rule engine.
    #[must_use]
    pub fn with_engine(
        registry: InteractionRegistry,
        bridge: Arc<PluginBridge>,
        config: EngineConfig,
        engine: Arc<dyn MatchRuleEngine>,
    ) -> Self {
        let core = SessionCore {
            id: Uuid::new_v4(),
            interactions: registry.interactions().to_vec(),
            ledger: Mutex::new(Ledger::default()),
            engine,
            bridge,
            policy: config.candidate_policy,
            closed: tokio::sync::watch::Sender::new(false),
        };
        info!(
            session = %core.id,
            consumer = %registry.consumer(),
            provider = %registry.provider(),
            interactions = core.interactions.len(),
            "session created"
        );
        Self {
            core: Arc::new(core),
            consumer: registry.consumer().to_string(),
            provider: registry.provider().to_string(),
            config,
            state: Mutex::new(SessionState::Created),
            transport: tokio::sync::Mutex::new(None),
            plugins: tokio::sync::Mutex::new(Vec::new()),
            port: Mutex::new(None),
            final_mismatches: Mutex::new(Vec::new()),
        }
    }

    /// Session id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.core.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Bound port, once started.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        *self.port.lock()
    }

    /// Consumer name.
    #[must_use]
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Provider name.
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Interactions served by this session.
    #[must_use]
    pub fn interactions(&self) -> &[Interaction] {
        &self.core.interactions
    }

    /// Load a plugin for the lifetime of this session. It is recorded in the
    /// written contract and released on [`cleanup`](Self::cleanup).
    ///
    /// # Errors
    ///
    /// Fails with [`PactError::SessionAlreadyStopped`] after cleanup, or with
    /// the bridge's load error.
    pub async fn using_plugin(&self, name: &str, version: &str) -> Result<PluginHandle> {
        self.state().check_live()?;
        let plugin = self.core.bridge.load(name, version).await?;
        let handle = plugin.handle().clone();
        self.adopt_plugin(plugin).await?;
        Ok(handle)
    }

    /// Take ownership of an existing lease.
    ///
    /// # Errors
    ///
    /// Fails with [`PactError::SessionAlreadyStopped`] after cleanup; the
    /// lease is released in that case.
    pub async fn adopt_plugin(&self, plugin: PluginRef) -> Result<()> {
        if let Err(e) = self.state().check_live() {
            self.core.bridge.release(&plugin).await;
            return Err(e);
        }
        self.plugins.lock().await.push(plugin);
        Ok(())
    }

    fn begin_start(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.check_startable()?;
        *state = SessionState::Starting;
        Ok(())
    }

    fn finish_start(&self, result: &Result<u16>) {
        let mut state = self.state.lock();
        match result {
            Ok(port) => {
                *state = SessionState::Active;
                *self.port.lock() = Some(*port);
            }
            Err(_) => *state = SessionState::Created,
        }
    }

    /// Bind `bind_address` (port `0` picks a free port) and serve the
    /// interactions over HTTP, or HTTPS when `tls` is set.
    ///
    /// # Errors
    ///
    /// [`PactError::SessionAlreadyStarted`] / [`PactError::SessionAlreadyStopped`]
    /// for lifecycle violations, [`PactError::Config`] for TLS without
    /// certificate material and [`PactError::Io`] if the address cannot be
    /// bound. A failed bind leaves the session startable.
    pub async fn start(&self, bind_address: &str, tls: bool) -> Result<u16> {
        self.begin_start()?;
        let result = self.bind_http(bind_address, tls).await;
        self.finish_start(&result);
        result
    }

    async fn bind_http(&self, addr: &str, tls: bool) -> Result<u16> {
        let server = if tls {
            self.bind_tls(addr).await?
        } else {
            http::serve(Arc::clone(&self.core), addr).await?
        };
        let port = server.port();
        *self.transport.lock().await = Some(TransportHandle::Http(server));
        info!(session = %self.core.id, port, tls, "session active");
        Ok(port)
    }

    #[cfg(feature = "tls")]
    async fn bind_tls(&self, addr: &str) -> Result<http::HttpServer> {
        let tls = self.config.tls.as_ref().ok_or(ConfigError::TlsNotConfigured)?;
        http::serve_tls(Arc::clone(&self.core), addr, tls).await
    }

    #[cfg(not(feature = "tls"))]
    async fn bind_tls(&self, _addr: &str) -> Result<http::HttpServer> {
        if self.config.tls.is_none() {
            return Err(ConfigError::TlsNotConfigured.into());
        }
        Err(ConfigError::TlsUnsupported.into())
    }

    /// Serve the interactions on a named transport. `http` uses the built-in
    /// server; any other name is resolved through the loaded plugins and the
    /// plugin serves the interactions itself.
    ///
    /// # Errors
    ///
    /// Lifecycle errors as for [`start`](Self::start),
    /// [`PactError::UnknownTransport`] if nothing provides the transport and
    /// plugin errors if the plugin cannot start its server.
    pub async fn start_transport(
        &self,
        transport: &str,
        host: &str,
        port: u16,
        transport_config: &Map<String, Value>,
    ) -> Result<u16> {
        self.begin_start()?;
        let result = self
            .bind_transport(transport, host, port, transport_config)
            .await;
        self.finish_start(&result);
        result
    }

    async fn bind_transport(
        &self,
        transport: &str,
        host: &str,
        port: u16,
        transport_config: &Map<String, Value>,
    ) -> Result<u16> {
        let (plugin, transport) = match self.core.bridge.resolve_transport(transport).await? {
            TransportFactory::Http => return self.bind_http(&bind_address(host, port), false).await,
            TransportFactory::Plugin { plugin, transport } => (plugin, transport),
        };

        let contract = self.contract(Some(&plugin)).await;
        let pact = match serde_json::to_string(&contract) {
            Ok(pact) => pact,
            Err(e) => {
                self.core.bridge.release(&plugin).await;
                return Err(e.into());
            }
        };
        let details = match plugin
            .handle()
            .start_mock_server(host, port, false, pact, transport_config)
            .await
        {
            Ok(details) => details,
            Err(e) => {
                self.core.bridge.release(&plugin).await;
                return Err(e);
            }
        };

        let Ok(bound) = u16::try_from(details.port) else {
            let reason = format!("plugin reported invalid port {}", details.port);
            self.core.bridge.release(&plugin).await;
            return Err(PactError::plugin_unavailable(plugin.name(), reason));
        };
        info!(
            session = %self.core.id,
            plugin = %plugin.name(),
            %transport,
            port = bound,
            "session active on plugin transport"
        );
        *self.transport.lock().await = Some(TransportHandle::Plugin {
            plugin,
            transport,
            server_key: details.key,
            port: bound,
        });
        Ok(bound)
    }

    /// Snapshot of every outstanding mismatch: rule failures and unexpected
    /// requests in arrival order, then interactions that never received a
    /// request, then plugin transport results.
    pub async fn mismatches(&self) -> Vec<Mismatch> {
        let (mut mismatches, unexercised) = {
            let ledger = self.core.ledger.lock();
            let unexercised: Vec<Mismatch> = self
                .core
                .interactions
                .iter()
                .enumerate()
                .filter(|(index, interaction)| {
                    interaction.spec_kind() == SpecKind::Http && !ledger.is_exercised(*index)
                })
                .map(|(_, interaction)| Mismatch::missing_request(interaction.description.clone()))
                .collect();
            (ledger.mismatches().to_vec(), unexercised)
        };

        let transport = self.transport.lock().await;
        match transport.as_ref() {
            Some(handle) if handle.is_plugin() => {
                mismatches.extend(handle.plugin_mismatches().await);
            }
            _ => mismatches.extend(unexercised),
        }
        drop(transport);

        mismatches.extend(self.final_mismatches.lock().iter().cloned());
        mismatches
    }

    /// Requests received so far, in arrival order.
    #[must_use]
    pub fn actual_log(&self) -> Vec<RecordedRequest> {
        self.core.ledger.lock().actual_log().to_vec()
    }

    /// Check for mismatches and, if there are none, write the pact file.
    pub async fn verify(&self, pact_dir: &Path) -> VerificationResult {
        let mismatches = self.mismatches().await;
        if !mismatches.is_empty() {
            return VerificationResult::failed(mismatches);
        }
        match self.write_pact_file(pact_dir).await {
            Ok(path) => VerificationResult::passed(path),
            Err(e) => {
                warn!(session = %self.core.id, error = %e, "pact file could not be written");
                VerificationResult::write_failed(&e)
            }
        }
    }

    /// Write the contract for this session's interactions to `pact_dir`.
    ///
    /// # Errors
    ///
    /// [`PactError::SessionAlreadyStopped`] after cleanup,
    /// [`PactError::EmptyContract`] without interactions,
    /// [`PactError::UnverifiedInteractions`] while mismatches are
    /// outstanding and [`PactError::Io`] if the file cannot be written.
    pub async fn write_pact_file(&self, pact_dir: &Path) -> Result<PathBuf> {
        self.state().check_live()?;
        if self.core.interactions.is_empty() {
            return Err(PactError::EmptyContract);
        }
        let outstanding = self.mismatches().await.len();
        if outstanding > 0 {
            return Err(PactError::UnverifiedInteractions { count: outstanding });
        }

        let transport = self.transport.lock().await;
        let transport_plugin = match transport.as_ref() {
            Some(TransportHandle::Plugin { plugin, .. }) => Some(plugin),
            _ => None,
        };
        let contract = self.contract(transport_plugin).await;
        drop(transport);

        ContractWriter.write(&contract, pact_dir).await
    }

    async fn contract(&self, transport_plugin: Option<&PluginRef>) -> Contract {
        let plugins = self.plugins.lock().await;
        plugins.iter().chain(transport_plugin).fold(
            Contract::new(
                self.consumer.clone(),
                self.provider.clone(),
                &self.core.interactions,
                self.config.specification,
            ),
            |contract, plugin| contract.with_plugin(plugin.name(), plugin.version()),
        )
    }

    /// Stop serving, wait up to the configured grace period for in-flight
    /// requests and release every plugin the session holds.
    ///
    /// # Errors
    ///
    /// [`PactError::SessionAlreadyStopped`] if already cleaned up.
    pub async fn cleanup(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.check_live()?;
            *state = SessionState::Stopping;
        }

        let transport = self.transport.lock().await.take();
        if let Some(transport) = transport {
            let last = transport
                .shutdown(&self.core.bridge, self.config.shutdown_grace)
                .await;
            self.final_mismatches.lock().extend(last);
        }
        self.core.closed.send_replace(true);

        let plugins: Vec<PluginRef> = self.plugins.lock().await.drain(..).collect();
        for plugin in &plugins {
            self.core.bridge.release(plugin).await;
        }

        *self.state.lock() = SessionState::Stopped;
        info!(
            session = %self.core.id,
            port = ?self.port(),
            requests = self.core.ledger.lock().actual_log().len(),
            "session stopped"
        );
        Ok(())
    }
}
