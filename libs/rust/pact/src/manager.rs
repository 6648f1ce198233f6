//! Port-keyed session control surface.
//!
//! Callers that only keep the port number around (test harnesses, FFI
//! shims) drive sessions through a [`SessionManager`]. Each port maps to
//! exactly one live session.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{PactError, Result};
use crate::model::Mismatch;
use crate::plugin::PluginBridge;
use crate::registry::InteractionRegistry;
use crate::session::MockServerSession;
use crate::session::ledger::RecordedRequest;
use crate::verification::VerificationResult;

/// Owns running sessions and a shared plugin bridge.
#[derive(Debug)]
pub struct SessionManager {
    config: EngineConfig,
    bridge: Arc<PluginBridge>,
    sessions: RwLock<HashMap<u16, Arc<MockServerSession>>>,
}

impl SessionManager {
    /// Manager launching plugins from `config.plugin_dir`.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let bridge = Arc::new(PluginBridge::from_config(&config));
        Self::with_bridge(bridge, config)
    }

    /// Manager sharing an existing bridge.
    #[must_use]
    pub fn with_bridge(bridge: Arc<PluginBridge>, config: EngineConfig) -> Self {
        Self {
            config,
            bridge,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Plugin bridge shared by every session.
    #[must_use]
    pub const fn bridge(&self) -> &Arc<PluginBridge> {
        &self.bridge
    }

    /// Start an HTTP session for the interactions of a pact document.
    ///
    /// # Errors
    ///
    /// Fails if the document is malformed, an interaction is invalid or the
    /// address cannot be bound.
    pub async fn create_session(
        &self,
        pact_json: &str,
        bind_address: &str,
        tls: bool,
    ) -> Result<u16> {
        let registry = InteractionRegistry::from_pact_json(pact_json)?;
        self.create_session_from_registry(registry, bind_address, tls).await
    }

    /// Start an HTTP session for a registry.
    ///
    /// # Errors
    ///
    /// Fails if the address cannot be bound or TLS is not configured.
    pub async fn create_session_from_registry(
        &self,
        registry: InteractionRegistry,
        bind_address: &str,
        tls: bool,
    ) -> Result<u16> {
        let session = self.session_for(registry);
        let port = session.start(bind_address, tls).await?;
        self.register(port, session).await
    }

    /// Start a session on a named transport.
    ///
    /// # Errors
    ///
    /// Fails with [`PactError::UnknownTransport`] if no loaded plugin provides
    /// the transport, or with the plugin's error if it cannot serve.
    pub async fn start_transport(
        &self,
        registry: InteractionRegistry,
        transport: &str,
        host: &str,
        port: u16,
        transport_config: &Map<String, Value>,
    ) -> Result<u16> {
        let session = self.session_for(registry);
        let port = session
            .start_transport(transport, host, port, transport_config)
            .await?;
        self.register(port, session).await
    }

    fn session_for(&self, registry: InteractionRegistry) -> Arc<MockServerSession> {
        Arc::new(MockServerSession::new(
            registry,
            Arc::clone(&self.bridge),
            self.config.clone(),
        ))
    }

    async fn register(&self, port: u16, session: Arc<MockServerSession>) -> Result<u16> {
        let occupied = {
            let mut sessions = self.sessions.write();
            if sessions.contains_key(&port) {
                true
            } else {
                sessions.insert(port, Arc::clone(&session));
                false
            }
        };
        if occupied {
            warn!(port, "port already bound to another session");
            if let Err(e) = session.cleanup().await {
                warn!(port, error = %e, "cleanup of rejected session failed");
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                format!("port {port} is already bound to a session"),
            )
            .into());
        }
        debug!(port, session = %session.id(), "session registered");
        Ok(port)
    }

    /// Session bound to `port`.
    ///
    /// # Errors
    ///
    /// [`PactError::UnknownSession`] if no session is bound to the port.
    pub fn session(&self, port: u16) -> Result<Arc<MockServerSession>> {
        self.sessions
            .read()
            .get(&port)
            .cloned()
            .ok_or(PactError::UnknownSession { port })
    }

    /// Ports with a live session.
    #[must_use]
    pub fn ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.sessions.read().keys().copied().collect();
        ports.sort_unstable();
        ports
    }

    /// Outstanding mismatches of the session on `port`.
    ///
    /// # Errors
    ///
    /// [`PactError::UnknownSession`] if no session is bound to the port.
    pub async fn mismatches(&self, port: u16) -> Result<Vec<Mismatch>> {
        Ok(self.session(port)?.mismatches().await)
    }

    /// Requests received by the session on `port`.
    ///
    /// # Errors
    ///
    /// [`PactError::UnknownSession`] if no session is bound to the port.
    pub fn actual_log(&self, port: u16) -> Result<Vec<RecordedRequest>> {
        Ok(self.session(port)?.actual_log())
    }

    /// Verify the session on `port` and write its pact file on success.
    ///
    /// # Errors
    ///
    /// [`PactError::UnknownSession`] if no session is bound to the port.
    pub async fn verify(&self, port: u16, pact_dir: &Path) -> Result<VerificationResult> {
        Ok(self.session(port)?.verify(pact_dir).await)
    }

    /// Write the pact file of the session on `port`.
    ///
    /// # Errors
    ///
    /// [`PactError::UnknownSession`] or any error of
    /// [`MockServerSession::write_pact_file`].
    pub async fn write_pact_file(&self, port: u16, pact_dir: &Path) -> Result<PathBuf> {
        self.session(port)?.write_pact_file(pact_dir).await
    }

    /// Stop the session on `port` and forget it.
    ///
    /// # Errors
    ///
    /// [`PactError::UnknownSession`] if no session is bound to the port.
    pub async fn cleanup(&self, port: u16) -> Result<()> {
        let session = self
            .sessions
            .write()
            .remove(&port)
            .ok_or(PactError::UnknownSession { port })?;
        session.cleanup().await
    }

    /// Stop every session.
    pub async fn cleanup_all(&self) {
        let sessions: Vec<(u16, Arc<MockServerSession>)> = self.sessions.write().drain().collect();
        for (port, session) in sessions {
            if let Err(e) = session.cleanup().await {
                warn!(port, error = %e, "session cleanup failed");
            }
        }
    }
}
