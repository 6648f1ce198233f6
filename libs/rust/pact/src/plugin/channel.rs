//! RPC boundary to a plugin.

use std::sync::Arc;

use async_trait::async_trait;
use tonic::Status;

use super::proto::{
    CompareContentsRequest, CompareContentsResponse, ConfigureInteractionRequest,
    ConfigureInteractionResponse, InitPluginRequest, InitPluginResponse, MockServerRequest,
    MockServerResults, ShutdownMockServerResponse, StartMockServerRequest, StartMockServerResponse,
};
use crate::error::Result;

/// Plugin interface version this engine speaks.
pub const PLUGIN_INTERFACE_VERSION: u32 = 1;

/// Request/response channel to one plugin.
///
/// Every call is an out-of-process RPC: it may be slow, and failures are
/// reported as a gRPC [`Status`].
#[async_trait]
pub trait PluginChannel: Send + Sync {
    /// Handshake.
    async fn init_plugin(&self, request: InitPluginRequest) -> Result<InitPluginResponse, Status>;

    /// Generate contents from a template.
    async fn configure_interaction(
        &self,
        request: ConfigureInteractionRequest,
    ) -> Result<ConfigureInteractionResponse, Status>;

    /// Compare an actual body against an expected one.
    async fn compare_contents(
        &self,
        request: CompareContentsRequest,
    ) -> Result<CompareContentsResponse, Status>;

    /// Start a plugin-served mock server.
    async fn start_mock_server(
        &self,
        request: StartMockServerRequest,
    ) -> Result<StartMockServerResponse, Status>;

    /// Current results of a plugin-served mock server.
    async fn get_mock_server_results(
        &self,
        request: MockServerRequest,
    ) -> Result<MockServerResults, Status>;

    /// Stop a plugin-served mock server.
    async fn shutdown_mock_server(
        &self,
        request: MockServerRequest,
    ) -> Result<ShutdownMockServerResponse, Status>;

    /// Tear down the channel and any process behind it.
    async fn close(&self) {}
}

/// A connected plugin, before the handshake.
pub struct PluginConnection {
    /// Version that was connected
    pub version: String,
    /// Interface version declared by the plugin
    pub interface_version: u32,
    /// Whether calls may be issued concurrently
    pub concurrent_calls: bool,
    /// RPC channel
    pub channel: Arc<dyn PluginChannel>,
}

impl std::fmt::Debug for PluginConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginConnection")
            .field("version", &self.version)
            .field("interface_version", &self.interface_version)
            .field("concurrent_calls", &self.concurrent_calls)
            .finish_non_exhaustive()
    }
}

/// Locates and connects plugins.
#[async_trait]
pub trait PluginConnector: Send + Sync {
    /// Start or attach to `name` at `version` (empty for the latest install).
    async fn connect(&self, name: &str, version: &str) -> Result<PluginConnection>;
}
