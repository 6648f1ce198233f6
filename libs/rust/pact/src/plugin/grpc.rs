//! gRPC transport to plugin processes.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::uri::PathAndQuery;
use rust_common::RetryPolicy;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::transport::{Channel, Endpoint};
use tonic::{IntoRequest, Status};
use tracing::{debug, info, warn};

use super::channel::{
    PLUGIN_INTERFACE_VERSION, PluginChannel, PluginConnection, PluginConnector,
};
use super::manifest::find_plugin;
use super::proto::{
    CompareContentsRequest, CompareContentsResponse, ConfigureInteractionRequest,
    ConfigureInteractionResponse, InitPluginRequest, InitPluginResponse, MockServerRequest,
    MockServerResults, ShutdownMockServerResponse, StartMockServerRequest, StartMockServerResponse,
    paths,
};
use crate::error::{PactError, Result};

/// gRPC channel to a plugin, optionally owning the plugin process.
pub struct GrpcPluginChannel {
    grpc: Grpc<Channel>,
    child: Mutex<Option<Child>>,
}

impl GrpcPluginChannel {
    /// Wrap an established channel.
    #[must_use]
    pub fn new(channel: Channel) -> Self {
        Self {
            grpc: Grpc::new(channel),
            child: Mutex::new(None),
        }
    }

    /// Wrap a channel to a process this engine spawned. The process is
    /// killed on [`close`](PluginChannel::close) or when dropped.
    #[must_use]
    pub fn with_process(channel: Channel, child: Child) -> Self {
        Self {
            grpc: Grpc::new(channel),
            child: Mutex::new(Some(child)),
        }
    }

    async fn unary<Req, Resp>(&self, request: Req, path: &'static str) -> Result<Resp, Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = self.grpc.clone();
        grpc.ready()
            .await
            .map_err(|e| Status::unavailable(format!("plugin channel not ready: {e}")))?;
        let codec = ProstCodec::<Req, Resp>::default();
        let response = grpc
            .unary(request.into_request(), PathAndQuery::from_static(path), codec)
            .await?;
        Ok(response.into_inner())
    }
}

#[async_trait]
impl PluginChannel for GrpcPluginChannel {
    async fn init_plugin(&self, request: InitPluginRequest) -> Result<InitPluginResponse, Status> {
        self.unary(request, paths::INIT_PLUGIN).await
    }

    async fn configure_interaction(
        &self,
        request: ConfigureInteractionRequest,
    ) -> Result<ConfigureInteractionResponse, Status> {
        self.unary(request, paths::CONFIGURE_INTERACTION).await
    }

    async fn compare_contents(
        &self,
        request: CompareContentsRequest,
    ) -> Result<CompareContentsResponse, Status> {
        self.unary(request, paths::COMPARE_CONTENTS).await
    }

    async fn start_mock_server(
        &self,
        request: StartMockServerRequest,
    ) -> Result<StartMockServerResponse, Status> {
        self.unary(request, paths::START_MOCK_SERVER).await
    }

    async fn get_mock_server_results(
        &self,
        request: MockServerRequest,
    ) -> Result<MockServerResults, Status> {
        self.unary(request, paths::GET_MOCK_SERVER_RESULTS).await
    }

    async fn shutdown_mock_server(
        &self,
        request: MockServerRequest,
    ) -> Result<ShutdownMockServerResponse, Status> {
        self.unary(request, paths::SHUTDOWN_MOCK_SERVER).await
    }

    async fn close(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to stop plugin process");
            }
        }
    }
}

/// First line a plugin process prints on stdout.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartupInfo {
    port: u16,
    #[serde(default)]
    server_key: String,
}

/// Launches installed plugins and connects to them over gRPC.
#[derive(Debug, Clone)]
pub struct ProcessPluginConnector {
    plugin_dir: PathBuf,
    startup_timeout: Duration,
    retry: RetryPolicy,
}

impl ProcessPluginConnector {
    /// Connector for plugins installed under `plugin_dir`.
    #[must_use]
    pub fn new(plugin_dir: impl Into<PathBuf>, startup_timeout: Duration) -> Self {
        Self {
            plugin_dir: plugin_dir.into(),
            startup_timeout,
            retry: RetryPolicy::with_defaults(),
        }
    }

    /// Replace the connection retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn read_startup_info(name: &str, child: &mut Child) -> Result<StartupInfo> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PactError::plugin_unavailable(name, "plugin stdout is not captured"))?;
        let mut lines = BufReader::new(stdout).lines();
        let line = lines
            .next_line()
            .await?
            .ok_or_else(|| {
                PactError::plugin_unavailable(name, "plugin exited before reporting its port")
            })?;
        let info: StartupInfo = serde_json::from_str(line.trim()).map_err(|e| {
            PactError::plugin_unavailable(name, format!("unexpected startup line '{line}': {e}"))
        })?;

        let plugin = name.to_string();
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(plugin = %plugin, "{line}");
            }
        });
        Ok(info)
    }

    async fn connect_channel(&self, name: &str, port: u16) -> Result<Channel> {
        let endpoint = Endpoint::from_shared(format!("http://127.0.0.1:{port}"))
            .map_err(|e| PactError::plugin_unavailable(name, e))?
            .connect_timeout(self.startup_timeout);

        self.retry
            .execute(|| {
                let endpoint = endpoint.clone();
                async move {
                    endpoint
                        .connect()
                        .await
                        .map_err(|e| PactError::plugin_unavailable(name, e))
                }
            })
            .await
    }
}

#[async_trait]
impl PluginConnector for ProcessPluginConnector {
    async fn connect(&self, name: &str, version: &str) -> Result<PluginConnection> {
        let installed = find_plugin(&self.plugin_dir, name, version)?;
        let manifest = &installed.manifest;
        if manifest.plugin_interface_version != PLUGIN_INTERFACE_VERSION {
            return Err(PactError::PluginVersionMismatch {
                name: name.to_string(),
                expected: PLUGIN_INTERFACE_VERSION,
                actual: manifest.plugin_interface_version,
            });
        }

        let mut child = Command::new(installed.executable())
            .args(&manifest.args)
            .current_dir(&installed.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PactError::plugin_unavailable(name, format!("failed to start: {e}")))?;

        let info = Self::read_startup_info(name, &mut child).await?;
        info!(
            plugin = %name,
            version = %manifest.version,
            port = info.port,
            server_key = %info.server_key,
            "plugin process started"
        );

        let channel = self.connect_channel(name, info.port).await?;
        Ok(PluginConnection {
            version: manifest.version.clone(),
            interface_version: manifest.plugin_interface_version,
            concurrent_calls: manifest.plugin_config.concurrent_calls,
            channel: Arc::new(GrpcPluginChannel::with_process(channel, child)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_line() {
        let info: StartupInfo =
            serde_json::from_str(r#"{"port": 41729, "serverKey": "a0b1c2"}"#).unwrap();
        assert_eq!(info.port, 41729);
        assert_eq!(info.server_key, "a0b1c2");
    }

    #[tokio::test]
    async fn test_connect_without_install_fails() {
        let root = tempfile::tempdir().unwrap();
        let connector = ProcessPluginConnector::new(root.path(), Duration::from_millis(100));
        let err = connector.connect("protobuf", "0.3.0").await.unwrap_err();
        assert!(matches!(err, PactError::PluginUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_incompatible_manifest_is_not_started() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("protobuf-0.3.0");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(crate::plugin::manifest::MANIFEST_FILE),
            r#"{"name": "protobuf", "version": "0.3.0", "pluginInterfaceVersion": 2,
                "entryPoint": "missing-binary"}"#,
        )
        .unwrap();

        let connector = ProcessPluginConnector::new(root.path(), Duration::from_millis(100));
        let err = connector.connect("protobuf", "0.3.0").await.unwrap_err();
        assert!(
            matches!(err, PactError::PluginVersionMismatch { expected: 1, actual: 2, .. }),
            "{err:?}"
        );
    }
}
