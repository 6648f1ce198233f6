//! Built-in HTTP transport.
//!
//! Every request goes through a single fallback handler: it is recorded,
//! matched against the session's interactions, compared and answered with
//! the matched interaction's reply.

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use super::SessionCore;
use super::ledger::RecordedRequest;
use crate::config::CandidatePolicy;
use crate::error::Result;
use crate::matchers::compare_request;
use crate::model::{Interaction, InteractionKind, Mismatch, PluginContent, RuleKind};

/// Request header naming the provider states a caller expects.
pub const PROVIDER_STATE_HEADER: &str = "x-pact-provider-state";

/// Largest request body the mock server reads.
const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// A running HTTP listener.
pub(crate) struct HttpServer {
    port: u16,
    shutdown: Shutdown,
    task: JoinHandle<std::io::Result<()>>,
}

enum Shutdown {
    Plain(oneshot::Sender<()>),
    #[cfg(feature = "tls")]
    Tls(axum_server::Handle),
}

impl HttpServer {
    /// Bound port.
    pub(crate) const fn port(&self) -> u16 {
        self.port
    }

    /// Stop accepting connections and wait up to `grace` for in-flight
    /// requests. Requests still running afterwards are aborted.
    pub(crate) async fn shutdown(self, grace: Duration) {
        match self.shutdown {
            Shutdown::Plain(tx) => {
                let _ = tx.send(());
            }
            #[cfg(feature = "tls")]
            Shutdown::Tls(handle) => handle.graceful_shutdown(Some(grace)),
        }

        let mut task = self.task;
        match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(Ok(()))) => debug!(port = self.port, "listener drained"),
            Ok(Ok(Err(e))) => error!(port = self.port, error = %e, "listener failed"),
            Ok(Err(e)) => error!(port = self.port, error = %e, "listener task panicked"),
            Err(_) => {
                warn!(
                    port = self.port,
                    ?grace,
                    "grace period elapsed, aborting in-flight requests"
                );
                task.abort();
            }
        }
    }
}

fn router(core: Arc<SessionCore>) -> Router {
    Router::new().fallback(handle_request).with_state(core)
}

/// Bind `addr` and serve plain HTTP.
pub(crate) async fn serve(core: Arc<SessionCore>, addr: &str) -> Result<HttpServer> {
    let listener = TcpListener::bind(addr).await?;
    let port = listener.local_addr()?.port();
    let (tx, rx) = oneshot::channel::<()>();

    let app = router(core);
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await
    });

    info!(port, "mock server listening on http");
    Ok(HttpServer {
        port,
        shutdown: Shutdown::Plain(tx),
        task,
    })
}

/// Bind `addr` and serve HTTPS with the configured PEM files.
#[cfg(feature = "tls")]
pub(crate) async fn serve_tls(
    core: Arc<SessionCore>,
    addr: &str,
    tls: &crate::config::TlsConfig,
) -> Result<HttpServer> {
    use axum_server::tls_rustls::RustlsConfig;

    let socket_addr = tokio::net::lookup_host(addr).await?.next().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, format!("cannot resolve {addr}"))
    })?;
    let config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path).await?;

    let handle = axum_server::Handle::new();
    let app = router(core);
    let server = axum_server::bind_rustls(socket_addr, config)
        .handle(handle.clone())
        .serve(app.into_make_service());
    let task = tokio::spawn(server);

    let Some(bound) = handle.listening().await else {
        let err = match task.await {
            Ok(Err(e)) => e,
            _ => std::io::Error::other("TLS listener stopped before binding"),
        };
        return Err(err.into());
    };

    info!(port = bound.port(), "mock server listening on https");
    Ok(HttpServer {
        port: bound.port(),
        shutdown: Shutdown::Tls(handle),
        task,
    })
}

async fn handle_request(State(core): State<Arc<SessionCore>>, request: Request) -> Response {
    let correlation_id = Uuid::new_v4();
    let span = info_span!(
        "mock_request",
        session = %core.id,
        correlation_id = %correlation_id,
        method = %request.method(),
        path = %request.uri().path(),
    );
    let mut closed = core.closed.subscribe();
    let shutdown = async move {
        let _ = closed.wait_for(|closed| *closed).await;
    };
    tokio::select! {
        response = process(core, correlation_id, request).instrument(span) => response,
        () = shutdown => {
            debug!(%correlation_id, "request aborted by session shutdown");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

async fn process(core: Arc<SessionCore>, id: Uuid, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BODY_SIZE).await {
        Ok(bytes) => bytes.to_vec(),
        Err(e) => {
            warn!(error = %e, "request body could not be read");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    let mut recorded = RecordedRequest {
        id,
        method: parts.method.as_str().to_ascii_uppercase(),
        path: decode_path(parts.uri.path()),
        query: parse_query(parts.uri.query()),
        headers: collect_headers(&parts.headers),
        content_type: parts
            .headers
            .get(CONTENT_TYPE)
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned()),
        body,
        matched: None,
    };

    let states = recorded.headers.get(PROVIDER_STATE_HEADER).map(String::as_str);
    let selected = select_candidate(
        &core.interactions,
        &recorded.method,
        &recorded.path,
        states,
        core.policy,
    );

    let Some(index) = selected else {
        debug!("no interaction matches request");
        let mismatch = Mismatch::unexpected_request(&recorded.method, &recorded.path);
        let reply = unexpected_reply(&recorded);
        core.ledger.lock().record(recorded, None, vec![mismatch]);
        return reply;
    };

    let interaction = &core.interactions[index];
    let mismatches = compare(&core, interaction, &recorded).await;
    debug!(
        description = %interaction.description,
        mismatches = mismatches.len(),
        "request matched"
    );

    recorded.matched = Some(interaction.description.clone());
    let reply = build_reply(interaction);
    core.ledger.lock().record(recorded, Some(index), mismatches);
    reply
}

async fn compare(
    core: &SessionCore,
    interaction: &Interaction,
    recorded: &RecordedRequest,
) -> Vec<Mismatch> {
    let (mut mismatches, expected_content) = match &interaction.kind {
        InteractionKind::Http { request, .. } => (
            compare_request(
                core.engine.as_ref(),
                &interaction.description,
                request,
                &recorded.view(),
            ),
            request.plugin_content.as_ref(),
        ),
        InteractionKind::Plugin(plugin) => (Vec::new(), plugin.request.plugin_content.as_ref()),
        InteractionKind::Message(_) => (Vec::new(), None),
    };

    if let Some(expected) = expected_content {
        mismatches.extend(
            compare_plugin_content(core, &interaction.description, expected, recorded).await,
        );
    }
    mismatches
}

/// Delegate body comparison to the content matcher plugin for the
/// expected content type. Plugin failures become mismatches.
async fn compare_plugin_content(
    core: &SessionCore,
    description: &str,
    expected: &PluginContent,
    recorded: &RecordedRequest,
) -> Vec<Mismatch> {
    let Some(matcher) = core.bridge.content_matcher(&expected.content_type).await else {
        return vec![Mismatch::plugin_failure(
            description,
            "content matcher plugin",
            format!("no loaded plugin matches '{}'", expected.content_type),
        )];
    };

    let actual = PluginContent::new(
        recorded
            .content_type
            .clone()
            .unwrap_or_else(|| expected.content_type.clone()),
        recorded.body.clone(),
    );
    match matcher.compare_contents(expected, &actual, false).await {
        Ok(differences) => differences
            .into_iter()
            .map(|difference| {
                let actual = difference.actual.unwrap_or(difference.mismatch);
                Mismatch::new(
                    description,
                    body_selector(&difference.path),
                    difference.expected.map_or(Value::Null, Value::String),
                    Value::String(actual),
                    Some(RuleKind::Plugin),
                )
            })
            .collect(),
        Err(e) => {
            warn!(plugin = %matcher.name(), error = %e, "plugin comparison failed");
            vec![Mismatch::plugin_failure(description, "plugin comparison", e)]
        }
    }
}

/// Map a plugin-reported path onto the request body selector space.
fn body_selector(path: &str) -> String {
    let path = path.trim();
    match path {
        "" | "$" => "$.body".to_string(),
        _ => match path.strip_prefix('$') {
            Some(rest) => format!("$.body{rest}"),
            None => format!("$.body.{path}"),
        },
    }
}

/// Index of the interaction that should answer a request.
///
/// Candidates share method and path. With [`CandidatePolicy::ProviderState`]
/// the first candidate declaring one of the comma separated `states` wins;
/// otherwise, and when no candidate declares one, insertion order decides.
#[must_use]
pub fn select_candidate(
    interactions: &[Interaction],
    method: &str,
    path: &str,
    states: Option<&str>,
    policy: CandidatePolicy,
) -> Option<usize> {
    let candidates: Vec<usize> = interactions
        .iter()
        .enumerate()
        .filter(|(_, interaction)| accepts(interaction, method, path))
        .map(|(index, _)| index)
        .collect();

    if policy == CandidatePolicy::ProviderState && candidates.len() > 1 {
        let requested: HashSet<&str> = states
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|state| !state.is_empty())
            .collect();
        if let Some(index) = candidates.iter().copied().find(|&index| {
            interactions[index]
                .state_names()
                .any(|name| requested.contains(name))
        }) {
            return Some(index);
        }
    }
    candidates.first().copied()
}

fn accepts(interaction: &Interaction, method: &str, path: &str) -> bool {
    match &interaction.kind {
        InteractionKind::Http { request, .. } => {
            request.method.eq_ignore_ascii_case(method) && request.path == path
        }
        // Plugin exchanges are addressed like gRPC: POST /<service>
        InteractionKind::Plugin(plugin) => {
            method.eq_ignore_ascii_case("POST")
                && plugin.service.as_deref().is_some_and(|service| {
                    !service.is_empty()
                        && path.trim_start_matches('/') == service.trim_start_matches('/')
                })
        }
        InteractionKind::Message(_) => false,
    }
}

/// Percent-decode a request path so it compares equal to declared paths.
fn decode_path(path: &str) -> String {
    percent_encoding::percent_decode_str(path)
        .decode_utf8_lossy()
        .into_owned()
}

fn parse_query(query: Option<&str>) -> BTreeMap<String, Vec<String>> {
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in url::form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
        params.entry(name.into_owned()).or_default().push(value.into_owned());
    }
    params
}

fn collect_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut collected: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        collected
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    collected
}

fn unexpected_reply(recorded: &RecordedRequest) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": "Unexpected request",
            "method": recorded.method,
            "path": recorded.path,
        })),
    )
        .into_response()
}

fn build_reply(interaction: &Interaction) -> Response {
    let reply = interaction.synthesize_reply();
    let mut builder = Response::builder().status(reply.status);
    for (name, value) in &reply.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(content_type) = &reply.content_type {
        builder = builder.header(CONTENT_TYPE, content_type.as_str());
    }
    builder.body(Body::from(reply.body)).unwrap_or_else(|e| {
        error!(
            description = %interaction.description,
            error = %e,
            "interaction reply is not valid HTTP"
        );
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}

/// Local address for a bind request such as `127.0.0.1:0`.
pub(crate) fn bind_address(host: &str, port: u16) -> String {
    match host.parse::<std::net::IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, port).to_string(),
        Err(_) if host.is_empty() => format!("127.0.0.1:{port}"),
        Err(_) => format!("{host}:{port}"),
    }
}
