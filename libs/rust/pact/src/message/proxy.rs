//! Tower layer answering message verification requests.
//!
//! Requests to [`MESSAGE_PATH`] are answered from a [`MessageHandlers`]
//! table; everything else reaches the wrapped service untouched.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::future::BoxFuture;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Request, Response, StatusCode};
use serde::Deserialize;
use tower::{Layer, Service};
use tracing::{debug, info, warn};

use super::handlers::MessageHandlers;
use crate::model::ProviderState;

/// Reserved path for message verification requests.
pub const MESSAGE_PATH: &str = "/__messages";

/// Metadata header (`PACT_MESSAGE_METADATA`; header names are
/// case-insensitive and sent lower case).
pub const METADATA_HEADER: &str = "pact_message_metadata";

/// Metadata header understood by older consumers. Always carries the same
/// value as [`METADATA_HEADER`].
pub const LEGACY_METADATA_HEADER: &str = "pact-message-metadata";

/// Content type of every reserved-path response.
pub const MESSAGE_CONTENT_TYPE: &str = "application/json; charset=utf-8";

const MAX_REQUEST_SIZE: usize = 1024 * 1024;

/// Body of a message verification request. Absent or null fields read as
/// empty: a missing description is looked up like any other.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerificationRequest {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    provider_states: Option<Vec<ProviderState>>,
}

/// Layer that adds message verification to a provider's HTTP service.
#[derive(Debug, Clone)]
pub struct MessageDispatchLayer {
    handlers: Arc<MessageHandlers>,
}

impl MessageDispatchLayer {
    /// Layer serving `handlers`.
    #[must_use]
    pub fn new(handlers: MessageHandlers) -> Self {
        Self {
            handlers: Arc::new(handlers),
        }
    }
}

impl<S> Layer<S> for MessageDispatchLayer {
    type Service = MessageDispatch<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MessageDispatch {
            inner,
            handlers: Arc::clone(&self.handlers),
        }
    }
}

/// Service produced by [`MessageDispatchLayer`].
#[derive(Debug, Clone)]
pub struct MessageDispatch<S> {
    inner: S,
    handlers: Arc<MessageHandlers>,
}

impl<S> Service<Request<Body>> for MessageDispatch<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Send + 'static,
    S::Error: Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        if request.uri().path() != MESSAGE_PATH {
            return Box::pin(self.inner.call(request));
        }
        let handlers = Arc::clone(&self.handlers);
        Box::pin(async move { Ok(dispatch(&handlers, request).await) })
    }
}

/// Answer one message verification request.
pub async fn dispatch(handlers: &MessageHandlers, request: Request<Body>) -> Response<Body> {
    let bytes = match axum::body::to_bytes(request.into_body(), MAX_REQUEST_SIZE).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "message request body could not be read");
            return reply(StatusCode::BAD_REQUEST, Body::empty());
        }
    };
    let verification: VerificationRequest = match serde_json::from_slice(&bytes) {
        Ok(verification) => verification,
        Err(e) => {
            warn!(error = %e, "malformed message verification request");
            return reply(StatusCode::BAD_REQUEST, Body::empty());
        }
    };

    let description = verification.description.unwrap_or_default();
    let states = verification.provider_states.unwrap_or_default();
    let description = description.as_str();
    let Some(handler) = handlers.get(description) else {
        info!(description, "no message handler registered");
        return reply(StatusCode::NOT_FOUND, Body::empty());
    };

    let message = match handler(&states) {
        Ok(message) => message,
        Err(e) => {
            warn!(description, error = %e, "message handler failed");
            return reply(StatusCode::SERVICE_UNAVAILABLE, Body::empty());
        }
    };

    let body = match serde_json::to_vec(&message.body) {
        Ok(body) => body,
        Err(e) => {
            warn!(description, error = %e, "message body could not be encoded");
            return reply(StatusCode::SERVICE_UNAVAILABLE, Body::empty());
        }
    };

    let mut response = reply(StatusCode::OK, Body::from(body));
    if !message.metadata.is_empty() {
        match encode_metadata(&message.metadata) {
            Some(value) => {
                let headers = response.headers_mut();
                headers.insert(METADATA_HEADER, value.clone());
                headers.insert(LEGACY_METADATA_HEADER, value);
            }
            None => {
                warn!(description, "message metadata could not be encoded");
                return reply(StatusCode::SERVICE_UNAVAILABLE, Body::empty());
            }
        }
    }

    debug!(
        description,
        states = states.len(),
        metadata = !message.metadata.is_empty(),
        "message generated"
    );
    response
}

/// `base64(JSON(metadata))` as a header value.
fn encode_metadata(metadata: &serde_json::Map<String, serde_json::Value>) -> Option<HeaderValue> {
    let json = serde_json::to_vec(metadata).ok()?;
    HeaderValue::from_str(&BASE64.encode(json)).ok()
}

fn reply(status: StatusCode, body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(MESSAGE_CONTENT_TYPE));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::handlers::{GeneratedMessage, HandlerError};
    use serde_json::{Value, json};
    use std::convert::Infallible;
    use tower::ServiceExt;

    async fn call(request: Request<Body>) -> Response<Body> {
        let inner = tower::service_fn(|_request: Request<Body>| async {
            Ok::<_, Infallible>(Response::new(Body::from("provider")))
        });
        MessageDispatchLayer::new(handlers())
            .layer(inner)
            .oneshot(request)
            .await
            .unwrap()
    }

    fn post(body: &str) -> Request<Body> {
        Request::post(MESSAGE_PATH)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn read(response: Response<Body>) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    fn handlers() -> MessageHandlers {
        MessageHandlers::new()
            .with_handler("some interaction", |_| Ok(GeneratedMessage::new(json!({"name": "x"}))))
            .with_handler("with metadata", |_| {
                Ok(GeneratedMessage::new(json!({})).with_metadata("queue", json!("users")))
            })
            .with_handler("broken", |_| Err(HandlerError::new("database down")))
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let response =
            call(post(r#"{"description":"some interaction","providerStates":[]}"#)).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], MESSAGE_CONTENT_TYPE);
        assert!(response.headers().get(METADATA_HEADER).is_none());
        assert!(response.headers().get(LEGACY_METADATA_HEADER).is_none());
        let body: Value = serde_json::from_slice(&read(response).await).unwrap();
        assert_eq!(body, json!({"name": "x"}));
    }

    #[tokio::test]
    async fn test_metadata_headers() {
        let response = call(post(r#"{"description":"with metadata"}"#)).await;

        let primary = response.headers()[METADATA_HEADER].to_str().unwrap().to_string();
        assert_eq!(primary, response.headers()[LEGACY_METADATA_HEADER]);
        let decoded: Value = serde_json::from_slice(&BASE64.decode(primary).unwrap()).unwrap();
        assert_eq!(decoded, json!({"queue": "users"}));
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let cases = [
            ("not json", StatusCode::BAD_REQUEST),
            (r#"{"description":["list"]}"#, StatusCode::BAD_REQUEST),
            (r#"{"providerStates":[]}"#, StatusCode::NOT_FOUND),
            (r#"{"description":"unknown"}"#, StatusCode::NOT_FOUND),
            (r#"{"description":"broken"}"#, StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (body, status) in cases {
            let response = call(post(body)).await;
            assert_eq!(response.status(), status, "{body}");
            assert!(read(response).await.is_empty());
        }
    }

    #[tokio::test]
    async fn test_null_provider_states_read_as_empty() {
        let response =
            call(post(r#"{"description":"some interaction","providerStates":null}"#)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(&read(response).await).unwrap();
        assert_eq!(body, json!({"name": "x"}));
    }

    #[tokio::test]
    async fn test_other_paths_pass_through() {
        let request = Request::get("/users").body(Body::empty()).unwrap();
        let response = call(request).await;
        assert_eq!(read(response).await, b"provider");
    }
}
