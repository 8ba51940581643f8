//! Core relay service implementation.
//!
//! One [`RelayService`] handles the full request lifecycle: answer CORS
//! preflights locally, rebuild the request for the fixed upstream, open a
//! fresh connection for it, and relay the response back. Server-sent-event
//! streams are relayed chunk-by-chunk; everything else is a single
//! buffered write.
//!
//! # Request Flow
//!
//! ```text
//! Request<Incoming> ──► OPTIONS? ──► preflight_response()
//!         │
//!         ▼
//!   build_outbound_headers() ──► forward to upstream (fresh connection)
//!         │
//!         ▼
//!   filter_response_headers() ──► is_event_stream()?
//!         │                              │
//!   streaming relay                buffered relay
//!   (frame-by-frame)               (collect, single write)
//! ```

use crate::config::ProxyConfig;
use crate::error::{ProxyError, ProxyResult, map_client_error};
use crate::headers::{build_outbound_headers, filter_response_headers, is_event_stream};
use crate::timeout::IdleTimeoutBody;
use bytes::Bytes;
use futures_util::StreamExt;
use http::Uri;
use http_body_util::{BodyExt, BodyStream, Empty, Full, StreamBody};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode, header};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::TokioExecutor;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tower::Service;
use tracing::{debug, error, info};

/// Type alias for the client's streaming body type.
type ClientBody =
    http_body_util::combinators::BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// Unified response body type: streamed for event streams, buffered
/// otherwise. Both are boxed for a single return type.
pub type RelayBody = http_body_util::combinators::BoxBody<Bytes, ProxyError>;

/// Methods the relay allows cross-origin, advertised on preflight.
const CORS_ALLOW_METHODS: &str = "GET, POST, OPTIONS";

/// The relay service.
///
/// Holds the immutable configuration and a TLS-capable HTTP client. The
/// client's idle pool is disabled, so every inbound request opens and
/// exclusively owns one upstream connection.
pub struct RelayService {
    client: Client<HttpsConnector<HttpConnector>, ClientBody>,
    config: Arc<ProxyConfig>,
}

impl Clone for RelayService {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl RelayService {
    /// Create a new relay service for the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::Internal` if the rustls crypto provider cannot
    /// be installed, or `ProxyError::Connection` if the native TLS root
    /// certificates cannot be loaded.
    pub fn new(config: Arc<ProxyConfig>) -> ProxyResult<Self> {
        // Install default crypto provider for rustls exactly once; the
        // result is captured for error reporting without panicking.
        static RUSTLS_INIT: std::sync::OnceLock<Result<(), ()>> = std::sync::OnceLock::new();
        let init_result = RUSTLS_INIT.get_or_init(|| {
            rustls::crypto::ring::default_provider()
                .install_default()
                .map_err(|_| ())
        });
        if init_result.is_err() {
            return Err(ProxyError::Internal(
                "failed to install rustls crypto provider".into(),
            ));
        }

        let mut http_connector = HttpConnector::new();
        http_connector.set_nodelay(config.tcp_nodelay);

        let https_connector = HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|e| ProxyError::Connection(format!("failed to load native TLS roots: {e}")))?
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http_connector);

        // pool_max_idle_per_host(0): no connection reuse across requests.
        let client = Client::builder(TokioExecutor::new())
            .http1_preserve_header_case(true)
            .http1_title_case_headers(true)
            .pool_max_idle_per_host(0)
            .build(https_connector);

        Ok(Self { client, config })
    }

    /// Get a reference to the relay configuration.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Handle one inbound request end to end.
    pub async fn handle_request(&self, req: Request<Incoming>) -> ProxyResult<Response<RelayBody>> {
        if req.method() == Method::OPTIONS {
            debug!(uri = %req.uri(), "CORS preflight answered locally");
            return preflight_response();
        }

        let target = self.upstream_uri(req.uri())?;

        info!(
            method = %req.method(),
            uri = %req.uri(),
            target = %target,
            "Relaying request"
        );

        let (parts, inbound_body) = req.into_parts();

        let mut builder = Request::builder()
            .method(parts.method.clone())
            .uri(&target)
            .version(parts.version);

        if let Some(headers) = builder.headers_mut() {
            *headers = build_outbound_headers(&parts.headers, &self.config)?;
        }

        // Forward the inbound body as it arrives rather than buffering it.
        let body_stream = BodyStream::new(inbound_body);
        let mapped_stream = body_stream.map(|result| {
            result.map_err(|e| -> Box<dyn std::error::Error + Send + Sync> {
                Box::new(std::io::Error::other(format!("body stream error: {e}")))
            })
        });
        let outbound_body: ClientBody = BodyExt::boxed(StreamBody::new(mapped_stream));

        let upstream_req = builder.body(outbound_body).map_err(|e| {
            error!(error = %e, "Failed to build upstream request");
            ProxyError::Internal(format!("failed to build upstream request: {e}"))
        })?;

        let upstream_res = timeout(
            self.config.upstream_timeout,
            self.client.request(upstream_req),
        )
        .await
        .map_err(|_| {
            ProxyError::Timeout(format!(
                "no response from upstream within {:?}",
                self.config.upstream_timeout
            ))
        })?
        .map_err(map_client_error)?;

        let (mut parts, body) = upstream_res.into_parts();
        filter_response_headers(&mut parts.headers);

        let relay_body = if is_event_stream(&parts.headers) {
            debug!(status = %parts.status, "Event-stream response, forwarding chunks as they arrive");
            relay_streaming(body, self.config.upstream_timeout)
        } else {
            debug!(status = %parts.status, "Buffering response body");
            relay_buffered(body, self.config.upstream_timeout).await?
        };

        Ok(Response::from_parts(parts, relay_body))
    }

    /// Build the upstream URI for an inbound request target, forwarding
    /// path and query verbatim.
    fn upstream_uri(&self, uri: &Uri) -> ProxyResult<Uri> {
        let scheme = if self.config.upstream_tls {
            "https"
        } else {
            "http"
        };
        let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

        format!(
            "{scheme}://{}:{}{path}",
            self.config.upstream_host, self.config.upstream_port
        )
        .parse()
        .map_err(|e| ProxyError::InvalidUri(format!("failed to build upstream URI: {e}")))
    }
}

impl Service<Request<Incoming>> for RelayService {
    type Response = Response<RelayBody>;
    type Error = ProxyError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { service.handle_request(req).await })
    }
}

/// Answer a CORS preflight without contacting the upstream.
fn preflight_response() -> ProxyResult<Response<RelayBody>> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(header::ACCESS_CONTROL_ALLOW_METHODS, CORS_ALLOW_METHODS)
        .header(header::ACCESS_CONTROL_ALLOW_HEADERS, "*")
        .body(
            Empty::<Bytes>::new()
                .map_err(|never: Infallible| match never {})
                .boxed(),
        )
        .map_err(|e| ProxyError::Internal(format!("failed to build preflight response: {e}")))
}

/// Relay an event-stream body frame-by-frame.
///
/// Each upstream frame is written to the caller as soon as it arrives;
/// the idle-timeout wrapper fails the stream if the upstream stalls.
fn relay_streaming(body: Incoming, idle: Duration) -> RelayBody {
    let guarded = IdleTimeoutBody::new(body, idle);
    let stream = BodyStream::new(guarded).map(|result| result.map_err(relay_stream_error));
    BodyExt::boxed(StreamBody::new(stream))
}

/// Relay a regular body: read it to completion, then hand it to the
/// caller as a single unit.
async fn relay_buffered(body: Incoming, limit: Duration) -> ProxyResult<RelayBody> {
    let collected = timeout(limit, body.collect())
        .await
        .map_err(|_| ProxyError::Timeout(format!("upstream body not complete within {limit:?}")))?
        .map_err(|e| ProxyError::Connection(format!("failed reading upstream body: {e}")))?;

    Ok(Full::new(collected.to_bytes())
        .map_err(|never: Infallible| match never {})
        .boxed())
}

/// Classify a mid-stream body error.
fn relay_stream_error(e: Box<dyn std::error::Error + Send + Sync>) -> ProxyError {
    if let Some(io) = e.downcast_ref::<std::io::Error>()
        && io.kind() == std::io::ErrorKind::TimedOut
    {
        return ProxyError::Timeout(format!("body stream: {io}"));
    }
    ProxyError::Connection(format!("body stream error: {e}"))
}
