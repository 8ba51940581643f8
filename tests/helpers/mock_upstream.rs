//! Mock upstream server for integration testing.
//!
//! Records every request it receives (spy pattern) and responds with a
//! configurable behavior: a fixed body, a delayed server-sent-event
//! stream, or a stalled response for timeout testing.

#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::Response;
use bytes::Bytes;
use futures_util::stream;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// A request as seen by the upstream.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
enum MockBehavior {
    Fixed {
        status: u16,
        content_type: String,
        extra_headers: Vec<(String, String)>,
        body: Bytes,
    },
    Sse {
        chunks: usize,
        chunk_delay: Duration,
    },
    Stall {
        delay: Duration,
    },
}

/// Builder for the mock upstream.
#[derive(Debug, Clone)]
pub struct MockUpstream {
    behavior: MockBehavior,
}

impl MockUpstream {
    /// Respond to every request with a fixed status, content-type and body.
    #[must_use]
    pub fn with_body(status: u16, content_type: &str, body: impl Into<Bytes>) -> Self {
        Self {
            behavior: MockBehavior::Fixed {
                status,
                content_type: content_type.to_string(),
                extra_headers: Vec::new(),
                body: body.into(),
            },
        }
    }

    /// Add an extra response header (fixed-body mode only).
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let MockBehavior::Fixed { extra_headers, .. } = &mut self.behavior {
            extra_headers.push((name.to_string(), value.to_string()));
        }
        self
    }

    /// Respond with an event stream: the first event immediately, then
    /// one more per `chunk_delay` until `chunks` events have been sent.
    #[must_use]
    pub fn with_sse(chunks: usize, chunk_delay: Duration) -> Self {
        Self {
            behavior: MockBehavior::Sse { chunks, chunk_delay },
        }
    }

    /// Sleep for `delay` before responding, for timeout testing.
    #[must_use]
    pub fn with_stall(delay: Duration) -> Self {
        Self {
            behavior: MockBehavior::Stall { delay },
        }
    }

    /// Start the mock server and return its address and handle.
    pub async fn start(self) -> (SocketAddr, MockHandle) {
        let state = Arc::new(MockState {
            behavior: self.behavior,
            request_count: RwLock::new(0),
            last_request: RwLock::new(None),
        });

        let app = Router::new().fallback(capture).with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (
            addr,
            MockHandle {
                state,
                _handle: handle,
            },
        )
    }
}

#[derive(Debug)]
struct MockState {
    behavior: MockBehavior,
    request_count: RwLock<u32>,
    last_request: RwLock<Option<RecordedRequest>>,
}

/// Handle to the running mock server.
pub struct MockHandle {
    state: Arc<MockState>,
    _handle: JoinHandle<()>,
}

impl MockHandle {
    /// Number of requests received.
    pub async fn request_count(&self) -> u32 {
        *self.state.request_count.read().await
    }

    /// The most recently received request.
    pub async fn last_request(&self) -> Option<RecordedRequest> {
        self.state.last_request.read().await.clone()
    }
}

/// Record the request, then respond per the configured behavior.
async fn capture(State(state): State<Arc<MockState>>, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let body_bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap_or_default();

    let recorded = RecordedRequest {
        method: parts.method.to_string(),
        path: parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string()),
        headers: parts
            .headers
            .iter()
            .map(|(n, v)| {
                (
                    n.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).to_string(),
                )
            })
            .collect(),
        body: body_bytes.to_vec(),
    };

    {
        let mut count = state.request_count.write().await;
        *count += 1;
    }
    {
        let mut last = state.last_request.write().await;
        *last = Some(recorded);
    }

    match &state.behavior {
        MockBehavior::Fixed {
            status,
            content_type,
            extra_headers,
            body,
        } => {
            let mut builder = Response::builder()
                .status(*status)
                .header("content-type", content_type.as_str());
            for (name, value) in extra_headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            builder.body(Body::from(body.clone())).unwrap()
        }

        MockBehavior::Sse { chunks, chunk_delay } => {
            let chunks = *chunks;
            let delay = *chunk_delay;
            let events = stream::unfold(0usize, move |i| async move {
                if i >= chunks {
                    return None;
                }
                if i > 0 {
                    tokio::time::sleep(delay).await;
                }
                let event = Bytes::from(format!("data: token_{i}\n\n"));
                Some((Ok::<_, std::convert::Infallible>(event), i + 1))
            });

            Response::builder()
                .status(200)
                .header("content-type", "text/event-stream")
                .header("cache-control", "no-cache")
                .body(Body::from_stream(events))
                .unwrap()
        }

        MockBehavior::Stall { delay } => {
            tokio::time::sleep(*delay).await;
            Response::builder()
                .status(200)
                .header("content-type", "text/plain")
                .body(Body::from("late"))
                .unwrap()
        }
    }
}
