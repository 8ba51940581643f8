//! Test helpers for integration tests.
//!
//! Provides a configurable mock upstream server and a relay spawner so
//! each test drives a real proxy instance over real sockets.

#![allow(dead_code)] // Not every test file uses every helper

pub mod mock_upstream;

pub use mock_upstream::*;

use anthropic_proxy::config::ProxyConfig;
use anthropic_proxy::relay::RelayService;
use http_body_util::BodyExt;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Relay configuration pointed at a local plain-HTTP mock upstream.
pub fn relay_config(upstream: SocketAddr) -> ProxyConfig {
    ProxyConfig {
        upstream_host: upstream.ip().to_string(),
        upstream_port: upstream.port(),
        upstream_tls: false,
        api_key: None,
        upstream_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

/// Spawn a relay on an ephemeral port and return its address.
///
/// Mirrors the production accept loop: one task per connection, errors
/// converted to HTTP responses at the per-request boundary.
pub async fn spawn_relay(config: ProxyConfig) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let relay = RelayService::new(Arc::new(config)).expect("failed to create relay service");

    tokio::spawn(async move {
        loop {
            let Ok((stream, _peer)) = listener.accept().await else {
                break;
            };
            let relay = relay.clone();

            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let svc = hyper::service::service_fn(move |req| {
                    let relay = relay.clone();
                    async move {
                        let result: Result<_, Infallible> = match relay.handle_request(req).await {
                            Ok(response) => Ok(response),
                            Err(e) => Ok(e.to_response().map(|body| {
                                body.map_err(|never: Infallible| match never {}).boxed()
                            })),
                        };
                        result
                    }
                });

                let _ = auto::Builder::new(TokioExecutor::new())
                    .serve_connection(io, svc)
                    .await;
            });
        }
    });

    addr
}
