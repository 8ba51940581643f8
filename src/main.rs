//! anthropic-proxy - Transparent reverse proxy for the Anthropic API.
//!
//! Accepts plain HTTP on the listen port and relays every request to
//! `api.anthropic.com` over TLS, injecting the configured API key when
//! the caller did not supply one. Server-sent-event responses are
//! forwarded chunk-by-chunk; everything else is buffered and relayed
//! whole.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use anthropic_proxy::config::ProxyConfig;
use anthropic_proxy::error::ProxyError;
use anthropic_proxy::logging_layer::logging_layer;
use anthropic_proxy::relay::RelayService;
use bytes::Bytes;
use clap::Parser;
use http_body::Body;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tower::{Service, ServiceBuilder};
use tracing::{debug, error, info, warn};

/// Command-line configuration for the listener.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Port to listen on (default: 3129, or ANTHROPIC_PROXY_PORT env var)
    #[arg(short, long, env = "ANTHROPIC_PROXY_PORT", default_value = "3129")]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Arc::new(ProxyConfig::from_env());

    match config.key_preview() {
        Some(preview) => info!(key_preview = %preview, "API key injection enabled"),
        None => info!("No API key configured - passthrough mode"),
    }

    let addr = format!("{}:{}", cli.bind, cli.port);
    let listener = TcpListener::bind(&addr).await?;

    info!(
        addr = %addr,
        upstream = %config.upstream_endpoint(),
        timeout_secs = config.upstream_timeout.as_secs(),
        "anthropic-proxy listening"
    );

    let relay = RelayService::new(Arc::clone(&config))?;
    let service_stack = ServiceBuilder::new()
        .layer(logging_layer())
        .service(relay);

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);

    let shutdown_tx_sigint = shutdown_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT (Ctrl+C), shutting down");
                let _ = shutdown_tx_sigint.send(());
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGINT");
            }
        }
    });

    #[cfg(unix)]
    {
        let shutdown_tx_sigterm = shutdown_tx.clone();
        tokio::spawn(async move {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    info!("Received SIGTERM, shutting down");
                    let _ = shutdown_tx_sigterm.send(());
                }
                Err(e) => {
                    error!(error = %e, "Failed to listen for SIGTERM");
                }
            }
        });
    }

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        if let Err(e) = configure_tcp_stream(&stream, &config) {
                            warn!(error = %e, "Failed to configure socket");
                        }

                        let service = service_stack.clone();

                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer_addr, service).await {
                                error!(error = %e, "Connection handling error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                }
            }

            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received, no longer accepting connections");
                break;
            }
        }
    }

    Ok(())
}

/// Serve one accepted connection. Requests run through the service
/// stack; failures are converted to HTTP error responses here and never
/// reach the listener or sibling connections.
async fn handle_connection<S, B>(
    stream: TcpStream,
    peer_addr: SocketAddr,
    service: S,
) -> Result<(), ProxyError>
where
    S: Service<Request<Incoming>, Response = Response<B>, Error = ProxyError>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    B: Body<Data = Bytes, Error = ProxyError> + Send + Sync + 'static,
{
    let io = TokioIo::new(stream);

    let svc_fn = hyper::service::service_fn(move |req| {
        let mut svc = service.clone();
        async move {
            let result: Result<_, std::convert::Infallible> = match svc.call(req).await {
                Ok(response) => Ok(response.map(BodyExt::boxed)),
                Err(e) => {
                    warn!(kind = e.kind(), peer = %peer_addr, error = %e, "Request failed");
                    Ok(e.to_response().map(|body| {
                        body.map_err(|never: std::convert::Infallible| match never {})
                            .boxed()
                    }))
                }
            };
            result
        }
    });

    let builder = auto::Builder::new(TokioExecutor::new());
    if let Err(e) = builder.serve_connection(io, svc_fn).await {
        debug!(error = %e, peer = %peer_addr, "Connection closed with error");
    }

    Ok(())
}

/// Configure an accepted stream's socket options.
fn configure_tcp_stream(stream: &TcpStream, config: &ProxyConfig) -> std::io::Result<()> {
    stream.set_nodelay(config.tcp_nodelay)?;

    let socket = socket2::SockRef::from(stream);
    let keepalive =
        socket2::TcpKeepalive::new().with_time(Duration::from_secs(config.tcp_keepalive_secs));
    socket.set_tcp_keepalive(&keepalive)?;

    Ok(())
}
