//! Centralized configuration for the proxy.
//!
//! Configuration is read from the environment exactly once at startup and
//! shared immutably (behind an `Arc`) with every connection task.

use std::time::Duration;

/// Fixed upstream host. Not configurable at runtime.
pub const ANTHROPIC_HOST: &str = "api.anthropic.com";

/// Fixed upstream port. Not configurable at runtime.
pub const ANTHROPIC_PORT: u16 = 443;

/// Runtime configuration for the relay.
///
/// `upstream_host`/`upstream_port`/`upstream_tls` are fixed by
/// [`ProxyConfig::from_env`]; tests construct the struct directly to point
/// the relay at a local mock server.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Upstream host requests are relayed to
    pub upstream_host: String,

    /// Upstream port
    pub upstream_port: u16,

    /// Whether the upstream connection uses TLS
    pub upstream_tls: bool,

    /// API key injected as `x-api-key` when the caller did not supply one.
    /// `None` disables injection (passthrough mode).
    pub api_key: Option<String>,

    /// Ceiling on waiting for the upstream: response headers and each
    /// body read must arrive within this window
    pub upstream_timeout: Duration,

    /// Enable TCP_NODELAY on accepted connections
    pub tcp_nodelay: bool,

    /// TCP keepalive interval in seconds
    pub tcp_keepalive_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            upstream_host: ANTHROPIC_HOST.to_string(),
            upstream_port: ANTHROPIC_PORT,
            upstream_tls: true,
            api_key: None,
            upstream_timeout: Duration::from_secs(300),
            tcp_nodelay: true,
            tcp_keepalive_secs: 60,
        }
    }
}

impl ProxyConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// # Environment Variables
    ///
    /// - `ANTHROPIC_API_KEY`: credential to inject; absent or empty
    ///   disables injection
    /// - `ANTHROPIC_PROXY_TIMEOUT_SECS` (default: 300)
    /// - `ANTHROPIC_PROXY_TCP_NODELAY` (default: true)
    /// - `ANTHROPIC_PROXY_TCP_KEEPALIVE_SECS` (default: 60)
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            api_key: std::env::var("ANTHROPIC_API_KEY")
                .ok()
                .filter(|key| !key.is_empty()),

            upstream_timeout: std::env::var("ANTHROPIC_PROXY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.upstream_timeout),

            tcp_nodelay: std::env::var("ANTHROPIC_PROXY_TCP_NODELAY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.tcp_nodelay),

            tcp_keepalive_secs: std::env::var("ANTHROPIC_PROXY_TCP_KEEPALIVE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.tcp_keepalive_secs),

            ..default
        }
    }

    /// Redacted preview of the configured key for the startup banner.
    ///
    /// Returns `None` when injection is disabled. The preview never
    /// contains the full credential: long keys show their first 12
    /// characters followed by `...`, short keys collapse to `***`.
    pub fn key_preview(&self) -> Option<String> {
        self.api_key.as_ref().map(|key| {
            key.get(..12)
                .map(|prefix| format!("{prefix}..."))
                .unwrap_or_else(|| "***".to_string())
        })
    }

    /// `host:port` rendering of the upstream endpoint for diagnostics.
    pub fn upstream_endpoint(&self) -> String {
        format!("{}:{}", self.upstream_host, self.upstream_port)
    }
}
