//! anthropic-proxy - Transparent reverse proxy for the Anthropic API.
//!
//! Sits between a client application and `api.anthropic.com`, injecting
//! the `x-api-key` header so the API key never needs to exist on the
//! client side. Requests are otherwise forwarded unchanged; responses are
//! relayed byte-for-byte, with server-sent-event streams forwarded
//! chunk-by-chunk for low-latency incremental delivery.
//!
//! If no API key is configured, requests pass through without injection
//! (allowing OAuth or other auth methods to work normally).

pub mod config;
pub mod error;
pub mod headers;
pub mod logging_layer;
pub mod relay;
pub mod timeout;
