//! Header manipulation rules for the relay.
//!
//! The relay forwards requests and responses verbatim apart from two fixed
//! skip-sets and the credential injection below. `http::HeaderMap` gives
//! case-insensitive names and last-write-wins duplicate handling via
//! `insert`, matching what callers observe.

use http::header::{self, HeaderMap, HeaderName, HeaderValue};

use crate::config::ProxyConfig;
use crate::error::{ProxyError, ProxyResult};

/// Request headers that are never forwarded upstream. `host` is replaced
/// with the upstream host; `transfer-encoding` is re-derived by the
/// client transport.
pub const SKIP_REQUEST_HEADERS: &[&str] = &["host", "transfer-encoding"];

/// Response headers that are never relayed back. Chunking and connection
/// semantics differ per hop and are re-derived by the server transport.
pub const SKIP_RESPONSE_HEADERS: &[&str] = &["transfer-encoding", "connection"];

/// Header carrying the injected credential.
pub const API_KEY_HEADER: HeaderName = HeaderName::from_static("x-api-key");

/// Media type marking a server-sent-event stream.
const EVENT_STREAM_MARKER: &str = "text/event-stream";

fn is_skipped(name: &str, skip_set: &[&str]) -> bool {
    skip_set.iter().any(|s| name.eq_ignore_ascii_case(s))
}

/// Build the header map for the upstream request.
///
/// Copies every inbound header outside [`SKIP_REQUEST_HEADERS`], always
/// sets `Host` to the upstream host, and injects the configured API key
/// only when the caller did not already supply one, so callers using an
/// alternate auth scheme pass through untouched.
pub fn build_outbound_headers(
    inbound: &HeaderMap,
    config: &ProxyConfig,
) -> ProxyResult<HeaderMap> {
    let mut outbound = HeaderMap::with_capacity(inbound.len() + 2);

    for (name, value) in inbound {
        if !is_skipped(name.as_str(), SKIP_REQUEST_HEADERS) {
            outbound.insert(name.clone(), value.clone());
        }
    }

    let host = HeaderValue::from_str(&config.upstream_host)
        .map_err(|_| ProxyError::InvalidUri("upstream host is not a valid header value".into()))?;
    outbound.insert(header::HOST, host);

    if let Some(key) = &config.api_key
        && !key.is_empty()
        && !inbound.contains_key(&API_KEY_HEADER)
    {
        let value = HeaderValue::from_str(key)
            .map_err(|_| ProxyError::Internal("configured credential is not a valid header value".into()))?;
        outbound.insert(API_KEY_HEADER, value);
    }

    Ok(outbound)
}

/// Strip the per-hop response headers in place.
pub fn filter_response_headers(headers: &mut HeaderMap) {
    for name in SKIP_RESPONSE_HEADERS {
        headers.remove(*name);
    }
}

/// True iff the response's content-type marks a server-sent-event stream.
pub fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains(EVENT_STREAM_MARKER))
}
