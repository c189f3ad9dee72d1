//! [`Fetcher`] backed by a `reqwest` client.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{FetchError, Fetcher};
use crate::http::{Headers, Method, Request, Response, StatusCode, is_hop_by_hop};

// Recomputed by whichever side serializes the message.
const FRAMING: &[&str] = &["host", "content-length"];

fn forwardable(name: &str) -> bool {
    !is_hop_by_hop(name) && !FRAMING.iter().any(|h| h.eq_ignore_ascii_case(name))
}

// A HEAD answer has no body to recompute its length from, so the upstream
// value is kept.
fn keep_response_header(name: &str, method: &Method) -> bool {
    forwardable(name) || (*method == Method::Head && name.eq_ignore_ascii_case("content-length"))
}

/// Fetches over HTTP(S) with `reqwest`.
///
/// Redirects are not followed: the redirect response itself is handed back,
/// so a client behind the cache sees the same thing it would see without it.
/// No request deadline is applied; only an optional connect timeout.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Builds a fetcher, optionally bounding connection setup by `connect_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Client`] if the TLS backend cannot be initialised.
    pub fn new(connect_timeout: Option<Duration>) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());
        if let Some(timeout) = connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder.build().map_err(FetchError::Client)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let method = reqwest::Method::from_bytes(request.method().as_str().as_bytes())
            .map_err(|_| FetchError::InvalidMethod(request.method().to_string()))?;

        let mut builder = self.client.request(method, request.url().clone());
        for (name, value) in request.headers().iter() {
            if forwardable(name) {
                builder = builder.header(name, value);
            }
        }
        if !request.body().is_empty() {
            builder = builder.body(request.body().clone());
        }

        let transport = |source| FetchError::Transport {
            url: request.url().to_string(),
            source,
        };

        let upstream = builder.send().await.map_err(transport)?;
        let status = StatusCode::from_u16(upstream.status().as_u16());

        let mut headers = Headers::with_capacity(upstream.headers().len());
        for (name, value) in upstream.headers() {
            if !keep_response_header(name.as_str(), request.method()) {
                continue;
            }
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str(), value);
            }
        }

        let body = upstream.bytes().await.map_err(transport)?;
        debug!(url = %request.url(), status = status.as_u16(), bytes = body.len(), "fetched");

        Ok(Response::from_parts(status, headers, body))
    }
}
