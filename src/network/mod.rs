//! Upstream network access.
//!
//! The cache never talks to the network directly; it goes through a
//! [`Fetcher`], which is injected so tests can script the network.
//!
//! A fetch "fails" only when no response arrives at all. An upstream `404`
//! or `500` is a successful fetch; callers decide what statuses they store.

use async_trait::async_trait;
use thiserror::Error;

use crate::http::{Request, Response};

pub mod client;

#[cfg(test)]
pub(crate) mod stub;

pub use client::HttpFetcher;

/// Errors produced while fetching from the network.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("no route to {url}")]
    Unreachable { url: String },

    #[error("method {0:?} cannot be sent upstream")]
    InvalidMethod(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Sends a request to the network and returns whatever came back.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Performs `request` against its URL.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] only when no response was received.
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}
