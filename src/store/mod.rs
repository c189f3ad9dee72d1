//! Partition store: named buckets of cached responses.
//!
//! A [`PartitionStore`] owns any number of [`Partition`]s, each an
//! independently addressable collection of entries keyed by request identity:
//! method, URL (fragment stripped) and the request's values for every header
//! the stored response names in `Vary`.
//!
//! Operations are atomic per key and nothing more: there are no cross-key or
//! cross-partition transactions, and concurrent writes to one key resolve as
//! last-write-wins.
//!
//! Two backends ship with the crate:
//!
//! - [`MemoryStore`]: process-local, for tests and throwaway runs.
//! - [`DiskStore`]: survives restarts; one directory per partition.

use std::collections::BTreeSet;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::{Method, Request, Response, StatusCode};

pub mod disk;
pub mod memory;

pub use disk::DiskStore;
pub use memory::MemoryStore;

/// Errors produced by partition store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt index file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("only GET requests can be cached, got {0}")]
    MethodNotCacheable(Method),

    #[error("partial (206) responses cannot be cached")]
    PartialResponse,

    #[error("responses with `Vary: *` cannot be cached")]
    VaryWildcard,
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// A handle to one named partition, returned by [`PartitionStore::open`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Partition {
    name: String,
}

impl Partition {
    /// Creates a handle for `name`. Backends call this from `open`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Returns the partition's full name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// The storage contract every backend provides.
///
/// Implementations must be safe to share across tasks; the engine holds a
/// single `Arc<dyn PartitionStore>` and hands clones to background work.
#[async_trait]
pub trait PartitionStore: Send + Sync {
    /// Opens the partition called `name`, creating it if absent. Idempotent.
    async fn open(&self, name: &str) -> Result<Partition, StoreError>;

    /// Looks up the entry matching `request` in `partition`.
    async fn get(
        &self,
        partition: &Partition,
        request: &Request,
    ) -> Result<Option<Response>, StoreError>;

    /// Stores `response` as the entry for `request`, replacing any entry with
    /// the same identity.
    ///
    /// # Errors
    ///
    /// - [`StoreError::MethodNotCacheable`]: `request` is not a `GET`.
    /// - [`StoreError::PartialResponse`]: `response` is `206 Partial Content`.
    /// - [`StoreError::VaryWildcard`]: `response` carries `Vary: *`.
    async fn put(
        &self,
        partition: &Partition,
        request: &Request,
        response: Response,
    ) -> Result<(), StoreError>;

    /// Returns the names of every partition in the store.
    async fn list_names(&self) -> Result<BTreeSet<String>, StoreError>;

    /// Deletes the partition called `name` with all of its entries.
    ///
    /// Returns `false` if no such partition existed.
    async fn delete(&self, name: &str) -> Result<bool, StoreError>;
}

/// The request header values an entry was stored under, one per name listed
/// in the response's `Vary` header. `None` records that the header was absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct VaryKey(Vec<(String, Option<String>)>);

impl VaryKey {
    /// Captures `request`'s values for the headers `response` varies on.
    pub(crate) fn capture(request: &Request, response: &Response) -> Result<Self, StoreError> {
        let mut pairs = Vec::new();
        for name in response.headers().list("vary") {
            if name == "*" {
                return Err(StoreError::VaryWildcard);
            }
            let name = name.to_ascii_lowercase();
            if pairs.iter().any(|(n, _)| n == &name) {
                continue;
            }
            let value = request.headers().joined(&name);
            pairs.push((name, value));
        }
        pairs.sort();
        Ok(Self(pairs))
    }

    /// Returns `true` if `request` carries the same values this key recorded.
    pub(crate) fn matches(&self, request: &Request) -> bool {
        self.0
            .iter()
            .all(|(name, value)| request.headers().joined(name) == *value)
    }

    /// A stable string form, used to derive file names.
    pub(crate) fn fingerprint(&self) -> String {
        self.0
            .iter()
            .map(|(n, v)| format!("{n}={}", v.as_deref().unwrap_or("\u{0}")))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Returns the `METHOD url` string that identifies an entry before `Vary` is
/// taken into account.
pub(crate) fn identity(request: &Request) -> String {
    let mut url = request.url().clone();
    url.set_fragment(None);
    format!("{} {}", request.method(), url)
}

/// Checks the cacheability rules shared by every backend and returns the
/// entry's [`VaryKey`].
pub(crate) fn admit(request: &Request, response: &Response) -> Result<VaryKey, StoreError> {
    if *request.method() != Method::Get {
        return Err(StoreError::MethodNotCacheable(request.method().clone()));
    }
    if response.status() == StatusCode::PARTIAL_CONTENT {
        return Err(StoreError::PartialResponse);
    }
    VaryKey::capture(request, response)
}
