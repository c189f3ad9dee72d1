//! Per-class caching strategies.
//!
//! [`StrategyEngine`] answers a classified request against the partition
//! store and the network:
//!
//! - **Images**: cache-first. A hit is returned as stored, with no refresh.
//!   A miss goes to the network and a 2xx answer is stored before it is
//!   returned. If the network fails, the caller gets a bodiless `404`.
//! - **Everything else same-origin**: stale-while-revalidate. A hit is
//!   returned at once and a refresh is registered on the event; the refreshed
//!   copy only benefits the next request. A miss goes to the network; a 2xx
//!   answer is stored in the background. If the network fails the
//!   [`OfflineResolver`] answers.
//!
//! Every path produces a response. Storage errors are logged and treated as
//! misses; they never reach the caller.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::background::ExtendableEvent;
use crate::cache::{LiveSet, Role};
use crate::classify::ResourceClass;
use crate::http::{Method, Request, Response, StatusCode};
use crate::network::Fetcher;
use crate::store::PartitionStore;

pub mod offline;

pub use offline::OfflineResolver;

/// What the engine decided for an intercepted request.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Answered from the cache, the network or the offline fallback.
    Respond(Response),
    /// Declined; the host should send the request on unchanged.
    PassThrough(Request),
}

/// Runs the caching algorithm for each resource class.
///
/// Cheap to clone: every clone shares the same store and fetcher, which is
/// how background refreshes get their own handle.
#[derive(Clone)]
pub struct StrategyEngine {
    store: Arc<dyn PartitionStore>,
    fetcher: Arc<dyn Fetcher>,
    live: LiveSet,
    offline: OfflineResolver,
}

impl StrategyEngine {
    pub fn new(
        store: Arc<dyn PartitionStore>,
        fetcher: Arc<dyn Fetcher>,
        live: LiveSet,
        offline: OfflineResolver,
    ) -> Self {
        Self {
            store,
            fetcher,
            live,
            offline,
        }
    }

    /// Answers `request` according to `class`.
    ///
    /// [`ResourceClass::CrossOrigin`] requests are handed back untouched as
    /// [`FetchOutcome::PassThrough`]; the store is never consulted for them.
    pub async fn respond(
        &self,
        class: ResourceClass,
        request: Request,
        event: &ExtendableEvent,
    ) -> FetchOutcome {
        match class {
            ResourceClass::Image => FetchOutcome::Respond(self.cache_first(&request).await),
            ResourceClass::Other => {
                FetchOutcome::Respond(self.stale_while_revalidate(request, event).await)
            }
            ResourceClass::CrossOrigin => FetchOutcome::PassThrough(request),
        }
    }

    /// Cache-first with network fill on miss, for images.
    pub async fn cache_first(&self, request: &Request) -> Response {
        if let Some(hit) = self.lookup(Role::Images, request).await {
            debug!(url = %request.url(), "image: cache hit");
            return hit;
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.status().is_success() {
                    self.store_now(Role::Images, request, response.clone()).await;
                }
                debug!(url = %request.url(), status = response.status().as_u16(), "image: from network");
                response
            }
            Err(e) => {
                debug!(url = %request.url(), error = %e, "image: network failed, answering 404");
                Response::new(StatusCode::NOT_FOUND)
            }
        }
    }

    /// Stale-while-revalidate, for every other same-origin request.
    pub async fn stale_while_revalidate(
        &self,
        request: Request,
        event: &ExtendableEvent,
    ) -> Response {
        let cached = self.lookup(Role::Static, &request).await;
        if let Some(hit) = cached {
            debug!(url = %request.url(), "static: cache hit, revalidating");
            let engine = self.clone();
            event.wait_until(async move { engine.revalidate(request).await });
            return hit;
        }

        let fetched = self.fetcher.fetch(&request).await;
        match fetched {
            Ok(response) => {
                debug!(url = %request.url(), status = response.status().as_u16(), "static: from network");
                if response.status().is_success() && is_cacheable(&request) {
                    let engine = self.clone();
                    let copy = response.clone();
                    event.wait_until(async move {
                        engine.store_now(Role::Static, &request, copy).await;
                    });
                }
                response
            }
            Err(e) => {
                debug!(url = %request.url(), error = %e, "static: network failed, going offline");
                self.offline
                    .resolve(self.store.as_ref(), &self.live, &request)
                    .await
            }
        }
    }

    // Background half of stale-while-revalidate.
    async fn revalidate(&self, request: Request) {
        match self.fetcher.fetch(&request).await {
            Ok(fresh) if fresh.status().is_success() => {
                self.store_now(Role::Static, &request, fresh).await;
                debug!(url = %request.url(), "static: entry refreshed");
            }
            Ok(fresh) => {
                debug!(url = %request.url(), status = fresh.status().as_u16(), "static: refresh kept old entry");
            }
            Err(e) => {
                debug!(url = %request.url(), error = %e, "static: refresh failed");
            }
        }
    }

    async fn lookup(&self, role: Role, request: &Request) -> Option<Response> {
        if !is_cacheable(request) {
            return None;
        }
        let name = self.live.name(role);
        let found = match self.store.open(name).await {
            Ok(partition) => self.store.get(&partition, request).await,
            Err(e) => Err(e),
        };
        found.unwrap_or_else(|e| {
            warn!(partition = name, url = %request.url(), error = %e, "cache read failed");
            None
        })
    }

    async fn store_now(&self, role: Role, request: &Request, response: Response) {
        if !is_cacheable(request) {
            return;
        }
        let name = self.live.name(role);
        let stored = match self.store.open(name).await {
            Ok(partition) => self.store.put(&partition, request, response).await,
            Err(e) => Err(e),
        };
        if let Err(e) = stored {
            warn!(partition = name, url = %request.url(), error = %e, "cache write failed");
        }
    }
}

fn is_cacheable(request: &Request) -> bool {
    *request.method() == Method::Get
}
