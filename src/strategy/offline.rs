//! Last-resort answers when neither the cache nor the network can respond.

use tracing::{debug, warn};
use url::Url;

use crate::cache::LiveSet;
use crate::http::{Request, Response, StatusCode};
use crate::store::PartitionStore;

const MARKUP_TYPES: &[&str] = &["text/html", "application/xhtml+xml"];

/// Serves the stored root document to navigations and a bodiless `503` to
/// everything else.
#[derive(Debug, Clone)]
pub struct OfflineResolver {
    root_document: Url,
}

impl OfflineResolver {
    /// Creates a resolver that falls back to `root_document` for navigations.
    pub fn new(root_document: Url) -> Self {
        Self { root_document }
    }

    pub fn root_document(&self) -> &Url {
        &self.root_document
    }

    /// Answers `request` without the network. Never fails.
    pub async fn resolve(
        &self,
        store: &dyn PartitionStore,
        live: &LiveSet,
        request: &Request,
    ) -> Response {
        if !is_navigation(request) {
            debug!(url = %request.url(), "offline: not a document request");
            return unavailable();
        }

        let landing = Request::get(self.root_document.clone());
        let found = match store.open(live.static_name()).await {
            Ok(partition) => store.get(&partition, &landing).await,
            Err(e) => Err(e),
        };

        match found {
            Ok(Some(document)) => {
                debug!(url = %request.url(), "offline: serving root document");
                document
            }
            Ok(None) => {
                debug!(url = %request.url(), root = %self.root_document, "offline: root document not cached");
                unavailable()
            }
            Err(e) => {
                warn!(url = %request.url(), error = %e, "offline: root document lookup failed");
                unavailable()
            }
        }
    }
}

/// Returns `true` if the request accepts a markup document.
pub fn is_navigation(request: &Request) -> bool {
    MARKUP_TYPES.iter().any(|mt| request.accepts(mt))
}

/// The synthetic response for "no network, nothing cached".
pub fn unavailable() -> Response {
    Response::new(StatusCode::SERVICE_UNAVAILABLE)
}
