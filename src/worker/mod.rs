//! Lifecycle and fetch event handling.
//!
//! A [`Worker`] owns one partition store, one fetcher and the deployment's
//! settings, and maps each host event onto the cache:
//!
//! | Event      | Work                                                   |
//! |------------|--------------------------------------------------------|
//! | `install`  | [`populate`] the static partition from the manifest    |
//! | `activate` | [`collect`] partitions from earlier generations        |
//! | `fetch`    | classify, then run the class strategy or pass through  |
//! | `sync`     | logged only                                            |
//! | `push`     | logged only                                            |

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};
use url::Url;

use crate::background::{EventKind, ExtendableEvent};
use crate::cache::{CollectionReport, LifecycleError, LiveSet, PopulationReport, collect, populate};
use crate::classify::Scope;
use crate::config::{Config, ConfigError};
use crate::http::{Request, Response, StatusCode};
use crate::network::Fetcher;
use crate::store::PartitionStore;
use crate::strategy::{OfflineResolver, StrategyEngine};

pub use crate::strategy::FetchOutcome;

/// Where the worker is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Parsed => "parsed",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Activated => "activated",
        })
    }
}

/// Result of a successful install.
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    /// Take over immediately instead of waiting for older clients to go away.
    pub skip_waiting: bool,
    pub population: PopulationReport,
}

/// Result of an activation.
#[derive(Debug)]
pub struct ActivateOutcome {
    /// Start controlling already-open clients right away.
    pub claim: bool,
    pub collection: CollectionReport,
}

/// Everything a worker needs to know about the deployment it serves.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub origin: Url,
    pub scope: Scope,
    pub live: LiveSet,
    pub root_document: Url,
    pub manifest: Vec<String>,
}

impl WorkerSettings {
    /// Derives worker settings from a validated [`Config`].
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            origin: config.origin_url()?,
            scope: config.scope()?,
            live: config.live_set(),
            root_document: config.root_document_url()?,
            manifest: config.manifest.clone(),
        })
    }
}

/// Handles lifecycle and fetch events for one deployment.
///
/// Cheap to clone; clones share the store, fetcher and lifecycle state.
#[derive(Clone)]
pub struct Worker {
    store: Arc<dyn PartitionStore>,
    fetcher: Arc<dyn Fetcher>,
    settings: Arc<WorkerSettings>,
    engine: StrategyEngine,
    state: Arc<Mutex<WorkerState>>,
}

impl Worker {
    pub fn new(
        store: Arc<dyn PartitionStore>,
        fetcher: Arc<dyn Fetcher>,
        settings: WorkerSettings,
    ) -> Self {
        let engine = StrategyEngine::new(
            Arc::clone(&store),
            Arc::clone(&fetcher),
            settings.live.clone(),
            OfflineResolver::new(settings.root_document.clone()),
        );
        Self {
            store,
            fetcher,
            settings: Arc::new(settings),
            engine,
            state: Arc::new(Mutex::new(WorkerState::Parsed)),
        }
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn transition(&self, next: WorkerState) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        debug!(from = %*state, to = %next, "worker state");
        *state = next;
    }

    /// Handles the `install` event: warms the static partition.
    ///
    /// A failed population is reported to the caller and not retried. The
    /// worker still ends up installed, so activation can go ahead with a
    /// colder cache.
    ///
    /// # Errors
    ///
    /// Propagates the [`LifecycleError`] from [`populate`].
    pub async fn install(&self) -> Result<InstallOutcome, LifecycleError> {
        self.transition(WorkerState::Installing);
        let result = populate(
            self.store.as_ref(),
            self.fetcher.as_ref(),
            &self.settings.live,
            &self.settings.origin,
            &self.settings.manifest,
        )
        .await;
        self.transition(WorkerState::Installed);

        match result {
            Ok(population) => {
                info!(partition = %population.partition, "install complete, skipping wait");
                Ok(InstallOutcome {
                    skip_waiting: true,
                    population,
                })
            }
            Err(e) => {
                warn!(error = %e, "install: population failed, continuing with a cold cache");
                Err(e)
            }
        }
    }

    /// Handles the `activate` event: drops partitions from older generations.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::List`] if stored partitions cannot be listed.
    /// Individual delete failures are in the returned report instead.
    pub async fn activate(&self) -> Result<ActivateOutcome, LifecycleError> {
        self.transition(WorkerState::Activating);
        let result = collect(self.store.as_ref(), &self.settings.live).await;
        self.transition(WorkerState::Activated);

        let collection = result?;
        info!(
            static_partition = self.settings.live.static_name(),
            images_partition = self.settings.live.images_name(),
            "activated, claiming clients"
        );
        Ok(ActivateOutcome {
            claim: true,
            collection,
        })
    }

    /// Handles one `fetch` event.
    ///
    /// Background work (refreshes, deferred writes) is registered on `event`;
    /// the caller must settle it or let it drop.
    pub async fn handle_fetch(&self, request: Request, event: &ExtendableEvent) -> FetchOutcome {
        let class = self.settings.scope.classify(request.url());
        debug!(url = %request.url(), %class, "fetch: classified");
        self.engine.respond(class, request, event).await
    }

    /// Host-facing entry point: answers `request` end to end.
    ///
    /// Cross-origin requests go straight to the network (`502` if that
    /// fails). Background work registered while answering is settled on a
    /// separate task, so it outlives the returned response.
    pub async fn dispatch(&self, request: Request) -> Response {
        let event = ExtendableEvent::new(EventKind::Fetch);

        let response = match self.handle_fetch(request, &event).await {
            FetchOutcome::Respond(response) => response,
            FetchOutcome::PassThrough(request) => match self.fetcher.fetch(&request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(url = %request.url(), error = %e, "pass-through fetch failed");
                    Response::new(StatusCode::BAD_GATEWAY)
                }
            },
        };

        if event.pending() > 0 {
            tokio::spawn(event.settle());
        }
        response
    }

    /// Handles a `sync` event. No policy is attached; the event is logged.
    pub fn on_sync(&self, tag: &str) {
        info!(event = %EventKind::Sync, tag, "sync event received");
    }

    /// Handles a `push` event. No policy is attached; the event is logged.
    pub fn on_push(&self, payload: Option<&[u8]>) {
        info!(
            event = %EventKind::Push,
            bytes = payload.map_or(0, <[u8]>::len),
            "push event received"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ResourceClass;
    use crate::network::stub::StubFetcher;
    use crate::store::MemoryStore;

    const ORIGIN: &str = "http://localhost:8080";

    fn settings(static_tag: &str, images_tag: &str) -> WorkerSettings {
        let origin = Url::parse(ORIGIN).unwrap();
        WorkerSettings {
            scope: Scope::new(&origin, "/images/"),
            live: LiveSet::new("app", static_tag, images_tag),
            root_document: origin.join("/").unwrap(),
            manifest: vec!["/".to_string(), "/app.js".to_string()],
            origin,
        }
    }

    fn url(path: &str) -> Url {
        Url::parse(ORIGIN).unwrap().join(path).unwrap()
    }

    fn online() -> Arc<StubFetcher> {
        let fetcher = Arc::new(StubFetcher::new());
        fetcher
            .respond(&url("/").to_string(), Response::new(StatusCode::OK).body("shell"))
            .respond(&url("/app.js").to_string(), Response::new(StatusCode::OK).body("js"));
        fetcher
    }

    #[tokio::test]
    async fn install_then_activate_upgrades_generation() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = online();

        let old = Worker::new(store.clone(), fetcher.clone(), settings("v1", "v1"));
        old.install().await.unwrap();
        old.activate().await.unwrap();

        let new = Worker::new(store.clone(), fetcher.clone(), settings("v2", "v1"));
        let installed = new.install().await.unwrap();
        assert!(installed.skip_waiting);
        assert_eq!(installed.population.partition, "app-static-v2");

        let activated = new.activate().await.unwrap();
        assert!(activated.claim);
        assert_eq!(activated.collection.deleted, vec!["app-static-v1".to_string()]);
        assert_eq!(new.state(), WorkerState::Activated);

        let names = store.list_names().await.unwrap();
        assert!(names.contains("app-static-v2"));
        assert!(!names.contains("app-static-v1"));
    }

    #[tokio::test]
    async fn failed_install_still_allows_activation() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(StubFetcher::new());
        let worker = Worker::new(store, fetcher, settings("v1", "v1"));

        assert!(worker.install().await.is_err());
        assert_eq!(worker.state(), WorkerState::Installed);
        assert!(worker.activate().await.is_ok());
        assert_eq!(worker.state(), WorkerState::Activated);
    }

    #[tokio::test]
    async fn cross_origin_passes_through_untouched() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(StubFetcher::new());
        let worker = Worker::new(store.clone(), fetcher.clone(), settings("v1", "v1"));

        let request = Request::get(Url::parse("http://cdn.test/images/a.png").unwrap());
        let event = ExtendableEvent::new(EventKind::Fetch);
        let outcome = worker.handle_fetch(request, &event).await;

        assert!(matches!(outcome, FetchOutcome::PassThrough(_)));
        assert!(fetcher.calls().is_empty());
        assert!(store.list_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dispatch_forwards_declined_requests() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(StubFetcher::new());
        fetcher.respond(
            "http://cdn.test/lib.js",
            Response::new(StatusCode::OK).body("lib"),
        );
        let worker = Worker::new(store.clone(), fetcher.clone(), settings("v1", "v1"));

        let ok = worker
            .dispatch(Request::get(Url::parse("http://cdn.test/lib.js").unwrap()))
            .await;
        assert_eq!(&ok.body_ref()[..], b"lib");

        let down = worker
            .dispatch(Request::get(Url::parse("http://cdn.test/other.js").unwrap()))
            .await;
        assert_eq!(down.status(), StatusCode::BAD_GATEWAY);
        assert!(store.list_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn offline_after_install_serves_shell() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = online();
        let worker = Worker::new(store, fetcher.clone(), settings("v1", "v1"));
        worker.install().await.unwrap();
        worker.activate().await.unwrap();

        fetcher.fail(&url("/settings").to_string());

        let navigation = Request::get(url("/settings")).header("Accept", "text/html");
        let response = worker.dispatch(navigation).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(&response.body_ref()[..], b"shell");
    }

    #[tokio::test]
    async fn images_and_static_use_separate_partitions() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(StubFetcher::new());
        fetcher.respond(
            &url("/images/hero.jpg").to_string(),
            Response::new(StatusCode::OK).body("jpg"),
        );
        let worker = Worker::new(store.clone(), fetcher, settings("v1", "v1"));

        let event = ExtendableEvent::new(EventKind::Fetch);
        let outcome = worker
            .handle_fetch(Request::get(url("/images/hero.jpg")), &event)
            .await;
        assert!(matches!(outcome, FetchOutcome::Respond(_)));

        let images = store.open("app-images-v1").await.unwrap();
        let statics = store.open("app-static-v1").await.unwrap();
        let request = Request::get(url("/images/hero.jpg"));
        assert!(store.get(&images, &request).await.unwrap().is_some());
        assert!(store.get(&statics, &request).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sync_and_push_are_accepted_without_side_effects() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(StubFetcher::new());
        let worker = Worker::new(store.clone(), fetcher.clone(), settings("v1", "v1"));

        worker.on_sync("outbox");
        worker.on_push(Some(&b"{\"title\":\"hi\"}"[..]));
        worker.on_push(None);

        assert_eq!(worker.state(), WorkerState::Parsed);
        assert!(fetcher.calls().is_empty());
        assert!(store.list_names().await.unwrap().is_empty());
    }

    #[test]
    fn https_origin_requests_are_same_origin() {
        let config = Config {
            origin: "https://shop.test".to_string(),
            ..Config::default()
        };
        config.validate().unwrap();
        let settings = WorkerSettings::from_config(&config).unwrap();

        let raw = b"GET /app.js HTTP/1.1\r\nHost: shop.test\r\n\r\n";
        let (request, _) = Request::parse_with_scheme(raw, settings.origin.scheme()).unwrap();
        assert_eq!(request.url().as_str(), "https://shop.test/app.js");
        assert_eq!(settings.scope.classify(request.url()), ResourceClass::Other);
    }
}
