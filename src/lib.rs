//! # swcache
//!
//! An offline-capable HTTP response cache built from the lifecycle of a
//! service worker.
//!
//! Responses live in named partitions (`{namespace}-{role}-{tag}`). Bumping a
//! generation tag in configuration is how a new release takes over: `install`
//! warms the new static partition, `activate` deletes every partition the
//! namespace owns that is not in the live set, and `fetch` serves each
//! same-origin request with the strategy for its class.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use swcache::config::Config;
//! use swcache::network::HttpFetcher;
//! use swcache::server::Server;
//! use swcache::store::MemoryStore;
//! use swcache::worker::{Worker, WorkerSettings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let worker = Worker::new(
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(HttpFetcher::new(None)?),
//!         WorkerSettings::from_config(&config)?,
//!     );
//!     worker.install().await?;
//!     worker.activate().await?;
//!
//!     let server = Server::bind(&config.server.listen).await?;
//!     server
//!         .run(move |req| {
//!             let worker = worker.clone();
//!             async move { worker.dispatch(req).await }
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod background;
pub mod cache;
pub mod classify;
pub mod config;
pub mod http;
pub mod network;
pub mod server;
pub mod store;
pub mod strategy;
pub mod worker;

pub use http::{Headers, Method, Request, Response, StatusCode};
pub use server::{Server, ServerError};
pub use store::{PartitionStore, StoreError};
pub use worker::Worker;
