//! Cache lifecycle: partition generations, population, and collection.
//!
//! - [`LiveSet`] / [`PartitionName`]: which partition names are current.
//! - [`populate`]: fills the static partition from the manifest on install.
//! - [`collect`]: deletes superseded partitions on activate.

use thiserror::Error;
use url::Url;

use crate::store::StoreError;

pub mod collect;
pub mod generation;
pub mod populate;

pub use collect::{CollectionReport, collect};
pub use generation::{LiveSet, PartitionName, Role};
pub use populate::{PopulationReport, populate};

/// A manifest resource that could not be cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedResource {
    pub url: Url,
    pub reason: String,
}

/// Errors raised by lifecycle work (population and collection).
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("invalid manifest entry {entry:?}: {source}")]
    Manifest {
        entry: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to open partition {partition}: {source}")]
    Open {
        partition: String,
        #[source]
        source: StoreError,
    },

    #[error("population of {partition} failed for {} of {total} resources", failed.len())]
    Population {
        partition: String,
        total: usize,
        failed: Vec<FailedResource>,
    },

    #[error("failed to list partitions: {0}")]
    List(#[source] StoreError),
}
