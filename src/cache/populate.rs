//! Warms the static partition from the build-time manifest.

use futures::future::join_all;
use tracing::{info, warn};
use url::Url;

use super::{FailedResource, LifecycleError, LiveSet};
use crate::http::{Request, Response};
use crate::network::Fetcher;
use crate::store::PartitionStore;

/// What a successful population stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopulationReport {
    pub partition: String,
    pub stored: Vec<Url>,
}

/// Fetches every manifest resource and stores the lot in the live static
/// partition.
///
/// Population is all-or-nothing at the fetch stage: every resource is fetched
/// concurrently and, if any fetch errors or returns a non-2xx status, nothing
/// is written and the error lists every failed resource. Running it again
/// over an already populated partition overwrites the same keys.
///
/// # Errors
///
/// - [`LifecycleError::Manifest`]: a manifest entry is not a valid path.
/// - [`LifecycleError::Open`]: the static partition cannot be opened.
/// - [`LifecycleError::Population`]: one or more resources could not be fetched or stored.
pub async fn populate(
    store: &dyn PartitionStore,
    fetcher: &dyn Fetcher,
    live: &LiveSet,
    origin: &Url,
    manifest: &[String],
) -> Result<PopulationReport, LifecycleError> {
    let urls = manifest
        .iter()
        .map(|entry| {
            origin
                .join(entry)
                .map_err(|source| LifecycleError::Manifest {
                    entry: entry.clone(),
                    source,
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let partition_name = live.static_name();
    let partition = store
        .open(partition_name)
        .await
        .map_err(|source| LifecycleError::Open {
            partition: partition_name.to_owned(),
            source,
        })?;

    let fetched = join_all(urls.iter().map(|url| async move {
        let request = Request::get(url.clone());
        let outcome = match fetcher.fetch(&request).await {
            Ok(response) if response.status().is_success() => Ok(response),
            Ok(response) => Err(format!("upstream returned {}", response.status())),
            Err(e) => Err(e.to_string()),
        };
        (request, outcome)
    }))
    .await;

    let mut ready: Vec<(Request, Response)> = Vec::with_capacity(fetched.len());
    let mut failed = Vec::new();
    for (request, outcome) in fetched {
        match outcome {
            Ok(response) => ready.push((request, response)),
            Err(reason) => {
                warn!(url = %request.url(), %reason, "manifest resource unavailable");
                failed.push(FailedResource {
                    url: request.url().clone(),
                    reason,
                });
            }
        }
    }

    if !failed.is_empty() {
        return Err(LifecycleError::Population {
            partition: partition_name.to_owned(),
            total: urls.len(),
            failed,
        });
    }

    let written = join_all(ready.into_iter().map(|(request, response)| {
        let partition = &partition;
        async move {
            let outcome = store.put(partition, &request, response).await;
            (request, outcome)
        }
    }))
    .await;

    let mut stored = Vec::with_capacity(written.len());
    for (request, outcome) in written {
        match outcome {
            Ok(()) => stored.push(request.url().clone()),
            Err(e) => {
                warn!(url = %request.url(), error = %e, "failed to store manifest resource");
                failed.push(FailedResource {
                    url: request.url().clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    if !failed.is_empty() {
        return Err(LifecycleError::Population {
            partition: partition_name.to_owned(),
            total: urls.len(),
            failed,
        });
    }

    info!(partition = partition_name, resources = stored.len(), "partition populated");
    Ok(PopulationReport {
        partition: partition_name.to_owned(),
        stored,
    })
}
