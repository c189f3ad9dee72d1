//! Removes partitions left behind by earlier generations.

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::{LifecycleError, LiveSet};
use crate::store::{PartitionStore, StoreError};

/// What a collection pass did.
#[derive(Debug, Default)]
pub struct CollectionReport {
    /// Stale partitions that were removed.
    pub deleted: Vec<String>,
    /// Stale partitions that could not be removed, with the reason.
    pub failed: Vec<(String, StoreError)>,
}

impl CollectionReport {
    /// Returns `true` if every stale partition was removed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Deletes every partition owned by `live`'s namespace that is not live.
///
/// Deletes run concurrently and independently: one failure is recorded in the
/// report and never stops the others. Partitions outside the namespace are
/// left alone.
///
/// # Errors
///
/// Returns [`LifecycleError::List`] only if the stored names cannot be listed.
pub async fn collect(
    store: &dyn PartitionStore,
    live: &LiveSet,
) -> Result<CollectionReport, LifecycleError> {
    let names = store.list_names().await.map_err(LifecycleError::List)?;
    let stale: Vec<String> = names.into_iter().filter(|n| live.is_stale(n)).collect();

    if stale.is_empty() {
        debug!(namespace = live.namespace(), "no stale partitions");
        return Ok(CollectionReport::default());
    }

    let outcomes = join_all(stale.into_iter().map(|name| async move {
        let outcome = store.delete(&name).await;
        (name, outcome)
    }))
    .await;

    let mut report = CollectionReport::default();
    for (name, outcome) in outcomes {
        match outcome {
            Ok(existed) => {
                debug!(partition = %name, existed, "stale partition deleted");
                report.deleted.push(name);
            }
            Err(e) => {
                warn!(partition = %name, error = %e, "failed to delete stale partition");
                report.failed.push((name, e));
            }
        }
    }

    info!(
        deleted = report.deleted.len(),
        failed = report.failed.len(),
        "stale partitions collected"
    );
    Ok(report)
}
