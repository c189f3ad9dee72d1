//! In-memory partition store.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Partition, PartitionStore, StoreError, VaryKey, admit, identity};
use crate::http::{Request, Response};

#[derive(Debug, Clone)]
struct Entry {
    vary: VaryKey,
    response: Response,
}

// identity -> variants
type Bucket = HashMap<String, Vec<Entry>>;

/// A [`PartitionStore`] that keeps everything in process memory.
///
/// Entries vanish with the process, which makes this the backend of choice
/// for tests.
///
/// # Examples
///
/// ```rust,no_run
/// use swcache::http::{Request, Response, StatusCode};
/// use swcache::store::{MemoryStore, PartitionStore};
/// use url::Url;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryStore::new();
///     let partition = store.open("app-static-v1").await?;
///     let request = Request::get(Url::parse("http://localhost/")?);
///     store
///         .put(&partition, &request, Response::new(StatusCode::OK).body("home"))
///         .await?;
///     assert!(store.get(&partition, &request).await?.is_some());
///     Ok(())
/// }
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    partitions: RwLock<BTreeMap<String, Bucket>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PartitionStore for MemoryStore {
    async fn open(&self, name: &str) -> Result<Partition, StoreError> {
        self.partitions
            .write()
            .await
            .entry(name.to_owned())
            .or_default();
        Ok(Partition::new(name))
    }

    async fn get(
        &self,
        partition: &Partition,
        request: &Request,
    ) -> Result<Option<Response>, StoreError> {
        let partitions = self.partitions.read().await;
        let found = partitions
            .get(partition.name())
            .and_then(|bucket| bucket.get(&identity(request)))
            .and_then(|variants| variants.iter().find(|e| e.vary.matches(request)))
            .map(|e| e.response.clone());
        Ok(found)
    }

    async fn put(
        &self,
        partition: &Partition,
        request: &Request,
        response: Response,
    ) -> Result<(), StoreError> {
        let vary = admit(request, &response)?;
        let mut partitions = self.partitions.write().await;
        let variants = partitions
            .entry(partition.name().to_owned())
            .or_default()
            .entry(identity(request))
            .or_default();
        variants.retain(|e| !e.vary.matches(request));
        variants.push(Entry { vary, response });
        Ok(())
    }

    async fn list_names(&self) -> Result<BTreeSet<String>, StoreError> {
        Ok(self.partitions.read().await.keys().cloned().collect())
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.partitions.write().await.remove(name).is_some())
    }
}
