//! Persistent partition store backed by the filesystem.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/
//!   <hex(partition name)>/
//!     <sha256(identity)>.json   index of variants for one method + URL
//!     <sha256(identity, vary, content)>.body
//! ```
//!
//! Every file is written to a temporary sibling and renamed into place. Body
//! files are content-addressed, so replacing an entry writes a new body first
//! and only then swaps the index; a reader sees either the old or the new
//! entry. Index read-modify-write cycles are serialized by a store-wide write
//! lock.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{Partition, PartitionStore, StoreError, VaryKey, admit, identity};
use crate::http::{Headers, Request, Response, StatusCode};

const INDEX_EXT: &str = "json";
const BODY_EXT: &str = "body";

// Index reads made by one `get` before a missing body counts as a miss.
const MAX_READ_ATTEMPTS: u32 = 3;

// One stored variant, as persisted in an index file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Record {
    vary: VaryKey,
    status: u16,
    headers: Headers,
    body: String,
}

/// A [`PartitionStore`] whose entries survive process restarts.
pub struct DiskStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl DiskStore {
    /// Opens (creating if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the root directory cannot be created.
    pub async fn open_at(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| StoreError::io(&root, e))?;
        debug!(root = %root.display(), "disk store ready");
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn partition_dir(&self, name: &str) -> PathBuf {
        self.root.join(hex::encode(name.as_bytes()))
    }

    fn index_path(&self, partition: &Partition, identity: &str) -> PathBuf {
        self.partition_dir(partition.name())
            .join(format!("{}.{INDEX_EXT}", digest(&[identity])))
    }

    async fn read_index(&self, path: &Path) -> Result<Vec<Record>, StoreError> {
        match fs::read(path).await {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|source| StoreError::Corrupt {
                path: path.to_path_buf(),
                source,
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }
}

#[async_trait]
impl PartitionStore for DiskStore {
    async fn open(&self, name: &str) -> Result<Partition, StoreError> {
        let dir = self.partition_dir(name);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;
        Ok(Partition::new(name))
    }

    async fn get(
        &self,
        partition: &Partition,
        request: &Request,
    ) -> Result<Option<Response>, StoreError> {
        let index_path = self.index_path(partition, &identity(request));
        let dir = self.partition_dir(partition.name());

        let mut attempt = 1;
        loop {
            let records = self.read_index(&index_path).await?;
            let Some(record) = records.into_iter().find(|r| r.vary.matches(request)) else {
                return Ok(None);
            };

            let body_path = dir.join(&record.body);
            match fs::read(&body_path).await {
                Ok(body) => {
                    return Ok(Some(Response::from_parts(
                        StatusCode::from_u16(record.status),
                        record.headers,
                        Bytes::from(body),
                    )));
                }
                // A concurrent replace swapped the index and removed this body.
                Err(e) if e.kind() == ErrorKind::NotFound && attempt < MAX_READ_ATTEMPTS => {
                    debug!(body = %record.body, attempt, "body replaced during read, retrying");
                    attempt += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!(path = %body_path.display(), "index entry has no body file");
                    return Ok(None);
                }
                Err(e) => return Err(StoreError::io(body_path, e)),
            }
        }
    }

    async fn put(
        &self,
        partition: &Partition,
        request: &Request,
        response: Response,
    ) -> Result<(), StoreError> {
        let vary = admit(request, &response)?;
        let identity = identity(request);
        let dir = self.partition_dir(partition.name());
        let (status, headers, body) = response.into_parts();
        let body_name = format!(
            "{}.{BODY_EXT}",
            digest(&[&identity, &vary.fingerprint(), &hex::encode(Sha256::digest(&body))])
        );

        let _guard = self.write_lock.lock().await;

        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;

        write_atomic(&dir.join(&body_name), &body).await?;

        let index_path = self.index_path(partition, &identity);
        let mut records = self.read_index(&index_path).await?;
        let mut orphaned = Vec::new();
        records.retain(|r| {
            let replaced = r.vary.matches(request);
            if replaced && r.body != body_name {
                orphaned.push(r.body.clone());
            }
            !replaced
        });
        records.push(Record {
            vary,
            status: status.as_u16(),
            headers,
            body: body_name,
        });

        let encoded = serde_json::to_vec(&records).map_err(|source| StoreError::Corrupt {
            path: index_path.clone(),
            source,
        })?;
        write_atomic(&index_path, &encoded).await?;

        for name in orphaned {
            if let Err(e) = fs::remove_file(dir.join(&name)).await {
                warn!(body = %name, error = %e, "failed to remove replaced body file");
            }
        }

        Ok(())
    }

    async fn list_names(&self) -> Result<BTreeSet<String>, StoreError> {
        let mut names = BTreeSet::new();
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| StoreError::io(&self.root, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.root, e))?
        {
            let file_name = entry.file_name();
            let decoded = file_name
                .to_str()
                .and_then(|s| hex::decode(s).ok())
                .and_then(|raw| String::from_utf8(raw).ok());
            match decoded {
                Some(name) => {
                    names.insert(name);
                }
                None => debug!(entry = ?file_name, "skipping foreign directory entry"),
            }
        }

        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        let dir = self.partition_dir(name);
        let _guard = self.write_lock.lock().await;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(dir, e)),
        }
    }
}

fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)
        .await
        .map_err(|e| StoreError::io(&tmp, e))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn req(url: &str) -> Request {
        Request::get(Url::parse(url).unwrap())
    }

    #[tokio::test]
    async fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let request = req("http://a.test/index.html");

        {
            let store = DiskStore::open_at(dir.path()).await.unwrap();
            let p = store.open("app-static-v1").await.unwrap();
            let response = Response::new(StatusCode::OK)
                .header("Content-Type", "text/html")
                .body("<h1>home</h1>");
            store.put(&p, &request, response).await.unwrap();
        }

        let store = DiskStore::open_at(dir.path()).await.unwrap();
        let p = store.open("app-static-v1").await.unwrap();
        let hit = store.get(&p, &request).await.unwrap().unwrap();
        assert_eq!(hit.status(), StatusCode::OK);
        assert_eq!(hit.headers().get("content-type"), Some("text/html"));
        assert_eq!(&hit.body_ref()[..], b"<h1>home</h1>");
    }

    #[tokio::test]
    async fn list_and_delete_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open_at(dir.path()).await.unwrap();
        store.open("app-static-v1").await.unwrap();
        store.open("app-images-v1").await.unwrap();
        std::fs::create_dir(dir.path().join("not-hex!")).unwrap();

        let names = store.list_names().await.unwrap();
        assert_eq!(
            names.into_iter().collect::<Vec<_>>(),
            vec!["app-images-v1".to_string(), "app-static-v1".to_string()]
        );

        assert!(store.delete("app-images-v1").await.unwrap());
        assert!(!store.delete("app-images-v1").await.unwrap());
        assert!(!store.list_names().await.unwrap().contains("app-images-v1"));
    }

    #[tokio::test]
    async fn replace_removes_old_body() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open_at(dir.path()).await.unwrap();
        let p = store.open("app-static-v1").await.unwrap();
        let request = req("http://a.test/app.js");

        store
            .put(&p, &request, Response::new(StatusCode::OK).body("v1"))
            .await
            .unwrap();
        store
            .put(&p, &request, Response::new(StatusCode::OK).body("v2"))
            .await
            .unwrap();

        let hit = store.get(&p, &request).await.unwrap().unwrap();
        assert_eq!(&hit.body_ref()[..], b"v2");

        assert_eq!(body_files(&store, "app-static-v1"), 1);
    }

    fn body_files(store: &DiskStore, partition: &str) -> usize {
        std::fs::read_dir(store.partition_dir(partition))
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().is_some_and(|x| x == BODY_EXT))
            .count()
    }

    #[tokio::test]
    async fn vary_variants_share_one_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open_at(dir.path()).await.unwrap();
        let p = store.open("app-static-v1").await.unwrap();
        let gzip = req("http://a.test/app.js").header("Accept-Encoding", "gzip");
        let br = req("http://a.test/app.js").header("Accept-Encoding", "br");
        let varied = |body: &str| {
            Response::new(StatusCode::OK)
                .header("Vary", "Accept-Encoding")
                .body(body.to_string())
        };

        store.put(&p, &gzip, varied("gz-1")).await.unwrap();
        store.put(&p, &br, varied("br-1")).await.unwrap();
        store.put(&p, &gzip, varied("gz-2")).await.unwrap();

        let hit = store.get(&p, &gzip).await.unwrap().unwrap();
        assert_eq!(&hit.body_ref()[..], b"gz-2");
        let hit = store.get(&p, &br).await.unwrap().unwrap();
        assert_eq!(&hit.body_ref()[..], b"br-1");
        assert!(store.get(&p, &req("http://a.test/app.js")).await.unwrap().is_none());
        assert_eq!(body_files(&store, "app-static-v1"), 2);
    }

    #[tokio::test]
    async fn rejects_vary_wildcard() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open_at(dir.path()).await.unwrap();
        let p = store.open("app-static-v1").await.unwrap();
        let request = req("http://a.test/feed");

        let err = store
            .put(&p, &request, Response::new(StatusCode::OK).header("Vary", "*"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VaryWildcard));
        assert!(store.get(&p, &request).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_puts_leave_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open_at(dir.path()).await.unwrap();
        let p = store.open("app-images-v1").await.unwrap();
        let request = req("http://a.test/images/hero.jpg");

        let (a, b) = tokio::join!(
            store.put(&p, &request, Response::new(StatusCode::OK).body("first")),
            store.put(&p, &request, Response::new(StatusCode::OK).body("second")),
        );
        a.unwrap();
        b.unwrap();

        let hit = store.get(&p, &request).await.unwrap().unwrap();
        assert!(matches!(&hit.body_ref()[..], b"first" | b"second"));
        assert_eq!(body_files(&store, "app-images-v1"), 1);
    }

    #[tokio::test]
    async fn missing_body_reads_as_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open_at(dir.path()).await.unwrap();
        let p = store.open("app-static-v1").await.unwrap();
        let request = req("http://a.test/");
        store
            .put(&p, &request, Response::new(StatusCode::OK).body("shell"))
            .await
            .unwrap();

        for entry in std::fs::read_dir(store.partition_dir("app-static-v1")).unwrap() {
            let path = entry.unwrap().path();
            if path.extension().is_some_and(|x| x == BODY_EXT) {
                std::fs::remove_file(path).unwrap();
            }
        }

        assert!(store.get(&p, &request).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reads_during_replacement_still_hit() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(DiskStore::open_at(dir.path()).await.unwrap());
        let p = store.open("app-static-v1").await.unwrap();
        let request = req("http://a.test/app.js");
        store
            .put(&p, &request, Response::new(StatusCode::OK).body("v0"))
            .await
            .unwrap();

        let writer = {
            let (store, p, request) = (store.clone(), p.clone(), request.clone());
            tokio::spawn(async move {
                for i in 1..=20 {
                    let body = format!("v{i}");
                    store
                        .put(&p, &request, Response::new(StatusCode::OK).body(body))
                        .await
                        .unwrap();
                }
            })
        };

        for _ in 0..20 {
            assert!(store.get(&p, &request).await.unwrap().is_some());
        }
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn rejects_partial_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open_at(dir.path()).await.unwrap();
        let p = store.open("app-static-v1").await.unwrap();
        let err = store
            .put(
                &p,
                &req("http://a.test/video.mp4"),
                Response::new(StatusCode::PARTIAL_CONTENT),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PartialResponse));
    }
}
