use crate::dircache::DirCache;
use crate::error::{Error, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use log::debug;
use relay_store::{RemotePath, RemoteStore, RemoteStoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type EnsureFuture = Shared<BoxFuture<'static, std::result::Result<(), Arc<Error>>>>;

/// Creates remote directory trees, deduplicating concurrent requests.
///
/// At most one materialization per path runs at a time. Callers that ask
/// while one is in flight await the same future and share its outcome.
pub struct DirMaterializer {
    store: Arc<dyn RemoteStore>,
    cache: Arc<DirCache>,
    in_flight: Mutex<HashMap<RemotePath, EnsureFuture>>,
}

impl DirMaterializer {
    pub fn new(store: Arc<dyn RemoteStore>, cache: Arc<DirCache>) -> Self {
        Self {
            store,
            cache,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Ensures `path` exists on the remote, creating missing ancestors.
    pub async fn ensure_directory(self: &Arc<Self>, path: &RemotePath) -> Result<()> {
        if path.is_root() {
            return Ok(());
        }
        if self.cache.is_fresh(path) {
            return Ok(());
        }

        let future = {
            let mut in_flight = match self.in_flight.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match in_flight.get(path) {
                Some(existing) => existing.clone(),
                None => {
                    let this = Arc::clone(self);
                    let target = path.clone();
                    let future = async move {
                        this.ensure_impl(&target).await.map_err(Arc::new)
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(path.clone(), future.clone());
                    future
                }
            }
        };

        let outcome = future.await;

        // Always drop the entry so the next failure can retry fresh.
        {
            let mut in_flight = match self.in_flight.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            in_flight.remove(path);
        }

        outcome.map_err(Error::Shared)
    }

    async fn ensure_impl(&self, path: &RemotePath) -> Result<()> {
        // Fast path: one MKCOL for the full path.
        match self.store.create_directory(path).await {
            Ok(()) => {
                self.cache.record(path);
                return Ok(());
            }
            Err(err) => {
                debug!("direct create of {} failed, probing: {}", path, err);
            }
        }

        // The failure is ambiguous (already exists, missing parent, or a
        // server quirk), so check reality before walking ancestors.
        if self.exists(path).await? {
            self.cache.record(path);
            return Ok(());
        }

        self.ensure_sequential(path).await
    }

    /// Walks the ancestor chain, creating each missing segment in order.
    async fn ensure_sequential(&self, path: &RemotePath) -> Result<()> {
        for prefix in path.prefixes() {
            if self.cache.is_fresh(&prefix) {
                continue;
            }
            if self.exists(&prefix).await? {
                self.cache.record(&prefix);
                continue;
            }
            if let Err(err) = self.store.create_directory(&prefix).await {
                // Another writer may have created it between the probe and
                // the MKCOL. Only a still-absent directory is fatal.
                if !self.exists(&prefix).await? {
                    return Err(Error::CreateDenied(format!("{}: {}", prefix, err)));
                }
            }
            self.cache.record(&prefix);
        }
        Ok(())
    }

    /// Probes `path` with a listing. Transport failures propagate so a
    /// flaky remote is never mistaken for a missing directory.
    async fn exists(&self, path: &RemotePath) -> Result<bool> {
        match self.store.list_directory(path).await {
            Ok(listing) => Ok(listing.is_some()),
            Err(err @ RemoteStoreError::Unavailable(_)) => Err(err.into()),
            Err(RemoteStoreError::NotFound(_)) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_store::MemoryRemoteStore;
    use std::time::Duration;

    fn materializer(store: Arc<MemoryRemoteStore>) -> Arc<DirMaterializer> {
        let cache = Arc::new(DirCache::new(Duration::from_secs(3600)));
        Arc::new(DirMaterializer::new(store, cache))
    }

    #[tokio::test]
    async fn creates_nested_tree() {
        let store = Arc::new(MemoryRemoteStore::new());
        let m = materializer(store.clone());

        let path = RemotePath::normalize("a/b/c");
        m.ensure_directory(&path).await.unwrap();

        assert!(store.list_directory(&path).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn root_is_a_no_op() {
        let store = Arc::new(MemoryRemoteStore::new());
        let m = materializer(store.clone());

        m.ensure_directory(&RemotePath::root()).await.unwrap();
        assert_eq!(store.create_directory_calls(), 0);
    }

    #[tokio::test]
    async fn cache_suppresses_repeat_probes() {
        let store = Arc::new(MemoryRemoteStore::new());
        let m = materializer(store.clone());
        let path = RemotePath::normalize("docs");

        m.ensure_directory(&path).await.unwrap();
        let calls = store.create_directory_calls();
        m.ensure_directory(&path).await.unwrap();
        assert_eq!(store.create_directory_calls(), calls);
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_materialization() {
        let store = Arc::new(MemoryRemoteStore::new().with_latency(Duration::from_millis(30)));
        let m = materializer(store.clone());
        let path = RemotePath::normalize("shared/dir");

        let (a, b, c) = tokio::join!(
            m.ensure_directory(&path),
            m.ensure_directory(&path),
            m.ensure_directory(&path),
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();

        // One ambiguous direct attempt, then each segment exactly once.
        assert_eq!(store.create_directory_calls(), 3);
    }

    #[tokio::test]
    async fn existing_directory_is_accepted() {
        let store = Arc::new(MemoryRemoteStore::new());
        store
            .create_directory(&RemotePath::normalize("present"))
            .await
            .unwrap();
        let m = materializer(store.clone());

        m.ensure_directory(&RemotePath::normalize("present"))
            .await
            .unwrap();
    }
}
