//! In-memory [`RemoteStore`] used by tests.
//!
//! Mimics the strictness of a WebDAV server: directory creation requires
//! the parent collection, creating an existing collection is refused, and
//! listing an absent path reports absence rather than an error. A
//! `create_directory` call counter and an optional per-call latency make
//! the single-flight property observable from tests.

use crate::path::RemotePath;
use crate::store::{
    ByteRange, RemoteEntry, RemoteStat, RemoteStore, RemoteStoreError, Result,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Default)]
struct Tree {
    /// Normalized directory paths, root implied.
    dirs: BTreeSet<String>,
    /// Normalized file path -> content.
    files: BTreeMap<String, Vec<u8>>,
}

#[derive(Default)]
pub struct MemoryRemoteStore {
    tree: Mutex<Tree>,
    create_calls: AtomicUsize,
    latency: Option<Duration>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay `create_directory` and `put_file` calls, widening race
    /// windows so tests can overlap or cancel callers deterministically.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of `create_directory` network calls observed.
    pub fn create_directory_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn file_content(&self, path: &RemotePath) -> Option<Vec<u8>> {
        self.tree.lock().unwrap().files.get(key(path)).cloned()
    }

    pub fn insert_file(&self, path: &RemotePath, content: &[u8]) {
        let mut tree = self.tree.lock().unwrap();
        let parent = path.parent();
        if !parent.is_root() {
            let mut acc = String::new();
            for segment in parent.segments() {
                if !acc.is_empty() {
                    acc.push('/');
                }
                acc.push_str(segment);
                tree.dirs.insert(acc.clone());
            }
        }
        tree.files.insert(key(path).to_string(), content.to_vec());
    }

    fn dir_exists(tree: &Tree, path: &RemotePath) -> bool {
        path.is_root() || tree.dirs.contains(key(path))
    }
}

fn key(path: &RemotePath) -> &str {
    path.as_str().trim_start_matches('/')
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn create_directory(&self, path: &RemotePath) -> Result<()> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut tree = self.tree.lock().unwrap();
        if Self::dir_exists(&tree, path) {
            return Err(RemoteStoreError::Denied(format!(
                "MKCOL {path}: collection exists"
            )));
        }
        if !Self::dir_exists(&tree, &path.parent()) {
            return Err(RemoteStoreError::NotFound(format!(
                "MKCOL {path}: missing parent"
            )));
        }
        tree.dirs.insert(key(path).to_string());
        Ok(())
    }

    async fn list_directory(&self, path: &RemotePath) -> Result<Option<Vec<RemoteEntry>>> {
        let tree = self.tree.lock().unwrap();
        if !Self::dir_exists(&tree, path) {
            return Ok(None);
        }
        let prefix = if path.is_root() {
            String::new()
        } else {
            format!("{}/", key(path))
        };

        let mut entries = Vec::new();
        for dir in &tree.dirs {
            if let Some(rest) = dir.strip_prefix(&prefix) {
                if !rest.is_empty() && !rest.contains('/') {
                    entries.push(RemoteEntry {
                        name: rest.to_string(),
                        is_dir: true,
                        size: 0,
                    });
                }
            }
        }
        for (file, content) in &tree.files {
            if let Some(rest) = file.strip_prefix(&prefix) {
                if !rest.is_empty() && !rest.contains('/') {
                    entries.push(RemoteEntry {
                        name: rest.to_string(),
                        is_dir: false,
                        size: content.len() as u64,
                    });
                }
            }
        }
        Ok(Some(entries))
    }

    async fn put_file(&self, path: &RemotePath, source: &Path, overwrite: bool) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let content = tokio::fs::read(source).await?;
        let mut tree = self.tree.lock().unwrap();
        if !Self::dir_exists(&tree, &path.parent()) {
            return Err(RemoteStoreError::NotFound(format!(
                "PUT {path}: missing parent collection"
            )));
        }
        if !overwrite && tree.files.contains_key(key(path)) {
            return Err(RemoteStoreError::Denied(format!(
                "PUT {path}: target already exists"
            )));
        }
        tree.files.insert(key(path).to_string(), content);
        Ok(())
    }

    async fn get_to_file(
        &self,
        path: &RemotePath,
        dest: &Path,
        range: Option<ByteRange>,
    ) -> Result<()> {
        let content = {
            let tree = self.tree.lock().unwrap();
            tree.files
                .get(key(path))
                .cloned()
                .ok_or_else(|| RemoteStoreError::NotFound(path.to_string()))?
        };
        let slice = match range {
            Some(range) => {
                let end = (range.end + 1).min(content.len() as u64) as usize;
                let start = (range.start as usize).min(end);
                content[start..end].to_vec()
            }
            None => content,
        };
        tokio::fs::write(dest, slice).await?;
        Ok(())
    }

    async fn download_to_temp(&self, path: &RemotePath) -> Result<PathBuf> {
        let temp = tempfile::Builder::new()
            .prefix("relay-dl-")
            .tempfile()
            .map_err(RemoteStoreError::Io)?;
        let dest = temp.into_temp_path().keep().map_err(|err| {
            RemoteStoreError::Io(std::io::Error::other(err.to_string()))
        })?;
        match self.get_to_file(path, &dest, None).await {
            Ok(()) => Ok(dest),
            Err(err) => {
                let _ = tokio::fs::remove_file(&dest).await;
                Err(err)
            }
        }
    }

    async fn stat(&self, path: &RemotePath) -> Result<Option<RemoteStat>> {
        let tree = self.tree.lock().unwrap();
        if let Some(content) = tree.files.get(key(path)) {
            return Ok(Some(RemoteStat {
                size: content.len() as u64,
                is_dir: false,
            }));
        }
        if Self::dir_exists(&tree, path) {
            return Ok(Some(RemoteStat {
                size: 0,
                is_dir: true,
            }));
        }
        Ok(None)
    }

    async fn delete(&self, path: &RemotePath) -> Result<()> {
        let mut tree = self.tree.lock().unwrap();
        if tree.files.remove(key(path)).is_some() {
            return Ok(());
        }
        if tree.dirs.remove(key(path)) {
            let prefix = format!("{}/", key(path));
            tree.dirs.retain(|d| !d.starts_with(&prefix));
            tree.files.retain(|f, _| !f.starts_with(&prefix));
            return Ok(());
        }
        Err(RemoteStoreError::NotFound(path.to_string()))
    }

    async fn move_entry(&self, src: &RemotePath, dst: &RemotePath, overwrite: bool) -> Result<()> {
        let mut tree = self.tree.lock().unwrap();
        if !overwrite && tree.files.contains_key(key(dst)) {
            return Err(RemoteStoreError::Denied(format!(
                "MOVE {src}: destination exists"
            )));
        }
        let content = tree
            .files
            .remove(key(src))
            .ok_or_else(|| RemoteStoreError::NotFound(src.to_string()))?;
        tree.files.insert(key(dst).to_string(), content);
        Ok(())
    }

    async fn copy_entry(&self, src: &RemotePath, dst: &RemotePath, overwrite: bool) -> Result<()> {
        let mut tree = self.tree.lock().unwrap();
        if !overwrite && tree.files.contains_key(key(dst)) {
            return Err(RemoteStoreError::Denied(format!(
                "COPY {src}: destination exists"
            )));
        }
        let content = tree
            .files
            .get(key(src))
            .cloned()
            .ok_or_else(|| RemoteStoreError::NotFound(src.to_string()))?;
        tree.files.insert(key(dst).to_string(), content);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_requires_parent_and_rejects_duplicates() {
        let store = MemoryRemoteStore::new();
        let deep = RemotePath::normalize("a/b");
        assert!(matches!(
            store.create_directory(&deep).await,
            Err(RemoteStoreError::NotFound(_))
        ));

        let top = RemotePath::normalize("a");
        store.create_directory(&top).await.unwrap();
        store.create_directory(&deep).await.unwrap();
        assert!(matches!(
            store.create_directory(&deep).await,
            Err(RemoteStoreError::Denied(_))
        ));
        assert_eq!(store.create_directory_calls(), 4);
    }

    #[tokio::test]
    async fn listing_distinguishes_absence_from_empty() {
        let store = MemoryRemoteStore::new();
        let dir = RemotePath::normalize("docs");
        assert!(store.list_directory(&dir).await.unwrap().is_none());

        store.create_directory(&dir).await.unwrap();
        assert_eq!(store.list_directory(&dir).await.unwrap().unwrap().len(), 0);

        store.insert_file(&dir.join("a.txt"), b"hello");
        let entries = store.list_directory(&dir).await.unwrap().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a.txt");
        assert_eq!(entries[0].size, 5);
    }
}
