use crate::path::RemotePath;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Result type for remote store operations.
pub type Result<T> = std::result::Result<T, RemoteStoreError>;

/// Errors that can occur when talking to the remote store.
#[derive(Debug, thiserror::Error)]
pub enum RemoteStoreError {
    /// The remote store could not be reached (network failure, timeout).
    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    /// The remote path does not exist.
    #[error("remote path not found: {0}")]
    NotFound(String),

    /// The remote store refused the operation (auth, conflicts, policy).
    #[error("remote operation denied: {0}")]
    Denied(String),

    /// The remote store answered with something this client cannot parse.
    #[error("remote protocol error: {0}")]
    Protocol(String),

    /// Local I/O failure while streaming to or from the remote store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Base name of the entry.
    pub name: String,
    pub is_dir: bool,
    /// Size in bytes; zero for directories.
    pub size: u64,
}

/// Metadata of a single remote entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteStat {
    pub size: u64,
    pub is_dir: bool,
}

/// An inclusive byte range for partial reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

/// The remote object store this relay writes into.
///
/// Paths are relative to the implementation's configured root prefix.
/// Absence is modelled as `Ok(None)` where the protocol can distinguish it;
/// ambiguous remote failures surface as errors and are resolved by the
/// caller through existence probes.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Create a single directory. Parents are not created implicitly.
    async fn create_directory(&self, path: &RemotePath) -> Result<()>;

    /// List a directory's immediate children. `Ok(None)` when the
    /// directory does not exist.
    async fn list_directory(&self, path: &RemotePath) -> Result<Option<Vec<RemoteEntry>>>;

    /// Stream a local file to the remote path. With `overwrite` false the
    /// call fails if the target already exists.
    async fn put_file(&self, path: &RemotePath, source: &Path, overwrite: bool) -> Result<()>;

    /// Stream remote content into a local file, optionally a byte range.
    async fn get_to_file(
        &self,
        path: &RemotePath,
        dest: &Path,
        range: Option<ByteRange>,
    ) -> Result<()>;

    /// Download remote content to a fresh local temp file and return its
    /// path. The caller owns the file and must delete it.
    async fn download_to_temp(&self, path: &RemotePath) -> Result<PathBuf>;

    /// `Ok(None)` when the path does not exist.
    async fn stat(&self, path: &RemotePath) -> Result<Option<RemoteStat>>;

    /// Delete a file or directory (recursively, per WebDAV semantics).
    async fn delete(&self, path: &RemotePath) -> Result<()>;

    async fn move_entry(&self, src: &RemotePath, dst: &RemotePath, overwrite: bool) -> Result<()>;

    async fn copy_entry(&self, src: &RemotePath, dst: &RemotePath, overwrite: bool) -> Result<()>;
}
