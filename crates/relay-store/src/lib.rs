//! # relay-store
//!
//! Remote-store side of the upload relay: normalized remote paths, the
//! [`RemoteStore`] trait consumed by the ingestion layer, a WebDAV
//! implementation over reqwest, and an in-memory store for tests.

mod memory;
mod path;
mod store;
mod webdav;

pub use memory::MemoryRemoteStore;
pub use path::{normalize_name, RemotePath};
pub use store::{
    ByteRange, RemoteEntry, RemoteStat, RemoteStore, RemoteStoreError, Result,
};
pub use webdav::{WebdavConfig, WebdavStore};
