//! Concurrent ingestion and consistency layer for the upload relay.
//!
//! Sits between an HTTP handler layer and a [`relay_store::RemoteStore`],
//! providing collision-free uploads, chunked transfer of large files,
//! content-hash ETags with overwrite preconditions, and reclamation of
//! leftover temp artifacts.

pub mod config;
pub mod dircache;
pub mod error;
pub mod etag;
pub mod gateway;
pub mod hash;
pub mod materialize;
pub mod meta;
pub mod reserve;
pub mod sweeper;
pub mod upload;

pub use config::{GatewayConfig, SweeperConfig, UploadConfig};
pub use error::{Error, Result};
pub use gateway::{Gateway, UpdateResult, UploadResult};
pub use hash::hash_file;
pub use meta::{
    FileRecord, FileStatus, HistoryAction, HistoryEntry, MemoryMetadataStore, MetadataStore,
};
pub use sweeper::{run_startup_sweep, schedule_periodic_sweep, SweepStats, SweeperHandle};
pub use upload::{Progress, ProgressFn, TransferMode, TransferReport};
