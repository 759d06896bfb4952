//! Upload transfer engine.
//!
//! Small files go up with one PUT. Files at or above the chunk threshold
//! are split into fixed-size chunk files in a scratch directory, with a
//! bounded number of chunk writes in flight, then merged in strict index
//! order and PUT as one body. The remote only ever sees complete files.

use crate::config::{UploadConfig, MERGE_DIR_PREFIX};
use crate::error::{Error, Result};
use futures::future::try_join_all;
use log::{debug, info, warn};
use rand::Rng;
use relay_store::{RemotePath, RemoteStore};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// How a file was transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Single,
    Chunked,
}

/// Progress events emitted during a transfer.
#[derive(Debug, Clone, Copy)]
pub enum Progress {
    Single { uploaded: u64, total: u64 },
    Chunked { completed: u32, total_chunks: u32 },
}

pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;

/// What a finished transfer looked like.
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub size: u64,
    pub mode: TransferMode,
    pub chunk_count: Option<u32>,
}

pub struct UploadEngine {
    store: Arc<dyn RemoteStore>,
    config: UploadConfig,
}

impl UploadEngine {
    pub fn new(store: Arc<dyn RemoteStore>, config: UploadConfig) -> Self {
        Self { store, config }
    }

    /// Transfers `source` to `target`, picking the mode by size.
    pub async fn transfer(
        &self,
        source: &Path,
        target: &RemotePath,
        overwrite: bool,
        progress: Option<ProgressFn>,
    ) -> Result<TransferReport> {
        let size = tokio::fs::metadata(source).await?.len();
        if size < self.config.chunk_threshold {
            self.store.put_file(target, source, overwrite).await?;
            if let Some(progress) = &progress {
                progress(Progress::Single {
                    uploaded: size,
                    total: size,
                });
            }
            debug!("single put of {target} ({size} bytes)");
            return Ok(TransferReport {
                size,
                mode: TransferMode::Single,
                chunk_count: None,
            });
        }
        self.transfer_chunked(source, target, size, overwrite, progress)
            .await
    }

    async fn transfer_chunked(
        &self,
        source: &Path,
        target: &RemotePath,
        size: u64,
        overwrite: bool,
        progress: Option<ProgressFn>,
    ) -> Result<TransferReport> {
        let chunk_size = self.config.chunk_size;
        let total_chunks = size.div_ceil(chunk_size) as u32;
        let scratch = new_scratch_dir(&self.config.scratch_root);
        tokio::fs::create_dir_all(&scratch).await?;
        // Removes the directory on success, failure, and cancellation
        // alike. If removal fails the sweeper reclaims it later.
        let guard = ScratchGuard {
            path: scratch.clone(),
        };
        info!(
            "chunked transfer of {target}: {size} bytes in {total_chunks} chunks via {}",
            scratch.display()
        );

        let outcome = self
            .run_chunked(source, target, size, overwrite, &scratch, total_chunks, progress)
            .await;

        drop(guard);
        outcome?;
        Ok(TransferReport {
            size,
            mode: TransferMode::Chunked,
            chunk_count: Some(total_chunks),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_chunked(
        &self,
        source: &Path,
        target: &RemotePath,
        size: u64,
        overwrite: bool,
        scratch: &Path,
        total_chunks: u32,
        progress: Option<ProgressFn>,
    ) -> Result<()> {
        let chunk_size = self.config.chunk_size;
        let completed = Arc::new(AtomicU32::new(0));

        // Split phase, at most `parallel_chunks` writes in flight.
        for batch in (0..total_chunks).collect::<Vec<_>>().chunks(self.config.parallel_chunks) {
            let writes = batch.iter().map(|&index| {
                let offset = u64::from(index) * chunk_size;
                let len = chunk_size.min(size - offset);
                let chunk_path = chunk_file_path(scratch, index);
                let source = source.to_path_buf();
                let completed = Arc::clone(&completed);
                let progress = progress.clone();
                async move {
                    write_chunk(&source, &chunk_path, offset, len).await?;
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(progress) = &progress {
                        progress(Progress::Chunked {
                            completed: done,
                            total_chunks,
                        });
                    }
                    Ok::<(), Error>(())
                }
            });
            try_join_all(writes).await?;
        }

        // Merge phase, strict index order.
        let merged_path = scratch.join("merged");
        let mut merged = File::create(&merged_path).await?;
        for index in 0..total_chunks {
            let mut chunk = File::open(chunk_file_path(scratch, index)).await?;
            tokio::io::copy(&mut chunk, &mut merged).await?;
        }
        merged.flush().await?;
        drop(merged);

        self.store.put_file(target, &merged_path, overwrite).await?;
        Ok(())
    }
}

async fn write_chunk(source: &Path, dest: &Path, offset: u64, len: u64) -> Result<()> {
    let mut reader = File::open(source).await?;
    reader.seek(SeekFrom::Start(offset)).await?;
    let mut reader = reader.take(len);

    let mut writer = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(dest)
        .await?;
    tokio::io::copy(&mut reader, &mut writer).await?;
    writer.flush().await?;
    Ok(())
}

/// Owns a scratch directory for the duration of one chunked transfer.
struct ScratchGuard {
    path: PathBuf,
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_dir_all(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    "could not remove scratch dir {}: {err}",
                    self.path.display()
                );
            }
        }
    }
}

fn chunk_file_path(scratch: &Path, index: u32) -> PathBuf {
    scratch.join(format!("chunk_{index:05}"))
}

/// Names a fresh scratch directory under `root`. The prefix is what the
/// sweeper looks for when reclaiming leftovers.
fn new_scratch_dir(root: &Path) -> PathBuf {
    let millis = chrono::Utc::now().timestamp_millis();
    let nonce: u32 = rand::thread_rng().gen_range(0..1_000_000);
    root.join(format!("{MERGE_DIR_PREFIX}{millis}-{nonce:06}"))
}

/// Removes a local temp file after use. Absence is fine; anything else is
/// logged and swallowed so cleanup never fails an otherwise good upload.
pub async fn delete_local_file(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!("could not remove temp file {}: {err}", path.display());
        }
    }
}
