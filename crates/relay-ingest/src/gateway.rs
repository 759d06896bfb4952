//! Upload gateway facade.
//!
//! Ties the pieces together: directory materialization, name
//! reservation, transfer, hashing, ETag preconditions, and metadata
//! bookkeeping. This is the surface an HTTP handler layer calls into.

use crate::config::GatewayConfig;
use crate::dircache::DirCache;
use crate::error::{Error, Result};
use crate::etag::{self, OverwriteDecision};
use crate::hash::hash_file;
use crate::materialize::DirMaterializer;
use crate::meta::{FileRecord, FileStatus, HistoryAction, HistoryEntry, MetadataStore};
use crate::reserve::{NameResolver, ReservationTable};
use crate::upload::{delete_local_file, ProgressFn, TransferReport, UploadEngine};
use chrono::Utc;
use log::{debug, info};
use relay_store::{RemotePath, RemoteStore};
use std::path::Path;
use std::sync::Arc;

/// Result of a fresh upload.
#[derive(Debug, Clone)]
pub struct UploadResult {
    pub path: RemotePath,
    /// Final name after sanitization and collision suffixing.
    pub file_name: String,
    /// True when the name differs from what the caller asked for.
    pub renamed: bool,
    pub etag: String,
    pub content_hash: String,
    pub report: TransferReport,
}

/// Result of an overwrite.
#[derive(Debug, Clone)]
pub struct UpdateResult {
    pub etag: String,
    /// False when the new content was identical and nothing was written.
    pub changed: bool,
}

pub struct Gateway {
    store: Arc<dyn RemoteStore>,
    meta: Arc<dyn MetadataStore>,
    config: GatewayConfig,
    materializer: Arc<DirMaterializer>,
    resolver: NameResolver,
    engine: UploadEngine,
}

impl Gateway {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        meta: Arc<dyn MetadataStore>,
        config: GatewayConfig,
    ) -> Self {
        let cache = Arc::new(DirCache::new(config.dir_cache_ttl));
        let materializer = Arc::new(DirMaterializer::new(Arc::clone(&store), cache));
        let resolver = NameResolver::new(Arc::clone(&store), Arc::new(ReservationTable::new()));
        let engine = UploadEngine::new(Arc::clone(&store), config.upload.clone());
        Self {
            store,
            meta,
            config,
            materializer,
            resolver,
            engine,
        }
    }

    /// Ensures a directory tree exists on the remote.
    pub async fn ensure_directory(&self, dir: &RemotePath) -> Result<()> {
        self.materializer.ensure_directory(dir).await
    }

    /// Uploads a new file into `dir` under a collision-free name.
    pub async fn upload(
        &self,
        dir: &RemotePath,
        source: &Path,
        desired_name: &str,
        declared_mime: Option<&str>,
        changed_by: &str,
        progress: Option<ProgressFn>,
    ) -> Result<UploadResult> {
        self.materializer.ensure_directory(dir).await?;
        let reservation = self.resolver.reserve_unique(dir, desired_name).await?;
        let target = dir.join(reservation.name());

        let size = tokio::fs::metadata(source).await?.len();
        let (report, content_hash) = if size >= self.config.upload.chunk_threshold {
            // Large files: transfer first, hash after, to keep just one
            // sequential read of the source at a time.
            let report = self.engine.transfer(source, &target, false, progress).await?;
            let hash = hash_file(source).await?;
            (report, hash)
        } else {
            let (report, hash) = tokio::try_join!(
                self.engine.transfer(source, &target, false, progress),
                async { Ok(hash_file(source).await?) },
            )?;
            (report, hash)
        };

        let renamed = reservation.name() != desired_name;
        let file_name = reservation.name().to_string();
        drop(reservation);

        let etag = etag::generate(&content_hash);
        let extension = target.extension();
        let mime_type = resolve_mime(declared_mime, extension.as_deref());
        let now = Utc::now();
        self.meta
            .create(FileRecord {
                path: target.clone(),
                file_name: file_name.clone(),
                extension,
                mime_type,
                size: report.size,
                content_hash: Some(content_hash.clone()),
                etag: Some(etag.clone()),
                status: FileStatus::Active,
                created_at: now,
                updated_at: now,
            })
            .await?;
        self.meta
            .create_history_entry(HistoryEntry {
                path: target.clone(),
                action: HistoryAction::Upload,
                old_etag: None,
                new_etag: Some(etag.clone()),
                old_hash: None,
                new_hash: Some(content_hash.clone()),
                changed_by: changed_by.to_string(),
                at: now,
            })
            .await?;

        info!("uploaded {target} ({} bytes)", report.size);
        Ok(UploadResult {
            path: target,
            file_name,
            renamed,
            etag,
            content_hash,
            report,
        })
    }

    /// Overwrites an existing file, guarded by an `If-Match` ETag.
    ///
    /// Files that predate tracking have no stored hash. For those the
    /// current remote content is downloaded and hashed first, the record
    /// is backfilled, and the caller is told to retry with the fresh
    /// ETag. The overwrite itself never proceeds on that pass.
    pub async fn update(
        &self,
        path: &RemotePath,
        source: &Path,
        declared_mime: Option<&str>,
        if_match: Option<&str>,
        changed_by: &str,
    ) -> Result<UpdateResult> {
        let stat = self
            .store
            .stat(path)
            .await?
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        if stat.is_dir {
            return Err(Error::NotFound(path.to_string()));
        }

        // Content type may not change across an overwrite. Files whose
        // extension yields no known type are not guarded.
        if let Some(declared) = declared_mime {
            if let Some(existing) = guess_mime(path.extension().as_deref()) {
                if !declared.eq_ignore_ascii_case(&existing) {
                    return Err(Error::TypeMismatch {
                        existing,
                        uploaded: declared.to_string(),
                    });
                }
            }
        }

        let record = self.meta.find_by_path(path).await?;
        let current_hash = match record.as_ref().and_then(|r| r.content_hash.clone()) {
            Some(hash) => hash,
            None => {
                let etag = self.backfill_hash(path, record.is_none(), stat.size).await?;
                return Err(Error::PreconditionRequired { etag });
            }
        };
        let current_etag = record
            .as_ref()
            .and_then(|r| r.etag.clone())
            .unwrap_or_else(|| etag::generate(&current_hash));

        let new_hash = hash_file(source).await?;
        match etag::evaluate_overwrite(if_match, &current_hash, &new_hash) {
            OverwriteDecision::PreconditionRequired => {
                return Err(Error::PreconditionRequired { etag: current_etag });
            }
            OverwriteDecision::PreconditionFailed => {
                return Err(Error::PreconditionFailed { etag: current_etag });
            }
            OverwriteDecision::Unchanged => {
                debug!("overwrite of {path} skipped, content identical");
                return Ok(UpdateResult {
                    etag: current_etag,
                    changed: false,
                });
            }
            OverwriteDecision::Proceed => {}
        }

        self.engine.transfer(source, path, true, None).await?;
        let size = tokio::fs::metadata(source).await?.len();
        let new_etag = etag::generate(&new_hash);
        self.meta
            .update_size_hash_etag(path, size, &new_hash, &new_etag)
            .await?;
        self.meta
            .create_history_entry(HistoryEntry {
                path: path.clone(),
                action: HistoryAction::Update,
                old_etag: Some(current_etag),
                new_etag: Some(new_etag.clone()),
                old_hash: Some(current_hash),
                new_hash: Some(new_hash),
                changed_by: changed_by.to_string(),
                at: Utc::now(),
            })
            .await?;

        info!("updated {path} ({size} bytes)");
        Ok(UpdateResult {
            etag: new_etag,
            changed: true,
        })
    }

    /// Deletes a remote file and marks its record accordingly.
    pub async fn delete(&self, path: &RemotePath, changed_by: &str) -> Result<()> {
        self.store.delete(path).await?;
        if let Some(record) = self.meta.find_by_path(path).await? {
            self.meta.update_status(path, FileStatus::Deleted).await?;
            self.meta
                .create_history_entry(HistoryEntry {
                    path: path.clone(),
                    action: HistoryAction::Delete,
                    old_etag: record.etag,
                    new_etag: None,
                    old_hash: record.content_hash,
                    new_hash: None,
                    changed_by: changed_by.to_string(),
                    at: Utc::now(),
                })
                .await?;
        }
        info!("deleted {path}");
        Ok(())
    }

    /// Downloads the current remote content, hashes it, and persists the
    /// result so the next update attempt has something to match against.
    async fn backfill_hash(
        &self,
        path: &RemotePath,
        create_record: bool,
        size: u64,
    ) -> Result<String> {
        let temp = self.store.download_to_temp(path).await?;
        let hashed = hash_file(&temp).await;
        delete_local_file(&temp).await;
        let hash = hashed?;
        let etag = etag::generate(&hash);

        if create_record {
            let extension = path.extension();
            let now = Utc::now();
            self.meta
                .create(FileRecord {
                    path: path.clone(),
                    file_name: path.file_name().unwrap_or_default().to_string(),
                    mime_type: resolve_mime(None, extension.as_deref()),
                    extension,
                    size,
                    content_hash: Some(hash.clone()),
                    etag: Some(etag.clone()),
                    status: FileStatus::Active,
                    created_at: now,
                    updated_at: now,
                })
                .await?;
        } else {
            self.meta.update_hash_and_etag(path, &hash, &etag).await?;
        }
        debug!("backfilled content hash for {path}");
        Ok(etag)
    }
}

/// Type inferred from an extension, if the extension is known at all.
fn guess_mime(extension: Option<&str>) -> Option<String> {
    extension
        .and_then(|ext| mime_guess::from_ext(ext).first())
        .map(|mime| mime.essence_str().to_string())
}

/// Picks a MIME type: the declared one if given, otherwise guessed from
/// the extension, otherwise the generic fallback.
fn resolve_mime(declared: Option<&str>, extension: Option<&str>) -> String {
    if let Some(declared) = declared {
        return declared.to_string();
    }
    guess_mime(extension).unwrap_or_else(|| "application/octet-stream".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_resolution_prefers_declared_type() {
        assert_eq!(resolve_mime(Some("text/plain"), Some("pdf")), "text/plain");
        assert_eq!(resolve_mime(None, Some("pdf")), "application/pdf");
        assert_eq!(resolve_mime(None, None), "application/octet-stream");
        assert_eq!(resolve_mime(None, Some("zzz9")), "application/octet-stream");
    }

    #[test]
    fn guess_yields_nothing_for_unknown_extensions() {
        assert_eq!(guess_mime(Some("pdf")).as_deref(), Some("application/pdf"));
        assert_eq!(guess_mime(Some("zzz9")), None);
        assert_eq!(guess_mime(None), None);
    }
}
