use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Prefix of every chunk-merge scratch directory. The sweeper matches on
/// it, so the upload engine and sweeper must agree.
pub const MERGE_DIR_PREFIX: &str = "merge-";

/// Subdirectory of the temp root holding received upload source files.
pub const UPLOAD_DIR_NAME: &str = "relay-uploads";

/// Transfer tuning for the upload engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Fixed chunk size for chunked mode.
    pub chunk_size: u64,
    /// Chunks in flight at once during the split phase.
    pub parallel_chunks: usize,
    /// Sources at or above this size use chunked mode.
    pub chunk_threshold: u64,
    /// Where merge scratch directories are created.
    pub scratch_root: PathBuf,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: 10 * 1024 * 1024,
            parallel_chunks: 2,
            chunk_threshold: 100 * 1024 * 1024,
            scratch_root: std::env::temp_dir(),
        }
    }
}

/// Settings for the ingestion layer as a whole.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub upload: UploadConfig,
    /// How long a verified directory stays trusted without re-probing.
    pub dir_cache_ttl: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            upload: UploadConfig::default(),
            dir_cache_ttl: Duration::from_secs(3600),
        }
    }
}

/// Settings for the temp-file sweeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    /// Temp root scanned for `merge-*` scratch directories; also holds the
    /// lock marker file.
    pub temp_root: PathBuf,
    /// Directory holding received upload source files.
    pub upload_dir: PathBuf,
    /// Artifacts older than this are reclaimable.
    pub ttl: Duration,
    /// Recently touched artifacts are never reclaimed, regardless of TTL.
    pub safe_window: Duration,
    /// Periodic sweep interval.
    pub interval: Duration,
    /// A lock untouched for longer than this belongs to a dead process.
    pub lock_stale: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        let temp_root = std::env::temp_dir();
        Self {
            upload_dir: temp_root.join(UPLOAD_DIR_NAME),
            temp_root,
            ttl: Duration::from_secs(6 * 60 * 60),
            safe_window: Duration::from_secs(10 * 60),
            interval: Duration::from_secs(60 * 60),
            lock_stale: Duration::from_secs(30 * 60),
        }
    }
}
