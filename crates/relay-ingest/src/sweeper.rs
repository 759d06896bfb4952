//! Lock-coordinated reclamation of leftover temp artifacts.
//!
//! Two kinds of leftovers accumulate: received upload source files and
//! `merge-*` chunk scratch directories abandoned by a crash. A marker
//! lock file keeps concurrent processes from sweeping the same root at
//! once. Deletion is judged on modification time with a safe window, so
//! anything touched recently is left alone even when past its TTL.

use crate::config::{SweeperConfig, MERGE_DIR_PREFIX};
use log::{debug, info, warn};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const LOCK_FILE_NAME: &str = ".relay-sweeper.lock";

/// Counters from one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub upload_deleted: usize,
    pub upload_skipped: usize,
    pub upload_failed: usize,
    pub merge_deleted: usize,
    pub merge_skipped: usize,
    pub merge_failed: usize,
}

/// Marker-file lock on the temp root. Creation is atomic; a lock left by
/// a dead process is taken over once it goes stale.
struct SweepLock {
    path: PathBuf,
}

impl SweepLock {
    fn acquire(root: &Path, stale_after: Duration) -> Option<Self> {
        let path = root.join(LOCK_FILE_NAME);
        for attempt in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Some(Self { path }),
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    if attempt > 0 || !is_stale(&path, stale_after) {
                        debug!("sweep lock {} held elsewhere", path.display());
                        return None;
                    }
                    warn!("taking over stale sweep lock {}", path.display());
                    if std::fs::remove_file(&path).is_err() {
                        return None;
                    }
                }
                Err(err) => {
                    warn!("could not create sweep lock {}: {err}", path.display());
                    return None;
                }
            }
        }
        None
    }

    fn release(self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            warn!("could not release sweep lock {}: {err}", self.path.display());
        }
    }
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    match entry_age(path) {
        Some(age) => age > stale_after,
        // Unreadable metadata usually means the holder just released it.
        None => false,
    }
}

/// Age of an entry by its own mtime. None when metadata is unreadable.
fn entry_age(path: &Path) -> Option<Duration> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    SystemTime::now().duration_since(modified).ok()
}

/// Age of a scratch directory, judged by the newest thing inside it so a
/// directory still being written to is never reclaimed.
fn scratch_age(dir: &Path) -> Option<Duration> {
    let mut newest: Option<Duration> = entry_age(dir);
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            if let Some(age) = entry_age(&entry.path()) {
                newest = Some(match newest {
                    Some(current) => current.min(age),
                    None => age,
                });
            }
        }
    }
    newest
}

/// One pass over both artifact kinds. `force_merge_clean` bypasses age
/// checks for scratch directories, used at startup when no transfer can
/// be in flight yet.
pub fn sweep(config: &SweeperConfig, ttl: Duration, force_merge_clean: bool) -> SweepStats {
    let mut stats = SweepStats::default();
    sweep_upload_dir(config, ttl, &mut stats);
    sweep_merge_dirs(config, ttl, force_merge_clean, &mut stats);
    info!(
        "sweep done: uploads {}/{} deleted/skipped, scratch {}/{} deleted/skipped",
        stats.upload_deleted, stats.upload_skipped, stats.merge_deleted, stats.merge_skipped
    );
    stats
}

fn sweep_upload_dir(config: &SweeperConfig, ttl: Duration, stats: &mut SweepStats) {
    let entries = match std::fs::read_dir(&config.upload_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return,
        Err(err) => {
            warn!(
                "cannot read upload dir {}: {err}",
                config.upload_dir.display()
            );
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let reclaimable = match entry_age(&path) {
            Some(age) => age > ttl && age > config.safe_window,
            None => false,
        };
        if !reclaimable {
            stats.upload_skipped += 1;
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!("reclaimed upload file {}", path.display());
                stats.upload_deleted += 1;
            }
            Err(err) => {
                warn!("could not reclaim {}: {err}", path.display());
                stats.upload_failed += 1;
            }
        }
    }
}

fn sweep_merge_dirs(
    config: &SweeperConfig,
    ttl: Duration,
    force: bool,
    stats: &mut SweepStats,
) {
    let entries = match std::fs::read_dir(&config.temp_root) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(
                "cannot read temp root {}: {err}",
                config.temp_root.display()
            );
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        if !path.is_dir() || !name.to_string_lossy().starts_with(MERGE_DIR_PREFIX) {
            continue;
        }
        let reclaimable = force
            || match scratch_age(&path) {
                Some(age) => age > ttl && age > config.safe_window,
                None => false,
            };
        if !reclaimable {
            stats.merge_skipped += 1;
            continue;
        }
        match std::fs::remove_dir_all(&path) {
            Ok(()) => {
                debug!("reclaimed scratch dir {}", path.display());
                stats.merge_deleted += 1;
            }
            Err(err) => {
                warn!("could not reclaim {}: {err}", path.display());
                stats.merge_failed += 1;
            }
        }
    }
}

/// Startup sweep. Scratch directories are removed regardless of age since
/// no transfer can be running yet. Returns None when another process
/// holds the lock.
pub fn run_startup_sweep(config: &SweeperConfig) -> Option<SweepStats> {
    let lock = SweepLock::acquire(&config.temp_root, config.lock_stale)?;
    let stats = sweep(config, config.ttl, true);
    lock.release();
    Some(stats)
}

/// Handle to the background sweep task.
pub struct SweeperHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stops the task. A final aggressive pass with the TTL tightened to
    /// the safe window runs before it exits.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(err) = (&mut self.task).await {
            warn!("sweeper task ended abnormally: {err}");
        }
    }
}

/// Spawns the periodic sweep loop.
pub fn schedule_periodic_sweep(config: SweeperConfig) -> SweeperHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.interval);
        // Startup already swept; skip the immediate first tick.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Some(lock) = SweepLock::acquire(&config.temp_root, config.lock_stale) {
                        sweep(&config, config.ttl, false);
                        lock.release();
                    }
                }
                _ = &mut shutdown_rx => {
                    if let Some(lock) = SweepLock::acquire(&config.temp_root, config.lock_stale) {
                        sweep(&config, config.safe_window, false);
                        lock.release();
                    }
                    break;
                }
            }
        }
    });
    SweeperHandle {
        shutdown_tx: Some(shutdown_tx),
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config_for(root: &Path, ttl_ms: u64, safe_ms: u64) -> SweeperConfig {
        SweeperConfig {
            temp_root: root.to_path_buf(),
            upload_dir: root.join("uploads"),
            ttl: Duration::from_millis(ttl_ms),
            safe_window: Duration::from_millis(safe_ms),
            interval: Duration::from_secs(3600),
            lock_stale: Duration::from_secs(1800),
        }
    }

    fn touch(path: &Path, content: &[u8]) {
        std::fs::File::create(path).unwrap().write_all(content).unwrap();
    }

    #[test]
    fn old_upload_files_are_reclaimed_and_fresh_kept() {
        let root = tempfile::tempdir().unwrap();
        let config = config_for(root.path(), 30, 10);
        std::fs::create_dir_all(&config.upload_dir).unwrap();

        touch(&config.upload_dir.join("old.bin"), b"x");
        std::thread::sleep(Duration::from_millis(80));
        touch(&config.upload_dir.join("fresh.bin"), b"x");

        let stats = sweep(&config, config.ttl, false);
        assert_eq!(stats.upload_deleted, 1);
        assert_eq!(stats.upload_skipped, 1);
        assert!(!config.upload_dir.join("old.bin").exists());
        assert!(config.upload_dir.join("fresh.bin").exists());
    }

    #[test]
    fn missing_upload_dir_is_not_an_error() {
        let root = tempfile::tempdir().unwrap();
        let config = config_for(root.path(), 30, 10);
        let stats = sweep(&config, config.ttl, false);
        assert_eq!(stats, SweepStats::default());
    }

    #[test]
    fn scratch_dir_with_recent_write_survives_periodic_sweep() {
        let root = tempfile::tempdir().unwrap();
        let config = config_for(root.path(), 30, 10);

        let active = root.path().join("merge-100-000001");
        std::fs::create_dir_all(&active).unwrap();
        touch(&active.join("chunk_00000"), b"x");

        let abandoned = root.path().join("merge-100-000002");
        std::fs::create_dir_all(&abandoned).unwrap();
        touch(&abandoned.join("chunk_00000"), b"x");

        std::thread::sleep(Duration::from_millis(80));
        // A fresh write inside makes the whole directory recent again.
        touch(&active.join("chunk_00001"), b"x");

        let stats = sweep(&config, config.ttl, false);
        assert_eq!(stats.merge_deleted, 1);
        assert_eq!(stats.merge_skipped, 1);
        assert!(active.exists());
        assert!(!abandoned.exists());
    }

    #[test]
    fn startup_sweep_force_cleans_fresh_scratch_dirs() {
        let root = tempfile::tempdir().unwrap();
        let config = config_for(root.path(), 60_000, 60_000);

        let scratch = root.path().join("merge-100-000003");
        std::fs::create_dir_all(&scratch).unwrap();
        touch(&scratch.join("chunk_00000"), b"x");

        let stats = run_startup_sweep(&config).unwrap();
        assert_eq!(stats.merge_deleted, 1);
        assert!(!scratch.exists());
    }

    #[test]
    fn non_merge_directories_are_left_alone() {
        let root = tempfile::tempdir().unwrap();
        let config = config_for(root.path(), 30, 10);

        let other = root.path().join("unrelated");
        std::fs::create_dir_all(&other).unwrap();
        std::thread::sleep(Duration::from_millis(80));

        sweep(&config, config.ttl, true);
        assert!(other.exists());
    }

    #[test]
    fn held_lock_skips_the_sweep() {
        let root = tempfile::tempdir().unwrap();
        let config = config_for(root.path(), 30, 10);

        touch(&root.path().join(LOCK_FILE_NAME), b"");
        assert!(run_startup_sweep(&config).is_none());
    }

    #[test]
    fn stale_lock_is_taken_over() {
        let root = tempfile::tempdir().unwrap();
        let mut config = config_for(root.path(), 30, 10);
        config.lock_stale = Duration::from_millis(20);

        touch(&root.path().join(LOCK_FILE_NAME), b"");
        std::thread::sleep(Duration::from_millis(60));

        assert!(run_startup_sweep(&config).is_some());
        // The takeover releases its own lock afterwards.
        assert!(!root.path().join(LOCK_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn shutdown_runs_an_aggressive_final_pass() {
        let root = tempfile::tempdir().unwrap();
        let mut config = config_for(root.path(), 120_000, 30);
        config.interval = Duration::from_secs(3600);
        std::fs::create_dir_all(&config.upload_dir).unwrap();

        touch(&config.upload_dir.join("leftover.bin"), b"x");
        std::thread::sleep(Duration::from_millis(80));

        let handle = schedule_periodic_sweep(config.clone());
        handle.shutdown().await;

        // TTL alone would have kept it; the final pass uses the window.
        assert!(!config.upload_dir.join("leftover.bin").exists());
    }
}
