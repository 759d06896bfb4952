use relay_store::RemotePath;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Remembers which remote directories were recently verified to exist.
///
/// Entries expire after a fixed TTL so an out-of-band deletion on the
/// remote is eventually noticed. Expired entries are dropped lazily on
/// lookup and in bulk by [`DirCache::sweep_expired`].
pub struct DirCache {
    ttl: Duration,
    entries: Mutex<HashMap<RemotePath, Instant>>,
}

impl DirCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true if `path` was verified within the TTL.
    pub fn is_fresh(&self, path: &RemotePath) -> bool {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match entries.get(path) {
            Some(verified_at) if verified_at.elapsed() < self.ttl => true,
            Some(_) => {
                entries.remove(path);
                false
            }
            None => false,
        }
    }

    /// Marks `path` as verified now.
    pub fn record(&self, path: &RemotePath) {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.insert(path.clone(), Instant::now());
    }

    /// Drops all expired entries, returning how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = entries.len();
        entries.retain(|_, verified_at| verified_at.elapsed() < self.ttl);
        before - entries.len()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }
}
