//! Collision-free filename assignment.
//!
//! Remote listings only show finished uploads, so two concurrent uploads
//! of `report.pdf` into the same directory would both see the name as
//! free. A process-wide reservation table closes that window: the chosen
//! name is claimed under one lock and held until the upload finishes,
//! forcing the second caller onto `report(1).pdf`.

use crate::error::Result;
use log::info;
use relay_store::{normalize_name, RemotePath, RemoteStore};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Names currently being uploaded, keyed by directory. All names are
/// stored in normalized form so visually identical spellings collide.
#[derive(Default)]
pub struct ReservationTable {
    inner: Mutex<HashMap<RemotePath, HashSet<String>>>,
}

impl ReservationTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn release(&self, dir: &RemotePath, name: &str) {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(names) = inner.get_mut(dir) {
            names.remove(name);
            if names.is_empty() {
                inner.remove(dir);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn reserved_in(&self, dir: &RemotePath) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.get(dir).map(|n| n.len()).unwrap_or(0))
            .unwrap_or(0)
    }
}

/// Holds one reserved name. Dropping it frees the name again, so the
/// reservation is released on success, failure, and cancellation alike.
pub struct NameReservation {
    table: Arc<ReservationTable>,
    dir: RemotePath,
    normalized: String,
    name: String,
}

impl NameReservation {
    /// The final, possibly suffixed, filename.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for NameReservation {
    fn drop(&mut self) {
        self.table.release(&self.dir, &self.normalized);
    }
}

/// Picks unique filenames against the remote listing and the table.
pub struct NameResolver {
    store: Arc<dyn RemoteStore>,
    table: Arc<ReservationTable>,
}

impl NameResolver {
    pub fn new(store: Arc<dyn RemoteStore>, table: Arc<ReservationTable>) -> Self {
        Self { store, table }
    }

    /// Reserves a name for `desired` in `dir`, suffixing `(1)`, `(2)`, ...
    /// before the extension until the name is free both on the remote and
    /// in the reservation table.
    pub async fn reserve_unique(
        &self,
        dir: &RemotePath,
        desired: &str,
    ) -> Result<NameReservation> {
        let desired = sanitize(desired);

        // Snapshot the remote before taking the table lock. Uploads that
        // complete in between are not visible here, which is exactly the
        // race the table guards against.
        let taken: HashSet<String> = self
            .store
            .list_directory(dir)
            .await?
            .unwrap_or_default()
            .into_iter()
            .filter(|entry| !entry.is_dir)
            .map(|entry| normalize_name(&entry.name))
            .collect();

        let mut inner = match self.table.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let reserved = inner.entry(dir.clone()).or_default();

        let is_free =
            |name: &str, reserved: &HashSet<String>| !taken.contains(name) && !reserved.contains(name);

        let mut name = desired.clone();
        let mut normalized = normalize_name(&name);
        if !is_free(&normalized, reserved) {
            let (base, ext) = split_extension(&desired);
            let mut counter = 1u32;
            loop {
                name = format!("{base}({counter}){ext}");
                normalized = normalize_name(&name);
                if is_free(&normalized, reserved) {
                    break;
                }
                counter += 1;
            }
            info!("name {desired} taken in {dir}, using {name}");
        }

        reserved.insert(normalized.clone());
        drop(inner);

        Ok(NameReservation {
            table: Arc::clone(&self.table),
            dir: dir.clone(),
            normalized,
            name,
        })
    }
}

/// Replaces spaces with underscores. Path separators never reach this
/// point because callers pass bare filenames.
fn sanitize(name: &str) -> String {
    name.replace(' ', "_")
}

/// Splits at the last dot. A leading dot is part of the base, so dotfiles
/// carry no extension and the suffix lands at the end.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}
