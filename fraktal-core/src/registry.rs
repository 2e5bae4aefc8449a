//! Durable local record of fractals.
//!
//! # Storage layout
//!
//! ```text
//! ~/.fraktal/
//!   registry.json   (JSON array of Fractal records, mode 0600)
//! ```
//!
//! # Write discipline
//!
//! Every mutating call builds the next record set, rewrites the whole file
//! (`.tmp` sibling → `chmod 0600` → `rename`) and only then swaps the new set
//! into memory. A failed write leaves both the file and the in-memory view at
//! the last successful mutation.
//!
//! # API pattern
//!
//! `open_at(path)` takes an explicit file; `open()` derives it from
//! `dirs::home_dir()`. Tests must always use `open_at`.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{registry_io, RegistryError};
use crate::types::{Fractal, FractalId, FractalStatus};

/// `<home>/.fraktal/registry.json`. Pure, no I/O.
pub fn registry_path_at(home: &Path) -> PathBuf {
    home.join(".fraktal").join("registry.json")
}

#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    records: Vec<Fractal>,
}

impl Registry {
    /// Open the registry stored at `path`. A missing file is an empty registry.
    ///
    /// Returns `RegistryError::Parse` (with path) if the file is malformed.
    pub fn open_at(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let records = if path.exists() {
            let contents = std::fs::read_to_string(&path).map_err(|e| registry_io(&path, e))?;
            if contents.trim().is_empty() {
                vec![]
            } else {
                serde_json::from_str(&contents).map_err(|e| RegistryError::Parse {
                    path: path.clone(),
                    source: e,
                })?
            }
        } else {
            vec![]
        };
        Ok(Self { path, records })
    }

    /// `open_at` convenience wrapper rooted at `~/.fraktal/registry.json`.
    pub fn open() -> Result<Self, RegistryError> {
        let home = dirs::home_dir().ok_or(RegistryError::HomeNotFound)?;
        Self::open_at(registry_path_at(&home))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, id: &FractalId) -> Option<&Fractal> {
        self.records.iter().find(|f| &f.id == id)
    }

    pub fn contains(&self, id: &FractalId) -> bool {
        self.get(id).is_some()
    }

    /// All records in insertion order.
    pub fn list(&self) -> &[Fractal] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records in a given state.
    pub fn count_with_status(&self, status: FractalStatus) -> usize {
        self.records.iter().filter(|f| f.status == status).count()
    }

    /// Append a new record. Fails with `Duplicate` if the id is taken.
    pub fn add(&mut self, fractal: Fractal) -> Result<(), RegistryError> {
        if self.contains(&fractal.id) {
            return Err(RegistryError::Duplicate {
                id: fractal.id.to_string(),
            });
        }
        let mut next = self.records.clone();
        next.push(fractal);
        self.commit(next)
    }

    /// Set the lifecycle state of an existing record.
    pub fn update_status(
        &mut self,
        id: &FractalId,
        status: FractalStatus,
    ) -> Result<Fractal, RegistryError> {
        self.update(id, |f| f.status = status)
    }

    /// Apply `edit` to an existing record and persist. `updated_at` is bumped.
    pub fn update(
        &mut self,
        id: &FractalId,
        edit: impl FnOnce(&mut Fractal),
    ) -> Result<Fractal, RegistryError> {
        let mut next = self.records.clone();
        let record = next
            .iter_mut()
            .find(|f| &f.id == id)
            .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })?;
        edit(record);
        record.id = id.clone();
        record.updated_at = Utc::now();
        let updated = record.clone();
        self.commit(next)?;
        Ok(updated)
    }

    /// Remove a record. Returns `None` (and writes nothing) if it was absent.
    pub fn remove(&mut self, id: &FractalId) -> Result<Option<Fractal>, RegistryError> {
        let Some(index) = self.records.iter().position(|f| &f.id == id) else {
            return Ok(None);
        };
        let mut next = self.records.clone();
        let removed = next.remove(index);
        self.commit(next)?;
        Ok(Some(removed))
    }

    fn commit(&mut self, next: Vec<Fractal>) -> Result<(), RegistryError> {
        save_records_at(&self.path, &next)?;
        self.records = next;
        Ok(())
    }
}

/// Atomically write `records` to `path`.
///
/// Write flow: serialize → `.json.tmp` sibling → `chmod 0600` → `rename`.
/// `.tmp` is always in the same directory as the target (same filesystem).
pub fn save_records_at(path: &Path, records: &[Fractal]) -> Result<(), RegistryError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|e| registry_io(dir, e))?;
            set_dir_permissions(dir)?;
        }
    }
    let tmp_path = tmp_path_for(path);
    let json = serde_json::to_string_pretty(records)?;
    std::fs::write(&tmp_path, json).map_err(|e| registry_io(&tmp_path, e))?;
    set_file_permissions(&tmp_path)?;
    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(registry_io(path, e));
    }
    Ok(())
}

/// `<path>.tmp` sibling used during atomic saves.
pub fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| registry_io(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| registry_io(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
