//! Open-position snapshot persistence for crash recovery.
//!
//! The live [`StoreSnapshot`] (active position, flagged ones, and the
//! cooldown locks) is rewritten atomically on every state transition and
//! deleted once nothing is open and no cooldown is running. On restart the snapshot is loaded back into the
//! [`PositionStore`](crate::position::PositionStore).
//!
//! # Example
//!
//! ```ignore
//! let persistence = PositionPersistence::new(PathBuf::from("data/open-position.json"));
//! let store = PositionStore::from_snapshot(persistence.load()?.unwrap_or_default());
//! // ... after each transition
//! persistence.sync(&store.snapshot())?;
//! ```

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::position::StoreSnapshot;

/// Errors from snapshot persistence operations.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// IO error reading/writing file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Writes `value` as pretty JSON to a temp file next to `path`, then renames
/// it over `path`. Readers never observe a partially written file.
pub(crate) fn write_json_atomic<T: Serialize>(
    path: &Path,
    value: &T,
) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp = tmp_path(path);
    {
        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Reads JSON from `path`, or `None` if the file does not exist.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistenceError> {
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(path)?;
    let value = serde_json::from_reader(BufReader::new(file))?;
    Ok(Some(value))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// On-disk format of the snapshot file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    /// Store contents.
    pub snapshot: StoreSnapshot,
    /// When this was saved.
    pub saved_at: DateTime<Utc>,
}

/// Handles persisting and loading the open-position snapshot.
#[derive(Debug, Clone)]
pub struct PositionPersistence {
    path: PathBuf,
}

impl PositionPersistence {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Saves the snapshot atomically, creating parent directories as needed.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&self, snapshot: &StoreSnapshot) -> Result<(), PersistenceError> {
        let persisted = PersistedSnapshot {
            snapshot: snapshot.clone(),
            saved_at: Utc::now(),
        };
        write_json_atomic(&self.path, &persisted)?;

        debug!(
            path = %self.path.display(),
            has_active = snapshot.active.is_some(),
            flagged = snapshot.flagged.len(),
            "Saved position snapshot"
        );
        Ok(())
    }

    /// Loads the snapshot.
    ///
    /// A missing file means nothing was open. A corrupt file is an error: live
    /// exposure must never be silently forgotten.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<Option<StoreSnapshot>, PersistenceError> {
        match read_json::<PersistedSnapshot>(&self.path)? {
            Some(persisted) => {
                info!(
                    path = %self.path.display(),
                    saved_at = %persisted.saved_at,
                    has_active = persisted.snapshot.active.is_some(),
                    flagged = persisted.snapshot.flagged.len(),
                    "Loaded position snapshot"
                );
                Ok(Some(persisted.snapshot))
            }
            None => {
                info!(path = %self.path.display(), "No position snapshot found, starting flat");
                Ok(None)
            }
        }
    }

    /// Saves the snapshot, or deletes the file when nothing is open and no
    /// cooldown is running.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written or removed.
    pub fn sync(&self, snapshot: &StoreSnapshot) -> Result<(), PersistenceError> {
        if snapshot.is_disposable(Utc::now()) {
            self.clear()
        } else {
            self.save(snapshot)
        }
    }

    /// Deletes the snapshot file if present.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be removed.
    pub fn clear(&self) -> Result<(), PersistenceError> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
            debug!(path = %self.path.display(), "Cleared position snapshot");
        }
        Ok(())
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::CooldownLocks;
    use crate::position::tests::open_position;
    use tempfile::TempDir;

    fn persistence(dir: &TempDir) -> PositionPersistence {
        PositionPersistence::new(dir.path().join("state").join("open-position.json"))
    }

    #[test]
    fn test_missing_file_loads_none() {
        let dir = TempDir::new().unwrap();
        assert!(persistence(&dir).load().unwrap().is_none());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let p = persistence(&dir);
        let snapshot = StoreSnapshot {
            active: Some(open_position()),
            flagged: Vec::new(),
            ..StoreSnapshot::default()
        };

        p.save(&snapshot).unwrap();
        assert!(p.exists());
        assert!(!tmp_path(p.path()).exists());

        let loaded = p.load().unwrap().unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn test_sync_deletes_when_empty() {
        let dir = TempDir::new().unwrap();
        let p = persistence(&dir);
        p.save(&StoreSnapshot {
            active: Some(open_position()),
            flagged: Vec::new(),
            ..StoreSnapshot::default()
        })
        .unwrap();

        p.sync(&StoreSnapshot::default()).unwrap();
        assert!(!p.exists());
        // Clearing twice is fine.
        p.clear().unwrap();
    }

    #[test]
    fn test_sync_keeps_running_cooldown() {
        let dir = TempDir::new().unwrap();
        let p = persistence(&dir);
        let until = Utc::now() + chrono::Duration::seconds(30);
        let snapshot = StoreSnapshot {
            locks: CooldownLocks {
                open_lock_until: None,
                close_lock_until: Some(until),
            },
            ..StoreSnapshot::default()
        };

        p.sync(&snapshot).unwrap();
        assert!(p.exists());

        let loaded = p.load().unwrap().unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.locks.close_lock_until, Some(until));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let p = persistence(&dir);
        fs::create_dir_all(p.path().parent().unwrap()).unwrap();
        fs::write(p.path(), "{ not json").unwrap();

        assert!(matches!(p.load(), Err(PersistenceError::Json(_))));
    }
}
