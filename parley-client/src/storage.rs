//! File-backed key-value store for merged dialogs and contacts.
//!
//! Values are hex-encoded into one JSON object. Writes stay in memory until
//! `flush`, which replaces the file atomically (tmp + rename).

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use parley_core::{Storage, StorageError};
use tracing::{debug, warn};

/// A store larger than this is not loaded and starts empty.
pub const MAX_STORE_BYTES: u64 = 32 * 1024 * 1024;

#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
    entries: BTreeMap<String, String>,
    dirty: bool,
}

impl JsonFileStorage {
    /// Open `path`, loading previous entries when the file is readable.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match read_entries(&path) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "discarding unreadable store");
                BTreeMap::new()
            }
        };
        debug!(path = %path.display(), entries = entries.len(), "store opened");
        Self {
            path,
            entries,
            dirty: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn read_entries(path: &Path) -> io::Result<BTreeMap<String, String>> {
    let meta = fs::metadata(path)?;
    if meta.len() > MAX_STORE_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("store too large: {} bytes (max {MAX_STORE_BYTES})", meta.len()),
        ));
    }
    let data = fs::read_to_string(path)?;
    serde_json::from_str(&data).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

impl Storage for JsonFileStorage {
    fn put(&mut self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.entries.insert(key.to_owned(), hex::encode(value));
        self.dirty = true;
        Ok(())
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries
            .get(key)
            .and_then(|encoded| hex::decode(encoded).ok())
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        if !self.dirty {
            return Ok(());
        }

        let tmp = self.path.with_extension("json.tmp");
        let payload = serde_json::to_vec(&self.entries)
            .map_err(|err| StorageError::Flush(format!("serialize failed: {err}")))?;
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        fs::write(&tmp, payload).map_err(|err| {
            StorageError::Flush(format!("failed to write {}: {err}", tmp.display()))
        })?;
        fs::rename(&tmp, &self.path).map_err(|err| {
            StorageError::Flush(format!(
                "failed to move store into place {}: {err}",
                self.path.display()
            ))
        })?;

        self.dirty = false;
        debug!(path = %self.path.display(), entries = self.entries.len(), "store flushed");
        Ok(())
    }
}
