//! Session storage backed by a JSON file.
//!
//! The whole map is rewritten on every change: serialized to a sibling
//! temp file, then renamed over the original so a crash never leaves a
//! half-written file behind.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use gate::{SessionStorage, StorageError};
use tracing::debug;

type Items = BTreeMap<String, String>;

#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    items: Mutex<Items>,
}

impl FileStorage {
    /// Open `path`, starting empty if it does not exist yet.
    ///
    /// # Errors
    ///
    /// [`StorageError::Io`] if the file exists but cannot be read, and
    /// [`StorageError::Corrupt`] if it is not a JSON object of strings.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let items = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => Items::new(),
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| StorageError::Corrupt(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Items::new(),
            Err(e) => return Err(io_error(&path, &e)),
        };
        debug!(path = %path.display(), keys = items.len(), "session storage opened");
        Ok(Self { path, items: Mutex::new(items) })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn items(&self) -> MutexGuard<'_, Items> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `change` and write the result; memory is only updated once the write succeeds.
    fn update(&self, change: impl FnOnce(&mut Items) -> bool) -> Result<(), StorageError> {
        let mut items = self.items();
        let mut next = items.clone();
        if !change(&mut next) {
            return Ok(());
        }
        write_atomic(&self.path, &next)?;
        *items = next;
        Ok(())
    }
}

impl SessionStorage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.update(|items| items.insert(key.to_owned(), value.to_owned()).as_deref() != Some(value))
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.update(|items| items.remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.items().keys().cloned().collect())
    }
}

fn write_atomic(path: &Path, items: &Items) -> Result<(), StorageError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| io_error(parent, &e))?;
    }
    let body = serde_json::to_string_pretty(items).map_err(|e| StorageError::Io(e.to_string()))?;
    let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
    fs::write(&tmp, body).map_err(|e| io_error(&tmp, &e))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        io_error(path, &e)
    })
}

fn io_error(path: &Path, e: &std::io::Error) -> StorageError {
    StorageError::Io(format!("{}: {e}", path.display()))
}

#[cfg(test)]
#[path = "storage_test.rs"]
mod tests;
