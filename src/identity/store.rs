use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::ClientError;

/// Minimal durable key-value storage for client identity.
pub trait KeyValueStore: Send + Sync {
    /// # Errors
    ///
    /// Returns [`ClientError::Identity`] when the backing storage cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, ClientError>;

    /// # Errors
    ///
    /// Returns [`ClientError::Identity`] when the value cannot be persisted.
    fn set(&self, key: &str, value: &str) -> Result<(), ClientError>;
}

/// Process-lifetime store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, ClientError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ClientError> {
        self.entries.lock().insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

/// Flat JSON object on disk. A missing file reads as empty.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, ClientError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(BTreeMap::new());
            }
            Err(err) => return Err(identity_error(&self.path, err)),
        };
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&contents).map_err(|err| identity_error(&self.path, err))
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| identity_error(parent, err))?;
        }
        let json =
            serde_json::to_string_pretty(entries).map_err(|err| identity_error(&self.path, err))?;
        fs::write(&self.path, json).map_err(|err| identity_error(&self.path, err))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, ClientError> {
        let _guard = self.lock.lock();
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ClientError> {
        let _guard = self.lock.lock();
        let mut entries = self.read_all()?;
        entries.insert(key.to_owned(), value.to_owned());
        self.write_all(&entries)
    }
}

fn identity_error(path: &Path, err: impl std::fmt::Display) -> ClientError {
    ClientError::Identity(format!("{}: {err}", path.display()))
}
