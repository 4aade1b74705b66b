use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use crate::fields::CustomField;
use crate::history::HistoryRecord;
use crate::task::Task;

pub const TASKS_KEY: &str = "tasks";
pub const FIELDS_KEY: &str = "fields";
pub const HISTORY_KEY: &str = "history";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("storage quota exceeded writing '{key}': {needed} bytes needed, {quota} allowed")]
    QuotaExceeded {
        key: String,
        needed: usize,
        quota: usize,
    },
    #[error("invalid storage key: {0:?}")]
    InvalidKey(String),
}

/// String-keyed, string-valued storage in the style of browser local storage.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// One `<key>.json` file per key inside a data directory.
#[derive(Debug)]
pub struct FileStore {
    pub data_dir: PathBuf,
}

impl FileStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;
        info!(data_dir = %data_dir.display(), "opened file store");
        Ok(Self { data_dir })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.data_dir.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }
        debug!(file = %path.display(), "reading key");
        fs::read_to_string(&path)
            .map(Some)
            .map_err(|source| StorageError::Read { path, source })
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        debug!(file = %path.display(), bytes = value.len(), "writing key atomically");

        let write_err = |source| StorageError::Write {
            path: path.clone(),
            source,
        };
        let mut temp = NamedTempFile::new_in(&self.data_dir).map_err(write_err)?;
        temp.write_all(value.as_bytes()).map_err(write_err)?;
        temp.flush().map_err(write_err)?;
        temp.persist(&path).map_err(|err| write_err(err.error))?;
        Ok(())
    }
}

/// In-process store. An optional byte quota makes `set` fail the way a full
/// browser storage does.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: HashMap<String, String>,
    quota: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: usize) -> Self {
        Self {
            values: HashMap::new(),
            quota: Some(quota),
        }
    }

    pub fn raw(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Store a value verbatim, bypassing the quota.
    pub fn insert_raw(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        if let Some(quota) = self.quota {
            let others: usize = self
                .values
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = others + key.len() + value.len();
            if needed > quota {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    quota,
                });
            }
        }
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    Loaded(usize),
    Missing,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveStatus {
    Saved,
    Failed(String),
}

impl SaveStatus {
    pub fn is_saved(&self) -> bool {
        matches!(self, SaveStatus::Saved)
    }
}

/// Best-effort persistence of the session state. Reads degrade to empty
/// values and writes report a [`SaveStatus`]; neither propagates errors.
#[derive(Debug)]
pub struct TaskStorage<S> {
    store: S,
}

impl<S: KeyValueStore> TaskStorage<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn inner(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    pub fn load(&self) -> Vec<Task> {
        self.load_with_status().0
    }

    #[tracing::instrument(skip(self))]
    pub fn load_with_status(&self) -> (Vec<Task>, LoadStatus) {
        let (tasks, status) = self.load_json::<Vec<Task>>(TASKS_KEY);
        let tasks = tasks.unwrap_or_default();
        let status = match status {
            LoadStatus::Loaded(_) => LoadStatus::Loaded(tasks.len()),
            other => other,
        };
        (tasks, status)
    }

    #[tracing::instrument(skip(self, tasks), fields(count = tasks.len()))]
    pub fn save(&mut self, tasks: &[Task]) -> SaveStatus {
        self.save_json(TASKS_KEY, tasks)
    }

    #[tracing::instrument(skip(self))]
    pub fn load_fields(&self) -> Vec<CustomField> {
        self.load_json::<Vec<CustomField>>(FIELDS_KEY)
            .0
            .unwrap_or_default()
    }

    #[tracing::instrument(skip(self, fields), fields(count = fields.len()))]
    pub fn save_fields(&mut self, fields: &[CustomField]) -> SaveStatus {
        self.save_json(FIELDS_KEY, fields)
    }

    #[tracing::instrument(skip(self))]
    pub fn load_history(&self) -> Option<HistoryRecord> {
        self.load_json::<HistoryRecord>(HISTORY_KEY).0
    }

    #[tracing::instrument(skip(self, record), fields(entries = record.entries.len()))]
    pub fn save_history(&mut self, record: &HistoryRecord) -> SaveStatus {
        self.save_json(HISTORY_KEY, record)
    }

    fn load_json<T: DeserializeOwned>(&self, key: &str) -> (Option<T>, LoadStatus) {
        let raw = match self.store.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key, "key not present in storage");
                return (None, LoadStatus::Missing);
            }
            Err(err) => {
                error!(key, error = %err, "failed reading from storage");
                return (None, LoadStatus::Failed(err.to_string()));
            }
        };

        match serde_json::from_str::<T>(&raw) {
            Ok(value) => (Some(value), LoadStatus::Loaded(0)),
            Err(err) => {
                error!(key, error = %err, "failed parsing stored value");
                (None, LoadStatus::Failed(err.to_string()))
            }
        }
    }

    fn save_json<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> SaveStatus {
        let serialized = match serde_json::to_string(value) {
            Ok(serialized) => serialized,
            Err(err) => {
                error!(key, error = %err, "failed serializing value for storage");
                return SaveStatus::Failed(err.to_string());
            }
        };

        match self.store.set(key, &serialized) {
            Ok(()) => SaveStatus::Saved,
            Err(err) => {
                warn!(key, error = %err, "failed writing to storage; keeping in-memory state");
                SaveStatus::Failed(err.to_string())
            }
        }
    }
}
