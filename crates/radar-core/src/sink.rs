//! State sink: where presence results are published.
//!
//! The engine writes flat `key -> JSON value` attributes (`alice`,
//! `alice.lasthere`, `_countHere`, ...) and reads a few of them back at
//! startup. Each write says whether the value should survive a restart.
//!
//! Two implementations ship here:
//! - [`MemoryStateSink`] keeps everything in memory and records every write
//! - [`JsonFileStateSink`] additionally persists the flagged keys to a JSON file

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors raised by a state sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink refused a write.
    #[error("failed to write '{key}': {reason}")]
    Write {
        /// Attribute key.
        key: String,
        /// Why the write failed.
        reason: String,
    },

    /// The backing file could not be read or written.
    #[error("state file {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The backing file holds malformed JSON.
    #[error("state file {path} is not valid JSON: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying parse error.
        source: serde_json::Error,
    },
}

/// A key/value attribute store the engine publishes into.
pub trait StateSink: Send + Sync {
    /// Write `value` under `key`. With `persist` set the value should
    /// survive a restart.
    fn write<'a>(
        &'a self,
        key: &'a str,
        value: Value,
        persist: bool,
    ) -> BoxFuture<'a, Result<(), SinkError>>;

    /// Read back a previously written value.
    fn read<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>, SinkError>>;
}

/// One recorded write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SinkWrite {
    /// Attribute key.
    pub key: String,
    /// Written value.
    pub value: Value,
    /// Whether persistence was requested.
    pub persist: bool,
}

#[derive(Debug, Default)]
struct MemoryInner {
    values: BTreeMap<String, Value>,
    log: Vec<SinkWrite>,
}

/// In-memory sink that keeps the latest value per key and a log of every write.
#[derive(Debug, Default)]
pub struct MemoryStateSink {
    inner: Mutex<MemoryInner>,
}

impl MemoryStateSink {
    /// An empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a key without logging it as a write.
    pub async fn seed(&self, key: impl Into<String>, value: Value) {
        self.inner.lock().await.values.insert(key.into(), value);
    }

    /// Latest value for `key`.
    pub async fn value(&self, key: &str) -> Option<Value> {
        self.inner.lock().await.values.get(key).cloned()
    }

    /// Every write so far, oldest first.
    pub async fn writes(&self) -> Vec<SinkWrite> {
        self.inner.lock().await.log.clone()
    }

    /// Writes to `key` so far, oldest first.
    pub async fn writes_to(&self, key: &str) -> Vec<SinkWrite> {
        self.inner
            .lock()
            .await
            .log
            .iter()
            .filter(|w| w.key == key)
            .cloned()
            .collect()
    }

    /// Forget the write log, keeping values.
    pub async fn clear_log(&self) {
        self.inner.lock().await.log.clear();
    }
}

impl StateSink for MemoryStateSink {
    fn write<'a>(
        &'a self,
        key: &'a str,
        value: Value,
        persist: bool,
    ) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner.values.insert(key.to_string(), value.clone());
            inner.log.push(SinkWrite {
                key: key.to_string(),
                value,
                persist,
            });
            Ok(())
        })
    }

    fn read<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>, SinkError>> {
        Box::pin(async move { Ok(self.value(key).await) })
    }
}

#[derive(Debug, Default)]
struct FileInner {
    values: BTreeMap<String, Value>,
    persisted: BTreeMap<String, Value>,
}

/// Sink that persists flagged keys to a JSON object on disk.
///
/// Non-persisted keys live in memory only. The file is rewritten on every
/// persisted write through a temporary file and a rename.
#[derive(Debug)]
pub struct JsonFileStateSink {
    path: PathBuf,
    inner: Mutex<FileInner>,
}

impl JsonFileStateSink {
    /// Open the sink, loading previously persisted values if the file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();
        let persisted: BTreeMap<String, Value> = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|source| SinkError::Io {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str(&content).map_err(|source| SinkError::Parse {
                path: path.clone(),
                source,
            })?
        } else {
            BTreeMap::new()
        };

        tracing::debug!(path = %path.display(), keys = persisted.len(), "Opened state file");
        Ok(Self {
            path,
            inner: Mutex::new(FileInner {
                values: persisted.clone(),
                persisted,
            }),
        })
    }

    /// Get the default state file location.
    ///
    /// On Linux hosts: `/var/lib/radar/state.json`
    /// Elsewhere: the platform data directory
    #[must_use]
    pub fn default_path() -> PathBuf {
        #[cfg(target_os = "linux")]
        {
            PathBuf::from("/var/lib/radar/state.json")
        }
        #[cfg(not(target_os = "linux"))]
        {
            directories::ProjectDirs::from("", "", "radar").map_or_else(
                || PathBuf::from("state.json"),
                |dirs| dirs.data_dir().join("state.json"),
            )
        }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self, persisted: &BTreeMap<String, Value>) -> Result<(), SinkError> {
        let io_err = |source| SinkError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let content = serde_json::to_string_pretty(persisted).map_err(|source| SinkError::Parse {
            path: self.path.clone(),
            source,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)
    }
}

impl StateSink for JsonFileStateSink {
    fn write<'a>(
        &'a self,
        key: &'a str,
        value: Value,
        persist: bool,
    ) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner.values.insert(key.to_string(), value.clone());
            if !persist || inner.persisted.get(key) == Some(&value) {
                return Ok(());
            }
            let mut candidate = inner.persisted.clone();
            candidate.insert(key.to_string(), value);
            self.flush(&candidate).await?;
            inner.persisted = candidate;
            Ok(())
        })
    }

    fn read<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>, SinkError>> {
        Box::pin(async move { Ok(self.inner.lock().await.values.get(key).cloned()) })
    }
}
