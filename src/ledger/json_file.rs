//! JSON file ledger backend
//!
//! The ledger and the queue snapshot each live in one file. Writes go to a
//! sibling temp file that is synced and then renamed over the target, so a
//! reader in this or another process always sees a complete document. Temp
//! names carry the process id and a random suffix, so concurrent writers never
//! share one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::store::{LedgerSnapshot, LedgerStore, QueueSnapshot};
use crate::config::PersistenceConfig;
use crate::error::{Error, Result};

/// Ledger stored as `ledger.json` + `queue.json`
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    ledger_path: PathBuf,
    queue_path: PathBuf,
}

impl JsonFileStore {
    /// Store using explicit file paths
    pub fn new(ledger_path: impl Into<PathBuf>, queue_path: impl Into<PathBuf>) -> Self {
        Self {
            ledger_path: ledger_path.into(),
            queue_path: queue_path.into(),
        }
    }

    /// Store in `config.state_dir`
    pub fn from_config(config: &PersistenceConfig) -> Self {
        Self::new(config.ledger_path(), config.queue_path())
    }

    /// Ledger file path
    pub fn ledger_path(&self) -> &Path {
        &self.ledger_path
    }

    /// Queue snapshot file path
    pub fn queue_path(&self) -> &Path {
        &self.queue_path
    }
}

#[async_trait]
impl LedgerStore for JsonFileStore {
    async fn load(&self) -> Result<Option<LedgerSnapshot>> {
        read_json(&self.ledger_path).await
    }

    async fn save(&self, snapshot: &LedgerSnapshot) -> Result<()> {
        write_json_atomic(&self.ledger_path, snapshot).await
    }

    async fn load_queue(&self) -> Result<Option<QueueSnapshot>> {
        read_json(&self.queue_path).await
    }

    async fn save_queue(&self, snapshot: &QueueSnapshot) -> Result<()> {
        write_json_atomic(&self.queue_path, snapshot).await
    }

    async fn quarantine(&self, now: DateTime<Utc>) -> Result<Option<String>> {
        let Some(file_name) = self.ledger_path.file_name() else {
            return Ok(None);
        };
        let mut target_name = file_name.to_os_string();
        target_name.push(format!(".corrupt-{}", now.format("%Y%m%dT%H%M%S%.3fZ")));
        let target = self.ledger_path.with_file_name(target_name);

        match tokio::fs::rename(&self.ledger_path, &target).await {
            Ok(()) => {
                tracing::warn!(
                    from = %self.ledger_path.display(),
                    to = %target.display(),
                    "moved unreadable ledger aside"
                );
                Ok(Some(target.display().to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn describe(&self) -> String {
        self.ledger_path.display().to_string()
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Io(e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| Error::CorruptState {
            location: path.display().to_string(),
            reason: e.to_string(),
        })
}

pub(crate) async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let bytes = serde_json::to_vec_pretty(value)?;
    let temp_path = temp_path_for(path);

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)
        .await?;
    if let Err(e) = write_and_sync(&mut file, &bytes).await {
        drop(file);
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e);
    }
    drop(file);

    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(Error::Io(e));
    }
    Ok(())
}

async fn write_and_sync(file: &mut tokio::fs::File, bytes: &[u8]) -> Result<()> {
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}

/// Unique sibling of `path`: `<name>.<pid>.<random>.tmp`
pub(crate) fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(
        ".{}.{:016x}.tmp",
        std::process::id(),
        rand::random::<u64>()
    ));
    path.with_file_name(name)
}
