//! Outbox snapshot persistence

use crate::ports::{OutboxPersistence, OutboxSnapshot, SnapshotRecord};
use crate::{Result, TandemError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Stores the snapshot as a single JSON file, replaced atomically.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl OutboxPersistence for JsonFileStore {
    async fn load(&self) -> Result<Option<OutboxSnapshot>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record: SnapshotRecord = serde_json::from_str(&content).map_err(|e| {
            TandemError::Storage(format!("corrupt snapshot {}: {}", self.path.display(), e))
        })?;
        let snapshot = record.decode()?;

        info!(
            messages = snapshot.messages.len(),
            pending = snapshot.pending.len(),
            "Recovered outbox from {}",
            self.path.display()
        );
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &OutboxSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(&SnapshotRecord::encode(snapshot))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;

        // Restrict to owner only: the cache holds decrypted messages
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
        }

        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(
            messages = snapshot.messages.len(),
            pending = snapshot.pending.len(),
            "Outbox saved"
        );
        Ok(())
    }
}

/// Keeps the encoded snapshot in memory. Survives store restarts within a
/// process, which is enough for tests and the demo.
#[derive(Default)]
pub struct MemoryPersistence {
    data: Mutex<Option<String>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl OutboxPersistence for MemoryPersistence {
    async fn load(&self) -> Result<Option<OutboxSnapshot>> {
        let content = self.slot().clone();
        match content {
            Some(content) => {
                let record: SnapshotRecord = serde_json::from_str(&content)?;
                Ok(Some(record.decode()?))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, snapshot: &OutboxSnapshot) -> Result<()> {
        let content = serde_json::to_string(&SnapshotRecord::encode(snapshot))?;
        *self.slot() = Some(content);
        Ok(())
    }
}
