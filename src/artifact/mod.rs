use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ServiceError;

/// One result file under management, addressed by an opaque id so its
/// lifetime is decoupled from the task that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub id: String,
    pub path: PathBuf,
    pub media_kind: String,
    pub owner_task_id: String,
    pub created_at: DateTime<Utc>,
}

/// Handle to an artifact taken out of the store by `consume`. The backing
/// file is unlinked when this guard drops, i.e. once the caller has finished
/// reading it. A second `consume` for the same id has already returned None
/// by that point.
#[derive(Debug)]
pub struct ConsumedArtifact {
    record: ArtifactRecord,
}

impl ConsumedArtifact {
    pub fn path(&self) -> &Path {
        &self.record.path
    }

    pub fn media_kind(&self) -> &str {
        &self.record.media_kind
    }

    pub fn owner_task_id(&self) -> &str {
        &self.record.owner_task_id
    }
}

impl Drop for ConsumedArtifact {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.record.path) {
            Ok(()) => info!("Deleted consumed artifact file {:?}", self.record.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to delete consumed artifact {:?}: {}",
                self.record.path, e
            ),
        }
    }
}

/// Single-consumption handoff of result files. A record and its file are
/// always removed together: `consume` takes the record out before handing the
/// path to the one reader, and expiry unlinks the file as it drops the record.
pub struct ArtifactStore {
    files: RwLock<HashMap<String, ArtifactRecord>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
        }
    }

    /// Wraps an existing, finalized file under management and returns its id.
    pub async fn register(
        &self,
        path: PathBuf,
        media_kind: &str,
        owner_task_id: &str,
    ) -> Result<String, ServiceError> {
        if !path.is_file() {
            return Err(ServiceError::Internal(format!(
                "artifact file does not exist: {:?}",
                path
            )));
        }

        let record = ArtifactRecord {
            id: format!("artifact-{}", Uuid::new_v4()),
            path,
            media_kind: media_kind.to_string(),
            owner_task_id: owner_task_id.to_string(),
            created_at: Utc::now(),
        };

        let mut files = self.files.write().await;
        // a path is referenced by at most one live record; a leftover entry
        // for the same path must be stale, so drop it
        files.retain(|_, existing| {
            if existing.path == record.path {
                warn!("Purging stale artifact record for {:?}", existing.path);
                false
            } else {
                true
            }
        });

        info!(
            "Registered {} artifact {} for {} at {:?}",
            record.media_kind, record.id, record.owner_task_id, record.path
        );
        let id = record.id.clone();
        files.insert(id.clone(), record);
        Ok(id)
    }

    /// Snapshot lookup. A record whose backing file disappeared out from
    /// under us is purged and reported as absent.
    pub async fn resolve(&self, artifact_id: &str) -> Option<ArtifactRecord> {
        {
            let files = self.files.read().await;
            match files.get(artifact_id) {
                Some(record) if record.path.is_file() => return Some(record.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // file is gone: self-heal by dropping the dangling record
        let mut files = self.files.write().await;
        if let Some(record) = files.get(artifact_id) {
            if !record.path.is_file() {
                warn!(
                    "Artifact {} file missing, purging record ({:?})",
                    artifact_id, record.path
                );
                files.remove(artifact_id);
                return None;
            }
            return Some(record.clone());
        }
        None
    }

    /// Takes the artifact out of the store for its one read. The record is
    /// removed before the path is handed over, so a concurrent or later
    /// `consume` of the same id observes NotFound. The file itself is deleted
    /// when the returned guard drops.
    pub async fn consume(&self, artifact_id: &str) -> Option<ConsumedArtifact> {
        let record = self.files.write().await.remove(artifact_id)?;

        if !record.path.is_file() {
            warn!(
                "Artifact {} file missing at consume time ({:?})",
                artifact_id, record.path
            );
            return None;
        }

        info!("Consuming artifact {} ({:?})", artifact_id, record.path);
        Some(ConsumedArtifact { record })
    }

    /// Deletes every record older than `max_age` together with its file.
    /// Idempotent; called by the cleanup scheduler.
    pub async fn expire(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::hours(1));

        let mut files = self.files.write().await;
        let expired: Vec<String> = files
            .values()
            .filter(|record| record.created_at < cutoff)
            .map(|record| record.id.clone())
            .collect();

        for id in &expired {
            if let Some(record) = files.remove(id) {
                remove_artifact_file(&record);
            }
        }

        if !expired.is_empty() {
            info!("Expired {} artifact(s)", expired.len());
        }
        expired.len()
    }

    /// Drops every record and file. Called once at process shutdown; nothing
    /// is meant to survive a restart.
    pub async fn purge_all(&self) -> usize {
        let mut files = self.files.write().await;
        let count = files.len();
        for (_, record) in files.drain() {
            remove_artifact_file(&record);
        }
        if count > 0 {
            info!("Purged {} artifact(s) at shutdown", count);
        }
        count
    }

    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.files.read().await.is_empty()
    }

    /// Test-only hook mirroring `TaskRegistry::backdate`.
    #[cfg(test)]
    pub async fn backdate(&self, artifact_id: &str, by: Duration) {
        if let Some(record) = self.files.write().await.get_mut(artifact_id) {
            record.created_at = record.created_at
                - chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::hours(1));
        }
    }
}

impl Default for ArtifactStore {
    fn default() -> Self {
        Self::new()
    }
}

fn remove_artifact_file(record: &ArtifactRecord) {
    match std::fs::remove_file(&record.path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to delete artifact file {:?}: {}", record.path, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn make_file(dir: &TempDir, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new();
        let path = make_file(&dir, "out.mp3", b"audio-bytes");

        let id = store
            .register(path.clone(), "audio", "task-1")
            .await
            .unwrap();
        assert!(id.starts_with("artifact-"));

        let record = store.resolve(&id).await.unwrap();
        assert_eq!(record.path, path);
        assert_eq!(record.media_kind, "audio");
        assert_eq!(record.owner_task_id, "task-1");
    }

    #[tokio::test]
    async fn test_register_missing_file_rejected() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new();

        let result = store
            .register(dir.path().join("nope.mp3"), "audio", "task-1")
            .await;
        assert!(result.is_err());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_consume_at_most_once() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new();
        let path = make_file(&dir, "out.mp3", b"audio-bytes");
        let id = store
            .register(path.clone(), "audio", "task-1")
            .await
            .unwrap();

        let consumed = store.consume(&id).await.unwrap();
        // second consume sees nothing even while the first read is in flight
        assert!(store.consume(&id).await.is_none());

        let bytes = fs::read(consumed.path()).unwrap();
        assert_eq!(bytes, b"audio-bytes");

        drop(consumed);
        assert!(!path.exists());
        assert!(store.resolve(&id).await.is_none());
    }

    #[tokio::test]
    async fn test_file_survives_until_read_finishes() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new();
        let path = make_file(&dir, "out.mp3", b"audio-bytes");
        let id = store.register(path.clone(), "audio", "task-1").await.unwrap();

        let consumed = store.consume(&id).await.unwrap();
        assert!(path.exists(), "file must outlive the in-flight read");
        drop(consumed);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_resolve_self_heals_on_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new();
        let path = make_file(&dir, "out.mp3", b"audio-bytes");
        let id = store.register(path.clone(), "audio", "task-1").await.unwrap();

        // something outside the store deleted the file
        fs::remove_file(&path).unwrap();

        assert!(store.resolve(&id).await.is_none());
        assert!(store.is_empty().await, "dangling record must be purged");
    }

    #[tokio::test]
    async fn test_expire_removes_record_and_file() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new();
        let old_path = make_file(&dir, "old.mp3", b"old");
        let new_path = make_file(&dir, "new.mp3", b"new");

        let old_id = store.register(old_path.clone(), "audio", "task-1").await.unwrap();
        let new_id = store.register(new_path.clone(), "audio", "task-2").await.unwrap();
        store.backdate(&old_id, Duration::from_secs(7200)).await;

        let removed = store.expire(Duration::from_secs(3600)).await;
        assert_eq!(removed, 1);
        assert!(!old_path.exists());
        assert!(new_path.exists());
        assert!(store.resolve(&old_id).await.is_none());
        assert!(store.resolve(&new_id).await.is_some());

        // idempotent: nothing left to expire
        assert_eq!(store.expire(Duration::from_secs(3600)).await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_path_purges_stale_record() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new();
        let path = make_file(&dir, "out.mp3", b"audio-bytes");

        let first = store.register(path.clone(), "audio", "task-1").await.unwrap();
        let second = store.register(path.clone(), "audio", "task-2").await.unwrap();

        assert!(store.resolve(&first).await.is_none());
        assert!(store.resolve(&second).await.is_some());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_purge_all() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new();
        let a = make_file(&dir, "a.mp3", b"a");
        let b = make_file(&dir, "b.mp3", b"b");
        store.register(a.clone(), "audio", "task-1").await.unwrap();
        store.register(b.clone(), "audio", "task-2").await.unwrap();

        assert_eq!(store.purge_all().await, 2);
        assert!(store.is_empty().await);
        assert!(!a.exists() && !b.exists());
    }
}
