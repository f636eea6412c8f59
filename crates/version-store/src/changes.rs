use crate::error::{Result, StoreError};
use crate::paths::{tmp_name, StorePaths, RECORD_FILE, TMP_PREFIX};
use crate::types::{ChangeRecord, DiffId, ResourceId};
use scriptwatch_diff::RenderedArtifact;
use std::path::Path;

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Change records and their rendered artifacts, one directory per diff id.
#[derive(Debug, Clone)]
pub struct ChangeLog {
    paths: StorePaths,
}

impl ChangeLog {
    pub(crate) fn new(paths: StorePaths) -> Self {
        Self { paths }
    }

    /// Store a record with its artifact. The record's `artifact.file_name`
    /// decides the artifact's file name.
    pub async fn append(&self, record: &ChangeRecord, artifact: &RenderedArtifact) -> Result<()> {
        let changes_dir = self.paths.changes_dir(&record.resource_id);
        tokio::fs::create_dir_all(&changes_dir).await?;

        let final_dir = self.paths.change_dir(&record.id);
        if final_dir.exists() {
            log::warn!("Change record {} already exists; keeping the original", record.id);
            return Ok(());
        }

        let tmp_dir = changes_dir.join(tmp_name(&record.id.to_string()));
        tokio::fs::create_dir_all(&tmp_dir).await?;
        let written = async {
            tokio::fs::write(tmp_dir.join(&record.artifact.file_name), &artifact.bytes).await?;
            tokio::fs::write(tmp_dir.join(RECORD_FILE), serde_json::to_vec_pretty(record)?).await?;
            tokio::fs::rename(&tmp_dir, &final_dir).await?;
            Ok::<(), StoreError>(())
        }
        .await;
        if written.is_err() {
            let _ = tokio::fs::remove_dir_all(&tmp_dir).await;
        }
        written
    }

    /// Records of one resource, newest first.
    pub async fn list(&self, id: &ResourceId) -> Result<Vec<ChangeRecord>> {
        let changes_dir = self.paths.changes_dir(id);
        if !changes_dir.exists() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&changes_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with(TMP_PREFIX) {
                continue;
            }
            let path = entry.path().join(RECORD_FILE);
            match read_record(&path).await {
                Ok(record) => records.push(record),
                Err(StoreError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }
        records.sort_by(|a, b| b.new_version.cmp(&a.new_version));
        Ok(records)
    }

    pub async fn get(&self, diff_id: &DiffId) -> Result<ChangeRecord> {
        let path = self.paths.change_dir(diff_id).join(RECORD_FILE);
        if !path.exists() {
            return Err(StoreError::ChangeNotFound(diff_id.to_string()));
        }
        read_record(&path).await
    }

    /// Rendered artifact of a change record (bytes plus content type)
    pub async fn artifact(&self, diff_id: &DiffId) -> Result<RenderedArtifact> {
        let record = self.get(diff_id).await?;
        let path = self.paths.change_dir(diff_id).join(&record.artifact.file_name);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::ChangeNotFound(diff_id.to_string()))
            }
            Err(err) => return Err(err.into()),
        };
        Ok(RenderedArtifact {
            content_type: record.artifact.content_type,
            bytes,
        })
    }

    /// Delete records of `id` created more than `max_age_days` before `now_ms`.
    pub async fn prune_older_than(
        &self,
        id: &ResourceId,
        max_age_days: u32,
        now_ms: u64,
    ) -> Result<usize> {
        let cutoff = now_ms.saturating_sub(u64::from(max_age_days) * DAY_MS);
        let mut removed = 0usize;
        for record in self.list(id).await? {
            if record.created_at_unix_ms < cutoff {
                tokio::fs::remove_dir_all(self.paths.change_dir(&record.id)).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            log::info!("Pruned {removed} change records of {id} older than {max_age_days} days");
        }
        Ok(removed)
    }

    /// [`ChangeLog::prune_older_than`] for every resource in the store
    pub async fn prune_all(&self, max_age_days: u32, now_ms: u64) -> Result<usize> {
        let mut removed = 0usize;
        for id in list_resources(self.paths.root()).await? {
            removed += self.prune_older_than(&id, max_age_days, now_ms).await?;
        }
        Ok(removed)
    }
}

async fn read_record(path: &Path) -> Result<ChangeRecord> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Resource ids that have a directory under the store root
pub(crate) async fn list_resources(root: &Path) -> Result<Vec<ResourceId>> {
    let dir = StorePaths::new(root).resources_dir();
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut ids = Vec::new();
    let mut entries = tokio::fs::read_dir(&dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        match ResourceId::new(entry.file_name().to_string_lossy()) {
            Ok(id) => ids.push(id),
            Err(_) => log::debug!("Skipping foreign entry {}", entry.path().display()),
        }
    }
    ids.sort();
    Ok(ids)
}
