use crate::chunks::{decode_chunks, encode_chunks};
use crate::error::{Result, StoreError};
use crate::locks::{acquire_write_lock, ResourceLocks, ResourceWriteGuard};
use crate::paths::{
    chunk_file_name, parse_version_dir_name, tmp_name, StorePaths, META_FILE, TMP_PREFIX,
};
use crate::types::{ContentVersion, NewVersion, ResourceId, VersionMeta};
use scriptwatch_diff::sha256_hex;
use std::path::Path;
use std::sync::Arc;

pub const DEFAULT_CHUNK_SIZE: usize = 50 * 1024;
pub const DEFAULT_MAX_VERSIONS: usize = 5;

/// Capped, append-only version history per resource.
#[derive(Debug, Clone)]
pub struct VersionStore {
    paths: StorePaths,
    locks: Arc<ResourceLocks>,
    chunk_size: usize,
    max_versions: usize,
}

impl VersionStore {
    pub(crate) fn new(
        paths: StorePaths,
        locks: Arc<ResourceLocks>,
        chunk_size: usize,
        max_versions: usize,
    ) -> Self {
        Self {
            paths,
            locks,
            chunk_size,
            max_versions,
        }
    }

    pub fn max_versions(&self) -> usize {
        self.max_versions
    }

    /// Persist a new version and evict the oldest ones beyond the cap.
    ///
    /// The version directory is assembled under a scratch name and renamed
    /// into place. Older versions are evicted down to `max_versions - 1`
    /// before the rename, so unlocked readers never list more than
    /// `max_versions` complete versions.
    pub async fn put_version(&self, id: &ResourceId, new: NewVersion) -> Result<ContentVersion> {
        let guard = self.lock(id).await?;

        let sequence = self.last_sequence(id).await?.map_or(1, |last| last + 1);
        let raw_content = new.raw_content;
        let chunk_size = self.chunk_size;
        let encoded = {
            let content = raw_content.clone();
            tokio::task::spawn_blocking(move || encode_chunks(&content, chunk_size))
                .await
                .map_err(|err| StoreError::Task(format!("chunk encoder: {err}")))??
        };

        let meta = VersionMeta {
            resource_id: id.clone(),
            sequence,
            raw_hash: sha256_hex(&raw_content),
            normalized_hash: new.normalized_hash,
            fetched_at_unix_ms: new.fetched_at_unix_ms,
            byte_size: raw_content.len() as u64,
            hint: new.hint,
            chunk_count: encoded.len(),
        };

        let versions_dir = self.paths.versions_dir(id);
        tokio::fs::create_dir_all(&versions_dir).await?;
        let evicted = self
            .prune_locked(id, self.max_versions.saturating_sub(1), &guard)
            .await?;
        if evicted > 0 {
            log::debug!("Evicted {evicted} old versions of {id}");
        }

        let tmp_dir = versions_dir.join(tmp_name(&format!("v{sequence}")));
        tokio::fs::create_dir_all(&tmp_dir).await?;

        let written = write_version_dir(&tmp_dir, &meta, &encoded).await;
        if let Err(err) = written {
            let _ = tokio::fs::remove_dir_all(&tmp_dir).await;
            return Err(err);
        }
        let final_dir = self.paths.version_dir(id, sequence);
        if let Err(err) = tokio::fs::rename(&tmp_dir, &final_dir).await {
            let _ = tokio::fs::remove_dir_all(&tmp_dir).await;
            return Err(err.into());
        }
        write_atomic(&self.paths.last_sequence_path(id), sequence.to_string().as_bytes()).await?;

        log::debug!(
            "Stored version {sequence} of {id} ({} bytes, {} chunks)",
            meta.byte_size,
            meta.chunk_count
        );
        drop(guard);

        Ok(ContentVersion { meta, raw_content })
    }

    pub async fn get_latest(&self, id: &ResourceId) -> Result<Option<ContentVersion>> {
        match self.latest_meta(id).await? {
            Some(meta) => Ok(Some(self.read_content(id, meta).await?)),
            None => Ok(None),
        }
    }

    pub async fn latest_meta(&self, id: &ResourceId) -> Result<Option<VersionMeta>> {
        Ok(self.list_versions(id).await?.into_iter().next())
    }

    pub async fn get_version(&self, id: &ResourceId, sequence: u64) -> Result<ContentVersion> {
        let dir = self.paths.version_dir(id, sequence);
        let meta_path = dir.join(META_FILE);
        if !meta_path.exists() {
            return Err(StoreError::VersionNotFound {
                resource: id.to_string(),
                sequence,
            });
        }
        let meta = read_meta(&meta_path).await?;
        self.read_content(id, meta).await
    }

    /// Version metadata, newest first.
    pub async fn list_versions(&self, id: &ResourceId) -> Result<Vec<VersionMeta>> {
        let mut metas = Vec::new();
        for sequence in self.sequences(id).await?.into_iter().rev() {
            let meta_path = self.paths.version_dir(id, sequence).join(META_FILE);
            match read_meta(&meta_path).await {
                Ok(meta) => metas.push(meta),
                // Evicted between listing and reading
                Err(StoreError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }
        Ok(metas)
    }

    /// Evict versions beyond the retention cap; returns how many were removed.
    pub async fn prune(&self, id: &ResourceId) -> Result<usize> {
        let guard = self.lock(id).await?;
        self.prune_locked(id, self.max_versions, &guard).await
    }

    /// Remove a version that was stored but whose change record could not be
    /// written, so the next check compares against its predecessor again.
    ///
    /// Only the newest version can be discarded. `last_sequence` is left
    /// alone: the discarded sequence number is never issued again.
    pub async fn discard_version(&self, id: &ResourceId, sequence: u64) -> Result<bool> {
        let _guard = self.lock(id).await?;
        if self.sequences(id).await?.last() != Some(&sequence) {
            return Ok(false);
        }
        tokio::fs::remove_dir_all(self.paths.version_dir(id, sequence)).await?;
        log::info!("Discarded version {sequence} of {id}");
        Ok(true)
    }

    async fn lock(&self, id: &ResourceId) -> Result<ResourceWriteGuard> {
        acquire_write_lock(&self.locks, id, self.paths.lock_path(id)).await
    }

    async fn prune_locked(
        &self,
        id: &ResourceId,
        keep: usize,
        _guard: &ResourceWriteGuard,
    ) -> Result<usize> {
        let versions_dir = self.paths.versions_dir(id);
        if !versions_dir.exists() {
            return Ok(0);
        }

        // Scratch directories are only ever live while the lock is held.
        let mut entries = tokio::fs::read_dir(&versions_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_name().to_string_lossy().starts_with(TMP_PREFIX) {
                continue;
            }
            log::warn!("Removing abandoned scratch entry {}", entry.path().display());
            if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(entry.path()).await?;
            } else {
                tokio::fs::remove_file(entry.path()).await?;
            }
        }

        let sequences = self.sequences(id).await?;
        let excess = sequences.len().saturating_sub(keep);
        for &sequence in sequences.iter().take(excess) {
            tokio::fs::remove_dir_all(self.paths.version_dir(id, sequence)).await?;
        }
        Ok(excess)
    }

    /// Stored sequence numbers, ascending
    async fn sequences(&self, id: &ResourceId) -> Result<Vec<u64>> {
        let versions_dir = self.paths.versions_dir(id);
        if !versions_dir.exists() {
            return Ok(Vec::new());
        }
        let mut sequences = Vec::new();
        let mut entries = tokio::fs::read_dir(&versions_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(sequence) = parse_version_dir_name(&entry.file_name().to_string_lossy()) {
                sequences.push(sequence);
            }
        }
        sequences.sort_unstable();
        Ok(sequences)
    }

    /// Highest sequence ever issued; survives eviction of every version
    async fn last_sequence(&self, id: &ResourceId) -> Result<Option<u64>> {
        let path = self.paths.last_sequence_path(id);
        let recorded = if path.exists() {
            let text = tokio::fs::read_to_string(&path).await?;
            Some(
                text.trim()
                    .parse::<u64>()
                    .map_err(|err| StoreError::corrupt(&path, err.to_string()))?,
            )
        } else {
            None
        };
        let on_disk = self.sequences(id).await?.last().copied();
        Ok(recorded.max(on_disk))
    }

    async fn read_content(&self, id: &ResourceId, meta: VersionMeta) -> Result<ContentVersion> {
        let dir = self.paths.version_dir(id, meta.sequence);
        let mut chunks = Vec::with_capacity(meta.chunk_count);
        for index in 0..meta.chunk_count {
            chunks.push(tokio::fs::read(dir.join(chunk_file_name(index))).await?);
        }
        let expected = meta.byte_size;
        let raw_content = tokio::task::spawn_blocking(move || decode_chunks(chunks, expected))
            .await
            .map_err(|err| StoreError::Task(format!("chunk decoder: {err}")))?
            .map_err(|err| StoreError::corrupt(&dir, err.to_string()))?;

        if sha256_hex(&raw_content) != meta.raw_hash {
            return Err(StoreError::corrupt(&dir, "raw hash mismatch"));
        }
        Ok(ContentVersion { meta, raw_content })
    }
}

async fn write_version_dir(dir: &Path, meta: &VersionMeta, chunks: &[Vec<u8>]) -> Result<()> {
    for (index, chunk) in chunks.iter().enumerate() {
        tokio::fs::write(dir.join(chunk_file_name(index)), chunk).await?;
    }
    // meta.json last: a directory with meta.json is complete
    tokio::fs::write(dir.join(META_FILE), serde_json::to_vec_pretty(meta)?).await?;
    Ok(())
}

async fn read_meta(path: &Path) -> Result<VersionMeta> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Write through a scratch file and rename over the destination
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(tmp_name(&file_name));
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(err) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(err.into());
    }
    Ok(())
}
