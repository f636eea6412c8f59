//! # Scriptwatch Store
//!
//! File-system persistence for monitored resources:
//!
//! - [`VersionStore`]: the last N raw versions per resource, chunked and
//!   zlib-compressed, written atomically and pruned under a per-resource
//!   writer lock
//! - [`ChangeLog`]: immutable change records plus rendered artifacts,
//!   pruned by age
//! - [`StatusStore`]: last outcome and last error per resource

mod changes;
mod chunks;
mod error;
mod locks;
mod paths;
mod status;
mod types;
mod versions;

use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use changes::ChangeLog;
pub use error::{Result, StoreError};
pub use locks::{ResourceLockGuard, ResourceLocks};
pub use status::StatusStore;
pub use types::{
    unix_now_ms, ArtifactRef, ChangeRecord, ContentVersion, DiffId, LastError, LastOutcome,
    NewVersion, ResourceId, ResourceStatus, VersionMeta,
};
pub use versions::{VersionStore, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_VERSIONS};

#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Payloads are split into chunks of this many bytes before compression
    pub chunk_size: usize,
    /// Versions kept per resource
    pub max_versions: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_versions: DEFAULT_MAX_VERSIONS,
        }
    }
}

/// All persisted state under one root directory
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
    pub versions: VersionStore,
    pub changes: ChangeLog,
    pub status: StatusStore,
}

impl Store {
    pub async fn open(root: impl Into<PathBuf>, options: StoreOptions) -> Result<Self> {
        if options.chunk_size == 0 {
            return Err(StoreError::InvalidConfig("chunk_size must be > 0".into()));
        }
        if options.max_versions == 0 {
            return Err(StoreError::InvalidConfig("max_versions must be >= 1".into()));
        }

        let root = root.into();
        let paths = paths::StorePaths::new(root.clone());
        tokio::fs::create_dir_all(paths.resources_dir()).await?;

        let locks = Arc::new(ResourceLocks::new());
        Ok(Self {
            versions: VersionStore::new(
                paths.clone(),
                locks,
                options.chunk_size,
                options.max_versions,
            ),
            changes: ChangeLog::new(paths.clone()),
            status: StatusStore::new(paths),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resources that have anything stored
    pub async fn resources(&self) -> Result<Vec<ResourceId>> {
        changes::list_resources(&self.root).await
    }
}
