use crate::error::{Result, StoreError};
use crate::types::ResourceId;
use fs2::FileExt;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::OwnedMutexGuard;

/// One async mutex per resource, created on first use and dropped once no
/// task holds or waits for it.
///
/// Different resources never contend; tasks working on the same resource
/// queue up in FIFO order.
#[derive(Debug, Default)]
pub struct ResourceLocks {
    locks: Mutex<HashMap<ResourceId, Arc<tokio::sync::Mutex<()>>>>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(self: &Arc<Self>, id: &ResourceId) -> ResourceLockGuard {
        let mutex = {
            let mut locks = self.table();
            Arc::clone(locks.entry(id.clone()).or_default())
        };
        ResourceLockGuard {
            guard: Some(mutex.lock_owned().await),
            locks: Arc::clone(self),
            id: id.clone(),
        }
    }

    /// Resources with a live lock entry
    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn table(&self) -> MutexGuard<'_, HashMap<ResourceId, Arc<tokio::sync::Mutex<()>>>> {
        self.locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn release(&self, id: &ResourceId) {
        let mut locks = self.table();
        // The table holds the only reference once nobody waits on the mutex
        if locks.get(id).is_some_and(|mutex| Arc::strong_count(mutex) == 1) {
            locks.remove(id);
        }
    }
}

/// Held access to one resource's mutex
#[derive(Debug)]
pub struct ResourceLockGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<ResourceLocks>,
    id: ResourceId,
}

impl Drop for ResourceLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.release(&self.id);
    }
}

/// Exclusive writer access to one resource: the in-process mutex plus an
/// advisory file lock for other processes sharing the store root.
pub(crate) struct ResourceWriteGuard {
    _local: ResourceLockGuard,
    file: std::fs::File,
}

impl Drop for ResourceWriteGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

pub(crate) async fn acquire_write_lock(
    locks: &Arc<ResourceLocks>,
    id: &ResourceId,
    path: PathBuf,
) -> Result<ResourceWriteGuard> {
    let local = locks.lock(id).await;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let file = tokio::task::spawn_blocking(move || -> Result<std::fs::File> {
        use std::fs::OpenOptions;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| StoreError::Lock(format!("open {}: {err}", path.display())))?;

        let start = Instant::now();
        file.lock_exclusive()
            .map_err(|err| StoreError::Lock(format!("acquire {}: {err}", path.display())))?;
        let waited = start.elapsed();
        if waited.as_millis() > 500 {
            log::debug!("Waited {waited:?} for {}", path.display());
        }
        Ok(file)
    })
    .await
    .map_err(|err| StoreError::Lock(format!("join lock task: {err}")))??;

    Ok(ResourceWriteGuard {
        _local: local,
        file,
    })
}
