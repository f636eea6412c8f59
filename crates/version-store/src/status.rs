use crate::error::Result;
use crate::paths::StorePaths;
use crate::types::{ResourceId, ResourceStatus};
use crate::versions::write_atomic;

/// Last check status per resource (`status.json`)
#[derive(Debug, Clone)]
pub struct StatusStore {
    paths: StorePaths,
}

impl StatusStore {
    pub(crate) fn new(paths: StorePaths) -> Self {
        Self { paths }
    }

    pub async fn read(&self, id: &ResourceId) -> Result<Option<ResourceStatus>> {
        let path = self.paths.status_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = tokio::fs::read(&path).await?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    pub async fn write(&self, status: &ResourceStatus) -> Result<()> {
        let path = self.paths.status_path(&status.resource_id);
        write_atomic(&path, &serde_json::to_vec_pretty(status)?).await
    }
}
