use crate::error::RegistryError;
use async_trait::async_trait;
use scriptwatch_store::ResourceId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A URL under observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredResource {
    pub id: ResourceId,
    pub url: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Source of the resources to check, in check order.
#[async_trait]
pub trait ResourceRegistry: Send + Sync {
    async fn list(&self) -> Result<Vec<MonitoredResource>, RegistryError>;

    async fn get(&self, id: &ResourceId) -> Result<Option<MonitoredResource>, RegistryError> {
        Ok(self.list().await?.into_iter().find(|r| &r.id == id))
    }
}

/// Fixed in-memory registry
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    resources: Vec<MonitoredResource>,
}

impl StaticRegistry {
    pub fn new(resources: Vec<MonitoredResource>) -> Self {
        Self { resources }
    }
}

#[async_trait]
impl ResourceRegistry for StaticRegistry {
    async fn list(&self) -> Result<Vec<MonitoredResource>, RegistryError> {
        Ok(self.resources.clone())
    }
}

/// JSON array of `{id, url, active}` records, re-read on every call so
/// edits apply to the next check.
#[derive(Debug, Clone)]
pub struct JsonFileRegistry {
    path: PathBuf,
}

impl JsonFileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ResourceRegistry for JsonFileRegistry {
    async fn list(&self) -> Result<Vec<MonitoredResource>, RegistryError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| RegistryError::Read {
                path: self.path.display().to_string(),
                source,
            })?;
        let resources: Vec<MonitoredResource> =
            serde_json::from_slice(&bytes).map_err(|err| RegistryError::Invalid {
                path: self.path.display().to_string(),
                detail: err.to_string(),
            })?;

        let mut seen = std::collections::HashSet::new();
        for resource in &resources {
            if !seen.insert(&resource.id) {
                return Err(RegistryError::Invalid {
                    path: self.path.display().to_string(),
                    detail: format!("duplicate resource id '{}'", resource.id),
                });
            }
        }
        Ok(resources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn reads_json_file_in_order() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("resources.json");
        std::fs::write(
            &path,
            r#"[
                {"id": "main", "url": "https://cdn.example/main.js"},
                {"id": "vendor", "url": "https://cdn.example/vendor.js", "active": false}
            ]"#,
        )
        .unwrap();

        let registry = JsonFileRegistry::new(&path);
        let resources = registry.list().await.unwrap();
        let ids: Vec<&str> = resources.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["main", "vendor"]);
        assert!(resources[0].active);
        assert!(!resources[1].active);

        let vendor = registry
            .get(&ResourceId::new("vendor").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(vendor.url, "https://cdn.example/vendor.js");
        assert!(registry
            .get(&ResourceId::new("missing").unwrap())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn rejects_duplicates_and_bad_ids() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("resources.json");

        std::fs::write(
            &path,
            r#"[{"id": "a", "url": "u1"}, {"id": "a", "url": "u2"}]"#,
        )
        .unwrap();
        let err = JsonFileRegistry::new(&path).list().await.unwrap_err();
        assert!(err.to_string().contains("duplicate"), "{err}");

        std::fs::write(&path, r#"[{"id": "../etc", "url": "u"}]"#).unwrap();
        assert!(matches!(
            JsonFileRegistry::new(&path).list().await,
            Err(RegistryError::Invalid { .. })
        ));
    }
}
