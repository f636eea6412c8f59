//! On-disk layout:
//!
//! ```text
//! <root>/resources/<id>/
//!     write.lock
//!     status.json
//!     versions/
//!         last_sequence
//!         v000000000007/meta.json, chunk-00000.z, ...
//!     changes/
//!         <id>-6-7/record.json, artifact.html
//! ```

use crate::types::{DiffId, ResourceId};
use std::path::{Path, PathBuf};

const RESOURCES_DIR: &str = "resources";
const VERSIONS_DIR: &str = "versions";
const CHANGES_DIR: &str = "changes";
const STATUS_FILE: &str = "status.json";
const LOCK_FILE: &str = "write.lock";
const LAST_SEQUENCE_FILE: &str = "last_sequence";

pub(crate) const META_FILE: &str = "meta.json";
pub(crate) const RECORD_FILE: &str = "record.json";
pub(crate) const TMP_PREFIX: &str = ".tmp-";

#[derive(Debug, Clone)]
pub(crate) struct StorePaths {
    root: PathBuf,
}

impl StorePaths {
    pub(crate) fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn resources_dir(&self) -> PathBuf {
        self.root.join(RESOURCES_DIR)
    }

    pub(crate) fn resource_dir(&self, id: &ResourceId) -> PathBuf {
        self.resources_dir().join(id.as_str())
    }

    pub(crate) fn versions_dir(&self, id: &ResourceId) -> PathBuf {
        self.resource_dir(id).join(VERSIONS_DIR)
    }

    pub(crate) fn version_dir(&self, id: &ResourceId, sequence: u64) -> PathBuf {
        self.versions_dir(id).join(version_dir_name(sequence))
    }

    pub(crate) fn last_sequence_path(&self, id: &ResourceId) -> PathBuf {
        self.versions_dir(id).join(LAST_SEQUENCE_FILE)
    }

    pub(crate) fn changes_dir(&self, id: &ResourceId) -> PathBuf {
        self.resource_dir(id).join(CHANGES_DIR)
    }

    pub(crate) fn change_dir(&self, diff_id: &DiffId) -> PathBuf {
        self.changes_dir(&diff_id.resource_id)
            .join(diff_id.to_string())
    }

    pub(crate) fn status_path(&self, id: &ResourceId) -> PathBuf {
        self.resource_dir(id).join(STATUS_FILE)
    }

    pub(crate) fn lock_path(&self, id: &ResourceId) -> PathBuf {
        self.resource_dir(id).join(LOCK_FILE)
    }
}

pub(crate) fn version_dir_name(sequence: u64) -> String {
    format!("v{sequence:012}")
}

/// Sequence number of a version directory name; `None` for anything else
pub(crate) fn parse_version_dir_name(name: &str) -> Option<u64> {
    let digits = name.strip_prefix('v')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

pub(crate) fn chunk_file_name(index: usize) -> String {
    format!("chunk-{index:05}.z")
}

/// Unique scratch name next to the final destination
pub(crate) fn tmp_name(label: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{TMP_PREFIX}{label}-{}-{nanos}", std::process::id())
}
