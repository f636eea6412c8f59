use crate::error::{Result, StoreError};
use scriptwatch_diff::{ContentHint, DiffStats, ScoreBasis, Strategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier of a monitored resource; doubles as a directory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let valid = !value.is_empty()
            && value.len() <= 128
            && value != "."
            && value != ".."
            && !value.starts_with('.')
            && value
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'));
        if valid {
            Ok(Self(value))
        } else {
            Err(StoreError::InvalidResourceId(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ResourceId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.0
    }
}

/// Metadata of one stored version (`meta.json`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMeta {
    pub resource_id: ResourceId,
    pub sequence: u64,
    /// SHA-256 hex of the raw bytes
    pub raw_hash: String,
    /// SHA-256 hex of the normalized text
    pub normalized_hash: String,
    pub fetched_at_unix_ms: u64,
    pub byte_size: u64,
    #[serde(default)]
    pub hint: ContentHint,
    pub chunk_count: usize,
}

/// Stored version together with its raw payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentVersion {
    pub meta: VersionMeta,
    pub raw_content: Vec<u8>,
}

impl ContentVersion {
    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    /// Raw payload as text; invalid UTF-8 is replaced
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.raw_content)
    }
}

/// Content handed to [`crate::VersionStore::put_version`]
#[derive(Debug, Clone)]
pub struct NewVersion {
    pub raw_content: Vec<u8>,
    pub normalized_hash: String,
    pub hint: ContentHint,
    pub fetched_at_unix_ms: u64,
}

/// `{resource}-{base}-{new}`; unique because sequences never repeat.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DiffId {
    pub resource_id: ResourceId,
    pub base_sequence: u64,
    pub new_sequence: u64,
}

impl DiffId {
    pub fn new(resource_id: ResourceId, base_sequence: u64, new_sequence: u64) -> Self {
        Self {
            resource_id,
            base_sequence,
            new_sequence,
        }
    }
}

impl fmt::Display for DiffId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.resource_id, self.base_sequence, self.new_sequence
        )
    }
}

impl FromStr for DiffId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || StoreError::InvalidDiffId(s.to_string());
        // Resource ids may contain '-', sequences never do.
        let mut parts = s.rsplitn(3, '-');
        let new_sequence = parts
            .next()
            .and_then(|p| p.parse::<u64>().ok())
            .ok_or_else(invalid)?;
        let base_sequence = parts
            .next()
            .and_then(|p| p.parse::<u64>().ok())
            .ok_or_else(invalid)?;
        let resource = parts.next().ok_or_else(invalid)?;
        let resource_id = ResourceId::new(resource).map_err(|_| invalid())?;
        Ok(Self::new(resource_id, base_sequence, new_sequence))
    }
}

impl TryFrom<String> for DiffId {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DiffId> for String {
    fn from(id: DiffId) -> Self {
        id.to_string()
    }
}

/// Where a change record's rendered artifact lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub file_name: String,
    pub content_type: String,
    pub byte_size: u64,
    pub sha256: String,
}

/// Immutable audit entry for one comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: DiffId,
    pub resource_id: ResourceId,
    pub base_version: u64,
    pub new_version: u64,
    pub strategy: Strategy,
    pub basis: ScoreBasis,
    pub confidence: f64,
    pub changed: bool,
    pub obfuscated: bool,
    pub stats: DiffStats,
    pub artifact: ArtifactRef,
    pub created_at_unix_ms: u64,
}

/// Result of the last completed comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastOutcome {
    pub changed: bool,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_id: Option<DiffId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_sequence: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    pub stage: String,
    pub message: String,
    pub at_unix_ms: u64,
}

/// Persisted per-resource status (`status.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceStatus {
    pub resource_id: ResourceId,
    pub last_checked_at_unix_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<LastOutcome>,
    /// Error of the most recent check; cleared by the next successful check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success_at_unix_ms: Option<u64>,
}

pub fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_id_validation() {
        assert!(ResourceId::new("cdn-widget_v2.js").is_ok());
        assert!(ResourceId::new("").is_err());
        assert!(ResourceId::new("..").is_err());
        assert!(ResourceId::new(".hidden").is_err());
        assert!(ResourceId::new("a/b").is_err());
        assert!(ResourceId::new("a b").is_err());
    }

    #[test]
    fn diff_id_round_trips_with_dashes_in_resource() {
        let id = DiffId::new(ResourceId::new("my-app-bundle").unwrap(), 4, 5);
        let text = id.to_string();
        assert_eq!(text, "my-app-bundle-4-5");
        assert_eq!(text.parse::<DiffId>().unwrap(), id);

        assert!("bundle-4".parse::<DiffId>().is_err());
        assert!("bundle-x-5".parse::<DiffId>().is_err());
    }

    #[test]
    fn resource_id_deserialization_is_validated() {
        assert!(serde_json::from_str::<ResourceId>("\"ok-id\"").is_ok());
        assert!(serde_json::from_str::<ResourceId>("\"../etc\"").is_err());
    }
}
