use crate::error::ConfigError;
use scriptwatch_diff::EngineConfig;
use scriptwatch_store::StoreOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const KNOWN_KEYS: &[&str] = &[
    "engine",
    "retention",
    "fetch",
    "max_concurrency",
    "chunk_size_bytes",
    "record_policy",
    "data_dir",
];

/// Which comparisons leave a change record behind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordPolicy {
    /// Every comparison against a previous version is recorded
    #[default]
    EveryCheck,
    /// Only comparisons that decided `changed = true`
    ChangedOnly,
}

impl RecordPolicy {
    pub fn should_record(self, changed: bool) -> bool {
        match self {
            Self::EveryCheck => true,
            Self::ChangedOnly => changed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    pub max_versions_per_resource: usize,
    pub max_diff_age_days: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_versions_per_resource: 5,
            max_diff_age_days: 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per attempt
    pub timeout_ms: u64,
    /// Additional attempts after the first one, transient failures only
    pub max_retries: u32,
    /// First backoff delay; doubles on every retry
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub user_agent: String,
    /// Responses larger than this fail the check
    pub max_body_bytes: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            max_retries: 2,
            backoff_initial_ms: 500,
            backoff_max_ms: 8_000,
            user_agent: concat!("scriptwatch/", env!("CARGO_PKG_VERSION")).to_string(),
            max_body_bytes: 32 * 1024 * 1024,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(20);
        Duration::from_millis(
            self.backoff_initial_ms
                .saturating_mul(factor)
                .min(self.backoff_max_ms),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Normalization, heuristics, scoring and rendering
    pub engine: EngineConfig,
    pub retention: RetentionPolicy,
    pub fetch: FetchConfig,
    /// Checks running at once within one orchestrator
    pub max_concurrency: usize,
    /// Stored payloads are split into chunks of this size
    pub chunk_size_bytes: usize,
    pub record_policy: RecordPolicy,
    /// Store root
    pub data_dir: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            retention: RetentionPolicy::default(),
            fetch: FetchConfig::default(),
            max_concurrency: 10,
            chunk_size_bytes: scriptwatch_store::DEFAULT_CHUNK_SIZE,
            record_policy: RecordPolicy::default(),
            data_dir: PathBuf::from(".scriptwatch"),
        }
    }
}

impl MonitorConfig {
    /// Load a JSON or TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_slice(&bytes).map_err(|detail| ConfigError::Parse {
            path: path.display().to_string(),
            detail,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// JSON first, then TOML converted to the same JSON value model
    pub fn from_slice(bytes: &[u8]) -> Result<Self, String> {
        let value: serde_json::Value = match serde_json::from_slice(bytes) {
            Ok(value) => value,
            Err(json_err) => {
                let utf8 = std::str::from_utf8(bytes).map_err(|err| format!("{json_err}; {err}"))?;
                let toml_value: toml::Value = toml::from_str(utf8).map_err(|toml_err| {
                    format!("Config is not valid JSON or TOML ({json_err}); TOML parse error: {toml_err}")
                })?;
                serde_json::to_value(toml_value)
                    .map_err(|err| format!("Failed to convert TOML config to JSON: {err}"))?
            }
        };

        reject_unknown_keys(&value)?;
        serde_json::from_value(value).map_err(|err| format!("Config parse error: {err}"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate().map_err(ConfigError::Invalid)?;
        if self.retention.max_versions_per_resource == 0 {
            return Err(ConfigError::Invalid(
                "retention.max_versions_per_resource must be >= 1".into(),
            ));
        }
        if self.retention.max_diff_age_days == 0 {
            return Err(ConfigError::Invalid(
                "retention.max_diff_age_days must be >= 1".into(),
            ));
        }
        if self.fetch.timeout_ms == 0 {
            return Err(ConfigError::Invalid("fetch.timeout_ms must be > 0".into()));
        }
        if self.fetch.backoff_max_ms < self.fetch.backoff_initial_ms {
            return Err(ConfigError::Invalid(
                "fetch.backoff_max_ms must be >= fetch.backoff_initial_ms".into(),
            ));
        }
        if self.fetch.max_body_bytes == 0 {
            return Err(ConfigError::Invalid("fetch.max_body_bytes must be > 0".into()));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid("max_concurrency must be >= 1".into()));
        }
        if self.chunk_size_bytes == 0 {
            return Err(ConfigError::Invalid("chunk_size_bytes must be > 0".into()));
        }
        Ok(())
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            chunk_size: self.chunk_size_bytes,
            max_versions: self.retention.max_versions_per_resource,
        }
    }
}

fn reject_unknown_keys(value: &serde_json::Value) -> Result<(), String> {
    let Some(map) = value.as_object() else {
        return Err("Config root must be an object".to_string());
    };
    let mut unknown: Vec<&str> = map
        .keys()
        .map(String::as_str)
        .filter(|key| !KNOWN_KEYS.contains(key))
        .collect();
    if unknown.is_empty() {
        return Ok(());
    }
    unknown.sort_unstable();
    Err(format!("Unknown config keys: {}", unknown.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_are_valid() {
        let config = MonitorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.retention.max_versions_per_resource, 5);
        assert_eq!(config.retention.max_diff_age_days, 90);
        assert_eq!(config.fetch.timeout(), Duration::from_secs(15));
        assert_eq!(config.max_concurrency, 10);
        assert_eq!(config.record_policy, RecordPolicy::EveryCheck);
    }

    #[test]
    fn parses_json() {
        let config = MonitorConfig::from_slice(
            br#"{"max_concurrency": 3, "record_policy": "changed_only", "retention": {"max_versions_per_resource": 2}}"#,
        )
        .unwrap();
        assert_eq!(config.max_concurrency, 3);
        assert_eq!(config.record_policy, RecordPolicy::ChangedOnly);
        assert_eq!(config.retention.max_versions_per_resource, 2);
        assert_eq!(config.retention.max_diff_age_days, 90);
    }

    #[test]
    fn parses_toml() {
        let raw = r#"
max_concurrency = 4
data_dir = "/var/lib/scriptwatch"

[fetch]
timeout_ms = 2000
max_retries = 0

[engine.scoring]
change_threshold = 0.2
"#;
        let config = MonitorConfig::from_slice(raw.as_bytes()).unwrap();
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/scriptwatch"));
        assert_eq!(config.fetch.timeout_ms, 2000);
        assert_eq!(config.fetch.max_retries, 0);
        assert_eq!(config.fetch.backoff_initial_ms, 500);
        assert!((config.engine.scoring.change_threshold - 0.2).abs() < 1e-9);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = MonitorConfig::from_slice(br#"{"max_concurency": 3}"#).unwrap_err();
        assert!(err.contains("max_concurency"), "{err}");
    }

    #[test]
    fn invalid_values_fail_validation() {
        let mut config = MonitorConfig::default();
        config.retention.max_versions_per_resource = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = MonitorConfig::default();
        config.max_concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = MonitorConfig::default();
        config.engine.scoring.change_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let fetch = FetchConfig {
            backoff_initial_ms: 500,
            backoff_max_ms: 1_500,
            ..FetchConfig::default()
        };
        assert_eq!(fetch.backoff(1), Duration::from_millis(500));
        assert_eq!(fetch.backoff(2), Duration::from_millis(1_000));
        assert_eq!(fetch.backoff(3), Duration::from_millis(1_500));
    }

    #[test]
    fn record_policy_decision() {
        assert!(RecordPolicy::EveryCheck.should_record(false));
        assert!(!RecordPolicy::ChangedOnly.should_record(false));
        assert!(RecordPolicy::ChangedOnly.should_record(true));
    }
}
