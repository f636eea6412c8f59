use serde::{Deserialize, Serialize};

/// Configuration for the whole comparison pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Noise-stripping rules applied before any comparison
    pub normalizer: NormalizerConfig,

    /// Minification/obfuscation detection
    pub obfuscation: ObfuscationConfig,

    /// Change decision thresholds
    pub scoring: ScoringConfig,

    /// Work caps for parsing and alignment
    pub limits: DiffLimits,

    /// Artifact rendering
    pub render: RenderConfig,

    /// Decoded, one-statement-per-line view used for line diffs and artifacts
    pub readable: ReadableConfig,
}

impl EngineConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        self.normalizer.validate()?;
        self.obfuscation.validate()?;
        self.scoring.validate()?;
        self.limits.validate()?;
        self.render.validate()?;
        self.readable.validate()?;
        Ok(())
    }
}

/// Category of noise removed by the normalizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseCategory {
    /// Leading/trailing whitespace on a line
    Whitespace,
    /// Runs of blank lines
    BlankLines,
    /// ISO-8601 date/time literals
    Timestamp,
    /// Unix epoch seconds/milliseconds
    EpochTimestamp,
    /// `?v=`, `?t=`, `?_=` style query fragments inside string literals
    CacheBuster,
    /// Hex content hashes embedded in asset names inside string literals
    AssetHash,
    /// `1.2.3` version literals
    SemVer,
    /// User supplied rule
    Custom,
}

/// Where a regex rule is allowed to match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    /// Anywhere in the text
    #[default]
    Anywhere,
    /// Only inside quoted string literals (anywhere for non-script payloads)
    StringLiterals,
}

/// Extra normalization rule appended after the built-in ones
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomRule {
    pub name: String,
    pub pattern: String,
    #[serde(default)]
    pub replacement: String,
    #[serde(default)]
    pub scope: RuleScope,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Built-in categories to skip
    pub disabled: Vec<NoiseCategory>,

    /// Rules applied after the built-in set, in order
    pub extra_rules: Vec<CustomRule>,
}

impl NormalizerConfig {
    pub fn is_enabled(&self, category: NoiseCategory) -> bool {
        !self.disabled.contains(&category)
    }

    fn validate(&self) -> Result<(), String> {
        for rule in &self.extra_rules {
            if rule.name.trim().is_empty() {
                return Err("normalizer.extra_rules: rule name must not be empty".to_string());
            }
            if rule.pattern.is_empty() {
                return Err(format!(
                    "normalizer.extra_rules: rule '{}' has an empty pattern",
                    rule.name
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ObfuscationConfig {
    /// Score at or above which a payload is treated as obfuscated
    pub threshold: f64,

    /// Identifier count below which the naming signals are ignored
    pub min_identifiers: usize,
}

impl Default for ObfuscationConfig {
    fn default() -> Self {
        Self {
            threshold: 0.6,
            min_identifiers: 16,
        }
    }
}

impl ObfuscationConfig {
    fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(format!(
                "obfuscation.threshold ({}) must be within [0, 1]",
                self.threshold
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoringConfig {
    /// Confidence at or above which a comparison is reported as changed.
    ///
    /// Payloads whose normalized texts hash the same are never changed, so
    /// `0.0` reports every other difference, however small.
    pub change_threshold: f64,

    /// Multiplier applied to structural confidence for obfuscated payloads
    pub obfuscation_damping: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            change_threshold: 0.05,
            obfuscation_damping: 0.7,
        }
    }
}

impl ScoringConfig {
    fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.change_threshold) {
            return Err(format!(
                "scoring.change_threshold ({}) must be within [0, 1]",
                self.change_threshold
            ));
        }
        if !(self.obfuscation_damping > 0.0 && self.obfuscation_damping <= 1.0) {
            return Err(format!(
                "scoring.obfuscation_damping ({}) must be within (0, 1]",
                self.obfuscation_damping
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DiffLimits {
    /// Payloads above this size are not handed to the parser
    pub max_parse_bytes: usize,

    /// Largest LCS table (rows * cols) built before switching to greedy matching
    pub max_alignment_cells: usize,
}

impl Default for DiffLimits {
    fn default() -> Self {
        Self {
            max_parse_bytes: 8 * 1024 * 1024,
            max_alignment_cells: 4_000_000,
        }
    }
}

impl DiffLimits {
    fn validate(&self) -> Result<(), String> {
        if self.max_parse_bytes == 0 {
            return Err("limits.max_parse_bytes must be > 0".to_string());
        }
        if self.max_alignment_cells == 0 {
            return Err("limits.max_alignment_cells must be > 0".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReadableConfig {
    /// Re-emit parsed payloads one statement per line
    pub enabled: bool,

    /// Resolve escapes, `atob`, `fromCharCode` and constant concatenation
    pub decode_strings: bool,

    /// Spaces per nesting level
    pub indent_width: usize,
}

impl Default for ReadableConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            decode_strings: true,
            indent_width: 2,
        }
    }
}

impl ReadableConfig {
    fn validate(&self) -> Result<(), String> {
        if self.indent_width > 8 {
            return Err(format!(
                "readable.indent_width ({}) must be at most 8",
                self.indent_width
            ));
        }
        Ok(())
    }
}

/// Output format of the rendered diff artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactFormat {
    #[default]
    Html,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RenderConfig {
    pub format: ArtifactFormat,

    /// Unchanged lines shown around each change region
    pub context_lines: usize,

    /// Lines longer than this are cut for display
    pub max_line_chars: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            format: ArtifactFormat::Html,
            context_lines: 3,
            max_line_chars: 2_000,
        }
    }
}

impl RenderConfig {
    fn validate(&self) -> Result<(), String> {
        if self.max_line_chars == 0 {
            return Err("render.max_line_chars must be > 0".to_string());
        }
        Ok(())
    }
}
