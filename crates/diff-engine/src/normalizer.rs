//! Noise stripping applied to every payload before comparison.
//!
//! The output is only ever used for comparison and hashing; the raw payload
//! stays the canonical stored content.

use crate::config::{CustomRule, NoiseCategory, NormalizerConfig, RuleScope};
use crate::error::{DiffError, Result};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

const TIMESTAMP_PLACEHOLDER: &str = "__TIMESTAMP__";
const EPOCH_PLACEHOLDER: &str = "__EPOCH__";
const HASH_PLACEHOLDER: &str = "__HASH__";
const SEMVER_PLACEHOLDER: &str = "__SEMVER__";

const ISO_8601_PATTERN: &str =
    r"\b\d{4}-\d{2}-\d{2}(?:[T ]\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?(?:Z|[+-]\d{2}:?\d{2})?)?";
// Seconds (10 digits) or milliseconds (13 digits) between 2001 and 2033.
const EPOCH_PATTERN: &str = r"\b1(?:\d{12}|\d{9})\b";
const CACHE_BUSTER_PATTERN: &str = r"(?P<lead>[?&])(?:v|t|_|ver|bust|cb)=[\w.\-]*(?:&(?:v|t|_|ver|bust|cb)=[\w.\-]*)*(?P<tail>&)?";
const ASSET_HASH_PATTERN: &str = r"(?P<sep>[./_\-=~])(?P<hex>[0-9a-fA-F]{8,})\b";
const SEMVER_PATTERN: &str = r"\b\d+\.\d+\.\d+\b";
const STRING_LITERAL_PATTERN: &str =
    r#""(?:[^"\\\n]|\\.)*"|'(?:[^'\\\n]|\\.)*'|`(?:[^`\\]|\\[\s\S])*`"#;

/// Kind of payload, derived from the response content type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentHint {
    #[default]
    JavaScript,
    Json,
    Other,
}

impl ContentHint {
    /// Classify a `Content-Type` header value.
    ///
    /// Missing or generic types are assumed to be scripts: plenty of CDNs serve
    /// bundles as `text/plain` or `application/octet-stream`.
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let Some(raw) = content_type else {
            return Self::JavaScript;
        };
        let mime = raw
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if mime.contains("javascript") || mime.contains("ecmascript") {
            Self::JavaScript
        } else if mime.contains("json") {
            Self::Json
        } else if mime.starts_with("text/html")
            || mime.starts_with("text/css")
            || mime.contains("xml")
            || mime.starts_with("image/")
            || mime.starts_with("font/")
        {
            Self::Other
        } else {
            Self::JavaScript
        }
    }

    pub fn is_script(self) -> bool {
        matches!(self, Self::JavaScript)
    }
}

/// Number of tokens removed for one noise category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedTokens {
    pub category: NoiseCategory,
    pub count: usize,
}

/// Normalized text plus what was stripped from it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Normalized {
    pub text: String,
    pub removed: Vec<RemovedTokens>,
}

impl Normalized {
    pub fn removed_count(&self, category: NoiseCategory) -> usize {
        self.removed
            .iter()
            .find(|r| r.category == category)
            .map_or(0, |r| r.count)
    }
}

enum Replacement {
    Fixed(&'static str),
    CacheBuster,
    AssetHash,
    Template(String),
}

struct Rule {
    category: NoiseCategory,
    regex: Regex,
    replacement: Replacement,
    scope: RuleScope,
}

impl Rule {
    fn compile(
        name: &str,
        category: NoiseCategory,
        pattern: &str,
        replacement: Replacement,
        scope: RuleScope,
    ) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|source| DiffError::InvalidRule {
            name: name.to_string(),
            source,
        })?;
        Ok(Self {
            category,
            regex,
            replacement,
            scope,
        })
    }

    fn custom(rule: &CustomRule) -> Result<Self> {
        Self::compile(
            &rule.name,
            NoiseCategory::Custom,
            &rule.pattern,
            Replacement::Template(rule.replacement.clone()),
            rule.scope,
        )
    }

    /// Apply to `text`, returning the rewritten text and the number of replacements.
    fn apply<'t>(&self, text: &'t str) -> (Cow<'t, str>, usize) {
        let mut count = 0usize;
        let rewritten = self.regex.replace_all(text, |caps: &Captures| {
            let whole = &caps[0];
            let replaced = match &self.replacement {
                Replacement::Fixed(placeholder) => Some((*placeholder).to_string()),
                Replacement::CacheBuster => {
                    let start = caps.get(0).map_or(0, |m| m.start());
                    // `\?v=1` is an escaped character, not a query string
                    if start > 0 && text.as_bytes()[start - 1] == b'\\' {
                        None
                    } else if caps.name("tail").is_some() {
                        Some(caps["lead"].to_string())
                    } else {
                        Some(String::new())
                    }
                }
                Replacement::AssetHash => {
                    let hex = &caps["hex"];
                    let has_digit = hex.bytes().any(|b| b.is_ascii_digit());
                    let has_alpha = hex.bytes().any(|b| b.is_ascii_alphabetic());
                    (has_digit && has_alpha).then(|| format!("{}{HASH_PLACEHOLDER}", &caps["sep"]))
                }
                Replacement::Template(template) => {
                    let mut dst = String::new();
                    caps.expand(template, &mut dst);
                    Some(dst)
                }
            };
            match replaced {
                Some(value) => {
                    if value != whole {
                        count += 1;
                    }
                    value
                }
                None => whole.to_string(),
            }
        });
        (rewritten, count)
    }
}

/// Deterministic, stateless text normalizer
pub struct Normalizer {
    trim_lines: bool,
    collapse_blank_lines: bool,
    rules: Vec<Rule>,
    string_literal: Regex,
}

impl Normalizer {
    /// Build the rule set from configuration
    pub fn new(config: &NormalizerConfig) -> Result<Self> {
        let builtin: [(&str, NoiseCategory, &str, Replacement, RuleScope); 5] = [
            (
                "iso_8601",
                NoiseCategory::Timestamp,
                ISO_8601_PATTERN,
                Replacement::Fixed(TIMESTAMP_PLACEHOLDER),
                RuleScope::Anywhere,
            ),
            (
                "epoch",
                NoiseCategory::EpochTimestamp,
                EPOCH_PATTERN,
                Replacement::Fixed(EPOCH_PLACEHOLDER),
                RuleScope::Anywhere,
            ),
            (
                "cache_buster",
                NoiseCategory::CacheBuster,
                CACHE_BUSTER_PATTERN,
                Replacement::CacheBuster,
                RuleScope::StringLiterals,
            ),
            (
                "asset_hash",
                NoiseCategory::AssetHash,
                ASSET_HASH_PATTERN,
                Replacement::AssetHash,
                RuleScope::StringLiterals,
            ),
            (
                "semver",
                NoiseCategory::SemVer,
                SEMVER_PATTERN,
                Replacement::Fixed(SEMVER_PLACEHOLDER),
                RuleScope::Anywhere,
            ),
        ];

        let mut rules = Vec::new();
        for (name, category, pattern, replacement, scope) in builtin {
            if config.is_enabled(category) {
                rules.push(Rule::compile(name, category, pattern, replacement, scope)?);
            }
        }
        for custom in &config.extra_rules {
            rules.push(Rule::custom(custom)?);
        }

        let string_literal = Regex::new(STRING_LITERAL_PATTERN).map_err(|source| {
            DiffError::InvalidRule {
                name: "string_literal".to_string(),
                source,
            }
        })?;

        Ok(Self {
            trim_lines: config.is_enabled(NoiseCategory::Whitespace),
            collapse_blank_lines: config.is_enabled(NoiseCategory::BlankLines),
            rules,
            string_literal,
        })
    }

    /// Normalize a payload.
    pub fn normalize(&self, raw: &str, hint: ContentHint) -> Normalized {
        let mut counts: BTreeMap<NoiseCategory, usize> = BTreeMap::new();

        let mut text = self.normalize_whitespace(raw, &mut counts);
        for rule in &self.rules {
            let (rewritten, count) = match rule.scope {
                RuleScope::StringLiterals if hint.is_script() => self.apply_in_literals(&text, rule),
                _ => {
                    let (rewritten, count) = rule.apply(&text);
                    (rewritten.into_owned(), count)
                }
            };
            if count > 0 {
                *counts.entry(rule.category).or_default() += count;
                text = rewritten;
            }
        }
        // Custom rules may delete whole tokens and leave dangling whitespace behind.
        let text = self.normalize_whitespace(&text, &mut counts);

        let removed = counts
            .into_iter()
            .map(|(category, count)| RemovedTokens { category, count })
            .collect();
        Normalized { text, removed }
    }

    fn normalize_whitespace(
        &self,
        text: &str,
        counts: &mut BTreeMap<NoiseCategory, usize>,
    ) -> String {
        if !self.trim_lines && !self.collapse_blank_lines {
            return text.to_string();
        }

        let mut out: Vec<&str> = Vec::new();
        let mut trimmed = 0usize;
        let mut dropped_blank = 0usize;
        for line in text.split('\n') {
            let line = if self.trim_lines {
                let t = line.trim();
                if t.len() != line.len() {
                    trimmed += 1;
                }
                t
            } else {
                line
            };

            if self.collapse_blank_lines && line.trim().is_empty() {
                let previous_blank = out.last().map_or(true, |prev| prev.trim().is_empty());
                if previous_blank {
                    dropped_blank += 1;
                    continue;
                }
            }
            out.push(line);
        }
        if self.collapse_blank_lines {
            while out.last().is_some_and(|line| line.trim().is_empty()) {
                out.pop();
                dropped_blank += 1;
            }
        }

        if trimmed > 0 {
            *counts.entry(NoiseCategory::Whitespace).or_default() += trimmed;
        }
        if dropped_blank > 0 {
            *counts.entry(NoiseCategory::BlankLines).or_default() += dropped_blank;
        }
        out.join("\n")
    }

    fn apply_in_literals(&self, text: &str, rule: &Rule) -> (String, usize) {
        let mut out = String::with_capacity(text.len());
        let mut last = 0usize;
        let mut total = 0usize;
        for literal in self.string_literal.find_iter(text) {
            out.push_str(&text[last..literal.start()]);
            let lit = literal.as_str();
            // Quotes are single ASCII bytes.
            let inner = &lit[1..lit.len() - 1];
            let (rewritten, count) = rule.apply(inner);
            total += count;
            out.push_str(&lit[..1]);
            out.push_str(&rewritten);
            out.push_str(&lit[lit.len() - 1..]);
            last = literal.end();
        }
        out.push_str(&text[last..]);
        (out, total)
    }
}
