//! Statistical minification/obfuscation estimate.
//!
//! The score never decides whether a payload changed. It tells the structural
//! differ to ignore names and literal values, and the scorer to damp the
//! structural confidence.

use crate::config::ObfuscationConfig;
use crate::error::{DiffError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

const WEIGHT_NAME_LENGTH: f64 = 0.3;
const WEIGHT_SINGLE_LETTER: f64 = 0.3;
const WEIGHT_LINE_LENGTH: f64 = 0.2;
const WEIGHT_STRING_RATIO: f64 = 0.1;
const WEIGHT_ESCAPES: f64 = 0.1;

/// Average identifier length at or below which the name signal saturates
const SHORT_NAME_LEN: f64 = 1.0;
/// Average identifier length at or above which the name signal is zero
const READABLE_NAME_LEN: f64 = 6.0;
const READABLE_LINE_LEN: f64 = 80.0;
const MINIFIED_LINE_LEN: f64 = 500.0;
const NORMAL_STRING_RATIO: f64 = 0.3;
const STRING_TABLE_RATIO: f64 = 0.7;

const KEYWORDS: &[&str] = &[
    "async", "await", "break", "case", "catch", "class", "const", "continue", "debugger",
    "default", "delete", "do", "else", "export", "extends", "false", "finally", "for", "from",
    "function", "get", "if", "import", "in", "instanceof", "let", "new", "null", "of", "return",
    "set", "static", "super", "switch", "this", "throw", "true", "try", "typeof", "undefined",
    "var", "void", "while", "with", "yield",
];

const TECHNIQUES: &[(ObfuscationTechnique, &str)] = &[
    (ObfuscationTechnique::HexEscapes, r"\\x[0-9a-fA-F]{2}"),
    (ObfuscationTechnique::UnicodeEscapes, r"\\u[0-9a-fA-F]{4}"),
    (ObfuscationTechnique::Eval, r"\beval\s*\("),
    (ObfuscationTechnique::Atob, r"\batob\s*\("),
    (ObfuscationTechnique::FromCharCode, r"String\.fromCharCode"),
    (ObfuscationTechnique::Packer, r"eval\(function\(p,a,c,k,e,[dr]\)"),
    (ObfuscationTechnique::JsFuckRun, r"[\[\]()!+]{10,}"),
];

/// Recognizable obfuscation technique found in a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObfuscationTechnique {
    HexEscapes,
    UnicodeEscapes,
    Eval,
    Atob,
    FromCharCode,
    Packer,
    JsFuckRun,
}

/// Raw measurements behind the score
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObfuscationSignals {
    pub identifier_count: usize,
    pub avg_identifier_len: f64,
    pub single_letter_ratio: f64,
    pub avg_line_len: f64,
    pub string_literal_ratio: f64,
    pub escape_density: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObfuscationReport {
    pub score: f64,
    pub likely_obfuscated: bool,
    pub signals: ObfuscationSignals,
    pub techniques: Vec<ObfuscationTechnique>,
}

pub struct ObfuscationHeuristic {
    config: ObfuscationConfig,
    string_literal: Regex,
    comment: Regex,
    identifier: Regex,
    escape: Regex,
    techniques: Vec<(ObfuscationTechnique, Regex)>,
}

fn compile(name: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|source| DiffError::InvalidRule {
        name: name.to_string(),
        source,
    })
}

impl ObfuscationHeuristic {
    pub fn new(config: &ObfuscationConfig) -> Result<Self> {
        let mut techniques = Vec::with_capacity(TECHNIQUES.len());
        for (technique, pattern) in TECHNIQUES {
            techniques.push((*technique, compile("obfuscation_technique", pattern)?));
        }
        Ok(Self {
            config: config.clone(),
            string_literal: compile(
                "string_literal",
                r#""(?:[^"\\\n]|\\.)*"|'(?:[^'\\\n]|\\.)*'|`(?:[^`\\]|\\[\s\S])*`"#,
            )?,
            comment: compile("comment", r"(?m)//[^\n]*$|/\*[\s\S]*?\*/")?,
            identifier: compile("identifier", r"(?:^|[^A-Za-z0-9_$])([A-Za-z_$][A-Za-z0-9_$]*)")?,
            escape: compile("escape", r"\\x[0-9a-fA-F]{2}|\\u[0-9a-fA-F]{4}")?,
            techniques,
        })
    }

    /// Score a normalized payload.
    pub fn assess(&self, text: &str) -> ObfuscationReport {
        if text.trim().is_empty() {
            return ObfuscationReport::default();
        }

        let mut string_chars = 0usize;
        let mut escape_chars = 0usize;
        for literal in self.string_literal.find_iter(text) {
            string_chars += literal.len();
            escape_chars += self
                .escape
                .find_iter(literal.as_str())
                .map(|m| m.len())
                .sum::<usize>();
        }

        let code_only = self.string_literal.replace_all(text, " ");
        let code_only = self.comment.replace_all(&code_only, " ");
        let identifiers: Vec<&str> = self
            .identifier
            .captures_iter(&code_only)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .filter(|name| !KEYWORDS.contains(name))
            .collect();

        let identifier_count = identifiers.len();
        let (avg_identifier_len, single_letter_ratio) = if identifier_count == 0 {
            (0.0, 0.0)
        } else {
            let total_len: usize = identifiers.iter().map(|name| name.len()).sum();
            let single = identifiers.iter().filter(|name| name.len() == 1).count();
            (
                total_len as f64 / identifier_count as f64,
                single as f64 / identifier_count as f64,
            )
        };

        let (line_chars, line_count) = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .fold((0usize, 0usize), |(chars, count), line| {
                (chars + line.len(), count + 1)
            });
        let avg_line_len = if line_count == 0 {
            0.0
        } else {
            line_chars as f64 / line_count as f64
        };

        let string_literal_ratio = string_chars as f64 / text.len() as f64;
        let escape_density = if string_chars == 0 {
            0.0
        } else {
            escape_chars as f64 / string_chars as f64
        };

        let signals = ObfuscationSignals {
            identifier_count,
            avg_identifier_len,
            single_letter_ratio,
            avg_line_len,
            string_literal_ratio,
            escape_density,
        };
        let score = self.score(&signals);
        let techniques = self
            .techniques
            .iter()
            .filter(|(_, regex)| regex.is_match(text))
            .map(|(technique, _)| *technique)
            .collect();

        ObfuscationReport {
            score,
            likely_obfuscated: score >= self.config.threshold,
            signals,
            techniques,
        }
    }

    fn score(&self, signals: &ObfuscationSignals) -> f64 {
        let mut score = 0.0;
        if signals.identifier_count >= self.config.min_identifiers.max(1) {
            let name_length = ramp(
                READABLE_NAME_LEN - signals.avg_identifier_len,
                0.0,
                READABLE_NAME_LEN - SHORT_NAME_LEN,
            );
            score += WEIGHT_NAME_LENGTH * name_length;
            score += WEIGHT_SINGLE_LETTER * signals.single_letter_ratio;
        }
        score += WEIGHT_LINE_LENGTH
            * ramp(signals.avg_line_len, READABLE_LINE_LEN, MINIFIED_LINE_LEN);
        score += WEIGHT_STRING_RATIO
            * ramp(
                signals.string_literal_ratio,
                NORMAL_STRING_RATIO,
                STRING_TABLE_RATIO,
            );
        score += WEIGHT_ESCAPES * (signals.escape_density * 2.0).clamp(0.0, 1.0);
        score.clamp(0.0, 1.0)
    }
}

/// Linear ramp: 0 at or below `low`, 1 at or above `high`
fn ramp(value: f64, low: f64, high: f64) -> f64 {
    ((value - low) / (high - low)).clamp(0.0, 1.0)
}
