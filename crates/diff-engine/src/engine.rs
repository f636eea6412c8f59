use crate::config::EngineConfig;
use crate::error::{DiffError, Result};
use crate::hash::sha256_hex;
use crate::line_diff::{diff_lines, LineDiff};
use crate::normalizer::{ContentHint, Normalized, Normalizer};
use crate::obfuscation::{ObfuscationHeuristic, ObfuscationReport, ObfuscationTechnique};
use crate::parser::{ParseFailure, ParseOutcome, ScriptParser};
use crate::readable::{DecodeStats, ReadableText};
use crate::renderer::{DiffRenderer, RenderedArtifact};
use crate::scorer::{ChangeScore, ConfidenceScorer, ScoreInputs};
use crate::structural::{diff_trees, FingerprintMode, StructuralDelta};
use serde::{Deserialize, Serialize};

/// Comparison strategy that produced the score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Structural,
    Fallback,
}

/// Headline counts: nodes for structural comparisons, lines for fallback ones
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
}

/// One payload after normalization, parsing and obfuscation assessment
#[derive(Debug, Clone)]
pub struct PreparedPayload {
    pub hint: ContentHint,
    pub normalized: Normalized,
    /// SHA-256 hex of the normalized text
    pub normalized_hash: String,
    pub parse: ParseOutcome,
    pub obfuscation: ObfuscationReport,
    /// Decoded, one-statement-per-line form; present only when the payload parsed
    pub readable: Option<ReadableText>,
}

impl PreparedPayload {
    pub fn text(&self) -> &str {
        &self.normalized.text
    }
}

/// Texts the line diff and the renderer work on: the readable forms when both
/// sides have one, the normalized texts otherwise.
fn line_texts<'a>(old: &'a PreparedPayload, new: &'a PreparedPayload) -> (&'a str, &'a str) {
    match (&old.readable, &new.readable) {
        (Some(old), Some(new)) => (&old.text, &new.text),
        _ => (old.text(), new.text()),
    }
}

/// Diagnostics kept for one side of a comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SideSummary {
    pub normalized_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_failure: Option<ParseFailure>,
    pub obfuscation: ObfuscationReport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoded: Option<DecodeStats>,
}

impl From<&PreparedPayload> for SideSummary {
    fn from(payload: &PreparedPayload) -> Self {
        Self {
            normalized_hash: payload.normalized_hash.clone(),
            parse_failure: payload.parse.failure().cloned(),
            obfuscation: payload.obfuscation.clone(),
            decoded: payload.readable.as_ref().map(|readable| readable.decoded),
        }
    }
}

/// Diff output before scoring
#[derive(Debug, Clone, PartialEq)]
pub struct DiffResult {
    pub strategy: Strategy,
    /// Present only when both sides parsed
    pub structural: Option<StructuralDelta>,
    pub lines: LineDiff,
    pub obfuscated: bool,
}

/// Complete, scored comparison of two payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub strategy: Strategy,
    pub score: ChangeScore,
    pub stats: DiffStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structural: Option<StructuralDelta>,
    pub lines: LineDiff,
    pub obfuscated: bool,
    pub old: SideSummary,
    pub new: SideSummary,
}

impl Comparison {
    /// Higher of the two sides' obfuscation scores
    pub fn obfuscation_score(&self) -> f64 {
        self.old.obfuscation.score.max(self.new.obfuscation.score)
    }

    /// Techniques seen on either side, without duplicates
    pub fn techniques(&self) -> Vec<ObfuscationTechnique> {
        let mut out: Vec<ObfuscationTechnique> = Vec::new();
        for technique in self
            .old
            .obfuscation
            .techniques
            .iter()
            .chain(self.new.obfuscation.techniques.iter())
        {
            if !out.contains(technique) {
                out.push(*technique);
            }
        }
        out
    }
}

/// Comparison plus its rendered artifact
#[derive(Debug, Clone)]
pub struct DiffOutcome {
    pub comparison: Comparison,
    pub artifact: RenderedArtifact,
}

/// Normalize, parse, diff, score and render pairs of payloads.
///
/// Every stage is exposed separately so callers can report progress between
/// them; [`DiffEngine::compare_raw`] runs the whole pipeline.
pub struct DiffEngine {
    config: EngineConfig,
    normalizer: Normalizer,
    obfuscation: ObfuscationHeuristic,
    scorer: ConfidenceScorer,
    renderer: DiffRenderer,
}

impl DiffEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate().map_err(DiffError::invalid_config)?;
        Ok(Self {
            normalizer: Normalizer::new(&config.normalizer)?,
            obfuscation: ObfuscationHeuristic::new(&config.obfuscation)?,
            scorer: ConfidenceScorer::new(&config.scoring),
            renderer: DiffRenderer::new(&config.render),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn normalize(&self, raw: &str, hint: ContentHint) -> Normalized {
        self.normalizer.normalize(raw, hint)
    }

    /// Parse and assess an already normalized payload.
    pub fn analyze(&self, normalized: Normalized, hint: ContentHint) -> Result<PreparedPayload> {
        // tree-sitter parsers are stateful; one per payload keeps the engine shareable
        let mut parser = ScriptParser::new(&self.config.limits)?;
        let (parse, readable) = parser.parse_readable(&normalized.text, hint, &self.config.readable);
        let obfuscation = self.obfuscation.assess(&normalized.text);
        if let Some(decoded) = readable.as_ref().map(|r| r.decoded).filter(|d| d.total() > 0) {
            log::debug!("Decoded {} string expressions: {decoded:?}", decoded.total());
        }
        Ok(PreparedPayload {
            hint,
            normalized_hash: sha256_hex(normalized.text.as_bytes()),
            normalized,
            parse,
            obfuscation,
            readable,
        })
    }

    pub fn prepare(&self, raw: &str, hint: ContentHint) -> Result<PreparedPayload> {
        let normalized = self.normalize(raw, hint);
        self.analyze(normalized, hint)
    }

    /// Pick the strategy and run the differs. The line diff always runs.
    pub fn diff(&self, old: &PreparedPayload, new: &PreparedPayload) -> DiffResult {
        let obfuscated = old.obfuscation.likely_obfuscated || new.obfuscation.likely_obfuscated;
        let (old_text, new_text) = line_texts(old, new);
        let lines = diff_lines(old_text, new_text, self.config.limits.max_alignment_cells);

        let (strategy, structural) = match (&old.parse, &new.parse) {
            (ParseOutcome::Parsed(old_tree), ParseOutcome::Parsed(new_tree)) => {
                let delta = diff_trees(
                    old_tree,
                    new_tree,
                    FingerprintMode::for_obfuscation(obfuscated),
                    self.config.limits.max_alignment_cells,
                );
                (Strategy::Structural, Some(delta))
            }
            (old_parse, new_parse) => {
                if let Some(failure) = old_parse.failure().or(new_parse.failure()) {
                    log::debug!("Falling back to line diff: {failure}");
                }
                (Strategy::Fallback, None)
            }
        };

        DiffResult {
            strategy,
            structural,
            lines,
            obfuscated,
        }
    }

    pub fn score(&self, old: &PreparedPayload, new: &PreparedPayload, diff: DiffResult) -> Comparison {
        let score: ChangeScore = self.scorer.score(ScoreInputs {
            structural: diff.structural.as_ref(),
            line_similarity: diff.lines.similarity,
            hashes_equal: old.normalized_hash == new.normalized_hash,
            obfuscated: diff.obfuscated,
        });

        let stats = match &diff.structural {
            Some(delta) => DiffStats {
                added: delta.added_nodes,
                removed: delta.removed_nodes,
                modified: delta.modified_nodes,
            },
            None => DiffStats {
                added: diff.lines.added,
                removed: diff.lines.removed,
                modified: 0,
            },
        };

        Comparison {
            strategy: diff.strategy,
            score,
            stats,
            structural: diff.structural,
            lines: diff.lines,
            obfuscated: diff.obfuscated,
            old: SideSummary::from(old),
            new: SideSummary::from(new),
        }
    }

    pub fn compare(&self, old: &PreparedPayload, new: &PreparedPayload) -> Comparison {
        let diff = self.diff(old, new);
        self.score(old, new, diff)
    }

    pub fn render(
        &self,
        comparison: &Comparison,
        old: &PreparedPayload,
        new: &PreparedPayload,
    ) -> Result<RenderedArtifact> {
        let (old_text, new_text) = line_texts(old, new);
        self.renderer.render(comparison, old_text, new_text)
    }

    /// Run the whole pipeline on two raw payloads.
    pub fn compare_raw(&self, old_raw: &str, new_raw: &str, hint: ContentHint) -> Result<DiffOutcome> {
        let old = self.prepare(old_raw, hint)?;
        let new = self.prepare(new_raw, hint)?;
        let comparison = self.compare(&old, &new);
        let artifact = self.render(&comparison, &old, &new)?;
        Ok(DiffOutcome {
            comparison,
            artifact,
        })
    }
}
