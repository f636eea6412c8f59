use crate::config::ScoringConfig;
use crate::structural::StructuralDelta;
use serde::{Deserialize, Serialize};

/// Which measurement the confidence was derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreBasis {
    /// Normalized texts hash the same
    IdenticalHash,
    /// Share of changed syntax nodes
    Structural,
    /// Line similarity of the normalized texts
    LineSimilarity,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChangeScore {
    pub confidence: f64,
    pub changed: bool,
    pub basis: ScoreBasis,
}

/// Everything the scorer looks at for one comparison
#[derive(Debug, Clone, Copy)]
pub struct ScoreInputs<'a> {
    pub structural: Option<&'a StructuralDelta>,
    pub line_similarity: f64,
    pub hashes_equal: bool,
    pub obfuscated: bool,
}

pub struct ConfidenceScorer {
    config: ScoringConfig,
}

impl ConfidenceScorer {
    pub fn new(config: &ScoringConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn score(&self, inputs: ScoreInputs<'_>) -> ChangeScore {
        let (confidence, basis) = if inputs.hashes_equal {
            (0.0, ScoreBasis::IdenticalHash)
        } else if let Some(delta) = inputs.structural {
            let ratio = delta.changed_nodes() as f64 / delta.total_nodes.max(1) as f64;
            let mut confidence = ratio.clamp(0.0, 1.0);
            if inputs.obfuscated {
                confidence *= self.config.obfuscation_damping;
            }
            (confidence, ScoreBasis::Structural)
        } else {
            (
                (1.0 - inputs.line_similarity).clamp(0.0, 1.0),
                ScoreBasis::LineSimilarity,
            )
        };

        ChangeScore {
            confidence,
            changed: !inputs.hashes_equal && confidence >= self.config.change_threshold,
            basis,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(changed: usize, total: usize) -> StructuralDelta {
        StructuralDelta {
            modified_nodes: changed,
            total_nodes: total,
            total_nodes_current: total,
            ..StructuralDelta::default()
        }
    }

    fn scorer() -> ConfidenceScorer {
        ConfidenceScorer::new(&ScoringConfig::default())
    }

    #[test]
    fn equal_hashes_win() {
        let d = delta(5, 10);
        let score = scorer().score(ScoreInputs {
            structural: Some(&d),
            line_similarity: 0.1,
            hashes_equal: true,
            obfuscated: false,
        });
        assert_eq!(score.confidence, 0.0);
        assert!(!score.changed);
        assert_eq!(score.basis, ScoreBasis::IdenticalHash);
    }

    #[test]
    fn structural_ratio_with_damping() {
        let d = delta(2, 10);
        let plain = scorer().score(ScoreInputs {
            structural: Some(&d),
            line_similarity: 0.0,
            hashes_equal: false,
            obfuscated: false,
        });
        assert!((plain.confidence - 0.2).abs() < 1e-9);
        assert!(plain.changed);
        assert_eq!(plain.basis, ScoreBasis::Structural);

        let damped = scorer().score(ScoreInputs {
            structural: Some(&d),
            line_similarity: 0.0,
            hashes_equal: false,
            obfuscated: true,
        });
        assert!((damped.confidence - 0.14).abs() < 1e-9);
    }

    #[test]
    fn structural_ratio_is_clamped() {
        let d = delta(50, 3);
        let score = scorer().score(ScoreInputs {
            structural: Some(&d),
            line_similarity: 0.0,
            hashes_equal: false,
            obfuscated: false,
        });
        assert_eq!(score.confidence, 1.0);
    }

    #[test]
    fn empty_structural_delta_is_unchanged() {
        let d = delta(0, 40);
        let score = scorer().score(ScoreInputs {
            structural: Some(&d),
            line_similarity: 0.2,
            hashes_equal: false,
            obfuscated: true,
        });
        assert_eq!(score.confidence, 0.0);
        assert!(!score.changed);
    }

    #[test]
    fn line_similarity_fallback() {
        let score = scorer().score(ScoreInputs {
            structural: None,
            line_similarity: 0.75,
            hashes_equal: false,
            obfuscated: false,
        });
        assert!((score.confidence - 0.25).abs() < 1e-9);
        assert!(score.changed);
        assert_eq!(score.basis, ScoreBasis::LineSimilarity);
    }

    #[test]
    fn zero_threshold_reports_any_textual_change() {
        let scorer = ConfidenceScorer::new(&ScoringConfig {
            change_threshold: 0.0,
            ..ScoringConfig::default()
        });
        let untouched = delta(0, 10);
        let score = scorer.score(ScoreInputs {
            structural: Some(&untouched),
            line_similarity: 1.0,
            hashes_equal: false,
            obfuscated: false,
        });
        assert_eq!(score.confidence, 0.0);
        assert!(score.changed);

        let score = scorer.score(ScoreInputs {
            structural: Some(&untouched),
            line_similarity: 1.0,
            hashes_equal: true,
            obfuscated: false,
        });
        assert!(!score.changed);
    }
}
