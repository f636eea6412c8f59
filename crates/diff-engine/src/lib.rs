//! # Scriptwatch Diff Engine
//!
//! Decides whether two versions of a JavaScript payload differ in a way that
//! matters, and by how much.
//!
//! ## Architecture
//!
//! ```text
//! raw payload (old, new)
//!     │
//!     ├──> Normalizer (timestamps, cache busters, asset hashes, whitespace)
//!     │
//!     ├──> Tree-sitter parse ──> Parsed(tree) | Failed(reason)
//!     │
//!     ├──> Obfuscation heuristic (naming, density, escapes)
//!     │
//!     ├──> Readable view (decoded strings, one statement per line)
//!     │
//!     ├──> Differ
//!     │    ├─> structural: subtree fingerprints + LCS child alignment
//!     │    └─> lines: LCS over readable (or normalized) lines, always computed
//!     │
//!     ├──> Confidence scorer ──> { confidence, changed }
//!     │
//!     └──> Renderer ──> HTML / JSON artifact
//! ```
//!
//! Fetched code is parsed, never evaluated.
//!
//! ## Example
//!
//! ```rust
//! use scriptwatch_diff::{ContentHint, DiffEngine, EngineConfig, Strategy};
//!
//! let engine = DiffEngine::new(EngineConfig::default()).unwrap();
//! let outcome = engine
//!     .compare_raw("var a=1;", "var a=2;", ContentHint::JavaScript)
//!     .unwrap();
//!
//! assert_eq!(outcome.comparison.strategy, Strategy::Structural);
//! assert!(outcome.comparison.score.changed);
//! ```

mod config;
mod engine;
mod error;
mod hash;
mod lcs;
mod line_diff;
mod normalizer;
mod obfuscation;
mod parser;
mod readable;
mod renderer;
mod scorer;
mod structural;

pub use config::{
    ArtifactFormat, CustomRule, DiffLimits, EngineConfig, NoiseCategory, NormalizerConfig,
    ObfuscationConfig, ReadableConfig, RenderConfig, RuleScope, ScoringConfig,
};
pub use engine::{
    Comparison, DiffEngine, DiffOutcome, DiffResult, DiffStats, PreparedPayload, SideSummary,
    Strategy,
};
pub use error::{DiffError, Result};
pub use hash::sha256_hex;
pub use line_diff::{diff_lines, LineDiff, LineRun, LineTag};
pub use normalizer::{ContentHint, Normalized, Normalizer, RemovedTokens};
pub use obfuscation::{
    ObfuscationHeuristic, ObfuscationReport, ObfuscationSignals, ObfuscationTechnique,
};
pub use parser::{NodeClass, ParseFailure, ParseOutcome, ScriptParser, SyntaxNode, SyntaxTree};
pub use readable::{DecodeStats, ReadableText};
pub use renderer::{DiffRenderer, RenderedArtifact, HTML_CONTENT_TYPE, JSON_CONTENT_TYPE};
pub use scorer::{ChangeScore, ConfidenceScorer, ScoreBasis, ScoreInputs};
pub use structural::{diff_trees, FingerprintMode, KindDelta, StructuralDelta};
