use crate::config::{DiffLimits, ReadableConfig};
use crate::error::{DiffError, Result};
use crate::normalizer::ContentHint;
use crate::readable::{readable_text, ReadableText};
use serde::{Deserialize, Serialize};
use std::fmt;
use tree_sitter::{Node, Parser, Tree};

/// Node kinds that never take part in a comparison
const COMMENT_KINDS: &[&str] = &["comment", "html_comment", "hash_bang_line"];

/// Leaf kinds whose text is a name chosen by the author (or the minifier)
const IDENTIFIER_KINDS: &[&str] = &[
    "identifier",
    "property_identifier",
    "shorthand_property_identifier",
    "shorthand_property_identifier_pattern",
    "private_property_identifier",
    "statement_identifier",
];

/// Role of a node for fingerprinting purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeClass {
    /// Node with children
    Interior,
    /// Variable/property name
    Identifier,
    /// Number, string fragment, regex body, ...
    Literal,
    /// Keyword, operator or punctuation; fully described by its kind
    Token,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxNode {
    pub kind: &'static str,
    pub class: NodeClass,
    /// Source text, kept for identifiers and literals only
    pub text: Option<Box<str>>,
    pub children: Vec<usize>,
    /// 1-based line of the first byte
    pub line: usize,
}

impl SyntaxNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Owned syntax tree detached from the tree-sitter buffers.
///
/// Nodes are stored in pre-order: index 0 is the root and every child has a
/// larger index than its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxTree {
    nodes: Vec<SyntaxNode>,
}

impl SyntaxTree {
    pub const ROOT: usize = 0;

    pub fn node(&self, id: usize) -> &SyntaxNode {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> &[SyntaxNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn from_tree_sitter(root: Node<'_>, source: &str) -> Self {
        let mut nodes: Vec<SyntaxNode> = Vec::new();
        let mut stack: Vec<(Node<'_>, Option<usize>)> = vec![(root, None)];

        while let Some((node, parent)) = stack.pop() {
            let kind = node.kind();
            if COMMENT_KINDS.contains(&kind) {
                continue;
            }

            let class = classify(node);
            let text = match class {
                NodeClass::Identifier | NodeClass::Literal => source
                    .get(node.start_byte()..node.end_byte())
                    .map(Box::from),
                NodeClass::Interior | NodeClass::Token => None,
            };

            let id = nodes.len();
            nodes.push(SyntaxNode {
                kind,
                class,
                text,
                children: Vec::new(),
                line: node.start_position().row + 1,
            });
            if let Some(parent) = parent {
                nodes[parent].children.push(id);
            }

            if class == NodeClass::Interior {
                let mut cursor = node.walk();
                let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
                // Reversed so the first child is popped (and numbered) first
                for child in children.into_iter().rev() {
                    stack.push((child, Some(id)));
                }
            }
        }

        Self { nodes }
    }
}

fn classify(node: Node<'_>) -> NodeClass {
    if node.child_count() > 0 {
        return NodeClass::Interior;
    }
    if !node.is_named() {
        return NodeClass::Token;
    }
    if IDENTIFIER_KINDS.contains(&node.kind()) {
        NodeClass::Identifier
    } else {
        NodeClass::Literal
    }
}

/// Why a payload could not be turned into a syntax tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ParseFailure {
    /// Nothing left after normalization
    Empty,
    /// First error or missing node reported by the grammar
    Syntax {
        line: usize,
        column: usize,
        near: String,
    },
    /// Payload the parser will not attempt
    Unsupported { detail: String },
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty input"),
            Self::Syntax { line, column, near } => {
                write!(f, "syntax error at {line}:{column} near '{near}'")
            }
            Self::Unsupported { detail } => write!(f, "unsupported input: {detail}"),
        }
    }
}

/// Result of handing a payload to the parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    Parsed(SyntaxTree),
    Failed(ParseFailure),
}

impl ParseOutcome {
    pub fn tree(&self) -> Option<&SyntaxTree> {
        match self {
            Self::Parsed(tree) => Some(tree),
            Self::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&ParseFailure> {
        match self {
            Self::Parsed(_) => None,
            Self::Failed(failure) => Some(failure),
        }
    }
}

/// Syntax-only JavaScript parser (tree-sitter). Nothing is ever evaluated.
pub struct ScriptParser {
    parser: Parser,
    max_bytes: usize,
}

impl ScriptParser {
    pub fn new(limits: &DiffLimits) -> Result<Self> {
        let language: tree_sitter::Language = tree_sitter_javascript::LANGUAGE.into();
        let mut parser = Parser::new();
        parser
            .set_language(&language)
            .map_err(|e| DiffError::tree_sitter(format!("Failed to set language: {e}")))?;
        Ok(Self {
            parser,
            max_bytes: limits.max_parse_bytes,
        })
    }

    /// Parse normalized text.
    pub fn parse(&mut self, text: &str, hint: ContentHint) -> ParseOutcome {
        match self.parse_tree(text, hint) {
            Ok(tree) => ParseOutcome::Parsed(SyntaxTree::from_tree_sitter(tree.root_node(), text)),
            Err(failure) => ParseOutcome::Failed(failure),
        }
    }

    /// Parse normalized text and, when it parses, build its readable form too.
    pub fn parse_readable(
        &mut self,
        text: &str,
        hint: ContentHint,
        config: &ReadableConfig,
    ) -> (ParseOutcome, Option<ReadableText>) {
        match self.parse_tree(text, hint) {
            Ok(tree) => {
                let root = tree.root_node();
                let readable = config
                    .enabled
                    .then(|| readable_text(root, text, config));
                (
                    ParseOutcome::Parsed(SyntaxTree::from_tree_sitter(root, text)),
                    readable,
                )
            }
            Err(failure) => (ParseOutcome::Failed(failure), None),
        }
    }

    fn parse_tree(
        &mut self,
        text: &str,
        hint: ContentHint,
    ) -> std::result::Result<Tree, ParseFailure> {
        if text.trim().is_empty() {
            return Err(ParseFailure::Empty);
        }
        if !hint.is_script() {
            return Err(ParseFailure::Unsupported {
                detail: format!("{hint:?} payload is not parsed as script"),
            });
        }
        if text.len() > self.max_bytes {
            return Err(ParseFailure::Unsupported {
                detail: format!(
                    "payload of {} bytes exceeds parse limit of {} bytes",
                    text.len(),
                    self.max_bytes
                ),
            });
        }
        if text.contains('\0') {
            return Err(ParseFailure::Unsupported {
                detail: "binary payload".to_string(),
            });
        }

        let Some(tree) = self.parser.parse(text, None) else {
            return Err(ParseFailure::Unsupported {
                detail: "parser produced no tree".to_string(),
            });
        };

        let root = tree.root_node();
        if root.has_error() {
            let failure = first_error(root).map_or_else(
                || ParseFailure::Syntax {
                    line: 1,
                    column: 1,
                    near: "ERROR".to_string(),
                },
                |node| ParseFailure::Syntax {
                    line: node.start_position().row + 1,
                    column: node.start_position().column + 1,
                    near: node.kind().to_string(),
                },
            );
            log::debug!("Script parse failed: {failure}");
            return Err(failure);
        }

        Ok(tree)
    }
}

fn first_error(root: Node<'_>) -> Option<Node<'_>> {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            return Some(node);
        }
        if !node.has_error() {
            continue;
        }
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
        for child in children.into_iter().rev() {
            stack.push(child);
        }
    }
    None
}
