//! Readable form of a parsed payload: constant strings decoded and folded,
//! one statement per line.
//!
//! Only the line view and the rendered artifact use this text. Hashes and
//! the structural comparison keep working on the normalized text.

use crate::config::ReadableConfig;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tree_sitter::Node;

/// Nodes whose statements are printed on their own, indented lines
const CONTAINER_KINDS: &[&str] = &["statement_block", "class_body", "switch_body"];
/// `case x:` / `default:` headers followed by statements
const CASE_KINDS: &[&str] = &["switch_case", "switch_default"];
const COMMENT_KIND: &str = "comment";

/// Longest string a folded expression may produce
const MAX_FOLDED_CHARS: usize = 16 * 1024;

/// What the decoding pass resolved in one payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeStats {
    /// `\xNN` escapes turned into printable characters
    pub hex_escapes: usize,
    /// `\uNNNN` and `\u{N}` escapes turned into printable characters
    pub unicode_escapes: usize,
    /// `atob("...")` calls with a constant argument
    pub base64_strings: usize,
    /// `decodeURIComponent("...")` / `unescape("...")` calls
    pub url_encoded_strings: usize,
    /// `String.fromCharCode(...)` calls with numeric arguments
    pub char_code_calls: usize,
    /// `"a" + "b"` operations folded into one literal
    pub concatenations: usize,
}

impl DecodeStats {
    pub fn total(&self) -> usize {
        self.hex_escapes
            + self.unicode_escapes
            + self.base64_strings
            + self.url_encoded_strings
            + self.char_code_calls
            + self.concatenations
    }

    fn add(&mut self, other: &DecodeStats) {
        self.hex_escapes += other.hex_escapes;
        self.unicode_escapes += other.unicode_escapes;
        self.base64_strings += other.base64_strings;
        self.url_encoded_strings += other.url_encoded_strings;
        self.char_code_calls += other.char_code_calls;
        self.concatenations += other.concatenations;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadableText {
    pub text: String,
    pub decoded: DecodeStats,
}

struct FlatNode<'t> {
    node: Node<'t>,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// Pre-order copy of the tree; every child has a larger index than its parent.
fn flatten(root: Node<'_>) -> Vec<FlatNode<'_>> {
    let mut flat: Vec<FlatNode<'_>> = Vec::new();
    let mut stack = vec![(root, None)];
    while let Some((node, parent)) = stack.pop() {
        let id = flat.len();
        flat.push(FlatNode {
            node,
            parent,
            children: Vec::new(),
        });
        if let Some(parent) = parent {
            flat[parent].children.push(id);
        }
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
        for child in children.into_iter().rev() {
            stack.push((child, Some(id)));
        }
    }
    flat
}

fn source_of<'s>(node: Node<'_>, source: &'s str) -> &'s str {
    source.get(node.start_byte()..node.end_byte()).unwrap_or_default()
}

pub(crate) fn readable_text(root: Node<'_>, source: &str, config: &ReadableConfig) -> ReadableText {
    let flat = flatten(root);
    let (replacements, decoded) = if config.decode_strings {
        fold_constants(&flat, source)
    } else {
        (HashMap::new(), DecodeStats::default())
    };

    // Nodes that must be walked instead of copied verbatim
    let mut descend = vec![false; flat.len()];
    for i in (0..flat.len()).rev() {
        let kind = flat[i].node.kind();
        if CONTAINER_KINDS.contains(&kind)
            || CASE_KINDS.contains(&kind)
            || replacements.contains_key(&i)
        {
            descend[i] = true;
        }
        if descend[i] {
            if let Some(parent) = flat[i].parent {
                descend[parent] = true;
            }
        }
    }

    let mut printer = Printer::new(source, config.indent_width);
    let mut stack: Vec<Step> = flat
        .first()
        .map(|root| root.children.iter().rev().map(|&c| Step::Statement(c, 0)).collect())
        .unwrap_or_default();

    while let Some(step) = stack.pop() {
        match step {
            Step::Statement(i, depth) => {
                printer.flush();
                stack.push(Step::Inline(i, depth));
            }
            Step::Close(i, depth) => {
                printer.flush();
                printer.copy(flat[i].node, depth);
            }
            Step::Inline(i, depth) => {
                let node = flat[i].node;
                if let Some(text) = replacements.get(&i) {
                    printer.append(text, node.start_byte(), node.end_byte(), depth);
                    continue;
                }
                if !descend[i] {
                    printer.copy(node, depth);
                    continue;
                }

                let kind = node.kind();
                let children = &flat[i].children;
                let mut steps = Vec::with_capacity(children.len());
                if CONTAINER_KINDS.contains(&kind) {
                    for &c in children {
                        let child = flat[c].node;
                        steps.push(match child.kind() {
                            "{" => Step::Inline(c, depth),
                            "}" => Step::Close(c, depth),
                            _ if child.is_named() => Step::Statement(c, depth + 1),
                            _ => Step::Inline(c, depth + 1),
                        });
                    }
                } else if CASE_KINDS.contains(&kind) {
                    let mut in_body = false;
                    for &c in children {
                        let child = flat[c].node;
                        steps.push(if in_body && child.is_named() {
                            Step::Statement(c, depth + 1)
                        } else {
                            Step::Inline(c, depth)
                        });
                        if child.kind() == ":" {
                            in_body = true;
                        }
                    }
                } else {
                    for &c in children {
                        if flat[c].node.kind() != COMMENT_KIND {
                            steps.push(Step::Inline(c, depth));
                        }
                    }
                }
                stack.extend(steps.into_iter().rev());
            }
        }
    }
    printer.flush();

    ReadableText {
        text: printer.out,
        decoded,
    }
}

#[derive(Debug, Clone, Copy)]
enum Step {
    /// Start a new line at this depth, then print the node
    Statement(usize, usize),
    /// Print the node on the current line
    Inline(usize, usize),
    /// Closing brace of a container, on its own line
    Close(usize, usize),
}

struct Printer<'s> {
    source: &'s str,
    indent_width: usize,
    out: String,
    line: String,
    line_depth: usize,
    last_end: usize,
}

impl<'s> Printer<'s> {
    fn new(source: &'s str, indent_width: usize) -> Self {
        Self {
            source,
            indent_width,
            out: String::with_capacity(source.len() + source.len() / 4),
            line: String::new(),
            line_depth: 0,
            last_end: 0,
        }
    }

    fn copy(&mut self, node: Node<'_>, depth: usize) {
        let text = source_of(node, self.source);
        self.append(text, node.start_byte(), node.end_byte(), depth);
    }

    /// Tokens that were apart in the source stay one space apart.
    fn append(&mut self, text: &str, start: usize, end: usize, depth: usize) {
        if self.line.is_empty() {
            self.line_depth = depth;
        } else if start > self.last_end {
            self.line.push(' ');
        }
        self.line.push_str(text);
        self.last_end = end;
    }

    fn flush(&mut self) {
        let trimmed = self.line.trim_end();
        if !trimmed.is_empty() {
            self.out
                .push_str(&" ".repeat(self.line_depth * self.indent_width));
            self.out.push_str(trimmed);
            self.out.push('\n');
        }
        self.line.clear();
    }
}

/// Constant string value of an expression node
#[derive(Debug, Clone)]
struct Constant {
    value: String,
    /// Produced by decoding or folding, so worth printing in place of the source
    decoded: bool,
    /// Work done by this node alone, excluding its operands
    gain: DecodeStats,
}

/// Pick the outermost decoded constants and render them as literals.
fn fold_constants(flat: &[FlatNode<'_>], source: &str) -> (HashMap<usize, String>, DecodeStats) {
    let index: HashMap<usize, usize> = flat
        .iter()
        .enumerate()
        .map(|(i, f)| (f.node.id(), i))
        .collect();

    let mut constants: Vec<Option<Constant>> = vec![None; flat.len()];
    for i in (0..flat.len()).rev() {
        let constant = constant_of(i, flat, &index, &constants, source);
        constants[i] = constant;
    }

    let mut replacements = HashMap::new();
    let mut stats = DecodeStats::default();
    // Inside a replaced subtree
    let mut covered = vec![false; flat.len()];
    for i in 0..flat.len() {
        let inherited = flat[i].parent.is_some_and(|p| covered[p]);
        covered[i] = inherited;
        let Some(constant) = &constants[i] else {
            continue;
        };
        if inherited {
            stats.add(&constant.gain);
        } else if constant.decoded {
            replacements.insert(i, quote_js(&constant.value));
            stats.add(&constant.gain);
            covered[i] = true;
        }
    }
    (replacements, stats)
}

fn constant_of(
    i: usize,
    flat: &[FlatNode<'_>],
    index: &HashMap<usize, usize>,
    constants: &[Option<Constant>],
    source: &str,
) -> Option<Constant> {
    let node = flat[i].node;
    let of = |child: Node<'_>| {
        index
            .get(&child.id())
            .and_then(|&j| constants[j].as_ref())
    };
    let operands = |parent: usize| -> Vec<usize> {
        flat[parent]
            .children
            .iter()
            .copied()
            .filter(|&c| flat[c].node.is_named() && flat[c].node.kind() != COMMENT_KIND)
            .collect()
    };

    match node.kind() {
        "string" => decode_string(i, flat, source),
        "parenthesized_expression" => match operands(i).as_slice() {
            [inner] => constants[*inner].as_ref().map(|c| Constant {
                value: c.value.clone(),
                decoded: c.decoded,
                gain: DecodeStats::default(),
            }),
            _ => None,
        },
        "binary_expression" => {
            if node.child_by_field_name("operator")?.kind() != "+" {
                return None;
            }
            let left = of(node.child_by_field_name("left")?)?;
            let right = of(node.child_by_field_name("right")?)?;
            if left.value.len() + right.value.len() > MAX_FOLDED_CHARS {
                return None;
            }
            Some(Constant {
                value: format!("{}{}", left.value, right.value),
                decoded: true,
                gain: DecodeStats {
                    concatenations: 1,
                    ..DecodeStats::default()
                },
            })
        }
        "call_expression" => {
            let callee: String = source_of(node.child_by_field_name("function")?, source)
                .split_whitespace()
                .collect();
            let arguments = index.get(&node.child_by_field_name("arguments")?.id())?;
            let args = operands(*arguments);
            let single = || match args.as_slice() {
                [arg] => constants[*arg].as_ref(),
                _ => None,
            };

            let (value, gain) = match callee.as_str() {
                "String.fromCharCode" => (
                    from_char_codes(&args, flat, source)?,
                    DecodeStats {
                        char_code_calls: 1,
                        ..DecodeStats::default()
                    },
                ),
                "atob" | "window.atob" => {
                    let bytes = STANDARD.decode(single()?.value.as_bytes()).ok()?;
                    (
                        String::from_utf8(bytes).ok()?,
                        DecodeStats {
                            base64_strings: 1,
                            ..DecodeStats::default()
                        },
                    )
                }
                "decodeURIComponent" | "unescape" => (
                    percent_decode_utf8(&single()?.value)?,
                    DecodeStats {
                        url_encoded_strings: 1,
                        ..DecodeStats::default()
                    },
                ),
                _ => return None,
            };
            (value.len() <= MAX_FOLDED_CHARS).then_some(Constant {
                value,
                decoded: true,
                gain,
            })
        }
        _ => None,
    }
}

fn decode_string(i: usize, flat: &[FlatNode<'_>], source: &str) -> Option<Constant> {
    let mut value = String::new();
    let mut gain = DecodeStats::default();
    for &c in &flat[i].children {
        let child = flat[c].node;
        match child.kind() {
            "\"" | "'" => {}
            "string_fragment" => value.push_str(source_of(child, source)),
            "escape_sequence" => {
                let (decoded, kind) = decode_escape(source_of(child, source))?;
                let printable = !decoded.chars().any(char::is_control);
                match kind {
                    EscapeKind::Hex if printable => gain.hex_escapes += 1,
                    EscapeKind::Unicode if printable => gain.unicode_escapes += 1,
                    _ => {}
                }
                value.push_str(&decoded);
            }
            _ => return None,
        }
    }
    Some(Constant {
        value,
        decoded: gain.total() > 0,
        gain,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EscapeKind {
    Hex,
    Unicode,
    Simple,
}

/// Decode one JavaScript escape sequence (including its backslash).
fn decode_escape(sequence: &str) -> Option<(String, EscapeKind)> {
    let body = sequence.strip_prefix('\\')?;
    let mut chars = body.chars();
    let first = chars.next()?;
    let rest = chars.as_str();

    let code_point = |hex: &str| u32::from_str_radix(hex, 16).ok().and_then(char::from_u32);
    match first {
        'x' if rest.len() == 2 => Some((code_point(rest)?.to_string(), EscapeKind::Hex)),
        'u' => {
            let hex = match rest.strip_prefix('{') {
                Some(braced) => braced.strip_suffix('}')?,
                None if rest.len() == 4 => rest,
                None => return None,
            };
            Some((code_point(hex)?.to_string(), EscapeKind::Unicode))
        }
        'n' => Some(("\n".into(), EscapeKind::Simple)),
        'r' => Some(("\r".into(), EscapeKind::Simple)),
        't' => Some(("\t".into(), EscapeKind::Simple)),
        'b' => Some(("\u{8}".into(), EscapeKind::Simple)),
        'f' => Some(("\u{c}".into(), EscapeKind::Simple)),
        'v' => Some(("\u{b}".into(), EscapeKind::Simple)),
        '0' if rest.is_empty() => Some(("\0".into(), EscapeKind::Simple)),
        // Line continuation
        '\r' | '\n' | '\u{2028}' | '\u{2029}' => Some((String::new(), EscapeKind::Simple)),
        c if rest.is_empty() && !c.is_ascii_digit() => Some((c.to_string(), EscapeKind::Simple)),
        _ => None,
    }
}

fn from_char_codes(args: &[usize], flat: &[FlatNode<'_>], source: &str) -> Option<String> {
    if args.is_empty() {
        return None;
    }
    let mut units = Vec::with_capacity(args.len());
    for &arg in args {
        let node = flat[arg].node;
        if node.kind() != "number" {
            return None;
        }
        let text = source_of(node, source);
        let number = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => text.parse::<u32>().ok()?,
        };
        // ToUint16
        units.push((number & 0xFFFF) as u16);
    }
    String::from_utf16(&units).ok()
}

fn percent_decode_utf8(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hi = (*bytes.get(i + 1)? as char).to_digit(16)? as u8;
                let lo = (*bytes.get(i + 2)? as char).to_digit(16)? as u8;
                out.push((hi << 4) | lo);
                i += 3;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(out).ok()
}

/// Double-quoted JavaScript literal for `value`.
fn quote_js(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() || c == '\u{2028}' || c == '\u{2029}' => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tree_sitter::Parser;

    fn readable_with(source: &str, config: &ReadableConfig) -> ReadableText {
        let language: tree_sitter::Language = tree_sitter_javascript::LANGUAGE.into();
        let mut parser = Parser::new();
        parser.set_language(&language).unwrap();
        let tree = parser.parse(source, None).unwrap();
        assert!(!tree.root_node().has_error(), "test input must parse");
        readable_text(tree.root_node(), source, config)
    }

    fn readable(source: &str) -> ReadableText {
        readable_with(source, &ReadableConfig::default())
    }

    #[test]
    fn one_statement_per_line() {
        let out = readable("var a=1;function f(x){if(x){return a;}else{g();}return 0;}f(2);");
        assert_eq!(
            out.text,
            "var a=1;\n\
             function f(x){\n  if(x){\n    return a;\n  }else{\n    g();\n  }\n  return 0;\n}\n\
             f(2);\n"
        );
        assert_eq!(out.decoded, DecodeStats::default());
    }

    #[test]
    fn source_spacing_is_kept_within_a_line() {
        let out = readable("if (ready) {\n      start(1, 2);\n}");
        assert_eq!(out.text, "if (ready) {\n  start(1, 2);\n}\n");
    }

    #[test]
    fn callbacks_and_switch_cases_are_split() {
        let out = readable("on(function(){a();b();});switch(k){case 1:x();break;default:y();}");
        assert_eq!(
            out.text,
            "on(function(){\n  a();\n  b();\n});\n\
             switch(k){\n  case 1:\n    x();\n    break;\n  default:\n    y();\n}\n"
        );
    }

    #[test]
    fn decodes_and_folds_string_expressions() {
        let out = readable(
            r#"var u="\x68\x74\x74\x70"+"s://"+String.fromCharCode(101,118,105,108)+atob("LmNvbQ==");"#,
        );
        assert_eq!(out.text, "var u=\"https://evil.com\";\n");
        assert_eq!(
            out.decoded,
            DecodeStats {
                hex_escapes: 4,
                char_code_calls: 1,
                base64_strings: 1,
                concatenations: 3,
                ..DecodeStats::default()
            }
        );
    }

    #[test]
    fn url_and_unicode_escapes() {
        let out = readable(r#"x(decodeURIComponent("a%20b"),'\u0041\u{1F600}');"#);
        assert_eq!(out.text, "x(\"a b\",\"A\u{1F600}\");\n");
        assert_eq!(out.decoded.url_encoded_strings, 1);
        assert_eq!(out.decoded.unicode_escapes, 2);
    }

    #[test]
    fn plain_and_dynamic_strings_are_left_alone() {
        let source = "var s='it\\'s'+name;var t=\"a\\nb\";";
        let out = readable(source);
        assert_eq!(out.text, "var s='it\\'s'+name;\nvar t=\"a\\nb\";\n");
        assert_eq!(out.decoded.total(), 0);
    }

    #[test]
    fn decoding_can_be_disabled() {
        let config = ReadableConfig {
            decode_strings: false,
            ..ReadableConfig::default()
        };
        let out = readable_with(r#"a("\x41");b();"#, &config);
        assert_eq!(out.text, "a(\"\\x41\");\nb();\n");
        assert_eq!(out.decoded.total(), 0);
    }

    #[test]
    fn deeply_nested_functions_do_not_overflow() {
        let depth = 500;
        let source = format!("{}x();{}", "function f(){".repeat(depth), "}".repeat(depth));
        let out = readable(&source);
        assert_eq!(out.text.lines().count(), 2 * depth + 1);
    }

    #[test]
    fn quoting_escapes_controls() {
        assert_eq!(quote_js("a\"b\\c\n\u{1}"), "\"a\\\"b\\\\c\\n\\u0001\"");
    }
}
