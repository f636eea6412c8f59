//! Self-contained diff artifacts (HTML or JSON).

use crate::config::{ArtifactFormat, RenderConfig};
use crate::engine::{Comparison, Strategy};
use crate::error::Result;
use crate::hash::sha256_hex;
use crate::line_diff::{LineDiff, LineTag};
use crate::obfuscation::ObfuscationTechnique;
use crate::readable::DecodeStats;
use crate::structural::StructuralDelta;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::ops::Range;

pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
pub const JSON_CONTENT_TYPE: &str = "application/json";

const STYLE: &str = "body{font-family:system-ui,Segoe UI,Helvetica,Arial,sans-serif;margin:24px;line-height:1.45}\
table{border-collapse:collapse}td,th{padding:4px 8px;border:1px solid #ddd;text-align:left}\
.diff{font-family:ui-monospace,Menlo,Consolas,monospace;font-size:12px;width:100%}\
.diff td{border:none;padding:0 6px;white-space:pre-wrap;word-break:break-all}\
.diff td.no{color:#888;text-align:right;user-select:none;width:1%}\
tr.add{background:#e6ffec}tr.del{background:#ffebe9}\
.hunk{margin:18px 0;border:1px solid #ddd;border-radius:6px}\
.hunk h3{margin:0;padding:6px 10px;background:#f6f8fa;font-size:13px}\
.nav{float:right;font-weight:400}.nav a{margin-left:8px}\
.flag{padding:8px 12px;border-radius:6px;display:inline-block;margin:6px 0 12px;font-weight:700}\
.changed{background:#fee2e2;color:#991b1b}.unchanged{background:#dcfce7;color:#166534}";

/// Rendered artifact bytes plus their MIME type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedArtifact {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl RenderedArtifact {
    /// SHA-256 hex of the artifact bytes
    pub fn content_hash(&self) -> String {
        sha256_hex(&self.bytes)
    }

    pub fn file_extension(&self) -> &'static str {
        if self.content_type.starts_with("application/json") {
            "json"
        } else {
            "html"
        }
    }
}

/// One display row of the unified view (line numbers are 1-based)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct DisplayLine<'a> {
    tag: LineTag,
    #[serde(skip_serializing_if = "Option::is_none")]
    old: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    new: Option<usize>,
    text: Cow<'a, str>,
}

#[derive(Debug, Serialize)]
struct HunkView<'a> {
    id: String,
    header: String,
    lines: &'a [DisplayLine<'a>],
}

#[derive(Serialize)]
struct JsonArtifact<'a> {
    strategy: Strategy,
    changed: bool,
    confidence: f64,
    stats: crate::engine::DiffStats,
    line_similarity: f64,
    lines_added: usize,
    lines_removed: usize,
    obfuscated: bool,
    obfuscation_score: f64,
    techniques: Vec<ObfuscationTechnique>,
    #[serde(skip_serializing_if = "Option::is_none")]
    decoded_old: Option<DecodeStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    decoded_new: Option<DecodeStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    structural: Option<&'a StructuralDelta>,
    hunks: Vec<HunkView<'a>>,
}

/// Pure function of a comparison and the two normalized texts.
pub struct DiffRenderer {
    config: RenderConfig,
}

impl DiffRenderer {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn render(
        &self,
        comparison: &Comparison,
        old_text: &str,
        new_text: &str,
    ) -> Result<RenderedArtifact> {
        let lines = display_lines(&comparison.lines, old_text, new_text, self.config.max_line_chars);
        let ranges = hunk_ranges(&lines, self.config.context_lines);

        match self.config.format {
            ArtifactFormat::Html => Ok(RenderedArtifact {
                content_type: HTML_CONTENT_TYPE.to_string(),
                bytes: render_html(comparison, &lines, &ranges).into_bytes(),
            }),
            ArtifactFormat::Json => {
                let artifact = JsonArtifact {
                    strategy: comparison.strategy,
                    changed: comparison.score.changed,
                    confidence: comparison.score.confidence,
                    stats: comparison.stats,
                    line_similarity: comparison.lines.similarity,
                    lines_added: comparison.lines.added,
                    lines_removed: comparison.lines.removed,
                    obfuscated: comparison.obfuscated,
                    obfuscation_score: comparison.obfuscation_score(),
                    techniques: comparison.techniques(),
                    decoded_old: comparison.old.decoded,
                    decoded_new: comparison.new.decoded,
                    structural: comparison.structural.as_ref(),
                    hunks: hunk_views(&lines, &ranges),
                };
                Ok(RenderedArtifact {
                    content_type: JSON_CONTENT_TYPE.to_string(),
                    bytes: serde_json::to_vec_pretty(&artifact)?,
                })
            }
        }
    }
}

fn display_lines<'a>(
    diff: &LineDiff,
    old_text: &'a str,
    new_text: &'a str,
    max_chars: usize,
) -> Vec<DisplayLine<'a>> {
    let old_lines: Vec<&str> = old_text.lines().collect();
    let new_lines: Vec<&str> = new_text.lines().collect();
    let mut out = Vec::with_capacity(diff.old_lines.max(diff.new_lines));

    for run in &diff.runs {
        for k in 0..run.len {
            let (old, new, text) = match run.tag {
                LineTag::Equal => (
                    Some(run.old_start + k + 1),
                    Some(run.new_start + k + 1),
                    old_lines.get(run.old_start + k),
                ),
                LineTag::Removed => (
                    Some(run.old_start + k + 1),
                    None,
                    old_lines.get(run.old_start + k),
                ),
                LineTag::Added => (
                    None,
                    Some(run.new_start + k + 1),
                    new_lines.get(run.new_start + k),
                ),
            };
            out.push(DisplayLine {
                tag: run.tag,
                old,
                new,
                text: truncate(text.copied().unwrap_or_default(), max_chars),
            });
        }
    }
    out
}

fn truncate(line: &str, max_chars: usize) -> Cow<'_, str> {
    match line.char_indices().nth(max_chars) {
        None => Cow::Borrowed(line),
        Some((cut, _)) => {
            let hidden = line[cut..].chars().count();
            Cow::Owned(format!("{} [+{hidden} chars]", &line[..cut]))
        }
    }
}

/// Change regions widened by `context` lines; overlapping regions merge.
fn hunk_ranges(lines: &[DisplayLine<'_>], context: usize) -> Vec<Range<usize>> {
    let mut ranges: Vec<Range<usize>> = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        if line.tag == LineTag::Equal {
            continue;
        }
        let start = idx.saturating_sub(context);
        let end = (idx + context + 1).min(lines.len());
        match ranges.last_mut() {
            Some(last) if start <= last.end => last.end = last.end.max(end),
            _ => ranges.push(start..end),
        }
    }
    ranges
}

fn hunk_header(lines: &[DisplayLine<'_>]) -> String {
    let old: Vec<usize> = lines.iter().filter_map(|l| l.old).collect();
    let new: Vec<usize> = lines.iter().filter_map(|l| l.new).collect();
    let side = |numbers: &[usize]| match numbers.first() {
        Some(first) => format!("{first},{}", numbers.len()),
        None => "0,0".to_string(),
    };
    format!("@@ -{} +{} @@", side(&old), side(&new))
}

fn hunk_views<'a>(lines: &'a [DisplayLine<'a>], ranges: &[Range<usize>]) -> Vec<HunkView<'a>> {
    ranges
        .iter()
        .enumerate()
        .map(|(n, range)| {
            let slice = &lines[range.clone()];
            HunkView {
                id: format!("change-{}", n + 1),
                header: hunk_header(slice),
                lines: slice,
            }
        })
        .collect()
}

fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn render_html(comparison: &Comparison, lines: &[DisplayLine<'_>], ranges: &[Range<usize>]) -> String {
    let mut s = String::new();
    s.push_str("<!doctype html>\n<html><head><meta charset=\"utf-8\">");
    s.push_str("<title>scriptwatch diff</title><style>");
    s.push_str(STYLE);
    s.push_str("</style></head><body>");
    s.push_str("<h1>scriptwatch diff</h1>");

    let (label, class) = if comparison.score.changed {
        ("changed", "changed")
    } else {
        ("unchanged", "unchanged")
    };
    s.push_str(&format!(
        "<div class=\"flag {class}\">{label} (confidence {:.3})</div>",
        comparison.score.confidence
    ));

    let strategy = match comparison.strategy {
        Strategy::Structural => "structural",
        Strategy::Fallback => "fallback",
    };
    let techniques = comparison
        .techniques()
        .iter()
        .map(|t| format!("{t:?}"))
        .collect::<Vec<_>>()
        .join(", ");

    let decoded = match (comparison.old.decoded, comparison.new.decoded) {
        (None, None) => None,
        (old, new) => Some(format!(
            "old {}, new {}",
            old.map_or(0, |d| d.total()),
            new.map_or(0, |d| d.total())
        )),
    };

    s.push_str("<h2>Summary</h2><table>");
    for (k, v) in [
        ("strategy", strategy.to_string()),
        ("added", comparison.stats.added.to_string()),
        ("removed", comparison.stats.removed.to_string()),
        ("modified", comparison.stats.modified.to_string()),
        ("lines added", comparison.lines.added.to_string()),
        ("lines removed", comparison.lines.removed.to_string()),
        ("line similarity", format!("{:.3}", comparison.lines.similarity)),
        ("obfuscated", comparison.obfuscated.to_string()),
        ("obfuscation score", format!("{:.3}", comparison.obfuscation_score())),
        ("techniques", techniques),
    ]
    .into_iter()
    .chain(decoded.map(|v| ("decoded strings", v)))
    {
        s.push_str("<tr><th>");
        s.push_str(k);
        s.push_str("</th><td>");
        s.push_str(&html_escape(&v));
        s.push_str("</td></tr>");
    }
    s.push_str("</table>");

    if let Some(delta) = &comparison.structural {
        if !delta.by_kind.is_empty() {
            s.push_str("<h2>Node kinds</h2><table><tr><th>kind</th><th>added</th><th>removed</th><th>modified</th></tr>");
            for (kind, counts) in &delta.by_kind {
                s.push_str(&format!(
                    "<tr><td><code>{}</code></td><td>{}</td><td>{}</td><td>{}</td></tr>",
                    html_escape(kind),
                    counts.added,
                    counts.removed,
                    counts.modified
                ));
            }
            s.push_str("</table>");
        }
    }

    let views = hunk_views(lines, ranges);
    s.push_str("<h2>Changes</h2>");
    if views.is_empty() {
        s.push_str("<p>No line differences after normalization.</p>");
    } else {
        s.push_str("<ol class=\"toc\">");
        for view in &views {
            s.push_str(&format!(
                "<li><a href=\"#{}\">{}</a></li>",
                view.id,
                html_escape(&view.header)
            ));
        }
        s.push_str("</ol>");
    }

    for (n, view) in views.iter().enumerate() {
        s.push_str(&format!("<div class=\"hunk\" id=\"{}\"><h3>", view.id));
        s.push_str(&html_escape(&view.header));
        s.push_str("<span class=\"nav\">");
        if n > 0 {
            s.push_str(&format!("<a href=\"#change-{n}\">prev</a>"));
        }
        if n + 1 < views.len() {
            s.push_str(&format!("<a href=\"#change-{}\">next</a>", n + 2));
        }
        s.push_str("</span></h3><table class=\"diff\">");
        for line in view.lines {
            let (class, marker) = match line.tag {
                LineTag::Equal => ("eq", ' '),
                LineTag::Added => ("add", '+'),
                LineTag::Removed => ("del", '-'),
            };
            s.push_str(&format!(
                "<tr class=\"{class}\"><td class=\"no\">{}</td><td class=\"no\">{}</td><td>{marker} {}</td></tr>",
                line.old.map(|n| n.to_string()).unwrap_or_default(),
                line.new.map(|n| n.to_string()).unwrap_or_default(),
                html_escape(&line.text)
            ));
        }
        s.push_str("</table></div>");
    }

    s.push_str("</body></html>\n");
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line_diff::diff_lines;

    fn lines_for<'a>(old: &'a str, new: &'a str) -> Vec<DisplayLine<'a>> {
        let diff = diff_lines(old, new, 1_000_000);
        display_lines(&diff, old, new, 2_000)
    }

    #[test]
    fn display_lines_carry_numbers() {
        let lines = lines_for("a\nb\nc", "a\nx\nc");
        let rows: Vec<(LineTag, Option<usize>, Option<usize>)> =
            lines.iter().map(|l| (l.tag, l.old, l.new)).collect();
        assert_eq!(
            rows,
            vec![
                (LineTag::Equal, Some(1), Some(1)),
                (LineTag::Removed, Some(2), None),
                (LineTag::Added, None, Some(2)),
                (LineTag::Equal, Some(3), Some(3)),
            ]
        );
        assert_eq!(lines[1].text, "b");
        assert_eq!(lines[2].text, "x");
    }

    #[test]
    fn distant_changes_form_separate_hunks() {
        let old: Vec<String> = (0..30).map(|i| format!("line{i}")).collect();
        let mut new = old.clone();
        new[2] = "changed-early".to_string();
        new[25] = "changed-late".to_string();
        let (old, new) = (old.join("\n"), new.join("\n"));
        let lines = lines_for(&old, &new);

        let ranges = hunk_ranges(&lines, 3);
        assert_eq!(ranges.len(), 2);
        assert_eq!(hunk_header(&lines[ranges[0].clone()]), "@@ -1,6 +1,6 @@");

        let merged = hunk_ranges(&lines, 20);
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn long_lines_are_truncated_on_char_boundary() {
        let line = "é".repeat(10);
        assert_eq!(truncate(&line, 4), format!("{} [+6 chars]", "é".repeat(4)));
        assert_eq!(truncate("short", 10), "short");
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(
            html_escape("<script>\"x\" & 'y'</script>"),
            "&lt;script&gt;&quot;x&quot; &amp; &#39;y&#39;&lt;/script&gt;"
        );
    }
}
