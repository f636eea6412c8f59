use crate::lcs::align;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineTag {
    Equal,
    Added,
    Removed,
}

/// Contiguous run of lines sharing one tag (0-based line indices)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRun {
    pub tag: LineTag,
    pub old_start: usize,
    pub new_start: usize,
    pub len: usize,
}

/// Line-level diff between two normalized texts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineDiff {
    pub runs: Vec<LineRun>,
    pub added: usize,
    pub removed: usize,
    pub matched: usize,
    pub old_lines: usize,
    pub new_lines: usize,
    /// Matched lines divided by the line count of the longer side
    pub similarity: f64,
}

impl LineDiff {
    pub fn is_identical(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

/// Compute the LCS line diff of `old` against `new`.
pub fn diff_lines(old: &str, new: &str, max_cells: usize) -> LineDiff {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    let pairs = align(&old_lines, &new_lines, max_cells);

    let mut runs: Vec<LineRun> = Vec::new();
    let mut push = |tag: LineTag, old_start: usize, new_start: usize, len: usize| {
        if len == 0 {
            return;
        }
        if let Some(last) = runs.last_mut() {
            if last.tag == tag {
                last.len += len;
                return;
            }
        }
        runs.push(LineRun {
            tag,
            old_start,
            new_start,
            len,
        });
    };

    let (mut i, mut j) = (0usize, 0usize);
    for &(pi, pj) in pairs
        .iter()
        .chain(std::iter::once(&(old_lines.len(), new_lines.len())))
    {
        push(LineTag::Removed, i, j, pi - i);
        push(LineTag::Added, pi, j, pj - j);
        if pi < old_lines.len() && pj < new_lines.len() {
            push(LineTag::Equal, pi, pj, 1);
        }
        i = pi + 1;
        j = pj + 1;
    }

    let matched = pairs.len();
    let removed = old_lines.len() - matched;
    let added = new_lines.len() - matched;
    let longest = old_lines.len().max(new_lines.len());
    let similarity = if longest == 0 {
        1.0
    } else {
        matched as f64 / longest as f64
    };

    LineDiff {
        runs,
        added,
        removed,
        matched,
        old_lines: old_lines.len(),
        new_lines: new_lines.len(),
        similarity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CELLS: usize = 1_000_000;

    #[test]
    fn identical_texts() {
        let diff = diff_lines("a\nb", "a\nb", CELLS);
        assert!(diff.is_identical());
        assert_eq!(diff.similarity, 1.0);
        assert_eq!(
            diff.runs,
            vec![LineRun {
                tag: LineTag::Equal,
                old_start: 0,
                new_start: 0,
                len: 2
            }]
        );
    }

    #[test]
    fn one_added_line() {
        let diff = diff_lines("a\nb\nc", "a\nb\nx\nc", CELLS);
        assert_eq!(diff.added, 1);
        assert_eq!(diff.removed, 0);
        assert_eq!(diff.similarity, 0.75);
        assert_eq!(
            diff.runs,
            vec![
                LineRun {
                    tag: LineTag::Equal,
                    old_start: 0,
                    new_start: 0,
                    len: 2
                },
                LineRun {
                    tag: LineTag::Added,
                    old_start: 2,
                    new_start: 2,
                    len: 1
                },
                LineRun {
                    tag: LineTag::Equal,
                    old_start: 2,
                    new_start: 3,
                    len: 1
                },
            ]
        );
    }

    #[test]
    fn replaced_line_is_removed_then_added() {
        let diff = diff_lines("a\nb\nc", "a\nB\nc", CELLS);
        let tags: Vec<_> = diff.runs.iter().map(|r| r.tag).collect();
        assert_eq!(
            tags,
            vec![
                LineTag::Equal,
                LineTag::Removed,
                LineTag::Added,
                LineTag::Equal
            ]
        );
        assert!((diff.similarity - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn empty_inputs() {
        assert_eq!(diff_lines("", "", CELLS).similarity, 1.0);
        let diff = diff_lines("", "a\nb", CELLS);
        assert_eq!(diff.added, 2);
        assert_eq!(diff.similarity, 0.0);
    }
}
