//! Longest-common-subsequence alignment shared by the line and tree differs.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Align two sequences, returning matched `(a_index, b_index)` pairs in
/// increasing order.
///
/// The common prefix and suffix are matched directly. The middle section is
/// solved with a full LCS table while `rows * cols <= max_cells`; beyond that
/// a greedy in-order matching is used so memory stays bounded.
pub(crate) fn align<T: Eq + Hash>(a: &[T], b: &[T], max_cells: usize) -> Vec<(usize, usize)> {
    let prefix = a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();

    let mut pairs: Vec<(usize, usize)> = (0..prefix).map(|i| (i, i)).collect();

    let a_mid = &a[prefix..a.len() - suffix];
    let b_mid = &b[prefix..b.len() - suffix];
    if !a_mid.is_empty() && !b_mid.is_empty() {
        let middle = if a_mid.len().saturating_mul(b_mid.len()) <= max_cells {
            lcs_table(a_mid, b_mid)
        } else {
            log::debug!(
                "Alignment of {}x{} exceeds {max_cells} cells, using greedy matching",
                a_mid.len(),
                b_mid.len()
            );
            greedy(a_mid, b_mid)
        };
        pairs.extend(middle.into_iter().map(|(i, j)| (i + prefix, j + prefix)));
    }

    let a_tail = a.len() - suffix;
    let b_tail = b.len() - suffix;
    pairs.extend((0..suffix).map(|k| (a_tail + k, b_tail + k)));
    pairs
}

fn lcs_table<T: Eq>(a: &[T], b: &[T]) -> Vec<(usize, usize)> {
    let cols = b.len() + 1;
    let mut table = vec![0u32; (a.len() + 1) * cols];
    for i in (0..a.len()).rev() {
        for j in (0..b.len()).rev() {
            table[i * cols + j] = if a[i] == b[j] {
                table[(i + 1) * cols + j + 1] + 1
            } else {
                table[(i + 1) * cols + j].max(table[i * cols + j + 1])
            };
        }
    }

    let mut pairs = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            pairs.push((i, j));
            i += 1;
            j += 1;
        } else if table[(i + 1) * cols + j] >= table[i * cols + j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    pairs
}

fn greedy<T: Eq + Hash>(a: &[T], b: &[T]) -> Vec<(usize, usize)> {
    let mut positions: HashMap<&T, VecDeque<usize>> = HashMap::new();
    for (j, item) in b.iter().enumerate() {
        positions.entry(item).or_default().push_back(j);
    }

    let mut pairs = Vec::new();
    let mut next_b = 0usize;
    for (i, item) in a.iter().enumerate() {
        let Some(queue) = positions.get_mut(item) else {
            continue;
        };
        while queue.front().is_some_and(|&j| j < next_b) {
            queue.pop_front();
        }
        if let Some(j) = queue.pop_front() {
            pairs.push((i, j));
            next_b = j + 1;
        }
    }
    pairs
}
