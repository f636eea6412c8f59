//! Fingerprint-based tree comparison.

use crate::lcs::align;
use crate::parser::{NodeClass, SyntaxTree};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// What goes into a subtree fingerprint besides kinds and shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintMode {
    /// Identifier names and literal values are hashed
    WithValues,
    /// Only node kinds and tree shape; used for obfuscated payloads
    ShapeOnly,
}

impl FingerprintMode {
    pub fn for_obfuscation(likely_obfuscated: bool) -> Self {
        if likely_obfuscated {
            Self::ShapeOnly
        } else {
            Self::WithValues
        }
    }

    fn hashes_value(self, class: NodeClass) -> bool {
        match self {
            Self::WithValues => matches!(class, NodeClass::Identifier | NodeClass::Literal),
            Self::ShapeOnly => false,
        }
    }
}

/// Per-kind breakdown of a structural delta
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindDelta {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralDelta {
    pub added_nodes: usize,
    pub removed_nodes: usize,
    pub modified_nodes: usize,
    pub by_kind: BTreeMap<String, KindDelta>,
    /// Node count of the previous tree
    pub total_nodes: usize,
    /// Node count of the current tree
    pub total_nodes_current: usize,
}

impl StructuralDelta {
    pub fn is_empty(&self) -> bool {
        self.added_nodes == 0 && self.removed_nodes == 0 && self.modified_nodes == 0
    }

    pub fn changed_nodes(&self) -> usize {
        self.added_nodes + self.removed_nodes + self.modified_nodes
    }

    fn kind(&mut self, kind: &str) -> &mut KindDelta {
        self.by_kind.entry(kind.to_string()).or_default()
    }
}

/// Fingerprints and subtree sizes, indexed like the tree's nodes
struct Fingerprints {
    hashes: Vec<u64>,
    sizes: Vec<usize>,
}

impl Fingerprints {
    fn compute(tree: &SyntaxTree, mode: FingerprintMode) -> Self {
        let len = tree.len();
        let mut hashes = vec![0u64; len];
        let mut sizes = vec![1usize; len];

        // Children always have larger indices, so a reverse sweep is bottom-up.
        for id in (0..len).rev() {
            let node = tree.node(id);
            let mut hasher = blake3::Hasher::new();
            hasher.update(node.kind.as_bytes());
            hasher.update(&[0]);
            if mode.hashes_value(node.class) {
                if let Some(text) = node.text.as_deref() {
                    hasher.update(text.as_bytes());
                }
                hasher.update(&[0]);
            }
            for &child in &node.children {
                hasher.update(&hashes[child].to_le_bytes());
                sizes[id] += sizes[child];
            }
            let mut head = [0u8; 8];
            head.copy_from_slice(&hasher.finalize().as_bytes()[..8]);
            hashes[id] = u64::from_le_bytes(head);
        }

        Self { hashes, sizes }
    }
}

/// Compare `old` against `new`.
///
/// Equal subtrees are skipped without descending into them. Traversal uses an
/// explicit work stack so nesting depth is unbounded.
pub fn diff_trees(
    old: &SyntaxTree,
    new: &SyntaxTree,
    mode: FingerprintMode,
    max_alignment_cells: usize,
) -> StructuralDelta {
    let mut delta = StructuralDelta {
        total_nodes: old.len(),
        total_nodes_current: new.len(),
        ..StructuralDelta::default()
    };
    if old.is_empty() || new.is_empty() {
        if !old.is_empty() {
            count_removed(old, SyntaxTree::ROOT, old.len(), &mut delta);
        }
        if !new.is_empty() {
            count_added(new, SyntaxTree::ROOT, new.len(), &mut delta);
        }
        return delta;
    }

    let old_fp = Fingerprints::compute(old, mode);
    let new_fp = Fingerprints::compute(new, mode);

    let mut work: Vec<(usize, usize)> = vec![(SyntaxTree::ROOT, SyntaxTree::ROOT)];
    while let Some((a, b)) = work.pop() {
        if old_fp.hashes[a] == new_fp.hashes[b] {
            continue;
        }
        let old_node = old.node(a);
        let new_node = new.node(b);

        if old_node.kind != new_node.kind {
            count_removed(old, a, old_fp.sizes[a], &mut delta);
            count_added(new, b, new_fp.sizes[b], &mut delta);
            continue;
        }
        if old_node.is_leaf() && new_node.is_leaf() {
            delta.modified_nodes += 1;
            delta.kind(old_node.kind).modified += 1;
            continue;
        }

        let old_children: Vec<u64> = old_node.children.iter().map(|&c| old_fp.hashes[c]).collect();
        let new_children: Vec<u64> = new_node.children.iter().map(|&c| new_fp.hashes[c]).collect();
        let pairs = align(&old_children, &new_children, max_alignment_cells);

        let moved = find_moves(&old_children, &new_children, &pairs);
        if !moved.old.is_empty() {
            delta.modified_nodes += 1;
            delta.kind(old_node.kind).modified += 1;
        }

        let (mut i, mut j) = (0usize, 0usize);
        for &(pi, pj) in pairs
            .iter()
            .chain(std::iter::once(&(old_children.len(), new_children.len())))
        {
            let gap_old: Vec<usize> = (i..pi).filter(|k| !moved.old.contains(k)).collect();
            let gap_new: Vec<usize> = (j..pj).filter(|k| !moved.new.contains(k)).collect();

            for (slot, &ok) in gap_old.iter().enumerate() {
                let oc = old_node.children[ok];
                match gap_new.get(slot) {
                    Some(&nk) => {
                        let nc = new_node.children[nk];
                        if old.node(oc).kind == new.node(nc).kind {
                            work.push((oc, nc));
                        } else {
                            count_removed(old, oc, old_fp.sizes[oc], &mut delta);
                            count_added(new, nc, new_fp.sizes[nc], &mut delta);
                        }
                    }
                    None => count_removed(old, oc, old_fp.sizes[oc], &mut delta),
                }
            }
            for &nk in gap_new.iter().skip(gap_old.len()) {
                let nc = new_node.children[nk];
                count_added(new, nc, new_fp.sizes[nc], &mut delta);
            }

            i = pi + 1;
            j = pj + 1;
        }
    }

    delta
}

/// Unaligned children with identical fingerprints on both sides (reorders)
struct Moves {
    old: HashSet<usize>,
    new: HashSet<usize>,
}

fn find_moves(old: &[u64], new: &[u64], pairs: &[(usize, usize)]) -> Moves {
    let matched_old: HashSet<usize> = pairs.iter().map(|&(i, _)| i).collect();
    let matched_new: HashSet<usize> = pairs.iter().map(|&(_, j)| j).collect();

    let mut candidates: HashMap<u64, VecDeque<usize>> = HashMap::new();
    for (j, hash) in new.iter().enumerate() {
        if !matched_new.contains(&j) {
            candidates.entry(*hash).or_default().push_back(j);
        }
    }

    let mut moves = Moves {
        old: HashSet::new(),
        new: HashSet::new(),
    };
    for (i, hash) in old.iter().enumerate() {
        if matched_old.contains(&i) {
            continue;
        }
        if let Some(j) = candidates.get_mut(hash).and_then(VecDeque::pop_front) {
            moves.old.insert(i);
            moves.new.insert(j);
        }
    }
    moves
}

// Pre-order storage keeps every subtree contiguous: `root..root + size`.
fn count_removed(tree: &SyntaxTree, root: usize, size: usize, delta: &mut StructuralDelta) {
    delta.removed_nodes += size;
    for id in root..root + size {
        delta.kind(tree.node(id).kind).removed += 1;
    }
}

fn count_added(tree: &SyntaxTree, root: usize, size: usize, delta: &mut StructuralDelta) {
    delta.added_nodes += size;
    for id in root..root + size {
        delta.kind(tree.node(id).kind).added += 1;
    }
}
