//! Diff Engine - structural comparison of two snapshot trees
//!
//! ```text
//! left.children  [a b c d]        LCS alignment per sibling level
//! right.children [a c e d]   →    a=a  REMOVE b  c=c  ADD e  d=d
//! ```
//!
//! Matched pairs are compared for text and style, then recursed into.
//! Cost is O(n·m) per sibling level; long flat lists of look-alike items are
//! the expensive case and are deliberately not special-cased.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::snapshot::*;

/// LCS tie-break when several maximal alignments exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Prefer matching the longest shared prefix
    #[default]
    Head,
    /// Prefer matching the longest shared suffix
    Tail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    pub priority: Priority,
    /// Require identical captured attributes (id/class) for two nodes to match
    pub match_attributes: bool,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            priority: Priority::Head,
            match_attributes: true,
        }
    }
}

/// One step of a sibling alignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignOp {
    Remove(usize),
    Add(usize),
    Match(usize, usize),
}

/// Align two sequences by longest common subsequence.
///
/// Ops are returned left to right; inside each unmatched gap removals come
/// before additions.
pub fn align<T, F>(left: &[T], right: &[T], eq: F, priority: Priority) -> Vec<AlignOp>
where
    F: Fn(&T, &T) -> bool,
{
    let ops = match priority {
        Priority::Head => align_head(left, right, &eq),
        Priority::Tail => align_tail(left, right, &eq),
    };
    normalize_gaps(ops)
}

/// Suffix table, forward walk: equal heads are matched greedily
fn align_head<T, F: Fn(&T, &T) -> bool>(left: &[T], right: &[T], eq: &F) -> Vec<AlignOp> {
    let (n, m) = (left.len(), right.len());
    let width = m + 1;
    let mut table = vec![0u32; (n + 1) * width];

    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i * width + j] = if eq(&left[i], &right[j]) {
                table[(i + 1) * width + j + 1] + 1
            } else {
                table[(i + 1) * width + j].max(table[i * width + j + 1])
            };
        }
    }

    let mut ops = Vec::with_capacity(n + m);
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if eq(&left[i], &right[j]) {
            ops.push(AlignOp::Match(i, j));
            i += 1;
            j += 1;
        } else if table[(i + 1) * width + j] >= table[i * width + j + 1] {
            ops.push(AlignOp::Remove(i));
            i += 1;
        } else {
            ops.push(AlignOp::Add(j));
            j += 1;
        }
    }
    ops.extend((i..n).map(AlignOp::Remove));
    ops.extend((j..m).map(AlignOp::Add));
    ops
}

/// Prefix table, backward walk: the mirror image of `align_head`
fn align_tail<T, F: Fn(&T, &T) -> bool>(left: &[T], right: &[T], eq: &F) -> Vec<AlignOp> {
    let (n, m) = (left.len(), right.len());
    let width = m + 1;
    let mut table = vec![0u32; (n + 1) * width];

    for i in 1..=n {
        for j in 1..=m {
            table[i * width + j] = if eq(&left[i - 1], &right[j - 1]) {
                table[(i - 1) * width + j - 1] + 1
            } else {
                table[(i - 1) * width + j].max(table[i * width + j - 1])
            };
        }
    }

    let mut ops = Vec::with_capacity(n + m);
    let (mut i, mut j) = (n, m);
    while i > 0 && j > 0 {
        if eq(&left[i - 1], &right[j - 1]) {
            ops.push(AlignOp::Match(i - 1, j - 1));
            i -= 1;
            j -= 1;
        } else if table[(i - 1) * width + j] >= table[i * width + j - 1] {
            ops.push(AlignOp::Remove(i - 1));
            i -= 1;
        } else {
            ops.push(AlignOp::Add(j - 1));
            j -= 1;
        }
    }
    ops.extend((0..i).rev().map(AlignOp::Remove));
    ops.extend((0..j).rev().map(AlignOp::Add));
    ops.reverse();
    ops
}

fn normalize_gaps(ops: Vec<AlignOp>) -> Vec<AlignOp> {
    let mut out = Vec::with_capacity(ops.len());
    let mut adds = Vec::new();
    for op in ops {
        match op {
            AlignOp::Remove(_) => out.push(op),
            AlignOp::Add(_) => adds.push(op),
            AlignOp::Match(..) => {
                out.append(&mut adds);
                out.push(op);
            }
        }
    }
    out.append(&mut adds);
    out
}

/// Position of a node in one of the trees
#[derive(Debug, Clone)]
struct Locator {
    path: NodePath,
    selector: String,
}

impl Locator {
    fn root(node: &SnapshotNode) -> Self {
        Self {
            path: Vec::new(),
            selector: segment(node, None),
        }
    }

    fn child(&self, index: usize, node: &SnapshotNode) -> Self {
        let mut path = self.path.clone();
        path.push(index);
        Self {
            path,
            selector: format!("{} > {}", self.selector, segment(node, Some(index))),
        }
    }

    fn node_ref(&self, node: &SnapshotNode) -> NodeRef {
        NodeRef {
            path: self.path.clone(),
            selector: self.selector.clone(),
            rect: node.rect,
        }
    }
}

/// `tag#id`, or `tag.class:nth-child(n)` when there is no id
fn segment(node: &SnapshotNode, index: Option<usize>) -> String {
    let mut out = node.name.clone();
    if let Some(id) = node.attr("id").filter(|id| !id.is_empty()) {
        out.push('#');
        out.push_str(id);
        return out;
    }
    for class in node.attr("class").unwrap_or("").split_ascii_whitespace() {
        out.push('.');
        out.push_str(class);
    }
    if let Some(index) = index {
        out.push_str(&format!(":nth-child({})", index + 1));
    }
    out
}

struct Differ<'a> {
    config: &'a DiffConfig,
    changes: Vec<Change>,
}

impl Differ<'_> {
    fn same(&self, left: &SnapshotNode, right: &SnapshotNode) -> bool {
        left.name == right.name && (!self.config.match_attributes || left.attrs == right.attrs)
    }

    fn removed(&mut self, node: &SnapshotNode, at: &Locator) {
        self.changes.push(Change {
            kind: ChangeType::REMOVE,
            node: at.node_ref(node),
            origin: None,
            detail: ChangeDetail::Removed { node: node.clone() },
        });
    }

    fn added(&mut self, node: &SnapshotNode, at: &Locator) {
        self.changes.push(Change {
            kind: ChangeType::ADD,
            node: at.node_ref(node),
            origin: None,
            detail: ChangeDetail::Added { node: node.clone() },
        });
    }

    fn compare_pair(
        &mut self,
        left: &SnapshotNode,
        right: &SnapshotNode,
        left_at: &Locator,
        right_at: &Locator,
    ) {
        let flags = left.flags.union(right.flags);

        if !flags.ignore_text && left.text != right.text {
            self.changes.push(Change {
                kind: ChangeType::TEXT,
                node: right_at.node_ref(right),
                origin: Some(left_at.node_ref(left)),
                detail: ChangeDetail::Text {
                    before: left.text.clone(),
                    after: right.text.clone(),
                },
            });
        }

        if !flags.ignore_style {
            let properties: BTreeSet<&String> = left.style.keys().chain(right.style.keys()).collect();
            for property in properties {
                let before = left.style.get(property);
                let after = right.style.get(property);
                if before != after {
                    self.changes.push(Change {
                        kind: ChangeType::STYLE,
                        node: right_at.node_ref(right),
                        origin: Some(left_at.node_ref(left)),
                        detail: ChangeDetail::Style {
                            property: property.clone(),
                            before: before.cloned(),
                            after: after.cloned(),
                        },
                    });
                }
            }
        }

        let ops = align(
            &left.children,
            &right.children,
            |a, b| self.same(a, b),
            self.config.priority,
        );
        for op in ops {
            match op {
                AlignOp::Remove(i) => {
                    let child = &left.children[i];
                    self.removed(child, &left_at.child(i, child));
                }
                AlignOp::Add(j) => {
                    let child = &right.children[j];
                    self.added(child, &right_at.child(j, child));
                }
                AlignOp::Match(i, j) => {
                    let (l, r) = (&left.children[i], &right.children[j]);
                    self.compare_pair(l, r, &left_at.child(i, l), &right_at.child(j, r));
                }
            }
        }
    }
}

/// Compute the ordered change list turning `left` into `right`
pub fn diff(left: &SnapshotTree, right: &SnapshotTree, config: &DiffConfig) -> Vec<Change> {
    let mut differ = Differ {
        config,
        changes: Vec::new(),
    };
    let (left_at, right_at) = (Locator::root(&left.root), Locator::root(&right.root));

    if differ.same(&left.root, &right.root) {
        differ.compare_pair(&left.root, &right.root, &left_at, &right_at);
    } else {
        differ.removed(&left.root, &left_at);
        differ.added(&right.root, &right_at);
    }

    tracing::debug!(
        left = %left.meta.url,
        right = %right.meta.url,
        changes = differ.changes.len(),
        "diffed snapshot trees"
    );
    differ.changes
}
