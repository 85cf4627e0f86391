//! Snapshot data model
//!
//! A `SnapshotTree` is what a single walk produces and what the store
//! persists as `tree.json`. It is immutable once written; a newer capture of
//! the same URL supersedes it rather than mutating it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{BitOr, BitOrAssign};

use crate::types::{DomRect, Timestamp};

/// Current `tree.json` schema version
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Per-node diff suppression, inherited by every descendant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeFlags {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ignore_text: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ignore_style: bool,
}

impl NodeFlags {
    pub fn is_empty(&self) -> bool {
        !self.ignore_text && !self.ignore_style
    }

    pub fn union(self, other: NodeFlags) -> NodeFlags {
        NodeFlags {
            ignore_text: self.ignore_text || other.ignore_text,
            ignore_style: self.ignore_style || other.ignore_style,
        }
    }
}

/// One serialized element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotNode {
    /// Lowercase tag name
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub style: BTreeMap<String, String>,
    pub rect: DomRect,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SnapshotNode>,
    /// False for ignore-children elements
    #[serde(default = "default_true")]
    pub children_serialized: bool,
    #[serde(default, skip_serializing_if = "NodeFlags::is_empty")]
    pub flags: NodeFlags,
}

fn default_true() -> bool {
    true
}

impl SnapshotNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: BTreeMap::new(),
            text: None,
            style: BTreeMap::new(),
            rect: DomRect::zero(),
            children: Vec::new(),
            children_serialized: true,
            flags: NodeFlags::default(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_style(mut self, property: impl Into<String>, value: impl Into<String>) -> Self {
        self.style.insert(property.into(), value.into());
        self
    }

    pub fn with_rect(mut self, rect: DomRect) -> Self {
        self.rect = rect;
        self
    }

    pub fn with_child(mut self, child: SnapshotNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_flags(mut self, flags: NodeFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(|s| s.as_str())
    }

    /// Equality ignoring geometry (rectangles), recursively
    pub fn same_structure(&self, other: &SnapshotNode) -> bool {
        self.name == other.name
            && self.attrs == other.attrs
            && self.text == other.text
            && self.style == other.style
            && self.children_serialized == other.children_serialized
            && self.flags == other.flags
            && self.children.len() == other.children.len()
            && self
                .children
                .iter()
                .zip(&other.children)
                .all(|(a, b)| a.same_structure(b))
    }

    /// Number of nodes in this subtree, including self
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(SnapshotNode::count).sum::<usize>()
    }

    /// Resolve a child-index path relative to this node
    pub fn at_path(&self, path: &[usize]) -> Option<&SnapshotNode> {
        path.iter()
            .try_fold(self, |node, &index| node.children.get(index))
    }

    pub fn at_path_mut(&mut self, path: &[usize]) -> Option<&mut SnapshotNode> {
        path.iter()
            .try_fold(self, |node, &index| node.children.get_mut(index))
    }
}

/// Capture metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureMeta {
    pub url: String,
    pub timestamp: Timestamp,
}

/// Root node plus the captured region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotTree {
    pub version: u32,
    pub root: SnapshotNode,
    /// Captured region in page coordinates (the root element's rectangle)
    pub rect: DomRect,
    pub meta: CaptureMeta,
}

impl SnapshotTree {
    pub fn new(root: SnapshotNode, rect: DomRect, meta: CaptureMeta) -> Self {
        Self {
            version: SNAPSHOT_SCHEMA_VERSION,
            root,
            rect,
            meta,
        }
    }

    /// Same captured content, regardless of when or where it was captured
    pub fn same_content(&self, other: &SnapshotTree) -> bool {
        self.root == other.root && self.rect == other.rect
    }

    /// Same structure, ignoring geometry and metadata
    pub fn same_structure(&self, other: &SnapshotTree) -> bool {
        self.root.same_structure(&other.root)
    }
}

/// A snapshot handed to the store: either already-serialized JSON or a tree
#[derive(Debug, Clone)]
pub enum SnapshotPayload {
    Serialized(String),
    Tree(SnapshotTree),
}

impl From<SnapshotTree> for SnapshotPayload {
    fn from(tree: SnapshotTree) -> Self {
        SnapshotPayload::Tree(tree)
    }
}

/// Change type bit set: ADD=1, REMOVE=2, STYLE=4, TEXT=8
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeType(u8);

impl ChangeType {
    pub const NONE: ChangeType = ChangeType(0);
    pub const ADD: ChangeType = ChangeType(1);
    pub const REMOVE: ChangeType = ChangeType(2);
    pub const STYLE: ChangeType = ChangeType(4);
    pub const TEXT: ChangeType = ChangeType(8);
    pub const ALL: ChangeType = ChangeType(15);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Self {
        ChangeType(bits & Self::ALL.0)
    }

    pub fn contains(self, other: ChangeType) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Single-flag names in bit order
    pub fn names(self) -> Vec<&'static str> {
        [
            (Self::ADD, "ADD"),
            (Self::REMOVE, "REMOVE"),
            (Self::STYLE, "STYLE"),
            (Self::TEXT, "TEXT"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| name)
        .collect()
    }
}

impl BitOr for ChangeType {
    type Output = ChangeType;

    fn bitor(self, rhs: ChangeType) -> ChangeType {
        ChangeType(self.0 | rhs.0)
    }
}

impl BitOrAssign for ChangeType {
    fn bitor_assign(&mut self, rhs: ChangeType) {
        self.0 |= rhs.0;
    }
}

/// Child-index path from the root
pub type NodePath = Vec<usize>;

/// Where a change is anchored in one of the two trees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRef {
    pub path: NodePath,
    /// Human-readable locator, e.g. `body > div#x > p:nth-child(2)`
    pub selector: String,
    pub rect: DomRect,
}

/// Which capture a change should be drawn on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeDetail {
    Added {
        node: SnapshotNode,
    },
    Removed {
        node: SnapshotNode,
    },
    Style {
        property: String,
        before: Option<String>,
        after: Option<String>,
    },
    Text {
        before: Option<String>,
        after: Option<String>,
    },
}

/// One structural difference between two trees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    #[serde(rename = "type")]
    pub kind: ChangeType,
    /// Left tree for REMOVE, right tree for everything else
    pub node: NodeRef,
    /// Left-tree counterpart of a matched pair (STYLE/TEXT)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<NodeRef>,
    pub detail: ChangeDetail,
}

impl Change {
    /// The capture this change belongs to
    pub fn side(&self) -> Side {
        if self.kind.contains(ChangeType::REMOVE) {
            Side::Left
        } else {
            Side::Right
        }
    }
}

/// Union of all change types in a list
pub fn kinds(changes: &[Change]) -> ChangeType {
    changes
        .iter()
        .fold(ChangeType::NONE, |acc, change| acc | change.kind)
}
