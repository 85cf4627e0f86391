//! Walker - serializes the visible DOM subtree into a `SnapshotTree`
//!
//! Pure function over a `DomArena`: no browser required. Filters:
//!
//! - fixed invisible tags and `display: none` elements are skipped
//! - `exclude` / `remove` selectors drop whole subtrees
//! - `ignore_children` selectors (and fixed replaced-element tags) keep the
//!   node but never descend
//! - `ignore_text` / `ignore_style` selectors set inherited node flags; text
//!   under `ignore_text` is frozen (not recorded)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::arena::DomArena;
use crate::error::{DomError, Result};
use crate::selector::SelectorList;
use crate::snapshot::{CaptureMeta, NodeFlags, SnapshotNode, SnapshotTree};
use crate::types::*;
use crate::utils;

/// Walk configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkConfig {
    /// Selector of the captured root element
    pub root: String,
    pub style_filters: Vec<String>,
    pub attribute_filters: Vec<String>,
    pub exclude_selectors: Vec<String>,
    /// Deleted in-page before the dump; skipped here as well
    pub remove_selectors: Vec<String>,
    pub ignore_children_selectors: Vec<String>,
    pub ignore_text_selectors: Vec<String>,
    pub ignore_style_selectors: Vec<String>,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            root: "body".to_string(),
            style_filters: DEFAULT_STYLE_FILTERS.iter().map(|s| s.to_string()).collect(),
            attribute_filters: DEFAULT_ATTRIBUTE_FILTERS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            exclude_selectors: Vec::new(),
            remove_selectors: Vec::new(),
            ignore_children_selectors: Vec::new(),
            ignore_text_selectors: Vec::new(),
            ignore_style_selectors: Vec::new(),
        }
    }
}

impl WalkConfig {
    /// Arguments for `DUMP_SCRIPT`, in call order
    pub fn dump_args(&self) -> Vec<serde_json::Value> {
        vec![
            serde_json::json!(self.remove_selectors),
            serde_json::json!(self.style_filters),
            serde_json::json!(INVISIBLE_ELEMENTS),
        ]
    }
}

/// Compiled selector sets
struct Filters {
    skip: SelectorList,
    ignore_children: SelectorList,
    ignore_text: SelectorList,
    ignore_style: SelectorList,
}

impl Filters {
    fn compile(config: &WalkConfig) -> Result<Self> {
        let mut skip = config.exclude_selectors.clone();
        skip.extend(config.remove_selectors.iter().cloned());
        Ok(Self {
            skip: SelectorList::parse_all(&skip)?,
            ignore_children: SelectorList::parse_all(&config.ignore_children_selectors)?,
            ignore_text: SelectorList::parse_all(&config.ignore_text_selectors)?,
            ignore_style: SelectorList::parse_all(&config.ignore_style_selectors)?,
        })
    }
}

struct Walker<'a> {
    arena: &'a DomArena,
    config: &'a WalkConfig,
    filters: Filters,
}

/// Serialize the subtree under `config.root` into a snapshot tree
pub fn walk(arena: &DomArena, config: &WalkConfig, meta: CaptureMeta) -> Result<SnapshotTree> {
    let root_selector = SelectorList::parse(&config.root)?;
    let document = arena
        .root_id()
        .ok_or_else(|| DomError::MalformedDump("No root node set".to_string()))?;
    let root_id = arena
        .find_first(document, |node| {
            node.is_element() && root_selector.matches(arena, node.node_id)
        })?
        .ok_or_else(|| DomError::RootNotFound(config.root.clone()))?;

    let walker = Walker {
        arena,
        config,
        filters: Filters::compile(config)?,
    };

    if walker.filters.skip.matches(arena, root_id) {
        return Err(DomError::RootExcluded(config.root.clone()));
    }

    let root = walker.serialize(root_id, walker.flags_for(root_id, NodeFlags::default()))?;
    let rect = root.rect;
    tracing::debug!(
        url = %meta.url,
        nodes = root.count(),
        "walked snapshot tree"
    );
    Ok(SnapshotTree::new(root, rect, meta))
}

impl<'a> Walker<'a> {
    fn flags_for(&self, node_id: NodeId, inherited: NodeFlags) -> NodeFlags {
        inherited.union(NodeFlags {
            ignore_text: self.filters.ignore_text.matches(self.arena, node_id),
            ignore_style: self.filters.ignore_style.matches(self.arena, node_id),
        })
    }

    fn is_visible(&self, node: &DomNode) -> bool {
        let Some(tag) = node.tag_name() else {
            return false;
        };
        !INVISIBLE_ELEMENTS.contains(&tag.as_str()) && !utils::is_hidden_by_css(node)
    }

    fn walk_child(&self, node_id: NodeId, inherited: NodeFlags) -> Result<Option<SnapshotNode>> {
        let node = self.arena.get(node_id)?;
        if !self.is_visible(node) || self.filters.skip.matches(self.arena, node_id) {
            return Ok(None);
        }
        let flags = self.flags_for(node_id, inherited);
        self.serialize(node_id, flags).map(Some)
    }

    fn serialize(&self, node_id: NodeId, flags: NodeFlags) -> Result<SnapshotNode> {
        let node = self.arena.get(node_id)?;
        let tag = node.tag_name().unwrap_or_default();

        let attrs: BTreeMap<String, String> = self
            .config
            .attribute_filters
            .iter()
            .filter_map(|name| node.attr(name).map(|v| (name.clone(), v.to_string())))
            .collect();

        let style: BTreeMap<String, String> = self
            .config
            .style_filters
            .iter()
            .filter_map(|name| {
                node.computed_style(name)
                    .map(|v| (name.clone(), v.to_string()))
            })
            .collect();

        let ignore_children = IGNORE_CHILDREN_ELEMENTS.contains(&tag.as_str())
            || self.filters.ignore_children.matches(self.arena, node_id);

        let text = if flags.ignore_text {
            None
        } else if ignore_children {
            utils::replaced_content(node).or(utils::direct_text(self.arena, node_id)?)
        } else {
            utils::direct_text(self.arena, node_id)?
        };

        let mut children = Vec::new();
        if !ignore_children {
            for &child_id in &node.children_ids {
                if let Some(child) = self.walk_child(child_id, flags)? {
                    children.push(child);
                }
            }
        }

        Ok(SnapshotNode {
            name: tag,
            attrs,
            text,
            style,
            rect: node.bounds(),
            children,
            children_serialized: !ignore_children,
            flags,
        })
    }
}
