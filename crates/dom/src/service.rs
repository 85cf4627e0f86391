//! DOM Service - builds the arena from an in-page dump
//!
//! The dump script (`DUMP_SCRIPT`) runs inside the page and reports the raw
//! DOM. This service turns that JSON into a `DomArena` the walker can consume
//! without a browser.

use crate::arena::DomArena;
use crate::error::{DomError, Result};
use crate::types::*;
use serde_json::Value;
use std::collections::HashMap;

/// Function source evaluated inside the page.
///
/// Called as `(removeSelectors, styleFilters, invisibleElements)`.
pub const DUMP_SCRIPT: &str = include_str!("js/dump.js");

/// Main DOM service
pub struct DomService {
    arena: DomArena,
}

impl DomService {
    pub fn new() -> Self {
        Self {
            arena: DomArena::new(),
        }
    }

    /// Get reference to internal arena
    pub fn arena(&self) -> &DomArena {
        &self.arena
    }

    /// Consume the service, keeping the arena
    pub fn into_arena(self) -> DomArena {
        self.arena
    }

    /// Parse the dump script's result and rebuild the arena
    ///
    /// Input format:
    /// ```json
    /// {
    ///   "root": {
    ///     "nodeType": 1,
    ///     "nodeName": "HTML",
    ///     "attributes": ["lang", "en"],
    ///     "bounds": [0, 0, 375, 1200],
    ///     "styles": { "color": "rgb(0, 0, 0)" },
    ///     "children": [{ "nodeType": 3, "nodeValue": "Hello" }]
    ///   },
    ///   "viewport": { "width": 375, "height": 667 },
    ///   "scroll": { "x": 0, "y": 0 }
    /// }
    /// ```
    pub fn parse_page_dump(&mut self, dump: &Value) -> Result<NodeId> {
        let root = dump
            .get("root")
            .ok_or_else(|| DomError::MalformedDump("Missing 'root' in page dump".to_string()))?;

        self.arena.clear();

        let root_id = self.parse_node(root, None)?;
        self.arena.set_root(root_id)?;
        Ok(root_id)
    }

    /// Recursively parse a dumped node
    fn parse_node(&mut self, raw: &Value, parent_id: Option<NodeId>) -> Result<NodeId> {
        let node_type_val = raw["nodeType"]
            .as_u64()
            .ok_or_else(|| DomError::MalformedDump("Missing nodeType".to_string()))?;

        let node_type = u8::try_from(node_type_val)
            .ok()
            .and_then(NodeType::from_u8)
            .ok_or_else(|| DomError::MalformedDump(format!("Invalid nodeType {}", node_type_val)))?;

        let default_name = match node_type {
            NodeType::Text => "#text",
            NodeType::Document => "#document",
            _ => "",
        };
        let node_name = raw["nodeName"].as_str().unwrap_or(default_name);

        let mut node = DomNode::new(0, node_type, node_name);
        node.node_value = raw["nodeValue"].as_str().unwrap_or("").to_string();
        node.parent_id = parent_id;

        // Attributes come as a flat [name, value, name, value, ...] list
        if let Some(attrs) = raw["attributes"].as_array() {
            for pair in attrs.chunks_exact(2) {
                if let (Some(key), Some(value)) = (pair[0].as_str(), pair[1].as_str()) {
                    node.attributes
                        .insert(key.to_ascii_lowercase(), value.to_string());
                }
            }
        }

        if raw.get("bounds").is_some() || raw.get("styles").is_some() {
            node.layout = Some(Box::new(Self::parse_layout(raw)?));
        }

        let current_node_id = self.arena.add_node(node);

        if let Some(children) = raw["children"].as_array() {
            for child in children {
                let child_id = self.parse_node(child, Some(current_node_id))?;
                self.arena
                    .get_mut(current_node_id)?
                    .children_ids
                    .push(child_id);
            }
        }

        Ok(current_node_id)
    }

    fn parse_layout(raw: &Value) -> Result<NodeLayout> {
        let bounds = match raw.get("bounds") {
            None | Some(Value::Null) => DomRect::zero(),
            Some(Value::Array(values)) if values.len() == 4 => {
                let mut v = [0.0; 4];
                for (slot, value) in v.iter_mut().zip(values) {
                    *slot = value.as_f64().ok_or_else(|| {
                        DomError::MalformedDump(format!("Non-numeric bounds {:?}", values))
                    })?;
                }
                DomRect::new(v[0], v[1], v[2], v[3])
            }
            Some(other) => {
                return Err(DomError::MalformedDump(format!(
                    "bounds must be [x, y, width, height], got {}",
                    other
                )))
            }
        };

        let mut computed_styles = HashMap::new();
        if let Some(styles) = raw["styles"].as_object() {
            for (key, value) in styles {
                if let Some(value) = value.as_str() {
                    computed_styles.insert(key.clone(), value.to_string());
                }
            }
        }

        Ok(NodeLayout {
            bounds,
            computed_styles,
        })
    }
}

impl Default for DomService {
    fn default() -> Self {
        Self::new()
    }
}
