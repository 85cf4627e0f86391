//! Raw DOM types, as reported by the in-page dump script
//!
//! Key design principles:
//! 1. Use u32 for indices (4 bytes vs 8 bytes pointer)
//! 2. Use SmallVec for small arrays (avoid heap allocation)
//! 3. Use Option<Box<T>> for large optional fields (reduce struct size)

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::HashMap;

/// Node identifier (index into arena)
/// u32 allows 4 billion nodes, enough for any webpage
pub type NodeId = u32;

/// Capture time, milliseconds since the Unix epoch
pub type Timestamp = u64;

/// Node type matching DOM specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum NodeType {
    Element = 1,
    Attribute = 2,
    Text = 3,
    CdataSection = 4,
    EntityReference = 5,
    Entity = 6,
    ProcessingInstruction = 7,
    Comment = 8,
    Document = 9,
    DocumentType = 10,
    DocumentFragment = 11,
    Notation = 12,
}

impl NodeType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(NodeType::Element),
            2 => Some(NodeType::Attribute),
            3 => Some(NodeType::Text),
            4 => Some(NodeType::CdataSection),
            5 => Some(NodeType::EntityReference),
            6 => Some(NodeType::Entity),
            7 => Some(NodeType::ProcessingInstruction),
            8 => Some(NodeType::Comment),
            9 => Some(NodeType::Document),
            10 => Some(NodeType::DocumentType),
            11 => Some(NodeType::DocumentFragment),
            12 => Some(NodeType::Notation),
            _ => None,
        }
    }
}

/// Rectangle in page coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DomRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl DomRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }

    /// Apply offset (screenshot/panel coordinate transformation)
    pub fn offset(&self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            ..*self
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Layout data captured for an element: bounds and filtered computed style
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeLayout {
    /// Document coordinates (top-left of page, ignores scroll)
    pub bounds: DomRect,
    /// Computed CSS styles, already restricted to the requested properties
    pub computed_styles: HashMap<String, String>,
}

/// A raw DOM node
///
/// Design philosophy:
/// - Small fixed-size fields first (better packing)
/// - Use indices instead of pointers
/// - Use Option<Box<T>> for large optional data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomNode {
    pub node_id: NodeId,
    pub node_type: NodeType,

    // Navigation indices
    pub parent_id: Option<NodeId>,
    pub children_ids: SmallVec<[NodeId; 4]>, // Most nodes have <4 children

    pub node_name: String,
    pub node_value: String,
    pub attributes: HashMap<String, String>,

    pub layout: Option<Box<NodeLayout>>,
}

impl DomNode {
    /// Create a new node with required fields
    pub fn new(node_id: NodeId, node_type: NodeType, node_name: impl Into<String>) -> Self {
        Self {
            node_id,
            node_type,
            parent_id: None,
            children_ids: SmallVec::new(),
            node_name: node_name.into(),
            node_value: String::new(),
            attributes: HashMap::new(),
            layout: None,
        }
    }

    /// Lowercased tag name for element nodes
    pub fn tag_name(&self) -> Option<String> {
        if self.node_type == NodeType::Element {
            Some(self.node_name.to_ascii_lowercase())
        } else {
            None
        }
    }

    /// Check if node is an element
    pub fn is_element(&self) -> bool {
        self.node_type == NodeType::Element
    }

    /// Check if node is text
    pub fn is_text(&self) -> bool {
        self.node_type == NodeType::Text
    }

    /// Get attribute value
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(|s| s.as_str())
    }

    /// Whitespace-separated class list
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or("").split_ascii_whitespace()
    }

    pub fn bounds(&self) -> DomRect {
        self.layout
            .as_ref()
            .map(|l| l.bounds)
            .unwrap_or_else(DomRect::zero)
    }

    pub fn computed_style(&self, property: &str) -> Option<&str> {
        self.layout
            .as_ref()
            .and_then(|l| l.computed_styles.get(property))
            .map(|s| s.as_str())
    }
}

/// Tags that never render and are skipped regardless of configuration
pub const INVISIBLE_ELEMENTS: &[&str] = &[
    "applet", "area", "audio", "base", "basefont", "bdi", "bdo", "big", "br", "center",
    "colgroup", "datalist", "form", "frameset", "head", "link", "map", "meta", "noframes",
    "noscript", "optgroup", "option", "param", "rp", "rt", "ruby", "script", "source", "style",
    "template", "title", "track", "xmp",
];

/// Tags serialized without their children
pub const IGNORE_CHILDREN_ELEMENTS: &[&str] = &[
    "img", "canvas", "input", "textarea", "audio", "video", "hr", "embed", "object", "progress",
    "select", "table", "svg", "iframe",
];

/// Default computed-style allow-list
pub const DEFAULT_STYLE_FILTERS: &[&str] = &[
    "margin-left",
    "margin-top",
    "margin-right",
    "margin-bottom",
    "border-left-color",
    "border-left-style",
    "border-left-width",
    "border-top-color",
    "border-top-style",
    "border-top-width",
    "border-right-color",
    "border-right-style",
    "border-right-width",
    "border-bottom-color",
    "border-bottom-style",
    "border-bottom-width",
    "border-top-left-radius",
    "border-top-right-radius",
    "border-bottom-left-radius",
    "border-bottom-right-radius",
    "padding-left",
    "padding-top",
    "padding-right",
    "padding-bottom",
    "background-color",
    "background-image",
    "background-repeat",
    "background-size",
    "background-position",
    "list-style-image",
    "list-style-position",
    "list-style-type",
    "outline-color",
    "outline-style",
    "outline-width",
    "font-size",
    "font-family",
    "font-weight",
    "font-style",
    "line-height",
    "box-shadow",
    "clear",
    "color",
    "display",
    "float",
    "opacity",
    "text-align",
    "text-decoration",
    "text-indent",
    "text-shadow",
    "vertical-align",
    "visibility",
    "position",
];

/// Default attribute allow-list (used as matching hints)
pub const DEFAULT_ATTRIBUTE_FILTERS: &[&str] = &["id", "class"];
