//! Utility functions for DOM processing

use crate::arena::DomArena;
use crate::error::Result;
use crate::types::{DomNode, NodeId};

/// Collapse runs of whitespace into single spaces and trim
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Elements with `display: none` produce no boxes and are not serialized
pub fn is_hidden_by_css(node: &DomNode) -> bool {
    node.computed_style("display") == Some("none")
}

/// Normalized concatenation of a node's direct text children
pub fn direct_text(arena: &DomArena, node_id: NodeId) -> Result<Option<String>> {
    let mut raw = String::new();
    for child in arena.children(node_id)? {
        if child.is_text() {
            raw.push(' ');
            raw.push_str(&child.node_value);
        }
    }
    let text = normalize_text(&raw);
    Ok(if text.is_empty() { None } else { Some(text) })
}

/// Content of replaced elements (image source, form value)
pub fn replaced_content(node: &DomNode) -> Option<String> {
    let value = match node.tag_name()?.as_str() {
        "img" => node.attr("src"),
        "input" | "textarea" => node.attr("value"),
        _ => None,
    }?;
    Some(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeLayout, NodeType};

    #[test]
    fn test_direct_text_skips_nested_elements() {
        let mut arena = DomArena::new();
        let p = arena.add_node(DomNode::new(0, NodeType::Element, "P"));
        let mut t1 = DomNode::new(0, NodeType::Text, "#text");
        t1.node_value = "  Hello\n ".to_string();
        let t1 = arena.add_node(t1);
        let b = arena.add_node(DomNode::new(0, NodeType::Element, "B"));
        let mut inner = DomNode::new(0, NodeType::Text, "#text");
        inner.node_value = "bold".to_string();
        let inner = arena.add_node(inner);
        let mut t2 = DomNode::new(0, NodeType::Text, "#text");
        t2.node_value = "world".to_string();
        let t2 = arena.add_node(t2);
        arena.append_child(p, t1).unwrap();
        arena.append_child(p, b).unwrap();
        arena.append_child(b, inner).unwrap();
        arena.append_child(p, t2).unwrap();

        assert_eq!(direct_text(&arena, p).unwrap().as_deref(), Some("Hello world"));
        assert_eq!(direct_text(&arena, b).unwrap().as_deref(), Some("bold"));
        assert_eq!(direct_text(&arena, inner).unwrap(), None);
    }

    #[test]
    fn test_hidden_and_replaced() {
        let mut img = DomNode::new(0, NodeType::Element, "IMG");
        img.attributes.insert("src".to_string(), "a.png".to_string());
        assert_eq!(replaced_content(&img).as_deref(), Some("a.png"));
        assert!(!is_hidden_by_css(&img));

        let mut layout = NodeLayout::default();
        layout
            .computed_styles
            .insert("display".to_string(), "none".to_string());
        img.layout = Some(Box::new(layout));
        assert!(is_hidden_by_css(&img));
    }
}
