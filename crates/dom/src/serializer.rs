//! Snapshot Serializer - `tree.json` codec
//!
//! This module handles:
//! - Encoding trees as versioned JSON
//! - Decoding with a schema version check
//! - Turning a `SnapshotPayload` into a tree

use crate::error::{DomError, Result};
use crate::snapshot::*;
use serde_json::Value;

/// Snapshot tree serializer
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotSerializer;

impl SnapshotSerializer {
    pub fn new() -> Self {
        Self
    }

    /// Encode a tree as `tree.json` content
    pub fn to_json(&self, tree: &SnapshotTree) -> Result<String> {
        Ok(serde_json::to_string(tree)?)
    }

    /// Decode `tree.json` content, rejecting unknown schema versions
    pub fn from_json(&self, json: &str) -> Result<SnapshotTree> {
        let value: Value = serde_json::from_str(json)?;
        let found = value.get("version").and_then(Value::as_u64).unwrap_or(0);
        if found != u64::from(SNAPSHOT_SCHEMA_VERSION) {
            return Err(DomError::UnsupportedVersion {
                found,
                expected: SNAPSHOT_SCHEMA_VERSION,
            });
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Materialize a payload, decoding it if it arrived pre-serialized
    pub fn decode(&self, payload: SnapshotPayload) -> Result<SnapshotTree> {
        match payload {
            SnapshotPayload::Tree(tree) => Ok(tree),
            SnapshotPayload::Serialized(json) => self.from_json(&json),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DomRect;

    fn sample() -> SnapshotTree {
        SnapshotTree::new(
            SnapshotNode::new("body")
                .with_rect(DomRect::new(0.0, 0.0, 375.0, 900.0))
                .with_child(
                    SnapshotNode::new("div")
                        .with_attr("id", "x")
                        .with_text("Hello")
                        .with_style("color", "rgb(0, 0, 0)"),
                )
                .with_child(SnapshotNode::new("svg").with_flags(NodeFlags {
                    ignore_text: true,
                    ignore_style: false,
                })),
            DomRect::new(0.0, 0.0, 375.0, 900.0),
            CaptureMeta {
                url: "http://example.com/home".to_string(),
                timestamp: 1_700_000_000_000,
            },
        )
    }

    #[test]
    fn test_json_keeps_content() {
        let serializer = SnapshotSerializer::new();
        let tree = sample();
        let json = serializer.to_json(&tree).unwrap();
        assert!(json.contains("\"version\":1"));
        assert!(!json.contains("ignore_style"));

        let decoded = serializer.from_json(&json).unwrap();
        assert_eq!(decoded, tree);
    }

    #[test]
    fn test_version_check() {
        let serializer = SnapshotSerializer::new();
        let mut value = serde_json::to_value(sample()).unwrap();
        value["version"] = serde_json::json!(7);

        match serializer.from_json(&value.to_string()) {
            Err(DomError::UnsupportedVersion { found, expected }) => {
                assert_eq!(found, 7);
                assert_eq!(expected, SNAPSHOT_SCHEMA_VERSION);
            }
            other => panic!("expected version error, got {:?}", other),
        }

        // must not wrap around to version 1
        value["version"] = serde_json::json!(u64::from(u32::MAX) + 2);
        match serializer.from_json(&value.to_string()) {
            Err(DomError::UnsupportedVersion { found, .. }) => assert_eq!(found, 4_294_967_297),
            other => panic!("expected version error, got {:?}", other),
        }

        assert!(matches!(
            serializer.from_json("not json"),
            Err(DomError::ParseError(_))
        ));
    }

    #[test]
    fn test_decode_payload() {
        let serializer = SnapshotSerializer::new();
        let tree = sample();
        let json = serializer.to_json(&tree).unwrap();

        assert_eq!(
            serializer.decode(SnapshotPayload::Serialized(json)).unwrap(),
            tree
        );
        assert_eq!(serializer.decode(tree.clone().into()).unwrap(), tree);
    }
}
