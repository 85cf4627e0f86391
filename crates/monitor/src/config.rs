//! Monitor configuration
//!
//! Plain structured data, loaded once and shared read-only as
//! `Arc<MonitorConfig>`. Every field has a default so a config file only
//! needs the keys it changes.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use browser::Viewport;
use dom::{DiffConfig, WalkConfig};

use crate::error::{MonitorError, Result};
use crate::highlight::HighlightConfig;

/// How pages are opened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageConfig {
    pub viewport: Viewport,
    /// Extra wait after the load event, for late layout
    pub settle_ms: u64,
    pub load_timeout_ms: u64,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            settle_ms: 0,
            load_timeout_ms: 30_000,
        }
    }
}

impl PageConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Artifact root directory
    pub root: PathBuf,
    pub page: PageConfig,
    pub walk: WalkConfig,
    pub diff: DiffConfig,
    pub highlight: HighlightConfig,
    /// Captures or diffs running at once in a batch
    pub concurrency: usize,
    /// Treat uncaught page exceptions as a render failure
    pub fail_on_script_error: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            page: PageConfig::default(),
            walk: WalkConfig::default(),
            diff: DiffConfig::default(),
            highlight: HighlightConfig::default(),
            concurrency: 4,
            fail_on_script_error: false,
        }
    }
}

impl MonitorConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: MonitorConfig =
            serde_json::from_str(json).map_err(|e| MonitorError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| MonitorError::io(path, e))?;
        Self::from_json_str(&json)
    }

    /// Reject values no run could work with, including unparsable selectors
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(MonitorError::Config("concurrency must be at least 1".to_string()));
        }
        if self.page.viewport.width == 0 || self.page.viewport.height == 0 {
            return Err(MonitorError::Config("viewport must not be empty".to_string()));
        }
        let walk = &self.walk;
        for list in [
            std::slice::from_ref(&walk.root),
            &walk.exclude_selectors[..],
            &walk.remove_selectors[..],
            &walk.ignore_children_selectors[..],
            &walk.ignore_text_selectors[..],
            &walk.ignore_style_selectors[..],
        ] {
            dom::SelectorList::parse_all(list).map_err(|e| MonitorError::Config(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dom::Priority;

    #[test]
    fn test_defaults() {
        let config = MonitorConfig::from_json_str("{}").unwrap();
        assert_eq!(config, MonitorConfig::default());
        assert_eq!(config.page.viewport.width, 375);
        assert_eq!(config.page.viewport.height, 667);
        assert_eq!(config.walk.root, "body");
        assert_eq!(config.diff.priority, Priority::Head);
        assert_eq!(config.concurrency, 4);
    }

    #[test]
    fn test_partial_override() {
        let config = MonitorConfig::from_json_str(
            r##"{
                "root": "/tmp/pm",
                "page": { "settle_ms": 250 },
                "walk": { "ignore_text_selectors": [".clock"] },
                "diff": { "priority": "tail" },
                "highlight": {
                    "add": {
                        "title": "New",
                        "background_color": "rgba(0,255,0,0.2)",
                        "border_color": "#0a0",
                        "color": "#060"
                    }
                }
            }"##,
        )
        .unwrap();
        assert_eq!(config.root, PathBuf::from("/tmp/pm"));
        assert_eq!(config.page.settle(), Duration::from_millis(250));
        assert_eq!(config.page.load_timeout_ms, 30_000);
        assert_eq!(config.walk.ignore_text_selectors, vec![".clock".to_string()]);
        assert_eq!(config.walk.attribute_filters, vec!["id", "class"]);
        assert_eq!(config.diff.priority, Priority::Tail);
        assert!(config.diff.match_attributes);
        assert_eq!(config.highlight.add.title, "New");
        assert_eq!(config.highlight.add.border_color, "#0a0");
        assert_eq!(config.highlight.remove.border_color, "#999");
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            MonitorConfig::from_json_str(r#"{"concurrency": 0}"#),
            Err(MonitorError::Config(_))
        ));
        assert!(matches!(
            MonitorConfig::from_json_str(r#"{"walk": {"exclude_selectors": ["div >"]}}"#),
            Err(MonitorError::Config(_))
        ));
        assert!(matches!(
            MonitorConfig::from_json_str(r#"{"diff": {"priority": "middle"}}"#),
            Err(MonitorError::Config(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.json");
        std::fs::write(&path, r#"{"fail_on_script_error": true}"#).unwrap();
        assert!(MonitorConfig::from_json_file(&path).unwrap().fail_on_script_error);

        assert!(matches!(
            MonitorConfig::from_json_file(dir.path().join("missing.json")),
            Err(MonitorError::Io { .. })
        ));
    }
}
