//! Highlight Renderer - draws a change list over two screenshots
//!
//! ```text
//! ┌──────────┐gutter┌──────────┐
//! │  left    │      │  right   │   REMOVE marks on the left capture,
//! │ (before) │      │ (after)  │   ADD / TEXT / STYLE on the right one
//! └──────────┘      └──────────┘
//! ```
//!
//! The overlay is an HTML page (both captures as `<img>`, one absolutely
//! positioned box per annotation) rasterized by the render capability.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use url::Url;

use browser::RenderCapability;
use dom::{Change, ChangeDetail, ChangeType, DomRect, NodePath, Side};

use crate::error::{MonitorError, Result};

/// Visual treatment of one change type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightStyle {
    pub title: String,
    pub background_color: String,
    pub border_color: String,
    pub color: String,
}

impl HighlightStyle {
    fn new(title: &str, background_color: &str, border_color: &str, color: &str) -> Self {
        Self {
            title: title.to_string(),
            background_color: background_color.to_string(),
            border_color: border_color.to_string(),
            color: color.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HighlightConfig {
    pub add: HighlightStyle,
    pub remove: HighlightStyle,
    pub style: HighlightStyle,
    pub text: HighlightStyle,
    /// Horizontal space between the two panels, in CSS pixels
    pub gutter: f64,
}

impl Default for HighlightConfig {
    fn default() -> Self {
        Self {
            add: HighlightStyle::new("新增(Added)", "rgba(127, 255, 127, 0.3)", "#090", "#060"),
            remove: HighlightStyle::new("删除(Removed)", "rgba(0, 0, 0, 0.5)", "#999", "#fff"),
            style: HighlightStyle::new("样式(Style)", "rgba(255, 0, 0, 0.3)", "#f00", "#f00"),
            text: HighlightStyle::new("文本(Text)", "rgba(255, 255, 0, 0.3)", "#f90", "#c30"),
            gutter: 20.0,
        }
    }
}

impl HighlightConfig {
    /// Styles for every flag set in `kind`, dominant first: REMOVE > ADD > TEXT > STYLE
    pub fn styles_for(&self, kind: ChangeType) -> Vec<&HighlightStyle> {
        [
            (ChangeType::REMOVE, &self.remove),
            (ChangeType::ADD, &self.add),
            (ChangeType::TEXT, &self.text),
            (ChangeType::STYLE, &self.style),
        ]
        .into_iter()
        .filter(|(flag, _)| kind.contains(*flag))
        .map(|(_, style)| style)
        .collect()
    }
}

/// One capture as it goes into the overlay
#[derive(Debug, Clone, PartialEq)]
pub struct OverlaySide {
    pub screenshot: Vec<u8>,
    /// Page position of the capture's top-left corner
    pub offset: (f64, f64),
    pub size: (f64, f64),
}

impl OverlaySide {
    /// A screenshot of `rect`, the tree's captured region
    pub fn from_capture(screenshot: Vec<u8>, rect: DomRect) -> Self {
        Self {
            screenshot,
            offset: (rect.x, rect.y),
            size: (rect.width, rect.height),
        }
    }
}

/// Changes of one node on one side, merged
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub side: Side,
    pub path: NodePath,
    pub kind: ChangeType,
    /// Overlay coordinates
    pub rect: DomRect,
    pub details: Vec<String>,
}

/// Result of a highlight
#[derive(Debug, Clone, PartialEq)]
pub struct Highlight {
    pub overlay: PathBuf,
    pub html: PathBuf,
    /// Annotations drawn
    pub count: usize,
}

fn describe(change: &Change) -> String {
    let show = |v: &Option<String>| v.clone().unwrap_or_else(|| "∅".to_string());
    match &change.detail {
        ChangeDetail::Added { node } => format!("+ {}", node.name),
        ChangeDetail::Removed { node } => format!("- {}", node.name),
        ChangeDetail::Style {
            property,
            before,
            after,
        } => format!("{}: {} → {}", property, show(before), show(after)),
        ChangeDetail::Text { before, after } => format!("{} → {}", show(before), show(after)),
    }
}

/// Group changes per (side, node) and place them in overlay coordinates
pub fn annotate(
    changes: &[Change],
    left: &OverlaySide,
    right: &OverlaySide,
    config: &HighlightConfig,
) -> Vec<Annotation> {
    let right_origin = left.size.0 + config.gutter;
    let mut annotations: Vec<Annotation> = Vec::new();
    let mut index: HashMap<(Side, NodePath), usize> = HashMap::new();

    for change in changes {
        let side = change.side();
        let key = (side, change.node.path.clone());
        let slot = *index.entry(key).or_insert_with(|| {
            let rect = match side {
                Side::Left => change.node.rect.offset(-left.offset.0, -left.offset.1),
                Side::Right => change
                    .node
                    .rect
                    .offset(right_origin - right.offset.0, -right.offset.1),
            };
            annotations.push(Annotation {
                side,
                path: change.node.path.clone(),
                kind: ChangeType::NONE,
                rect,
                details: Vec::new(),
            });
            annotations.len() - 1
        });

        let annotation = &mut annotations[slot];
        annotation.kind |= change.kind;
        annotation.details.push(describe(change));
    }
    annotations
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn data_uri(png: &[u8]) -> String {
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png)
    )
}

/// Self-contained overlay page: both captures plus one box per annotation
pub fn compose_overlay_html(
    annotations: &[Annotation],
    left: &OverlaySide,
    right: &OverlaySide,
    config: &HighlightConfig,
) -> String {
    let right_origin = left.size.0 + config.gutter;
    let width = right_origin + right.size.0;
    let height = left.size.1.max(right.size.1);

    let mut html = String::with_capacity(
        4096 + (left.screenshot.len() + right.screenshot.len()) * 4 / 3,
    );
    // Writing into a String cannot fail
    let _ = write!(
        html,
        concat!(
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><style>",
            "html,body{{margin:0;padding:0;background:#fff}}",
            "body{{position:relative;width:{}px;height:{}px}}",
            ".panel{{position:absolute;top:0}}",
            ".mark{{position:absolute;box-sizing:border-box;border:2px dashed}}",
            ".mark span{{position:absolute;top:0;left:0;font:12px/16px sans-serif;",
            "white-space:nowrap;padding:0 2px}}",
            "</style></head><body>"
        ),
        width, height
    );
    for (x, side) in [(0.0, left), (right_origin, right)] {
        let _ = write!(
            html,
            "<img class=\"panel\" style=\"left:{}px;width:{}px;height:{}px\" src=\"{}\">",
            x,
            side.size.0,
            side.size.1,
            data_uri(&side.screenshot)
        );
    }

    for annotation in annotations {
        let styles = config.styles_for(annotation.kind);
        let Some(dominant) = styles.first() else {
            continue;
        };
        let label = styles
            .iter()
            .map(|s| escape_html(&s.title))
            .collect::<Vec<_>>()
            .join(" / ");
        let rect = annotation.rect;
        let _ = write!(
            html,
            concat!(
                "<div class=\"mark\" data-type=\"{}\" title=\"{}\" style=\"left:{}px;top:{}px;",
                "width:{}px;height:{}px;background:{};border-color:{};color:{}\">",
                "<span style=\"background:{}\">{}</span></div>"
            ),
            annotation.kind.bits(),
            escape_html(&annotation.details.join("\n")),
            rect.x,
            rect.y,
            rect.width,
            rect.height,
            escape_html(&dominant.background_color),
            escape_html(&dominant.border_color),
            escape_html(&dominant.color),
            escape_html(&dominant.border_color),
            label
        );
    }

    html.push_str("</body></html>");
    html
}

/// Rasterizes overlays through a render capability
pub struct HighlightRenderer<'a, R: RenderCapability + ?Sized> {
    renderer: &'a R,
}

impl<'a, R: RenderCapability + ?Sized> HighlightRenderer<'a, R> {
    pub fn new(renderer: &'a R) -> Self {
        Self { renderer }
    }

    /// Draw `changes` and write the overlay PNG to `overlay` (HTML next to it)
    pub async fn render(
        &self,
        changes: &[Change],
        left: &OverlaySide,
        right: &OverlaySide,
        config: &HighlightConfig,
        overlay: &Path,
    ) -> Result<Highlight> {
        let annotations = annotate(changes, left, right, config);
        let html = compose_overlay_html(&annotations, left, right, config);

        if let Some(parent) = overlay.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MonitorError::io(parent, e))?;
        }
        let html_path = overlay.with_extension("html");
        tokio::fs::write(&html_path, html)
            .await
            .map_err(|e| MonitorError::io(&html_path, e))?;

        let absolute = tokio::fs::canonicalize(&html_path)
            .await
            .map_err(|e| MonitorError::io(&html_path, e))?;
        let file_url = Url::from_file_path(&absolute).map_err(|_| MonitorError::InvalidUrl {
            url: absolute.display().to_string(),
            reason: "not an absolute file path".to_string(),
        })?;

        let page = self
            .renderer
            .navigate(file_url.as_str())
            .await
            .map_err(|e| MonitorError::render(file_url.as_str(), e))?;
        let shot = self.renderer.screenshot(&page, None).await;
        if let Err(e) = self.renderer.close(page).await {
            tracing::warn!("Failed to close overlay page: {}", e);
        }
        let png = shot.map_err(|e| MonitorError::render(file_url.as_str(), e))?;

        tokio::fs::write(overlay, &png)
            .await
            .map_err(|e| MonitorError::io(overlay, e))?;

        tracing::debug!(overlay = %overlay.display(), count = annotations.len(), "Rendered overlay");
        Ok(Highlight {
            overlay: overlay.to_path_buf(),
            html: html_path,
            count: annotations.len(),
        })
    }
}
