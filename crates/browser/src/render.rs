//! Render Capability - the seam between page monitoring and a real browser
//!
//! Everything the monitor needs from a browser fits in five calls. The CDP
//! backed `BrowserSession` is one implementation; tests script another.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::cdp::client::CDPError;
use crate::cdp::protocol::TargetId;
use crate::events::BrowserEvent;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("CDP error: {0}")]
    Cdp(#[from] CDPError),

    #[error("Browser session not connected")]
    NotConnected,

    #[error("Page not found: {0}")]
    PageNotFound(TargetId),

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Script error: {0}")]
    Script(String),

    #[error("Page crashed: {0}")]
    Crashed(TargetId),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Failed to decode screenshot: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, RenderError>;

/// An open page
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageHandle {
    pub target_id: TargetId,
    pub url: String,
}

/// Screenshot region in page (CSS pixel) coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Clip {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Clip {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Emulated device viewport
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
    pub mobile: bool,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 375,
            height: 667,
            device_scale_factor: 2.0,
            mobile: true,
        }
    }
}

/// What the monitor needs from a browser
#[async_trait]
pub trait RenderCapability: Send + Sync {
    /// Open a page on `url` and wait for it to load
    async fn navigate(&self, url: &str) -> Result<PageHandle>;

    /// Call `function_source` in the page with JSON arguments, returning its value
    async fn evaluate(
        &self,
        page: &PageHandle,
        function_source: &str,
        args: Vec<Value>,
    ) -> Result<Value>;

    /// PNG of `clip`, or of the full page when `None`
    async fn screenshot(&self, page: &PageHandle, clip: Option<Clip>) -> Result<Vec<u8>>;

    async fn close(&self, page: PageHandle) -> Result<()>;

    /// Page events for every page this capability opens
    fn events(&self) -> broadcast::Receiver<BrowserEvent>;
}
