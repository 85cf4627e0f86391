//! Page Monitor
//!
//! Captures pages through a `RenderCapability`, keeps their snapshots on
//! disk and turns differences between two snapshots into an overlay image.
//!
//! ## Runs
//!
//! ```text
//! CAPTURE(url, time)   render → walk → store ──(diff)──→ highlight vs latest
//! DIFF(time, path)     store → two hosts' trees at time → highlight
//! ```
//!
//! ## Layout on disk
//!
//! ```text
//! {root}/{host}/{time}/{path}/tree.json | screenshot.png | info.json
//! {root}/latest/manifest.json | cache.json
//! {root}/diff/{host}/{prior}-{time}/{path}.png
//! {root}/diff/{time}/{path}.png
//! ```

pub mod config;
pub mod error;
pub mod highlight;
pub mod observer;
pub mod orchestrator;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{MonitorConfig, PageConfig};
pub use error::{MonitorError, Result};
pub use highlight::{Annotation, Highlight, HighlightConfig, HighlightRenderer, HighlightStyle};
pub use observer::{ChannelObserver, LogLevel, MonitorRecord, Observer, SharedObserver, TracingObserver};
pub use orchestrator::{now_millis, CaptureOutcome, DiffOutcome, Monitor, RunState};
pub use store::{CaptureInfo, LatestSnapshot, SavedCapture, SnapshotStore};
