//! Browser - CDP-backed page rendering
//!
//! Drives an already-running Chrome over the DevTools Protocol and exposes
//! the small `RenderCapability` surface page monitoring needs: open a page,
//! evaluate a function in it, take a screenshot, close it, and watch its
//! lifecycle events.
//!
//! ```text
//! BrowserSession ── Arc<CDPClient> ── one WebSocket
//!       │                 └── CDP events → EventBus (BrowserEvent)
//!       └── CDPSession per page (flattened target session)
//! ```

pub mod cdp;
pub mod events;
pub mod render;
pub mod session;

pub use cdp::{CDPClient, CDPError, CDPSession};
pub use events::{BrowserEvent, EventBus};
pub use render::{Clip, PageHandle, RenderCapability, RenderError, Viewport};
pub use session::{BrowserSession, SessionConfig};
