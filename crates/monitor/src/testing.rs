//! Scripted render capability for tests
//!
//! Serves canned page dumps per URL, counts opened and closed pages and can
//! slow a page down, stall or crash it, or raise a script error while it is
//! being walked.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;

use browser::render::Result;
use browser::{BrowserEvent, Clip, EventBus, PageHandle, RenderCapability, RenderError};

/// Dump of `<body>` holding one `<div id=..>text</div>` per item
pub fn page_dump(items: &[(&str, &str)]) -> Value {
    let children: Vec<Value> = items
        .iter()
        .enumerate()
        .map(|(i, (id, text))| {
            json!({
                "nodeType": 1,
                "nodeName": "DIV",
                "attributes": ["id", id],
                "bounds": [0, 20 * i, 375, 20],
                "styles": { "display": "block", "color": "rgb(0, 0, 0)" },
                "children": [{ "nodeType": 3, "nodeValue": text }]
            })
        })
        .collect();

    json!({
        "root": {
            "nodeType": 1,
            "nodeName": "HTML",
            "children": [{
                "nodeType": 1,
                "nodeName": "BODY",
                "bounds": [0, 0, 375, 600],
                "styles": { "display": "block" },
                "children": children
            }]
        },
        "viewport": { "width": 375, "height": 667 },
        "scroll": { "x": 0, "y": 0 }
    })
}

#[derive(Default)]
pub struct FakeRenderer {
    dumps: Mutex<HashMap<String, Value>>,
    crash_on_walk: Mutex<HashSet<String>>,
    stall_on_walk: Mutex<HashSet<String>>,
    load_delays: Mutex<HashMap<String, Duration>>,
    script_errors: Mutex<HashMap<String, String>>,
    open_pages: Mutex<HashMap<String, String>>,
    events: EventBus,
    next_id: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl FakeRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, dump: Value) {
        self.dumps.lock().unwrap().insert(url.to_string(), dump);
    }

    pub fn crash_on_walk(&self, url: &str) {
        self.crash_on_walk.lock().unwrap().insert(url.to_string());
    }

    pub fn stall_on_walk(&self, url: &str) {
        self.stall_on_walk.lock().unwrap().insert(url.to_string());
    }

    /// Make `navigate(url)` take `delay` before the page opens
    pub fn delay_load(&self, url: &str, delay: Duration) {
        self.load_delays
            .lock()
            .unwrap()
            .insert(url.to_string(), delay);
    }

    pub fn script_error_on(&self, url: &str, message: &str) {
        self.script_errors
            .lock()
            .unwrap()
            .insert(url.to_string(), message.to_string());
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> usize {
        self.open_pages.lock().unwrap().len()
    }
}

#[async_trait]
impl RenderCapability for FakeRenderer {
    async fn navigate(&self, url: &str) -> Result<PageHandle> {
        if !url.starts_with("file://") && !self.dumps.lock().unwrap().contains_key(url) {
            return Err(RenderError::Navigation {
                url: url.to_string(),
                reason: "net::ERR_NAME_NOT_RESOLVED".to_string(),
            });
        }

        let delay = self.load_delays.lock().unwrap().get(url).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let target_id = format!("T{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.open_pages
            .lock()
            .unwrap()
            .insert(target_id.clone(), url.to_string());
        self.events.publish(BrowserEvent::PageLoaded {
            target_id: target_id.clone(),
        });
        Ok(PageHandle {
            target_id,
            url: url.to_string(),
        })
    }

    async fn evaluate(
        &self,
        page: &PageHandle,
        _function_source: &str,
        _args: Vec<Value>,
    ) -> Result<Value> {
        if self.crash_on_walk.lock().unwrap().contains(&page.url) {
            self.events.publish(BrowserEvent::PageCrashed {
                target_id: page.target_id.clone(),
            });
            // A crashed page never answers
            std::future::pending::<()>().await;
        }

        if self.stall_on_walk.lock().unwrap().contains(&page.url) {
            std::future::pending::<()>().await;
        }

        let script_error = self.script_errors.lock().unwrap().get(&page.url).cloned();
        if let Some(message) = script_error {
            self.events.publish(BrowserEvent::PageError {
                target_id: page.target_id.clone(),
                message,
            });
        }

        self.dumps
            .lock()
            .unwrap()
            .get(&page.url)
            .cloned()
            .ok_or_else(|| RenderError::Script("nothing to evaluate".to_string()))
    }

    async fn screenshot(&self, page: &PageHandle, clip: Option<Clip>) -> Result<Vec<u8>> {
        Ok(format!("png {} {:?}", page.url, clip).into_bytes())
    }

    async fn close(&self, page: PageHandle) -> Result<()> {
        if self.open_pages.lock().unwrap().remove(&page.target_id).is_none() {
            return Err(RenderError::PageNotFound(page.target_id));
        }
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.events.publish(BrowserEvent::PageClosed {
            target_id: page.target_id,
        });
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<BrowserEvent> {
        self.events.subscribe()
    }
}
