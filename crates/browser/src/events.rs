//! Event Bus - page lifecycle events
//!
//! Design: Type-safe events over a broadcast channel.
//! No dynamic dispatch overhead - use enums, not trait objects.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::cdp::protocol::{CDPEvent, TargetId};

/// Page events a render capability reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BrowserEvent {
    PageLoaded { target_id: TargetId },
    /// Uncaught script exception
    PageError { target_id: TargetId, message: String },
    PageCrashed { target_id: TargetId },
    ConsoleMessage {
        target_id: TargetId,
        level: String,
        text: String,
    },
    PageClosed { target_id: TargetId },
}

impl BrowserEvent {
    pub fn target_id(&self) -> &str {
        match self {
            BrowserEvent::PageLoaded { target_id }
            | BrowserEvent::PageError { target_id, .. }
            | BrowserEvent::PageCrashed { target_id }
            | BrowserEvent::ConsoleMessage { target_id, .. }
            | BrowserEvent::PageClosed { target_id } => target_id,
        }
    }

    /// Translate a raw CDP event for the page `target_id`
    pub fn from_cdp(event: &CDPEvent, target_id: &str) -> Option<Self> {
        let target_id = target_id.to_string();
        let params = event.params.as_ref().unwrap_or(&Value::Null);

        match event.method.as_str() {
            "Page.loadEventFired" => Some(BrowserEvent::PageLoaded { target_id }),
            "Inspector.targetCrashed" => Some(BrowserEvent::PageCrashed { target_id }),
            "Runtime.exceptionThrown" => {
                let details = &params["exceptionDetails"];
                let message = details["exception"]["description"]
                    .as_str()
                    .or_else(|| details["text"].as_str())
                    .unwrap_or("unknown exception")
                    .to_string();
                Some(BrowserEvent::PageError { target_id, message })
            }
            "Runtime.consoleAPICalled" => {
                let level = params["type"].as_str().unwrap_or("log").to_string();
                let text = params["args"]
                    .as_array()
                    .map(|args| {
                        args.iter()
                            .map(|arg| match (&arg["value"], arg["description"].as_str()) {
                                (Value::String(s), _) => s.clone(),
                                (Value::Null, Some(description)) => description.to_string(),
                                (value, _) => value.to_string(),
                            })
                            .collect::<Vec<_>>()
                            .join(" ")
                    })
                    .unwrap_or_default();
                Some(BrowserEvent::ConsoleMessage {
                    target_id,
                    level,
                    text,
                })
            }
            "Target.targetDestroyed" => Some(BrowserEvent::PageClosed { target_id }),
            _ => None,
        }
    }
}

/// Simple event bus using tokio broadcast channel
pub struct EventBus {
    tx: broadcast::Sender<BrowserEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    /// Publish an event
    pub fn publish(&self, event: BrowserEvent) {
        let _ = self.tx.send(event); // Ignore error if no subscribers
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<BrowserEvent> {
        self.tx.subscribe()
    }

    /// Sender half, for relays living in CDP callbacks
    pub fn sender(&self) -> broadcast::Sender<BrowserEvent> {
        self.tx.clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
