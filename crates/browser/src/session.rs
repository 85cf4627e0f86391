//! Browser Session Management
//!
//! CDP-backed `RenderCapability`. One WebSocket to the browser, one target
//! plus flattened session per page.

use async_trait::async_trait;
use base64::Engine;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::cdp::protocol::{CreateTargetResult, SessionId, TargetId};
use crate::cdp::{CDPClient, CDPSession};
use crate::events::{BrowserEvent, EventBus};
use crate::render::*;

/// CDP events relayed onto the event bus
const RELAYED_EVENTS: &[&str] = &[
    "Page.loadEventFired",
    "Inspector.targetCrashed",
    "Runtime.exceptionThrown",
    "Runtime.consoleAPICalled",
];

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub id: String,
    /// Browser-level DevTools websocket URL
    pub cdp_url: String,
    pub viewport: Viewport,
    pub load_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            cdp_url: "ws://localhost:9222".to_string(),
            viewport: Viewport::default(),
            load_timeout_ms: 30_000,
        }
    }
}

impl SessionConfig {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }
}

/// Browser Session - manages connection to Chrome and its pages
pub struct BrowserSession {
    pub config: SessionConfig,
    pub event_bus: Arc<EventBus>,

    // CDP infrastructure
    cdp_client: Arc<RwLock<Option<Arc<CDPClient>>>>,
    sessions: Arc<RwLock<HashMap<TargetId, CDPSession>>>,

    /// Reverse index for relaying session-scoped events
    targets: Arc<DashMap<SessionId, TargetId>>,
}

impl BrowserSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            event_bus: Arc::new(EventBus::new()),
            cdp_client: Arc::new(RwLock::new(None)),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            targets: Arc::new(DashMap::new()),
        }
    }

    /// Connect to the browser and start relaying page events
    pub async fn start(&self) -> Result<()> {
        let client = CDPClient::connect(&self.config.cdp_url).await?;

        for method in RELAYED_EVENTS {
            let targets = self.targets.clone();
            let tx = self.event_bus.sender();
            client.subscribe(
                *method,
                Arc::new(move |event| {
                    let target_id = event
                        .session_id
                        .as_ref()
                        .and_then(|session_id| targets.get(session_id).map(|t| t.value().clone()));
                    if let Some(target_id) = target_id {
                        if let Some(event) = BrowserEvent::from_cdp(&event, &target_id) {
                            let _ = tx.send(event);
                        }
                    }
                }),
            );
        }

        // Browser-level: the target id is in the params
        let tx = self.event_bus.sender();
        client.subscribe(
            "Target.targetDestroyed",
            Arc::new(move |event| {
                let target_id = event
                    .params
                    .as_ref()
                    .and_then(|p| p["targetId"].as_str())
                    .map(str::to_string);
                if let Some(target_id) = target_id {
                    if let Some(event) = BrowserEvent::from_cdp(&event, &target_id) {
                        let _ = tx.send(event);
                    }
                }
            }),
        );
        client
            .send_request(
                "Target.setDiscoverTargets",
                Some(json!({ "discover": true })),
                None,
            )
            .await?;

        *self.cdp_client.write().await = Some(client);
        tracing::info!(session = %self.config.id, "Browser session started");
        Ok(())
    }

    /// Close every open page and disconnect
    pub async fn stop(&self) -> Result<()> {
        let open: Vec<TargetId> = self.sessions.read().await.keys().cloned().collect();
        for target_id in open {
            let page = PageHandle {
                target_id,
                url: String::new(),
            };
            if let Err(e) = self.close(page).await {
                tracing::warn!("Failed to close page during stop: {}", e);
            }
        }

        if let Some(client) = self.cdp_client.write().await.take() {
            client.close().await?;
        }
        tracing::info!(session = %self.config.id, "Browser session stopped");
        Ok(())
    }

    async fn client(&self) -> Result<Arc<CDPClient>> {
        self.cdp_client
            .read()
            .await
            .as_ref()
            .cloned()
            .ok_or(RenderError::NotConnected)
    }

    async fn session(&self, page: &PageHandle) -> Result<CDPSession> {
        self.sessions
            .read()
            .await
            .get(&page.target_id)
            .cloned()
            .ok_or_else(|| RenderError::PageNotFound(page.target_id.clone()))
    }

    /// Wait until `target_id` fires its load event, or fails
    async fn wait_for_load(
        &self,
        events: &mut broadcast::Receiver<BrowserEvent>,
        target_id: &str,
        url: &str,
    ) -> Result<()> {
        let wait = async {
            loop {
                match events.recv().await {
                    Ok(event) if event.target_id() != target_id => continue,
                    Ok(BrowserEvent::PageLoaded { .. }) => return Ok(()),
                    Ok(BrowserEvent::PageCrashed { .. }) => {
                        return Err(RenderError::Crashed(target_id.to_string()))
                    }
                    Ok(BrowserEvent::PageClosed { .. }) => {
                        return Err(RenderError::PageNotFound(target_id.to_string()))
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Event stream lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(RenderError::NotConnected)
                    }
                }
            }
        };

        tokio::time::timeout(self.config.load_timeout(), wait)
            .await
            .map_err(|_| RenderError::Timeout(format!("load event of {}", url)))?
    }

    async fn open(&self, client: Arc<CDPClient>, target_id: &TargetId, url: &str) -> Result<CDPSession> {
        let session = CDPSession::attach(client, target_id.clone(), None).await?;
        self.targets
            .insert(session.session_id.clone(), target_id.clone());

        let viewport = self.config.viewport;
        session
            .set_device_metrics(
                viewport.width,
                viewport.height,
                viewport.device_scale_factor,
                viewport.mobile,
            )
            .await?;

        // Subscribe before navigating so the load event cannot be missed
        let mut events = self.event_bus.subscribe();
        let navigation = session.navigate(url).await?;
        if let Some(reason) = navigation.error_text.filter(|e| !e.is_empty()) {
            return Err(RenderError::Navigation {
                url: url.to_string(),
                reason,
            });
        }
        self.wait_for_load(&mut events, target_id, url).await?;
        Ok(session)
    }
}

#[async_trait]
impl RenderCapability for BrowserSession {
    async fn navigate(&self, url: &str) -> Result<PageHandle> {
        let client = self.client().await?;

        let result = client
            .send_request(
                "Target.createTarget",
                Some(json!({ "url": "about:blank" })),
                None,
            )
            .await?;
        let target_id = serde_json::from_value::<CreateTargetResult>(result)
            .map_err(crate::cdp::CDPError::from)?
            .target_id;
        tracing::debug!(%target_id, url, "Opened page");

        match self.open(client.clone(), &target_id, url).await {
            Ok(session) => {
                self.sessions
                    .write()
                    .await
                    .insert(target_id.clone(), session);
                Ok(PageHandle {
                    target_id,
                    url: url.to_string(),
                })
            }
            Err(e) => {
                // The caller never sees a handle, so the target is ours to close
                self.targets.retain(|_, t| *t != target_id);
                let _ = client
                    .send_request(
                        "Target.closeTarget",
                        Some(json!({ "targetId": target_id })),
                        None,
                    )
                    .await;
                Err(e)
            }
        }
    }

    async fn evaluate(
        &self,
        page: &PageHandle,
        function_source: &str,
        args: Vec<Value>,
    ) -> Result<Value> {
        let session = self.session(page).await?;
        let result = session.call_function(function_source, &args).await?;

        if let Some(details) = result.exception_details {
            return Err(RenderError::Script(details.message()));
        }
        Ok(result.result.value.unwrap_or(Value::Null))
    }

    async fn screenshot(&self, page: &PageHandle, clip: Option<Clip>) -> Result<Vec<u8>> {
        let session = self.session(page).await?;
        let clip = match clip {
            Some(clip) => clip,
            None => {
                let (width, height) = session.content_size().await?;
                Clip::new(0.0, 0.0, width, height)
            }
        };

        let data = session
            .capture_screenshot(clip.x, clip.y, clip.width, clip.height)
            .await?;
        base64::engine::general_purpose::STANDARD
            .decode(data.as_bytes())
            .map_err(|e| RenderError::Decode(e.to_string()))
    }

    async fn close(&self, page: PageHandle) -> Result<()> {
        let session = self.sessions.write().await.remove(&page.target_id);
        let Some(session) = session else {
            return Err(RenderError::PageNotFound(page.target_id));
        };
        self.targets.remove(&session.session_id);

        let client = self.client().await?;
        client
            .send_request_timeout(
                "Target.closeTarget",
                Some(json!({ "targetId": page.target_id })),
                None,
                self.config.load_timeout(),
            )
            .await?;
        tracing::debug!(target_id = %page.target_id, "Closed page");
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<BrowserEvent> {
        self.event_bus.subscribe()
    }
}
