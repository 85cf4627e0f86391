//! CDP Session - Represents a connection to a specific browser target
//!
//! Design: Lightweight wrapper around CDPClient with target-specific context.
//! All sessions share the same WebSocket - no per-session connection overhead.

use super::client::{CDPClient, CDPError, Result};
use super::protocol::*;
use serde_json::{json, Value};
use std::sync::Arc;

/// Domains a render page needs: load events, evaluation, crash reports
pub const PAGE_DOMAINS: &[&str] = &["Page", "Runtime", "Inspector"];

/// CDP Session bound to a specific target
#[derive(Clone)]
pub struct CDPSession {
    /// Shared CDP client
    client: Arc<CDPClient>,

    /// Target this session is attached to
    pub target_id: TargetId,

    /// Session ID assigned by Chrome
    pub session_id: SessionId,
}

impl CDPSession {
    /// Attach to a target (flattened) and enable the given domains
    pub async fn attach(
        client: Arc<CDPClient>,
        target_id: TargetId,
        domains: Option<Vec<&str>>,
    ) -> Result<Self> {
        let result = client
            .send_request(
                "Target.attachToTarget",
                Some(json!({
                    "targetId": target_id,
                    "flatten": true,
                })),
                None,
            )
            .await?;

        let attach_result: AttachToTargetResult = serde_json::from_value(result)?;
        let session_id = attach_result.session_id;

        let domains = domains.unwrap_or_else(|| PAGE_DOMAINS.to_vec());

        // Enable all domains in parallel
        let enable_futures: Vec<_> = domains
            .into_iter()
            .map(|domain| {
                let client = client.clone();
                let session_id = session_id.clone();
                async move {
                    client
                        .send_request(format!("{}.enable", domain), None, Some(session_id))
                        .await
                }
            })
            .collect();

        // Wait for all enables (ignore individual failures)
        let results = futures_util::future::join_all(enable_futures).await;
        let failures = results.iter().filter(|r| r.is_err()).count();
        if failures > 0 {
            tracing::warn!(
                "Some domain enables failed: {}/{}",
                failures,
                results.len()
            );
        }

        Ok(Self {
            client,
            target_id,
            session_id,
        })
    }

    /// Send command within this session's context
    pub async fn send(&self, method: impl Into<String>, params: Option<Value>) -> Result<Value> {
        self.client
            .send_request(method, params, Some(self.session_id.clone()))
            .await
    }

    /// Emulate a device viewport
    pub async fn set_device_metrics(
        &self,
        width: u32,
        height: u32,
        device_scale_factor: f64,
        mobile: bool,
    ) -> Result<()> {
        self.send(
            "Emulation.setDeviceMetricsOverride",
            Some(json!({
                "width": width,
                "height": height,
                "deviceScaleFactor": device_scale_factor,
                "mobile": mobile,
            })),
        )
        .await?;
        Ok(())
    }

    /// Navigate to URL
    pub async fn navigate(&self, url: impl Into<String>) -> Result<NavigateResult> {
        let result = self
            .send("Page.navigate", Some(json!({ "url": url.into() })))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Evaluate JavaScript
    pub async fn evaluate(&self, expression: impl Into<String>) -> Result<EvaluateResult> {
        let result = self
            .send(
                "Runtime.evaluate",
                Some(json!({
                    "expression": expression.into(),
                    "awaitPromise": true,
                    "returnByValue": true,
                })),
            )
            .await?;

        Ok(serde_json::from_value(result)?)
    }

    /// Call a function expression with JSON arguments: `(source)(arg0, arg1, ...)`
    pub async fn call_function(&self, source: &str, args: &[Value]) -> Result<EvaluateResult> {
        let args = args
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.evaluate(format!("({})({})", source, args.join(", ")))
            .await
    }

    /// Full scrollable content size in CSS pixels
    pub async fn content_size(&self) -> Result<(f64, f64)> {
        let metrics = self.send("Page.getLayoutMetrics", None).await?;
        let size = if metrics["cssContentSize"].is_object() {
            &metrics["cssContentSize"]
        } else {
            &metrics["contentSize"]
        };
        match (size["width"].as_f64(), size["height"].as_f64()) {
            (Some(width), Some(height)) => Ok((width, height)),
            _ => Err(CDPError::Protocol {
                code: -1,
                message: "Page.getLayoutMetrics returned no content size".to_string(),
            }),
        }
    }

    /// PNG screenshot of a page region, base64 encoded
    pub async fn capture_screenshot(&self, x: f64, y: f64, width: f64, height: f64) -> Result<String> {
        let result = self
            .send(
                "Page.captureScreenshot",
                Some(json!({
                    "format": "png",
                    "captureBeyondViewport": true,
                    "clip": { "x": x, "y": y, "width": width, "height": height, "scale": 1 },
                })),
            )
            .await?;
        let screenshot: ScreenshotResult = serde_json::from_value(result)?;
        Ok(screenshot.data)
    }
}
