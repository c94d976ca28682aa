//! CDP Connection/Session Management
//!
//! Manages browser and page sessions over the CDP transport.

use std::sync::Arc;

use super::transport::{CdpMessage, Transport};
use super::types::*;
use crate::error::{Error, Result};

/// A CDP connection to Chrome
pub struct Connection {
    transport: Arc<Transport>,
}

impl Connection {
    /// Create a new connection wrapping a transport
    pub fn new(transport: Transport) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    /// Get browser version info
    pub async fn version(&self) -> Result<BrowserGetVersionResult> {
        self.transport
            .send("Browser.getVersion", &BrowserGetVersion {})
            .await
    }

    /// Create a new target (tab)
    pub async fn create_target(
        &self,
        url: &str,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Result<String> {
        let result: TargetCreateTargetResult = self
            .transport
            .send(
                "Target.createTarget",
                &TargetCreateTarget {
                    url: url.to_string(),
                    width,
                    height,
                },
            )
            .await?;
        Ok(result.target_id)
    }

    /// Attach to a target and get a session
    pub async fn attach_to_target(&self, target_id: &str) -> Result<Session> {
        let result: TargetAttachToTargetResult = self
            .transport
            .send(
                "Target.attachToTarget",
                &TargetAttachToTarget {
                    target_id: target_id.to_string(),
                    flatten: Some(true),
                },
            )
            .await?;

        Ok(Session {
            transport: Arc::clone(&self.transport),
            session_id: result.session_id,
            target_id: target_id.to_string(),
        })
    }

    /// Close a target
    pub async fn close_target(&self, target_id: &str) -> Result<bool> {
        let result: TargetCloseTargetResult = self
            .transport
            .send(
                "Target.closeTarget",
                &TargetCloseTarget {
                    target_id: target_id.to_string(),
                },
            )
            .await?;
        Ok(result.success)
    }

    /// Close the browser
    pub async fn close(&self) -> Result<()> {
        let _ = self
            .transport
            .send::<_, serde_json::Value>("Browser.close", &BrowserClose {})
            .await;
        self.transport.close().await
    }
}

/// A CDP session attached to a specific target
pub struct Session {
    transport: Arc<Transport>,
    session_id: String,
    target_id: String,
}

impl Session {
    /// Get the session ID
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Get the target ID
    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    /// Send a command to this session
    pub async fn send<C, R>(&self, method: &str, params: &C) -> Result<R>
    where
        C: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        self.transport
            .send_to_session(&self.session_id, method, params)
            .await
    }

    /// Wait for the next event named `method` addressed to this session.
    ///
    /// Other events are discarded. Returns `None` once the transport closes.
    pub async fn next_event(&self, method: &str) -> Option<serde_json::Value> {
        loop {
            match self.transport.recv_event().await? {
                CdpMessage::Event {
                    method: m,
                    params,
                    session_id,
                } if m == method && session_id.as_deref() == Some(self.session_id.as_str()) => {
                    return Some(params);
                }
                CdpMessage::Event { method: m, .. } => {
                    tracing::trace!("Skipping event {}", m);
                }
                CdpMessage::Response { .. } => {}
            }
        }
    }

    /// Enable page events
    pub async fn page_enable(&self) -> Result<()> {
        self.send::<_, serde_json::Value>("Page.enable", &PageEnable {})
            .await?;
        Ok(())
    }

    /// Enable runtime events; required for `Runtime.bindingCalled`
    pub async fn runtime_enable(&self) -> Result<()> {
        self.send::<_, serde_json::Value>("Runtime.enable", &RuntimeEnable {})
            .await?;
        Ok(())
    }

    /// Expose `window[name](payload)` to page scripts
    pub async fn add_binding(&self, name: &str) -> Result<()> {
        self.send::<_, serde_json::Value>(
            "Runtime.addBinding",
            &RuntimeAddBinding {
                name: name.to_string(),
            },
        )
        .await?;
        Ok(())
    }

    /// Navigate to a URL
    pub async fn navigate(&self, url: &str) -> Result<PageNavigateResult> {
        self.send(
            "Page.navigate",
            &PageNavigate {
                url: url.to_string(),
            },
        )
        .await
    }

    /// Add a script to evaluate on every new document
    pub async fn add_script_to_evaluate_on_new_document(&self, source: &str) -> Result<String> {
        let result: PageAddScriptToEvaluateOnNewDocumentResult = self
            .send(
                "Page.addScriptToEvaluateOnNewDocument",
                &PageAddScriptToEvaluateOnNewDocument {
                    source: source.to_string(),
                },
            )
            .await?;
        Ok(result.identifier)
    }

    /// Capture a screenshot of the visible viewport; returns the base64 data as sent
    pub async fn capture_screenshot_base64(
        &self,
        format: Option<&str>,
        quality: Option<u8>,
    ) -> Result<String> {
        let result: PageCaptureScreenshotResult = self
            .send(
                "Page.captureScreenshot",
                &PageCaptureScreenshot {
                    format: format.map(String::from),
                    quality,
                    from_surface: Some(true),
                },
            )
            .await?;
        if result.data.is_empty() {
            return Err(Error::Decode("empty screenshot data".into()));
        }
        Ok(result.data)
    }

    /// Capture a screenshot and decode it
    pub async fn capture_screenshot(
        &self,
        format: Option<&str>,
        quality: Option<u8>,
    ) -> Result<Vec<u8>> {
        use base64::Engine;
        let data = self.capture_screenshot_base64(format, quality).await?;
        Ok(base64::engine::general_purpose::STANDARD.decode(data)?)
    }

    /// Get the frame tree
    pub async fn get_frame_tree(&self) -> Result<FrameTree> {
        let result: PageGetFrameTreeResult =
            self.send("Page.getFrameTree", &PageGetFrameTree {}).await?;
        Ok(result.frame_tree)
    }

    /// Dispatch a raw mouse event
    pub async fn dispatch_mouse_event(&self, event: InputDispatchMouseEvent) -> Result<()> {
        self.send::<_, serde_json::Value>("Input.dispatchMouseEvent", &event)
            .await?;
        Ok(())
    }

    /// Evaluate JavaScript expression and return the result by value
    pub async fn evaluate(&self, expression: &str) -> Result<RuntimeEvaluateResult> {
        self.evaluate_impl(expression, true).await
    }

    /// Evaluate without awaiting promises; the expression runs in one turn
    pub async fn evaluate_sync(&self, expression: &str) -> Result<RuntimeEvaluateResult> {
        self.evaluate_impl(expression, false).await
    }

    async fn evaluate_impl(
        &self,
        expression: &str,
        await_promise: bool,
    ) -> Result<RuntimeEvaluateResult> {
        self.send(
            "Runtime.evaluate",
            &RuntimeEvaluate {
                expression: expression.to_string(),
                return_by_value: Some(true),
                await_promise: Some(await_promise),
            },
        )
        .await
    }
}
