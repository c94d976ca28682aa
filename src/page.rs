//! Page Abstraction
//!
//! A capture tab: navigation, script evaluation, screenshots, snapshots and
//! the click trigger.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cdp::types::{
    InputDispatchMouseEvent, MouseButton, MouseEventType, RuntimeBindingCalledEvent,
    RuntimeEvaluateResult,
};
use crate::cdp::Session;
use crate::error::{Error, Result};
use crate::payload::CapturePayload;
use crate::relay::Rasterizer;
use crate::snapshot::{snapshot_expression, PageSnapshot};
use crate::trigger::{CaptureTrigger, Modifier, TriggerEvent};
use crate::CaptureConfig;

/// Name of the CDP binding the click listener reports through
pub const TRIGGER_BINDING: &str = "__webuicaptureEmit";

/// Turn a thrown exception into an error, otherwise hand back the result
fn check_exception(result: RuntimeEvaluateResult) -> Result<RuntimeEvaluateResult> {
    match result.exception_details {
        Some(ref exception) => Err(Error::Script {
            text: exception.message(),
            line: exception.line_number,
            column: exception.column_number,
        }),
        None => Ok(result),
    }
}

/// A browser tab driven for captures
pub struct Page {
    session: Session,
    config: Arc<CaptureConfig>,
}

impl Page {
    /// Create a new Page wrapping a CDP session
    pub(crate) fn new(session: Session, config: Arc<CaptureConfig>) -> Self {
        Self { session, config }
    }

    /// Get the underlying CDP session
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn target_id(&self) -> &str {
        self.session.target_id()
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    /// Navigate to a URL
    pub async fn goto(&self, url: &str) -> Result<()> {
        let result = self.session.navigate(url).await?;
        if let Some(error) = result.error_text {
            return Err(Error::Navigation(error));
        }
        // Let the new document start loading before anyone polls it
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        Ok(())
    }

    /// Wait until `document.readyState` is `complete` (30 second limit)
    pub async fn wait_for_navigation(&self) -> Result<()> {
        self.wait_for_navigation_timeout(30_000).await
    }

    /// Wait for navigation with a custom timeout in milliseconds
    pub async fn wait_for_navigation_timeout(&self, timeout_ms: u64) -> Result<()> {
        let start = std::time::Instant::now();
        let timeout = std::time::Duration::from_millis(timeout_ms);
        let poll_interval = std::time::Duration::from_millis(50);

        loop {
            // readyState is unavailable mid-navigation; keep polling
            if let Ok(result) = self.session.evaluate("document.readyState").await {
                if result.result.value.as_ref().and_then(|v| v.as_str()) == Some("complete") {
                    return Ok(());
                }
            }

            if start.elapsed() > timeout {
                return Err(Error::Timeout(format!(
                    "Navigation did not complete within {}ms",
                    timeout_ms
                )));
            }

            tokio::time::sleep(poll_interval).await;
        }
    }

    // =========================================================================
    // Page Info
    // =========================================================================

    /// Get current URL
    pub async fn url(&self) -> Result<String> {
        let frame_tree = self.session.get_frame_tree().await?;
        Ok(frame_tree.frame.url)
    }

    /// Get page title
    pub async fn title(&self) -> Result<String> {
        let title: Option<String> = self.evaluate("document.title").await.ok();
        Ok(title.unwrap_or_default())
    }

    // =========================================================================
    // JavaScript Evaluation
    // =========================================================================

    /// Evaluate JavaScript and return the result
    pub async fn evaluate<T: serde::de::DeserializeOwned>(&self, expression: &str) -> Result<T> {
        let result = check_exception(self.session.evaluate(expression).await?)?;
        match result.result.value {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Err(Error::cdp(
                "Runtime.evaluate",
                -1,
                "No value returned from evaluate",
            )),
        }
    }

    /// Execute JavaScript without expecting a return value
    pub async fn execute(&self, expression: &str) -> Result<()> {
        check_exception(self.session.evaluate(expression).await?)?;
        Ok(())
    }

    // =========================================================================
    // Screenshots
    // =========================================================================

    /// Screenshot of the visible viewport in the configured format
    pub async fn screenshot(&self) -> Result<Vec<u8>> {
        self.session
            .capture_screenshot(Some(self.config.screenshot_format.as_str()), None)
            .await
    }

    // =========================================================================
    // Capture
    // =========================================================================

    /// Take a snapshot of the element tree in one script turn
    pub async fn snapshot(&self, trigger: &CaptureTrigger) -> Result<PageSnapshot> {
        let expression = snapshot_expression(trigger.capture_root(), trigger.node_limit());
        let result = check_exception(self.session.evaluate_sync(&expression).await?)?;
        let value = result
            .result
            .value
            .ok_or_else(|| Error::cdp("Runtime.evaluate", -1, "Snapshot returned no value"))?;
        let snapshot: PageSnapshot = serde_json::from_value(value)?;
        tracing::debug!(
            "Snapshot of {}: {} elements",
            snapshot.metrics.url,
            snapshot.dom.len()
        );
        Ok(snapshot)
    }

    /// Programmatic capture: snapshot, extract, then screenshot
    pub async fn capture(&self, trigger: &CaptureTrigger) -> Result<CapturePayload> {
        let snapshot = self.snapshot(trigger).await?;
        let capture = trigger.fire(&snapshot);
        let image = self.screenshot().await?;

        let payload = CapturePayload::new(capture.record, image);
        payload.check_alignment(&capture.view_rect);
        tracing::info!(
            "Captured {} ({} elements)",
            payload.url,
            payload.bbox_tree.as_ref().map(|t| t.len()).unwrap_or(0)
        );
        Ok(payload)
    }

    /// Install the click listener in this and every future document of the tab
    pub async fn install_trigger(&self, trigger: &CaptureTrigger) -> Result<()> {
        self.session.runtime_enable().await?;
        self.session.add_binding(TRIGGER_BINDING).await?;

        let script = trigger.listener_script(TRIGGER_BINDING);
        self.session
            .add_script_to_evaluate_on_new_document(&script)
            .await?;
        self.execute(&script).await?;

        tracing::info!("Capture trigger installed ({:?}+click)", trigger.gate());
        Ok(())
    }

    /// Wait for the next click reported by the listener.
    ///
    /// Malformed reports are logged and skipped. Returns `None` once the
    /// browser connection is gone.
    pub async fn next_trigger_event(&self) -> Option<TriggerEvent> {
        loop {
            let params = self.session.next_event("Runtime.bindingCalled").await?;
            let called: RuntimeBindingCalledEvent = match serde_json::from_value(params) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!("Unreadable bindingCalled event: {}", e);
                    continue;
                }
            };
            if called.name != TRIGGER_BINDING {
                continue;
            }
            match serde_json::from_str::<TriggerEvent>(&called.payload) {
                Ok(event) => return Some(event),
                Err(e) => tracing::warn!("Dropping malformed trigger report: {}", e),
            }
        }
    }

    // =========================================================================
    // Input
    // =========================================================================

    /// Left click at CSS-pixel coordinates
    pub async fn click_at(&self, x: f64, y: f64) -> Result<()> {
        self.click_at_with_modifier(x, y, None).await
    }

    /// Left click with a modifier key held
    pub async fn click_at_with_modifier(
        &self,
        x: f64,
        y: f64,
        modifier: Option<Modifier>,
    ) -> Result<()> {
        let modifiers = modifier.map(Modifier::cdp_flag);
        for r#type in [MouseEventType::MousePressed, MouseEventType::MouseReleased] {
            self.session
                .dispatch_mouse_event(InputDispatchMouseEvent {
                    r#type,
                    x,
                    y,
                    modifiers,
                    button: Some(MouseButton::Left),
                    click_count: Some(1),
                })
                .await?;
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        Ok(())
    }
}

#[async_trait]
impl Rasterizer for Page {
    async fn rasterize(&self) -> Result<String> {
        self.session
            .capture_screenshot_base64(Some(self.config.screenshot_format.as_str()), None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::types::ExceptionDetails;

    #[test]
    fn test_check_exception() {
        let ok = RuntimeEvaluateResult::default();
        assert!(check_exception(ok).is_ok());

        let thrown = RuntimeEvaluateResult {
            exception_details: Some(ExceptionDetails {
                text: "Uncaught".into(),
                line_number: 2,
                column_number: 9,
                exception: None,
            }),
            ..Default::default()
        };
        match check_exception(thrown) {
            Err(Error::Script { text, line, column }) => {
                assert_eq!(text, "Uncaught");
                assert_eq!((line, column), (2, 9));
            }
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }
}
